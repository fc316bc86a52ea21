// ============================================================================
// src/image/loopmount.rs – Loop mount of the backing file at the scratch path
// ============================================================================

use crate::cmd::{Runner, Tool};
use crate::error::{ImageError, ImageResult};
use crate::mounts::MountTable;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Scratch mountpoint used when neither the CLI nor the config names one.
pub const DEFAULT_SCRATCH: &str = "/mnt/img-mnt";

/// Mounts an image file at a single scratch mountpoint.
///
/// The scratch path is a host-wide resource: two mounters pointed at the
/// same path will race, and nothing here prevents that.
pub struct LoopMounter<'a> {
    runner: &'a dyn Runner,
    mounts: &'a dyn MountTable,
    mountpoint: PathBuf,
}

impl<'a> LoopMounter<'a> {
    pub fn new(
        runner: &'a dyn Runner,
        mounts: &'a dyn MountTable,
        mountpoint: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            mounts,
            mountpoint: mountpoint.into(),
        }
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn ensure_mountpoint(&self) -> ImageResult<()> {
        fs::create_dir_all(&self.mountpoint).map_err(|e| {
            ImageError::io(
                format!("create scratch mountpoint {}", self.mountpoint.display()),
                e,
            )
        })
    }

    pub fn is_mounted(&self) -> ImageResult<bool> {
        self.mounts.is_mounted(&self.mountpoint)
    }

    /// Loop-mount `image` at the scratch path.
    ///
    /// Refuses with `AlreadyMounted` (without touching the existing mount) if
    /// the scratch path is already in the mount table. Once the mount command
    /// has been attempted, the returned session owns the unmount.
    pub fn mount(&self, image: &Path) -> ImageResult<MountSession<'_>> {
        if self.is_mounted()? {
            return Err(ImageError::AlreadyMounted {
                mountpoint: self.mountpoint.clone(),
            });
        }

        let session = MountSession {
            mounter: self,
            released: false,
        };
        info!(
            image = %image.display(),
            mountpoint = %self.mountpoint.display(),
            "loop mounting image"
        );
        let attempt = self.runner.run(
            Tool::Mount,
            &[
                "-o".to_string(),
                "loop".to_string(),
                image.display().to_string(),
                self.mountpoint.display().to_string(),
            ],
        );
        if let Err(err) = attempt {
            if let Err(cleanup) = session.release() {
                warn!(error = %cleanup, "unmount after failed mount also failed");
            }
            return Err(err);
        }
        Ok(session)
    }

    /// Detach the scratch mount if present. Returns whether anything was
    /// unmounted; an unmounted scratch path is a silent no-op.
    pub fn unmount(&self) -> ImageResult<bool> {
        if !self.is_mounted()? {
            debug!(mountpoint = %self.mountpoint.display(), "not mounted; nothing to unmount");
            return Ok(false);
        }
        info!(mountpoint = %self.mountpoint.display(), "unmounting image");
        self.runner.run(
            Tool::Umount,
            &["-d".to_string(), self.mountpoint.display().to_string()],
        )?;
        Ok(true)
    }
}

/// Scoped ownership of a loop mount. `release` unmounts exactly once; a
/// session dropped without release (early return, panic) unmounts on drop.
pub struct MountSession<'m> {
    mounter: &'m LoopMounter<'m>,
    released: bool,
}

impl MountSession<'_> {
    /// Root of the mounted image.
    pub fn root(&self) -> &Path {
        self.mounter.mountpoint()
    }

    pub fn release(mut self) -> ImageResult<()> {
        self.released = true;
        self.mounter.unmount().map(|_| ())
    }
}

impl Drop for MountSession<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.mounter.unmount() {
            warn!(
                mountpoint = %self.mounter.mountpoint().display(),
                error = %err,
                "unmount during unwind failed; manual cleanup required"
            );
        }
    }
}
