// ============================================================================
// src/image/mod.rs – Image construction pipeline (allocate → … → unmount)
// ============================================================================

pub mod alloc;
pub mod devnodes;
pub mod fstab;
pub mod loopmount;
pub mod replicate;

pub use fstab::FstabSpec;
pub use loopmount::{LoopMounter, DEFAULT_SCRATCH};
pub use replicate::CopyOptions;

use crate::cmd::Runner;
use crate::error::{ImageError, ImageResult};
use crate::mounts::MountTable;
use fstab::FstabRewriter;
use replicate::{CopyOutcome, TreeReplicator};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed,
}

/// Pipeline position. Transitions only move forward and never skip a stage;
/// `Unmounted` is reached from any state at or past `Mounted`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Allocated,
    Formatted,
    Mounted,
    Populated,
    FstabWritten,
    Unmounted(Outcome),
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildState::Unmounted(Outcome::Done) => f.write_str("unmounted (done)"),
            BuildState::Unmounted(Outcome::Failed) => f.write_str("unmounted (failed)"),
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

/// Inputs for one image build.
#[derive(Clone, Debug)]
pub struct BuildRequest {
    pub volume: PathBuf,
    pub image: PathBuf,
    pub size_mb: u64,
    pub exclusions: BTreeSet<PathBuf>,
    pub fstab: FstabSpec,
    pub scratch: PathBuf,
    pub copy: CopyOptions,
}

/// What a successful build produced, for the operator summary.
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub copy: CopyOutcome,
    pub fstab_lines: Option<Vec<String>>,
}

/// The caller's exclusions plus the scratch mountpoint whenever it sits
/// inside the volume; copying the image into itself would never end.
pub fn effective_exclusions(
    caller: &BTreeSet<PathBuf>,
    scratch: &Path,
    volume: &Path,
) -> BTreeSet<PathBuf> {
    let mut set = caller.clone();
    if scratch.starts_with(volume) {
        set.insert(scratch.to_path_buf());
    }
    set
}

pub struct ImageBuilder<'a> {
    runner: &'a dyn Runner,
    mounts: &'a dyn MountTable,
    volume: PathBuf,
    image: PathBuf,
    size_mb: u64,
    exclusions: BTreeSet<PathBuf>,
    fstab: FstabSpec,
    scratch: PathBuf,
    copy: CopyOptions,
    state: BuildState,
    history: Vec<BuildState>,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(runner: &'a dyn Runner, mounts: &'a dyn MountTable, request: BuildRequest) -> Self {
        let exclusions = effective_exclusions(&request.exclusions, &request.scratch, &request.volume);
        Self {
            runner,
            mounts,
            volume: request.volume,
            image: request.image,
            size_mb: request.size_mb,
            exclusions,
            fstab: request.fstab,
            scratch: request.scratch,
            copy: request.copy,
            state: BuildState::Idle,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[BuildState] {
        &self.history
    }

    pub fn exclusions(&self) -> &BTreeSet<PathBuf> {
        &self.exclusions
    }

    /// Run the whole pipeline once.
    ///
    /// Failures before the mount propagate as-is. Once the mount has been
    /// attempted, the scratch mountpoint is unmounted exactly once before any
    /// result is returned. A pre-existing mount at the scratch path aborts
    /// with `AlreadyMounted` and is left in place.
    pub fn make(&mut self) -> ImageResult<BuildReport> {
        if self.state != BuildState::Idle {
            return Err(ImageError::Reused(self.state.to_string()));
        }

        alloc::allocate(self.runner, &self.image, self.size_mb)?;
        self.advance(BuildState::Allocated);

        alloc::format(self.runner, &self.image)?;
        self.advance(BuildState::Formatted);

        alloc::flush(self.runner)?;

        let mounter = LoopMounter::new(self.runner, self.mounts, self.scratch.clone());
        mounter.ensure_mountpoint()?;
        let session = mounter.mount(&self.image)?;
        self.advance(BuildState::Mounted);

        let populated = self.populate(session.root());
        let released = session.release();

        match (populated, released) {
            (Ok(report), Ok(())) => {
                self.advance(BuildState::Unmounted(Outcome::Done));
                Ok(report)
            }
            (Ok(_), Err(err)) => {
                self.advance(BuildState::Unmounted(Outcome::Failed));
                Err(err)
            }
            (Err(err), Ok(())) => {
                self.advance(BuildState::Unmounted(Outcome::Failed));
                Err(err)
            }
            (Err(err), Err(unmount_err)) => {
                warn!(
                    error = %unmount_err,
                    mountpoint = %self.scratch.display(),
                    "unmount after failed build also failed; manual cleanup required"
                );
                self.advance(BuildState::Unmounted(Outcome::Failed));
                Err(err)
            }
        }
    }

    fn populate(&mut self, root: &Path) -> ImageResult<BuildReport> {
        devnodes::populate(self.runner, root)?;

        let copy = TreeReplicator::new(self.runner).replicate(
            &self.volume,
            root,
            &self.exclusions,
            &self.copy,
        )?;
        self.advance(BuildState::Populated);

        let fstab_lines = FstabRewriter::new(self.mounts).rewrite(root, &self.fstab)?;
        // `FstabSpec::None` leaves the file alone but still completes the stage.
        self.advance(BuildState::FstabWritten);

        Ok(BuildReport { copy, fstab_lines })
    }

    fn advance(&mut self, next: BuildState) {
        info!(from = %self.state, to = %next, "image state");
        self.state = next;
        self.history.push(next);
    }
}
