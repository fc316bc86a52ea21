// ============================================================================
// src/image/fstab.rs – fstab selection and rewrite inside the image
// ============================================================================

use crate::error::{ImageError, ImageResult};
use crate::mounts::MountTable;
use crate::util::atomic::atomic_write_bytes;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use tracing::info;

/// sd* names with ephemeral storage on its own partition and swap on sda3.
pub const LEGACY_FSTAB: &str = "\
/dev/sda1  /         ext3    defaults        1 1
/dev/sda2  /mnt      ext3    defaults        0 0
/dev/sda3  swap      swap    defaults        0 0
none       /proc     proc    defaults        0 0
none       /sys      sysfs   defaults        0 0
";

/// Root on sda1, ephemeral storage as the whole sdb disk.
pub const DEFAULT_FSTAB: &str = "\
/dev/sda1  /         ext3    defaults        1 1
/dev/sdb   /mnt      ext3    defaults        0 0
none       /dev/pts  devpts  gid=5,mode=620  0 0
none       /dev/shm  tmpfs   defaults        0 0
none       /proc     proc    defaults        0 0
none       /sys      sysfs   defaults        0 0
";

/// Which fstab ends up in the image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FstabSpec {
    Legacy,
    Default,
    Verbatim(String),
    /// Leave the image's fstab alone.
    #[default]
    None,
}

impl FstabSpec {
    /// `legacy`, `default` and `none` select a variant; anything else is read
    /// as a file whose contents are used verbatim.
    pub fn from_arg(arg: &str) -> ImageResult<Self> {
        match arg {
            "legacy" => Ok(FstabSpec::Legacy),
            "default" => Ok(FstabSpec::Default),
            "none" => Ok(FstabSpec::None),
            path => fs::read_to_string(path)
                .map(FstabSpec::Verbatim)
                .map_err(|e| ImageError::io(format!("read fstab file {path}"), e)),
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            FstabSpec::Legacy => Some(LEGACY_FSTAB),
            FstabSpec::Default => Some(DEFAULT_FSTAB),
            FstabSpec::Verbatim(text) => Some(text.as_str()),
            FstabSpec::None => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FstabSpec::Legacy => "legacy",
            FstabSpec::Default => "default",
            FstabSpec::Verbatim(_) => "verbatim",
            FstabSpec::None => "none",
        }
    }
}

pub struct FstabRewriter<'a> {
    mounts: &'a dyn MountTable,
}

impl<'a> FstabRewriter<'a> {
    pub fn new(mounts: &'a dyn MountTable) -> Self {
        Self { mounts }
    }

    /// Write the selected fstab into the image mounted at `root`, keeping
    /// any previous one as `etc/fstab.old`. Returns the written lines, or
    /// `None` when the selection leaves the fstab untouched.
    pub fn rewrite(&self, root: &Path, spec: &FstabSpec) -> ImageResult<Option<Vec<String>>> {
        let Some(content) = spec.content() else {
            return Ok(None);
        };
        if !self.mounts.is_mounted(root)? {
            return Err(ImageError::NotMounted {
                mountpoint: root.to_path_buf(),
            });
        }

        let etc = root.join("etc");
        fs::create_dir_all(&etc)
            .map_err(|e| ImageError::io(format!("create {}", etc.display()), e))?;

        let fstab = etc.join("fstab");
        backup(&fstab, &etc.join("fstab.old"))?;
        atomic_write_bytes(&fstab, content.as_bytes(), 0o644)?;
        info!(variant = spec.label(), path = %fstab.display(), "fstab written");

        Ok(Some(content.lines().map(str::to_string).collect()))
    }
}

/// Preserve the image's own fstab. A symlink is copied as a link: its target
/// is relative to the image root, not to this host.
fn backup(fstab: &Path, old: &Path) -> ImageResult<()> {
    let Ok(meta) = fs::symlink_metadata(fstab) else {
        return Ok(());
    };
    if fs::symlink_metadata(old).is_ok() {
        fs::remove_file(old).map_err(|e| ImageError::io(format!("remove {}", old.display()), e))?;
    }
    if meta.file_type().is_symlink() {
        let target = fs::read_link(fstab)
            .map_err(|e| ImageError::io(format!("read link {}", fstab.display()), e))?;
        symlink(&target, old)
            .map_err(|e| ImageError::io(format!("link {}", old.display()), e))
    } else {
        fs::copy(fstab, old)
            .map(|_| ())
            .map_err(|e| ImageError::io(format!("back up {}", fstab.display()), e))
    }
}
