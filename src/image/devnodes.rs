// ============================================================================
// src/image/devnodes.rs – Boot-critical directories and /dev nodes
// ============================================================================

use crate::cmd::{Runner, Tool};
use crate::error::{ImageError, ImageResult};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use tracing::info;

/// Directories a root filesystem needs before its own init populates them.
pub const ROOT_DIRS: &[&str] = &["mnt", "proc", "sys", "dev"];

/// (name, major, minor) of the character devices created under `/dev`.
pub const CHAR_DEVICES: &[(&str, u32, u32)] = &[
    ("null", 1, 3),
    ("zero", 1, 5),
    ("tty", 5, 0),
    ("console", 5, 1),
];

/// `/dev/X0R` → `null`.
pub const X0R_LINK: (&str, &str) = ("X0R", "null");

/// Create the special directories, device nodes and the `X0R` link under
/// `root`. Every failure is fatal.
pub fn populate(runner: &dyn Runner, root: &Path) -> ImageResult<()> {
    info!(root = %root.display(), "creating special directories and device nodes");
    for dir in ROOT_DIRS {
        let path = root.join(dir);
        fs::create_dir_all(&path)
            .map_err(|e| ImageError::io(format!("create {}", path.display()), e))?;
    }

    let dev = root.join("dev");
    for (name, major, minor) in CHAR_DEVICES {
        let node = dev.join(name);
        clear(&node)?;
        runner.run(
            Tool::Mknod,
            &[
                node.display().to_string(),
                "c".to_string(),
                major.to_string(),
                minor.to_string(),
            ],
        )?;
    }

    let (link, target) = X0R_LINK;
    let link = dev.join(link);
    clear(&link)?;
    symlink(target, &link)
        .map_err(|e| ImageError::io(format!("symlink {} -> {}", link.display(), target), e))
}

/// mknod and symlink refuse to overwrite; drop whatever sits at `path`.
fn clear(path: &Path) -> ImageResult<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Err(ImageError::io(
            format!("{} is a directory", path.display()),
            std::io::Error::from(std::io::ErrorKind::AlreadyExists),
        )),
        Ok(_) => fs::remove_file(path)
            .map_err(|e| ImageError::io(format!("remove {}", path.display()), e)),
        Err(_) => Ok(()),
    }
}
