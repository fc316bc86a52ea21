// ============================================================================
// src/util/atomic.rs – Durable, permissioned atomic writes
// ============================================================================

use crate::error::{ImageError, ImageResult};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Return the parent directory path or error with context.
fn parent_dir(path: &Path) -> ImageResult<PathBuf> {
    path.parent().map(|p| p.to_path_buf()).ok_or_else(|| {
        ImageError::io(
            format!("{} has no parent directory", path.display()),
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        )
    })
}

/// Fsync a directory to persist metadata (like rename).
fn fsync_dir(dir: &Path) -> ImageResult<()> {
    let f = File::open(dir)
        .map_err(|e| ImageError::io(format!("open dir for fsync: {}", dir.display()), e))?;
    f.sync_all()
        .map_err(|e| ImageError::io(format!("fsync dir: {}", dir.display()), e))
}

/// Core atomic write: writes bytes to a temp file in the same directory,
/// fsyncs the file, renames into place, then fsyncs the parent directory.
/// Applies exact POSIX mode (ignores umask). The rename replaces a symlink
/// at `path` rather than writing through it.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8], mode: u32) -> ImageResult<()> {
    let dir = parent_dir(path)?;
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .map_err(|e| ImageError::io(format!("create {}", dir.display()), e))?;
    }

    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            ImageError::io(
                format!("{} has no file name", path.display()),
                std::io::Error::from(std::io::ErrorKind::InvalidInput),
            )
        })?;

    // Low-collision temp name next to the target
    let mut tmp = dir.join(format!("{base}.tmp-{}", nanoid::nanoid!(8)));
    for _ in 0..8 {
        if !tmp.exists() {
            break;
        }
        tmp = dir.join(format!("{base}.tmp-{}", nanoid::nanoid!(8)));
    }

    let mut f = OpenOptions::new()
        .create_new(true)
        .write(true)
        .mode(mode)
        .open(&tmp)
        .map_err(|e| ImageError::io(format!("open temp file {}", tmp.display()), e))?;

    f.write_all(bytes)
        .and_then(|_| f.sync_all())
        .map_err(|e| ImageError::io(format!("write temp file {}", tmp.display()), e))?;

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ImageError::io(
            format!("atomic rename {} -> {}", tmp.display(), path.display()),
            e,
        )
    })?;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| ImageError::io(format!("set permissions on {}", path.display()), e))?;

    fsync_dir(&dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    #[test]
    fn writes_with_exact_mode_and_no_leftovers() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("etc/fstab");
        atomic_write_bytes(&target, b"hello\n", 0o644).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"hello\n");
        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        let entries: Vec<_> = fs::read_dir(dir.path().join("etc")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn replaces_symlink_instead_of_following_it() {
        let dir = tempdir().unwrap();
        let outside = dir.path().join("outside");
        fs::write(&outside, b"untouched").unwrap();
        let target = dir.path().join("fstab");
        symlink(&outside, &target).unwrap();

        atomic_write_bytes(&target, b"new", 0o644).unwrap();
        assert_eq!(fs::read(&outside).unwrap(), b"untouched");
        assert!(!fs::symlink_metadata(&target).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&target).unwrap(), b"new");
    }
}
