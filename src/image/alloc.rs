// ============================================================================
// src/image/alloc.rs – Sparse backing file allocation and ext3 formatting
// ============================================================================

use crate::cmd::{Runner, Tool};
use crate::error::{ImageError, ImageResult};
use std::path::Path;
use tracing::info;

/// Create a sparse file of `size_mb` MiB: one 1 MiB block of zeroes written at
/// offset `size_mb - 1` MiB.
pub fn allocate(runner: &dyn Runner, image: &Path, size_mb: u64) -> ImageResult<()> {
    if size_mb == 0 {
        return Err(ImageError::InvalidSize(size_mb));
    }
    info!(image = %image.display(), size_mb, "allocating sparse image");
    runner.run(
        Tool::Dd,
        &[
            "if=/dev/zero".to_string(),
            format!("of={}", image.display()),
            "bs=1M".to_string(),
            "count=1".to_string(),
            format!("seek={}", size_mb - 1),
        ],
    )
}

/// Format the backing file as ext3 and disable interval-forced checks.
/// A failed tune after a successful format still fails the stage.
pub fn format(runner: &dyn Runner, image: &Path) -> ImageResult<()> {
    let target = image.display().to_string();
    info!(image = %target, "formatting ext3");
    runner.run(Tool::Mkfs, &["-F".to_string(), "-q".to_string(), target.clone()])?;
    runner.run(Tool::Tune2fs, &["-i".to_string(), "0".to_string(), target])
}

/// Flush filesystem caches so the loop mount sees the fresh metadata.
pub fn flush(runner: &dyn Runner) -> ImageResult<()> {
    runner.run(Tool::Sync, &[])
}
