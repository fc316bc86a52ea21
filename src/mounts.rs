// ============================================================================
// src/mounts.rs – Read-only view of the host mount table
// ============================================================================

use crate::error::{ImageError, ImageResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const PROC_MOUNTS: &str = "/proc/mounts";
const ETC_MTAB: &str = "/etc/mtab";

/// Query "is this path a mountpoint right now".
///
/// Implementations must re-read the table on every call; mount state changes
/// underneath the pipeline as a side effect of its own stages.
pub trait MountTable {
    /// Current mountpoint → device bindings.
    fn snapshot(&self) -> ImageResult<BTreeMap<PathBuf, String>>;

    fn is_mounted(&self, path: &Path) -> ImageResult<bool> {
        Ok(self.snapshot()?.contains_key(path))
    }
}

/// Mount table backed by `/proc/mounts`, falling back to `/etc/mtab`.
#[derive(Clone, Debug)]
pub struct ProcMounts {
    sources: Vec<PathBuf>,
}

impl Default for ProcMounts {
    fn default() -> Self {
        Self {
            sources: vec![PathBuf::from(PROC_MOUNTS), PathBuf::from(ETC_MTAB)],
        }
    }
}

impl ProcMounts {
    #[cfg(test)]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            sources: vec![path.into()],
        }
    }
}

impl MountTable for ProcMounts {
    fn snapshot(&self) -> ImageResult<BTreeMap<PathBuf, String>> {
        let mut last_err = None;
        for source in &self.sources {
            match fs::read_to_string(source) {
                Ok(text) => return Ok(parse_mounts(&text)),
                Err(err) => last_err = Some((source.clone(), err)),
            }
        }
        let (path, source) = last_err.unwrap_or_else(|| {
            (
                PathBuf::from(PROC_MOUNTS),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )
        });
        Err(ImageError::MountTable { path, source })
    }
}

/// Parse mtab-format text (`device mountpoint fstype options dump pass`).
/// Later entries win when a mountpoint is stacked.
pub fn parse_mounts(text: &str) -> BTreeMap<PathBuf, String> {
    let mut table = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mountpoint)) = (fields.next(), fields.next()) else {
            continue;
        };
        table.insert(
            PathBuf::from(decode_mount_escape(mountpoint)),
            decode_mount_escape(device),
        );
    }
    table
}

/// Undo the kernel's octal escaping of whitespace and backslashes (`\040`).
fn decode_mount_escape(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal(digits: &[u8]) -> bool {
    digits.len() == 3 && digits.iter().all(|d| (b'0'..=b'7').contains(d)) && digits[0] <= b'3'
}
