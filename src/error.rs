// ============================================================================
// src/error.rs – Typed failures raised by the image pipeline
// ============================================================================

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the image construction stages.
///
/// Only `Execution` carries an exit code; the tree replicator is the one
/// stage allowed to intercept it (see `image::replicate::judge`).
#[derive(Debug, Error)]
pub enum ImageError {
    /// An external command exited non-zero.
    #[error("command `{command}` failed with exit code {code}")]
    Execution { command: String, code: i32 },

    /// The scratch mountpoint was already mounted before this build mounted it.
    #[error(
        "{} is already mounted; unmount it (`vol_imager release`) before building",
        .mountpoint.display()
    )]
    AlreadyMounted { mountpoint: PathBuf },

    /// A stage that needs the image mounted found the scratch mountpoint empty.
    #[error("{} is not mounted", .mountpoint.display())]
    NotMounted { mountpoint: PathBuf },

    /// `make` was called on a builder that already ran.
    #[error("image builder already ran (state: {0})")]
    Reused(String),

    #[error("image size must be at least 1 MiB (got {0})")]
    InvalidSize(u64),

    /// None of the allowlisted locations for a tool exist on this host.
    #[error("required tool `{tool}` not found (searched {searched})")]
    ToolMissing { tool: &'static str, searched: String },

    #[error("spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("read mount table {}: {source}", .path.display())]
    MountTable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ImageError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        ImageError::Io {
            context: context.into(),
            source,
        }
    }

    /// Exit code of a failed command, if this is an execution failure.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ImageError::Execution { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type ImageResult<T> = std::result::Result<T, ImageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_failure_names_command_and_code() {
        let err = ImageError::Execution {
            command: "tune2fs -i 0 /tmp/x.img".into(),
            code: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("tune2fs -i 0 /tmp/x.img"));
        assert!(msg.contains("exit code 1"));
        assert_eq!(err.exit_code(), Some(1));
    }

    #[test]
    fn already_mounted_points_at_release() {
        let err = ImageError::AlreadyMounted {
            mountpoint: PathBuf::from("/mnt/img-mnt"),
        };
        assert!(err.to_string().contains("/mnt/img-mnt"));
        assert_eq!(err.exit_code(), None);
    }
}
