// ============================================================================
// src/cmd/base.rs – Allowlisted external command runner (for system utilities)
// ============================================================================

use crate::error::{ImageError, ImageResult};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// System utilities the pipeline is allowed to invoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tool {
    Dd,
    Mkfs,
    Tune2fs,
    Sync,
    Mount,
    Umount,
    Rsync,
    Mknod,
}

impl Tool {
    pub const ALL: [Tool; 8] = [
        Tool::Dd,
        Tool::Mkfs,
        Tool::Tune2fs,
        Tool::Sync,
        Tool::Mount,
        Tool::Umount,
        Tool::Rsync,
        Tool::Mknod,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::Dd => "dd",
            Tool::Mkfs => "mkfs.ext3",
            Tool::Tune2fs => "tune2fs",
            Tool::Sync => "sync",
            Tool::Mount => "mount",
            Tool::Umount => "umount",
            Tool::Rsync => "rsync",
            Tool::Mknod => "mknod",
        }
    }

    /// Absolute locations we accept for this tool, in lookup order.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            Tool::Dd => &["/bin/dd", "/usr/bin/dd"],
            Tool::Mkfs => &["/sbin/mkfs.ext3", "/usr/sbin/mkfs.ext3", "/usr/bin/mkfs.ext3"],
            Tool::Tune2fs => &["/sbin/tune2fs", "/usr/sbin/tune2fs", "/usr/bin/tune2fs"],
            Tool::Sync => &["/bin/sync", "/usr/bin/sync"],
            Tool::Mount => &["/bin/mount", "/usr/bin/mount"],
            Tool::Umount => &["/bin/umount", "/usr/bin/umount"],
            Tool::Rsync => &["/usr/bin/rsync", "/bin/rsync", "/usr/local/bin/rsync"],
            Tool::Mknod => &["/bin/mknod", "/usr/bin/mknod"],
        }
    }

    /// Package that usually ships the tool (for preflight hints).
    pub fn package(self) -> &'static str {
        match self {
            Tool::Dd | Tool::Sync | Tool::Mknod => "coreutils",
            Tool::Mkfs | Tool::Tune2fs => "e2fsprogs",
            Tool::Mount | Tool::Umount => "util-linux",
            Tool::Rsync => "rsync",
        }
    }

    pub fn locate(self) -> ImageResult<&'static str> {
        self.candidates()
            .iter()
            .copied()
            .find(|p| Path::new(p).exists())
            .ok_or_else(|| ImageError::ToolMissing {
                tool: self.name(),
                searched: self.candidates().join(", "),
            })
    }
}

/// Render a tool invocation the way an operator would type it.
pub fn command_line(tool: Tool, args: &[String]) -> String {
    let mut line = tool.name().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Executes allowlisted tools. The pipeline only depends on this trait so
/// stages can be driven by a scripted runner in tests.
pub trait Runner {
    /// Run `tool` to completion and return its exit code without judging it.
    fn status(&self, tool: Tool, args: &[String]) -> ImageResult<i32>;

    /// Run `tool` and turn any non-zero exit into `ImageError::Execution`.
    fn run(&self, tool: Tool, args: &[String]) -> ImageResult<()> {
        match self.status(tool, args)? {
            0 => Ok(()),
            code => Err(ImageError::Execution {
                command: command_line(tool, args),
                code,
            }),
        }
    }
}

/// Runs tools on the host. With `debug` set, subprocess output goes straight
/// to the terminal; otherwise it is captured and only surfaced through
/// `tracing` at debug level.
#[derive(Clone, Debug, Default)]
pub struct SystemRunner {
    pub debug: bool,
}

impl SystemRunner {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }
}

impl Runner for SystemRunner {
    fn status(&self, tool: Tool, args: &[String]) -> ImageResult<i32> {
        let path = tool.locate()?;
        let command = command_line(tool, args);
        debug!(%command, path, "exec");

        let mut cmd = Command::new(path);
        cmd.args(args).stdin(Stdio::null());

        let spawn_err = |source| ImageError::Spawn {
            command: command.clone(),
            source,
        };

        let code = if self.debug {
            let status = cmd
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .map_err(spawn_err)?;
            status.code().unwrap_or(-1)
        } else {
            let out = cmd
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .map_err(spawn_err)?;
            let stderr = String::from_utf8_lossy(&out.stderr);
            if !stderr.trim().is_empty() {
                debug!(%command, stderr = %stderr.trim(), "captured stderr");
            }
            out.status.code().unwrap_or(-1)
        };

        debug!(%command, code, "exit");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_is_allowlisted_by_absolute_path() {
        for tool in Tool::ALL {
            assert!(!tool.candidates().is_empty(), "{tool:?} has no candidates");
            for path in tool.candidates() {
                assert!(path.starts_with('/'), "{path} must be absolute");
                assert!(
                    path.ends_with(tool.name()),
                    "{path} does not point at {}",
                    tool.name()
                );
            }
        }
    }

    #[test]
    fn command_line_joins_tool_and_args() {
        let args = vec!["-i".to_string(), "0".to_string(), "/tmp/a.img".to_string()];
        assert_eq!(command_line(Tool::Tune2fs, &args), "tune2fs -i 0 /tmp/a.img");
        assert_eq!(command_line(Tool::Sync, &[]), "sync");
    }

    #[test]
    fn system_runner_reports_exit_status() {
        // sync is harmless and present on nearly every host; skip if not.
        if Tool::Sync.locate().is_err() {
            return;
        }
        let runner = SystemRunner::new(false);
        assert_eq!(runner.status(Tool::Sync, &[]).unwrap(), 0);
        runner.run(Tool::Sync, &[]).unwrap();
    }
}
