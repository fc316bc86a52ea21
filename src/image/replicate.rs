// ============================================================================
// src/image/replicate.rs – rsync the volume into the mounted image
// ============================================================================

use crate::cmd::{command_line, Runner, Tool};
use crate::error::{ImageError, ImageResult};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// rsync "partial transfer": raised benignly by rsync builds whose xattr
/// timestamp calls the running kernel does not provide.
pub const PARTIAL_TRANSFER_EXIT: i32 = 23;
/// rsync "syntax or usage error": what an rsync without xattr support says to `-X`.
pub const USAGE_EXIT: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyOptions {
    /// Pass `-X` to preserve extended attributes.
    pub xattrs: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self { xattrs: true }
    }
}

/// A copy that finished, but with less fidelity than asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyWarning {
    /// rsync exited 23 with `-X` on a host where plain rsync works.
    BenignAttributeExit,
    /// The copy only succeeded once `-X` was dropped.
    AttributesDropped,
}

impl fmt::Display for CopyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyWarning::BenignAttributeExit => write!(
                f,
                "rsync exited {PARTIAL_TRANSFER_EXIT} while preserving extended attributes; \
                 this rsync was built against xattr calls the running kernel lacks, \
                 treating the copy as complete"
            ),
            CopyWarning::AttributesDropped => write!(
                f,
                "rsync could not preserve extended attributes; the image was copied without them"
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyOutcome {
    pub exit_code: i32,
    pub warning: Option<CopyWarning>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Done(CopyOutcome),
    /// Run once more with these options.
    Retry(CopyOptions),
}

/// Decide what an rsync exit code means for a copy run with `options`.
///
/// `capable` is only consulted for exit 23 with xattrs on. A retry is only
/// ever requested with xattrs turned off, so a retried copy cannot ask again.
pub fn judge(
    options: &CopyOptions,
    exit_code: i32,
    command: &str,
    capable: impl FnOnce() -> bool,
) -> ImageResult<Verdict> {
    match exit_code {
        0 => Ok(Verdict::Done(CopyOutcome {
            exit_code,
            warning: None,
        })),
        PARTIAL_TRANSFER_EXIT if options.xattrs && capable() => Ok(Verdict::Done(CopyOutcome {
            exit_code,
            warning: Some(CopyWarning::BenignAttributeExit),
        })),
        USAGE_EXIT if options.xattrs => Ok(Verdict::Retry(CopyOptions { xattrs: false })),
        code => Err(ImageError::Execution {
            command: command.to_string(),
            code,
        }),
    }
}

/// Turn absolute exclusions into rsync patterns anchored at the transfer
/// root. Excluding `source` itself excludes everything below it. Paths
/// outside `source` can never match and are dropped.
pub fn anchored_excludes(source: &Path, exclusions: &BTreeSet<PathBuf>) -> Vec<String> {
    exclusions
        .iter()
        .filter_map(|path| match path.strip_prefix(source) {
            Ok(rel) if rel.as_os_str().is_empty() => Some(WHOLE_TREE.to_string()),
            Ok(rel) => Some(format!("/{}", escape_pattern(&rel.display().to_string()))),
            Err(_) => {
                debug!(path = %path.display(), "exclusion outside the volume; ignored");
                None
            }
        })
        .collect()
}

/// Every top-level entry of the transfer root.
const WHOLE_TREE: &str = "/*";

/// Exclusions name exact paths. rsync only honours backslash escapes in
/// patterns that contain a wildcard, so literal names are passed through.
fn escape_pattern(rel: &str) -> String {
    if !rel.contains(['*', '?', '[']) {
        return rel.to_string();
    }
    let mut out = String::with_capacity(rel.len() + 4);
    for c in rel.chars() {
        if matches!(c, '\\' | '*' | '?' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn dir_arg(path: &Path) -> String {
    let s = path.display().to_string();
    if s.ends_with('/') {
        s
    } else {
        format!("{s}/")
    }
}

/// Archive-style recursion keeping times, perms, owners, devices, sparseness
/// and symlinks as links.
pub fn rsync_args(
    source: &Path,
    dest: &Path,
    excludes: &[String],
    options: &CopyOptions,
) -> Vec<String> {
    let mut args = vec![
        "-rlpgoD".to_string(),
        "-t".to_string(),
        "-S".to_string(),
        "--quiet".to_string(),
    ];
    if options.xattrs {
        args.push("-X".to_string());
    }
    args.extend(excludes.iter().map(|e| format!("--exclude={e}")));
    args.push(dir_arg(source));
    args.push(dir_arg(dest));
    args
}

pub struct TreeReplicator<'a> {
    runner: &'a dyn Runner,
}

impl<'a> TreeReplicator<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    /// Copy `source` into `dest`, skipping `exclusions`. At most two rsync
    /// runs: the requested one and, if xattrs were refused, one without them.
    pub fn replicate(
        &self,
        source: &Path,
        dest: &Path,
        exclusions: &BTreeSet<PathBuf>,
        options: &CopyOptions,
    ) -> ImageResult<CopyOutcome> {
        let excludes = anchored_excludes(source, exclusions);
        info!(
            source = %source.display(),
            dest = %dest.display(),
            excludes = excludes.len(),
            xattrs = options.xattrs,
            "replicating volume"
        );

        let mut current = options.clone();
        let mut retried = false;
        loop {
            let args = rsync_args(source, dest, &excludes, &current);
            let command = command_line(Tool::Rsync, &args);
            let code = self.runner.status(Tool::Rsync, &args)?;

            match judge(&current, code, &command, || self.copy_mechanism_works())? {
                Verdict::Done(mut outcome) => {
                    if retried {
                        outcome.warning.get_or_insert(CopyWarning::AttributesDropped);
                    }
                    if let Some(warning) = outcome.warning {
                        warn!(code = outcome.exit_code, "{warning}");
                    }
                    return Ok(outcome);
                }
                Verdict::Retry(next) if !retried => {
                    warn!(code, "rsync refused extended attributes; retrying without -X");
                    current = next;
                    retried = true;
                }
                Verdict::Retry(_) => return Err(ImageError::Execution { command, code }),
            }
        }
    }

    /// Independent check that rsync itself works on this host: copy a
    /// one-file tree between two temp dirs without xattrs.
    fn copy_mechanism_works(&self) -> bool {
        let probe = || -> std::io::Result<bool> {
            let src = tempfile::tempdir()?;
            let dst = tempfile::tempdir()?;
            fs::write(src.path().join("probe"), b"vol_imager")?;
            let args = rsync_args(src.path(), dst.path(), &[], &CopyOptions { xattrs: false });
            Ok(matches!(self.runner.status(Tool::Rsync, &args), Ok(0)))
        };
        let works = probe().unwrap_or(false);
        debug!(works, "rsync capability probe");
        works
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMounts, FakeRunner};

    fn set(paths: &[&str]) -> BTreeSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn judge_success() {
        let v = judge(&CopyOptions::default(), 0, "rsync", || panic!("not consulted")).unwrap();
        assert_eq!(
            v,
            Verdict::Done(CopyOutcome {
                exit_code: 0,
                warning: None
            })
        );
    }

    #[test]
    fn judge_benign_23_when_capable() {
        let v = judge(&CopyOptions::default(), 23, "rsync", || true).unwrap();
        assert_eq!(
            v,
            Verdict::Done(CopyOutcome {
                exit_code: 23,
                warning: Some(CopyWarning::BenignAttributeExit)
            })
        );
    }

    #[test]
    fn judge_23_fails_when_not_capable_or_without_xattrs() {
        assert!(judge(&CopyOptions::default(), 23, "rsync", || false).is_err());
        let plain = CopyOptions { xattrs: false };
        assert!(judge(&plain, 23, "rsync", || panic!("not consulted")).is_err());
    }

    #[test]
    fn judge_exit_1_retries_once_without_xattrs() {
        let v = judge(&CopyOptions::default(), 1, "rsync", || true).unwrap();
        assert_eq!(v, Verdict::Retry(CopyOptions { xattrs: false }));
        let err = judge(&CopyOptions { xattrs: false }, 1, "rsync -X", || true).unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
    }

    #[test]
    fn judge_other_codes_are_hard_failures() {
        for code in [2, 12, 24, 255, -1] {
            let err = judge(&CopyOptions::default(), code, "rsync", || true).unwrap_err();
            assert_eq!(err.exit_code(), Some(code));
        }
    }

    #[test]
    fn excludes_are_anchored_to_the_volume() {
        let ex = set(&["/dev", "/proc", "/mnt/img-mnt"]);
        assert_eq!(
            anchored_excludes(Path::new("/"), &ex),
            vec!["/dev", "/mnt/img-mnt", "/proc"]
        );

        let ex = set(&["/srv/root/tmp", "/etc"]);
        assert_eq!(anchored_excludes(Path::new("/srv/root"), &ex), vec!["/tmp"]);
    }

    #[test]
    fn excluding_the_volume_itself_copies_nothing() {
        let ex = set(&["/srv/root", "/srv/root/tmp"]);
        let patterns = anchored_excludes(Path::new("/srv/root"), &ex);
        assert_eq!(patterns, vec!["/*", "/tmp"]);

        let args = rsync_args(
            Path::new("/srv/root"),
            Path::new("/mnt/img-mnt"),
            &patterns,
            &CopyOptions::default(),
        );
        assert!(args.contains(&"--exclude=/*".to_string()));
    }

    #[test]
    fn wildcard_characters_in_paths_are_literal() {
        let ex = set(&["/data/cache[1]", "/data/a*", "/data/what?", "/data/back\\slash*"]);
        assert_eq!(
            anchored_excludes(Path::new("/data"), &ex),
            vec![
                "/a\\*",
                "/back\\\\slash\\*",
                "/cache\\[1]",
                "/what\\?",
            ]
        );
    }

    #[test]
    fn plain_backslash_names_are_not_escaped() {
        let ex = set(&["/data/odd\\name"]);
        assert_eq!(anchored_excludes(Path::new("/data"), &ex), vec!["/odd\\name"]);
    }

    #[test]
    fn rsync_args_shape() {
        let args = rsync_args(
            Path::new("/"),
            Path::new("/mnt/img-mnt"),
            &["/proc".to_string()],
            &CopyOptions::default(),
        );
        assert_eq!(
            args,
            vec!["-rlpgoD", "-t", "-S", "--quiet", "-X", "--exclude=/proc", "/", "/mnt/img-mnt/"]
        );
        let plain = rsync_args(Path::new("/a"), Path::new("/b"), &[], &CopyOptions { xattrs: false });
        assert!(!plain.contains(&"-X".to_string()));
        assert_eq!(&plain[plain.len() - 2..], ["/a/", "/b/"]);
    }

    #[test]
    fn exit_1_retries_exactly_once_without_xattrs() {
        let runner = FakeRunner::new(&FakeMounts::default());
        runner.script(Tool::Rsync, &[1, 0]);
        let out = TreeReplicator::new(&runner)
            .replicate(Path::new("/"), Path::new("/mnt/img-mnt"), &set(&["/proc"]), &CopyOptions::default())
            .unwrap();
        assert_eq!(out.warning, Some(CopyWarning::AttributesDropped));

        let calls = runner.calls_to(Tool::Rsync);
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains(&"-X".to_string()));
        assert!(!calls[1].contains(&"-X".to_string()));
        assert_eq!(calls[0].iter().filter(|a| *a != "-X").collect::<Vec<_>>(), calls[1].iter().collect::<Vec<_>>());
    }

    #[test]
    fn failed_retry_is_not_retried_again() {
        let runner = FakeRunner::new(&FakeMounts::default());
        runner.script(Tool::Rsync, &[1, 1, 0]);
        let err = TreeReplicator::new(&runner)
            .replicate(Path::new("/"), Path::new("/mnt/img-mnt"), &BTreeSet::new(), &CopyOptions::default())
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(runner.count(Tool::Rsync), 2);
    }

    #[test]
    fn exit_23_on_capable_host_is_a_warning() {
        let runner = FakeRunner::new(&FakeMounts::default());
        // copy, then capability probe
        runner.script(Tool::Rsync, &[23, 0]);
        let out = TreeReplicator::new(&runner)
            .replicate(Path::new("/"), Path::new("/mnt/img-mnt"), &BTreeSet::new(), &CopyOptions::default())
            .unwrap();
        assert_eq!(out.exit_code, 23);
        assert_eq!(out.warning, Some(CopyWarning::BenignAttributeExit));
        assert!(!runner.calls_to(Tool::Rsync)[1].contains(&"-X".to_string()));
    }

    #[test]
    fn exit_23_on_broken_host_fails() {
        let runner = FakeRunner::new(&FakeMounts::default());
        runner.script(Tool::Rsync, &[23, 23]);
        let err = TreeReplicator::new(&runner)
            .replicate(Path::new("/"), Path::new("/mnt/img-mnt"), &BTreeSet::new(), &CopyOptions::default())
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(23));
    }

    #[test]
    fn clean_copy_has_no_warning() {
        let runner = FakeRunner::new(&FakeMounts::default());
        let out = TreeReplicator::new(&runner)
            .replicate(Path::new("/"), Path::new("/mnt/img-mnt"), &BTreeSet::new(), &CopyOptions::default())
            .unwrap();
        assert_eq!(out.warning, None);
        assert_eq!(runner.count(Tool::Rsync), 1);
    }
}
