// ============================================================================
// src/util/audit.rs – Minimal append-only audit trail
// ============================================================================

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

pub const AUDIT_LOG: &str = "/var/log/vol_imager.log";

/// Append a timestamped event to the audit log (0600 permissions).
/// Silent failure if log is unwritable – avoids blocking main logic.
pub fn audit_log(event: &str, detail: &str) {
    audit_log_to(Path::new(AUDIT_LOG), event, detail);
}

fn audit_log_to(path: &Path, event: &str, detail: &str) {
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)
    {
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
        let _ = writeln!(file, "[{ts}] {event}: {detail}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn appends_events() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("audit.log");
        audit_log_to(&log, "BUILD_START", "image=/tmp/a.img");
        audit_log_to(&log, "BUILD_DONE", "image=/tmp/a.img");
        let text = fs::read_to_string(&log).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("BUILD_START: image=/tmp/a.img"));
        assert!(lines[1].contains("BUILD_DONE"));
    }

    #[test]
    fn unwritable_log_is_ignored() {
        audit_log_to(Path::new("/nonexistent/dir/audit.log"), "X", "y");
    }
}
