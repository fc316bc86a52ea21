// ============================================================================
// src/cmd/doctor.rs – Preflight diagnostics for the imaging host
// ============================================================================

use crate::cmd::Tool;
use crate::config::ConfigFile;
use crate::mounts::{MountTable, ProcMounts};
use crate::ui::UX;
use crate::util::privilege::is_root;
use anyhow::{anyhow, Result};
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Pass,
    Warn,
    Fail,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Status::Pass => "[PASS]",
            Status::Warn => "[WARN]",
            Status::Fail => "[FAIL]",
        }
    }
}

struct ReportEntry {
    name: &'static str,
    status: Status,
    detail: String,
}

pub fn run_doctor(ui: &UX, config: Option<&Path>, scratch: Option<&Path>) -> Result<()> {
    ui.banner();
    ui.phase("Host Diagnostics");

    let mut report: Vec<ReportEntry> = Vec::new();

    // ---------------------------------------------------------------------
    // Privilege
    // ---------------------------------------------------------------------
    if is_root() {
        log_entry(&mut report, ui, "Privilege", Status::Pass, "Running as root".to_string());
    } else {
        log_entry(
            &mut report,
            ui,
            "Privilege",
            Status::Warn,
            "Not root: `make` and `release` will refuse to run.".to_string(),
        );
    }

    // ---------------------------------------------------------------------
    // Allowlisted tools
    // ---------------------------------------------------------------------
    for tool in Tool::ALL {
        match tool.locate() {
            Ok(path) => log_entry(
                &mut report,
                ui,
                tool.name(),
                Status::Pass,
                format!("Found at {}", path),
            ),
            Err(err) => log_entry(
                &mut report,
                ui,
                tool.name(),
                Status::Fail,
                format!("{} (install {})", err, tool.package()),
            ),
        }
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------
    let cfg = match ConfigFile::discover(config) {
        Ok(cfg) => {
            let detail = if cfg.path.as_os_str().is_empty() {
                "No config file; using built-in defaults".to_string()
            } else {
                format!("Loaded {}", cfg.path.display())
            };
            log_entry(&mut report, ui, "Config file", Status::Pass, detail);
            cfg
        }
        Err(err) => {
            log_entry(
                &mut report,
                ui,
                "Config file",
                Status::Fail,
                format!("Unable to load config: {:#}", err),
            );
            ConfigFile::default()
        }
    };

    // ---------------------------------------------------------------------
    // Scratch mountpoint
    // ---------------------------------------------------------------------
    let scratch = scratch.unwrap_or(cfg.image.scratch_mountpoint.as_path());
    let (status, detail) = scratch_status(&ProcMounts::default(), scratch);
    log_entry(&mut report, ui, "Scratch mountpoint", status, detail);

    summarize(&report, ui)
}

fn scratch_status(mounts: &dyn MountTable, scratch: &Path) -> (Status, String) {
    match mounts.is_mounted(scratch) {
        Ok(true) => (
            Status::Warn,
            format!(
                "{} is busy; run `vol_imager release --scratch {}` before building.",
                scratch.display(),
                scratch.display()
            ),
        ),
        Ok(false) if scratch.is_dir() => (Status::Pass, format!("{} free", scratch.display())),
        Ok(false) => (
            Status::Pass,
            format!("{} will be created on first build", scratch.display()),
        ),
        Err(err) => (Status::Fail, format!("Unable to read mount table: {}", err)),
    }
}

fn log_entry(
    report: &mut Vec<ReportEntry>,
    ui: &UX,
    name: &'static str,
    status: Status,
    detail: String,
) {
    match status {
        Status::Pass => ui.success(&format!("{} {}: {}", status.label(), name, detail)),
        Status::Warn => ui.warn(&format!("{} {}: {}", status.label(), name, detail)),
        Status::Fail => ui.error(&format!("{} {}: {}", status.label(), name, detail)),
    }
    report.push(ReportEntry {
        name,
        status,
        detail,
    });
}

fn summarize(report: &[ReportEntry], ui: &UX) -> Result<()> {
    let mut passes = 0;
    let mut warns = 0;
    let mut fail_details = Vec::new();

    for entry in report {
        match entry.status {
            Status::Pass => passes += 1,
            Status::Warn => warns += 1,
            Status::Fail => fail_details.push(format!("{}: {}", entry.name, entry.detail)),
        }
    }

    ui.data_panel(
        "Diagnostic Summary",
        &[
            ("Pass", passes.to_string()),
            ("Warn", warns.to_string()),
            ("Fail", fail_details.len().to_string()),
        ],
    );

    if fail_details.is_empty() {
        ui.success("Host is ready to build images.");
        Ok(())
    } else {
        ui.warn(&format!(
            "Failures demanding attention: {}",
            fail_details.join(" | ")
        ));
        Err(anyhow!("Diagnostics uncovered blocking issues"))
    }
}
