// ============================================================================
// src/cmd/release.rs – `vol_imager release`: manual scratch cleanup
// ============================================================================

use anyhow::{Context, Result};
use std::path::Path;

use crate::cmd::SystemRunner;
use crate::image::LoopMounter;
use crate::mounts::ProcMounts;
use crate::ui::UX;
use crate::util::audit::audit_log;
use crate::util::privilege::require_root;

/// Unmount whatever is loop-mounted at the scratch path (e.g. after a crash
/// or an `AlreadyMounted` refusal). Idempotent.
pub fn run_release(ui: &UX, scratch: &Path, debug: bool) -> Result<()> {
    require_root()?;
    ui.phase("Releasing Scratch Mountpoint");

    let runner = SystemRunner::new(debug);
    let mounts = ProcMounts::default();
    let mounter = LoopMounter::new(&runner, &mounts, scratch);

    let unmounted = mounter
        .unmount()
        .with_context(|| format!("release {}", scratch.display()))?;
    if unmounted {
        ui.success(&format!("{} unmounted and loop device detached.", scratch.display()));
        audit_log("RELEASE", &format!("mountpoint={}", scratch.display()));
    } else {
        ui.note(&format!("{} was not mounted; nothing to do.", scratch.display()));
    }
    Ok(())
}
