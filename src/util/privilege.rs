// ============================================================================
// src/util/privilege.rs – Root check for mount/mknod work
// ============================================================================

use anyhow::{bail, Result};
use nix::unistd::geteuid;

pub fn is_root() -> bool {
    geteuid().is_root()
}

/// Loop mounts, mknod and ownership-preserving copies all need uid 0.
pub fn require_root() -> Result<()> {
    if !is_root() {
        bail!("vol_imager must run as root (effective uid {})", geteuid());
    }
    Ok(())
}
