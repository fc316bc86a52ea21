// ============================================================================
// src/cmd/mod.rs – command subsystem root
// ============================================================================
pub mod base; // allowlisted tools, Runner, SystemRunner
pub mod doctor; // vol_imager doctor
pub mod make; // vol_imager make
pub mod release; // vol_imager release

// Re-export common types for convenience:
pub use base::{command_line, Runner, SystemRunner, Tool};
