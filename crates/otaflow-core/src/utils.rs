//! Shared utility functions for otaflow crates

use anyhow::anyhow;
use std::path::PathBuf;

/// Get the user's home directory
///
/// HOME wins over `dirs::home_dir()` so service wrappers that relocate HOME
/// are respected.
pub fn get_home_dir() -> anyhow::Result<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        return Ok(PathBuf::from(home));
    }

    dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))
}

/// Directory holding otaflow's own state (`~/.otaflow`)
pub fn otaflow_home() -> anyhow::Result<PathBuf> {
    Ok(get_home_dir()?.join(".otaflow"))
}
