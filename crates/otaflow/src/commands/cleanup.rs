//! Cleanup command

use anyhow::Result;
use std::time::Duration;

use super::{load_runtime, open_store, GlobalOptions};
use crate::cli::CleanupArgs;
use crate::output;

pub fn run(args: CleanupArgs, global: &GlobalOptions) -> Result<()> {
    let runtime = load_runtime(global)?;
    let store = open_store(&runtime)?;

    let max_age = args
        .max_age_mins
        .map(|mins| Duration::from_secs(mins * 60))
        .unwrap_or_else(|| runtime.store.stale_after());

    let removed = store.cleanup_stale(max_age)?;
    if removed == 0 {
        output::info("No stale operations");
    } else {
        output::success(&format!("Removed {} stale operation record(s)", removed));
    }
    Ok(())
}
