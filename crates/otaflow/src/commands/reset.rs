//! Reset command

use anyhow::{bail, Result};

use super::{load_runtime, open_store, GlobalOptions};
use crate::cli::ResetArgs;
use crate::output;

pub fn run(args: ResetArgs, global: &GlobalOptions) -> Result<()> {
    let runtime = load_runtime(global)?;
    let store = open_store(&runtime)?;

    if store.has_active_operations()? {
        if !args.force {
            output::warning("Operations are recorded as active");
            bail!("Refusing to reset while operations are active (use --force)");
        }
        output::warning("Clearing state of active operations");
    }

    store.clear_all()?;
    output::success("Operation state cleared");
    Ok(())
}
