//! Configs command

use anyhow::{Context, Result};
use otaflow_core::load_update_configs;
use serde::Serialize;

use super::{load_runtime, GlobalOptions};
use crate::cli::ConfigsArgs;
use crate::output;

#[derive(Debug, Serialize)]
struct ConfigSummary {
    name: String,
    version: Option<String>,
    install_type: String,
    url: String,
}

pub fn run(args: ConfigsArgs, global: &GlobalOptions) -> Result<()> {
    let runtime = load_runtime(global)?;
    let dir = runtime.paths.configs_dir()?;
    let configs = load_update_configs(&dir)
        .with_context(|| format!("Failed to load update configs from {}", dir.display()))?;

    let summaries: Vec<ConfigSummary> = configs
        .iter()
        .map(|config| ConfigSummary {
            name: config.name.clone(),
            version: config.version_token().ok().map(String::from),
            install_type: config.install_type.to_string(),
            url: config.url.clone(),
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    output::header(&format!("Update configs in {}", dir.display()));
    if summaries.is_empty() {
        output::info("No update configs downloaded yet");
        return Ok(());
    }
    for summary in &summaries {
        output::kv(
            &summary.name,
            &format!(
                "{} {} {}",
                summary.version.as_deref().unwrap_or("-"),
                summary.install_type,
                summary.url
            ),
        );
    }
    Ok(())
}
