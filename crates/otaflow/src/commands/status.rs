//! Status command

use anyhow::Result;
use otaflow_update::store::{ActiveDownload, ActiveUpdate, LastUpdateConfig, UpdateProgress};
use owo_colors::OwoColorize;
use serde::Serialize;

use super::{load_runtime, open_store, GlobalOptions};
use crate::cli::StatusArgs;
use crate::output;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    has_active_operations: bool,
    downloads: Vec<ActiveDownload>,
    updates: Vec<ActiveUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<UpdateProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_update_config: Option<LastUpdateConfig>,
}

pub fn run(args: StatusArgs, global: &GlobalOptions) -> Result<()> {
    let runtime = load_runtime(global)?;
    let store = open_store(&runtime)?;

    let report = StatusReport {
        has_active_operations: store.has_active_operations()?,
        downloads: store.list_downloads()?,
        updates: store.list_updates()?,
        progress: store.update_progress()?,
        last_update_config: store.last_update_config()?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    output::header("Operations");
    output::kv("State file", &runtime.paths.state_file()?.display().to_string());
    let active = if report.has_active_operations {
        "yes".yellow().to_string()
    } else {
        "no".green().to_string()
    };
    output::kv("Active", &active);

    if report.downloads.is_empty() && report.updates.is_empty() {
        println!("\n{}", "No operations recorded.".dimmed());
    }

    if !report.downloads.is_empty() {
        println!("\nDownloads:");
        for download in &report.downloads {
            output::kv(
                &download.download_id,
                &format!(
                    "{} {:>3}% {} {}",
                    download.status,
                    download.progress,
                    output::timestamp(download.start_time),
                    download.config_url.dimmed()
                ),
            );
            if let Some(message) = &download.error_message {
                println!("    {}", message.red());
            }
        }
    }

    if !report.updates.is_empty() {
        println!("\nUpdates:");
        for update in &report.updates {
            output::kv(
                &update.update_id,
                &format!(
                    "{} {:>3}% {} {}",
                    update.status,
                    update.progress,
                    output::timestamp(update.start_time),
                    update.config_name
                ),
            );
            if let Some(message) = &update.error_message {
                println!("    {}", message.red());
            }
        }
    }

    if let Some(progress) = &report.progress {
        println!("\nLast progress:");
        output::kv("Operation", &progress.current_operation);
        output::kv("Step", &progress.current_step);
        output::kv("Progress", &format!("{}%", progress.overall_progress));
        output::kv("Updated", &output::timestamp(progress.last_update_time));
    }

    if let Some(config) = &report.last_update_config {
        println!("\nLast update config:");
        output::kv("Name", &config.name);
        output::kv("Install type", &config.install_type.to_string());
        output::kv("URL", &config.url);
    }

    Ok(())
}
