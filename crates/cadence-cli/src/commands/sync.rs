use anyhow::Result;
use cadence_core::service::{ResyncStatus, TaskService};
use owo_colors::OwoColorize;

use crate::config::Config;

pub fn resync(service: &TaskService, config: &Config) -> Result<()> {
    match service.request_full_resync(config.owner_id) {
        ResyncStatus::Scheduled => println!("Full resync scheduled."),
    }
    Ok(())
}

pub async fn refresh(service: &TaskService, config: &Config) -> Result<()> {
    let report = service.refresh(config.owner_id).await?;
    println!(
        "{} {} new instance(s), {} already in place",
        "✓".green().bold(),
        report.created,
        report.existing
    );
    for failure in &report.failures {
        println!("  {} {}: {}", "✗".red(), failure.date, failure.error);
    }
    Ok(())
}
