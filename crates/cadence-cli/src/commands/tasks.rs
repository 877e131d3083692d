use anyhow::Result;
use cadence_core::service::TaskService;

use crate::config::Config;
use crate::views::table::display_tasks;

pub async fn list_tasks(service: &TaskService, config: &Config) -> Result<()> {
    let tasks = service.list_tasks(config.owner_id).await?;
    let domains = service.list_domains(config.owner_id).await?;
    display_tasks(&tasks, &domains);
    Ok(())
}
