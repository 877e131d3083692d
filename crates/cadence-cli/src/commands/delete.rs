use anyhow::Result;
use cadence_core::service::TaskService;

use crate::cli::DeleteCommand;
use crate::config::Config;
use crate::util::resolve_task_id;

pub async fn delete_task(service: &TaskService, config: &Config, command: DeleteCommand) -> Result<()> {
    let task_id = resolve_task_id(service.repository(), config.owner_id, &command.id).await?;
    let task = service.get_task(config.owner_id, task_id).await?;
    service.delete_task(config.owner_id, task_id).await?;
    println!("Deleted task '{}'.", task.title);
    Ok(())
}
