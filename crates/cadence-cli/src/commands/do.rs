use anyhow::Result;
use cadence_core::models::{EntityKind, RejectionReason};
use cadence_core::service::TaskService;
use owo_colors::OwoColorize;
use uuid::Uuid;

use crate::cli::DoCommand;
use crate::config::Config;
use crate::util::resolve_entity;

pub async fn do_items(service: &TaskService, config: &Config, command: DoCommand) -> Result<()> {
    let owner_id = config.owner_id;

    let mut instance_ids: Vec<Uuid> = Vec::new();
    let mut task_ids: Vec<Uuid> = Vec::new();
    for short_id in &command.ids {
        let entity = resolve_entity(service.repository(), owner_id, short_id).await?;
        match entity.kind {
            EntityKind::Instance => instance_ids.push(entity.id),
            EntityKind::Task => task_ids.push(entity.id),
        }
    }

    for task_id in task_ids {
        let task = service.complete_task(owner_id, task_id).await?;
        println!("{} Completed task: '{}'", "✓".green().bold(), task.title);
    }

    match instance_ids.as_slice() {
        [] => {}
        [instance_id] => {
            let instance = service.complete_instance(owner_id, *instance_id).await?;
            println!(
                "{} Completed instance for {}",
                "✓".green().bold(),
                instance.occurrence_date
            );
        }
        ids => {
            let batch = service.batch_complete(owner_id, ids).await?;
            println!("{} Completed {} instance(s)", "✓".green().bold(), batch.completed.len());
            for rejection in &batch.rejected {
                let reason = match rejection.reason {
                    RejectionReason::NotFound => "not found".to_string(),
                    RejectionReason::NotOwned => "belongs to another owner".to_string(),
                    RejectionReason::InvalidTransition(state) => format!("already {state}"),
                };
                println!("  {} {} {}", "✗".red(), rejection.instance_id.to_string().yellow(), reason);
            }
        }
    }

    Ok(())
}
