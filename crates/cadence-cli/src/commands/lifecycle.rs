use anyhow::Result;
use cadence_core::dispatch::PendingAction;
use cadence_core::lifecycle::Transition;
use cadence_core::models::EntityKind;
use cadence_core::service::{TaskService, UndoOutcome};
use owo_colors::OwoColorize;

use crate::cli::IdCommand;
use crate::config::Config;
use crate::util::{resolve_entity, resolve_instance_id};

pub async fn reopen(service: &TaskService, config: &Config, command: IdCommand) -> Result<()> {
    let owner_id = config.owner_id;
    let entity = resolve_entity(service.repository(), owner_id, &command.id).await?;
    match entity.kind {
        EntityKind::Instance => {
            let instance = service.reopen_instance(owner_id, entity.id).await?;
            println!("Reopened instance for {}", instance.occurrence_date);
        }
        EntityKind::Task => {
            let task = service.reopen_task(owner_id, entity.id).await?;
            println!("Reopened task '{}'", task.title);
        }
    }
    Ok(())
}

pub async fn skip(service: &TaskService, config: &Config, command: IdCommand) -> Result<()> {
    let id = resolve_instance_id(service.repository(), config.owner_id, &command.id).await?;
    let instance = service.skip_instance(config.owner_id, id).await?;
    println!("Skipped instance for {}", instance.occurrence_date);
    Ok(())
}

pub async fn unskip(service: &TaskService, config: &Config, command: IdCommand) -> Result<()> {
    let id = resolve_instance_id(service.repository(), config.owner_id, &command.id).await?;
    let instance = service.unskip_instance(config.owner_id, id).await?;
    println!("Instance for {} is pending again", instance.occurrence_date);
    Ok(())
}

pub async fn undo(service: &TaskService, config: &Config, command: IdCommand) -> Result<()> {
    let entity = resolve_entity(service.repository(), config.owner_id, &command.id).await?;
    match service.undo(config.owner_id, entity.id).await? {
        UndoOutcome::Undone(change) => {
            let verb = match change.action {
                PendingAction::Transition(Transition::Complete) => "completion",
                PendingAction::Transition(Transition::Reopen) => "reopen",
                PendingAction::Transition(Transition::Skip) => "skip",
                PendingAction::Transition(Transition::Unskip) => "unskip",
                PendingAction::Delete => "deletion",
            };
            println!("{} Undid {} of {}", "↶".green().bold(), verb, change.entity);
        }
        UndoOutcome::NothingToUndo => {
            println!("{}", "Nothing to undo: the change has already been synced.".yellow());
        }
    }
    Ok(())
}
