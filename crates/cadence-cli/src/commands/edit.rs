use anyhow::Result;
use cadence_core::models::{RecurrenceEdit, UpdateTaskData};
use cadence_core::service::TaskService;
use owo_colors::{OwoColorize, Style};

use crate::cli::EditCommand;
use crate::config::Config;
use crate::util::{resolve_domain_id, resolve_task_id};

pub async fn edit_task(service: &TaskService, config: &Config, command: EditCommand) -> Result<()> {
    let owner_id = config.owner_id;
    let task_id = resolve_task_id(service.repository(), owner_id, &command.id).await?;

    let domain_id = if command.domain_clear {
        Some(None)
    } else if let Some(name) = &command.domain {
        Some(Some(resolve_domain_id(service.repository(), owner_id, name).await?))
    } else {
        None
    };

    let due_date = if command.due_clear {
        Some(None)
    } else {
        command.due.map(Some)
    };

    let is_recurring = if command.pause {
        Some(false)
    } else if command.resume {
        Some(true)
    } else {
        None
    };

    let data = UpdateTaskData {
        title: command.title,
        domain_id,
        priority: command.priority,
        duration_minutes: command.duration,
        timezone: command.timezone,
        due_date,
        recurrence: command.recurrence.to_input(),
        recurrence_start: command.recurrence.starts,
        is_recurring,
    };

    let update = service.update_task(owner_id, task_id, data).await?;

    let info_style = Style::new().blue();
    println!("{} Updated task: {}", "✓".green().bold(), update.task.title.bright_white().bold());

    match update.edit {
        RecurrenceEdit::Enabled => println!("  {} Recurrence resumed", "→".style(info_style)),
        RecurrenceEdit::Disabled => println!("  {} Recurrence paused", "→".style(info_style)),
        RecurrenceEdit::RuleChanged => {
            if let Some(rule) = &update.task.recurrence_rule {
                println!("  {} Now repeats {}", "→".style(info_style), rule.describe());
            }
        }
        RecurrenceEdit::Unchanged => {}
    }

    let removed = update.orphans.deleted_instance_ids.len();
    if removed > 0 {
        println!("  {} Removed {} pending instance(s)", "→".style(info_style), removed);
    }
    if update.orphans.retained > 0 {
        println!(
            "  {} Kept {} completed or skipped instance(s) as history",
            "→".style(info_style),
            update.orphans.retained
        );
    }
    if update.materialized.created > 0 {
        println!(
            "  {} Scheduled {} new instance(s)",
            "→".style(info_style),
            update.materialized.created
        );
    }

    Ok(())
}
