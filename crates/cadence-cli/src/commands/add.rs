use anyhow::Result;
use cadence_core::models::NewTaskData;
use cadence_core::service::TaskService;
use owo_colors::{OwoColorize, Style};

use crate::cli::AddCommand;
use crate::config::Config;
use crate::util::resolve_domain_id;

pub async fn add_task(service: &TaskService, config: &Config, command: AddCommand) -> Result<()> {
    let owner_id = config.owner_id;
    let domain_id = match &command.domain {
        Some(name) => Some(resolve_domain_id(service.repository(), owner_id, name).await?),
        None => None,
    };

    let data = NewTaskData {
        title: command.title,
        domain_id,
        priority: command.priority,
        duration_minutes: command.duration,
        timezone: Some(command.timezone.unwrap_or_else(|| config.timezone.clone())),
        due_date: command.due,
        recurrence: command.recurrence.to_input(),
        recurrence_start: command.recurrence.starts,
    };

    let task = service.create_task(owner_id, data).await?;

    let success_style = Style::new().green().bold();
    let info_style = Style::new().blue();
    let subtle_style = Style::new().bright_black();

    match &task.recurrence_rule {
        Some(rule) if task.is_recurring => {
            println!(
                "{} Created recurring task: {}",
                "✓".style(success_style),
                task.title.bright_white().bold()
            );
            println!("  {} Task ID: {}", "→".style(info_style), task.id.to_string().yellow());
            println!(
                "  {} Repeats {} ({})",
                "→".style(info_style),
                rule.describe(),
                task.timezone
            );
            if let Some(start) = task.recurrence_start {
                println!("  {} Starting {}", "→".style(info_style), start);
            }
            println!(
                "  {} Use 'cadence list' to see upcoming instances",
                "💡".style(subtle_style)
            );
        }
        _ => {
            println!("{} Created task: {}", "✓".style(success_style), task.title.bright_white().bold());
            println!("  {} Task ID: {}", "→".style(info_style), task.id.to_string().yellow());
            if let Some(due) = task.due_date {
                println!("  {} Due {}", "→".style(info_style), due);
            }
        }
    }

    Ok(())
}
