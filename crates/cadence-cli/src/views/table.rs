use cadence_core::models::{Domain, InstanceDetails, InstanceState, Task, TaskPriority};
use cadence_core::timezone::format_in;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use comfy_table::{Attribute, Cell, Color, Row, Table};
use std::collections::HashMap;
use uuid::Uuid;

fn priority_cell(text: String, priority: &TaskPriority) -> Cell {
    let cell = Cell::new(text);
    match priority {
        TaskPriority::High => cell.fg(Color::Red).add_attribute(Attribute::Bold),
        TaskPriority::Medium => cell.fg(Color::Yellow),
        TaskPriority::Low => cell.fg(Color::Green),
        TaskPriority::None => cell,
    }
}

pub fn display_tasks(tasks: &[Task], domains: &[Domain]) {
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }

    let domain_names: HashMap<Uuid, &str> = domains.iter().map(|d| (d.id, d.name.as_str())).collect();
    let today = Utc::now().date_naive();

    let mut table = Table::new();
    table.set_header(vec!["ID", "Title", "Priority", "Schedule", "Domain", "Status"]);

    for task in tasks {
        let mut row = Row::new();
        row.add_cell(Cell::new(task.id.to_string()));

        let mut title = String::new();
        if task.is_recurring {
            title.push_str("↻ ");
        }
        title.push_str(&task.title);

        if task.completed_at.is_some() {
            row.add_cell(Cell::new(title).add_attribute(Attribute::CrossedOut).fg(Color::DarkGrey));
        } else {
            row.add_cell(priority_cell(title, &task.priority));
        }

        row.add_cell(Cell::new(format!("{:?}", task.priority)));
        row.add_cell(schedule_cell(task, today));

        let domain = task
            .domain_id
            .and_then(|id| domain_names.get(&id).copied())
            .unwrap_or("");
        row.add_cell(Cell::new(domain).fg(Color::Cyan));

        let status = if task.completed_at.is_some() {
            Cell::new("done").fg(Color::Green)
        } else if task.is_recurring {
            Cell::new("active")
        } else if task.recurrence_rule.is_some() {
            Cell::new("paused").fg(Color::DarkGrey)
        } else {
            Cell::new("open")
        };
        row.add_cell(status);

        table.add_row(row);
    }

    println!("{table}");
}

fn schedule_cell(task: &Task, today: NaiveDate) -> Cell {
    if let Some(rule) = &task.recurrence_rule {
        let text = rule.describe();
        return if task.is_recurring {
            Cell::new(text)
        } else {
            Cell::new(text).fg(Color::DarkGrey)
        };
    }
    match task.due_date {
        Some(due) if task.completed_at.is_none() && due < today => Cell::new(due.to_string()).fg(Color::Red),
        Some(due) if task.completed_at.is_none() && due == today => Cell::new(due.to_string()).fg(Color::Yellow),
        Some(due) => Cell::new(due.to_string()),
        None => Cell::new(""),
    }
}

pub fn display_instances(instances: &[InstanceDetails], tz: &Tz) {
    if instances.is_empty() {
        println!("No instances in this range.");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Time", "Title", "State"]);

    for instance in instances {
        let mut row = Row::new();
        row.add_cell(Cell::new(instance.id.to_string()));
        row.add_cell(Cell::new(instance.occurrence_date.format("%a %Y-%m-%d").to_string()));

        let time = instance
            .scheduled_at
            .map(|at| format_in(at, tz, "%H:%M"))
            .unwrap_or_else(|| "all day".to_string());
        row.add_cell(Cell::new(time));

        let title = match instance.state {
            InstanceState::Pending => priority_cell(instance.title.clone(), &instance.priority),
            InstanceState::Completed | InstanceState::Skipped => Cell::new(&instance.title)
                .add_attribute(Attribute::CrossedOut)
                .fg(Color::DarkGrey),
        };
        row.add_cell(title);

        let state = Cell::new(instance.state.to_string());
        row.add_cell(match instance.state {
            InstanceState::Completed => state.fg(Color::Green),
            InstanceState::Skipped => state.fg(Color::DarkGrey),
            InstanceState::Pending => state,
        });

        table.add_row(row);
    }

    println!("{table}");
}

pub fn display_domains(domains: &[Domain]) {
    if domains.is_empty() {
        println!("No domains found.");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Created"]);

    for domain in domains {
        let mut row = Row::new();
        row.add_cell(Cell::new(domain.id.to_string()));
        row.add_cell(Cell::new(&domain.name).fg(Color::Cyan));
        row.add_cell(Cell::new(domain.created_at.format("%Y-%m-%d").to_string()));
        table.add_row(row);
    }

    println!("{table}");
}
