use cadence_core::models::TaskPriority;
use cadence_core::recurrence::RecurrenceRuleInput;
use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Cadence: a recurring-task dashboard that keeps a calendar in step
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Add a new task
    Add(AddCommand),
    /// Edit a task
    Edit(EditCommand),
    /// Delete a task and its instances
    Delete(DeleteCommand),
    /// List tasks
    Tasks,
    /// List instances in a date range
    List(ListCommand),
    /// Mark instances or one-off tasks as completed
    Do(DoCommand),
    /// Reopen a completed instance or task
    Reopen(IdCommand),
    /// Skip a pending instance
    Skip(IdCommand),
    /// Bring a skipped instance back to pending
    Unskip(IdCommand),
    /// Revert the last change still inside its grace window
    Undo(IdCommand),
    /// Rebuild the calendar from local state
    Resync,
    /// Roll recurring tasks forward to their horizon
    Refresh,
    /// Manage domains
    Domain(DomainCommand),
}

/// Human-friendly recurrence frequency
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RecurrenceArgs {
    /// How often the task recurs
    #[arg(long, value_enum)]
    pub every: Option<Frequency>,
    /// Repeat every N days/weeks/months
    #[arg(long, requires = "every")]
    pub interval: Option<i64>,
    /// Days of week for weekly recurrence (mon,tue,...)
    #[arg(long, value_delimiter = ',', requires = "every")]
    pub on: Vec<String>,
    /// Day of month for monthly recurrence
    #[arg(long, requires = "every")]
    pub day: Option<i64>,
    /// Time of day in the task's timezone (HH:MM)
    #[arg(long, value_parser = parse_time, requires = "every")]
    pub at: Option<NaiveTime>,
    /// Days ahead to keep materialized
    #[arg(long, requires = "every")]
    pub horizon: Option<i64>,
    /// First day the rule applies (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date, requires = "every")]
    pub starts: Option<NaiveDate>,
}

impl RecurrenceArgs {
    pub fn to_input(&self) -> Option<RecurrenceRuleInput> {
        let every = self.every?;
        Some(RecurrenceRuleInput {
            frequency: every.to_string(),
            interval: self.interval.unwrap_or(1),
            days_of_week: self.on.clone(),
            day_of_month: self.day,
            anchor_time: self.at,
            horizon_days: self.horizon,
        })
    }
}

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    /// The title of the task
    pub title: String,
    /// Due date of a one-off task (YYYY-MM-DD)
    #[arg(short, long, value_parser = parse_date, conflicts_with = "every")]
    pub due: Option<NaiveDate>,
    /// The priority of the task (none, low, medium, high)
    #[arg(short, long)]
    pub priority: Option<TaskPriority>,
    /// Length of each occurrence in minutes
    #[arg(long)]
    pub duration: Option<i64>,
    /// IANA timezone of the task
    #[arg(long)]
    pub timezone: Option<String>,
    /// Domain to file the task under
    #[arg(long)]
    pub domain: Option<String>,
    #[command(flatten)]
    pub recurrence: RecurrenceArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct EditCommand {
    /// The ID of the task to edit
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub priority: Option<TaskPriority>,

    #[arg(long)]
    pub duration: Option<i64>,

    #[arg(long)]
    pub timezone: Option<String>,

    #[arg(long, value_parser = parse_date)]
    pub due: Option<NaiveDate>,
    #[arg(long, conflicts_with = "due")]
    pub due_clear: bool,

    #[arg(long)]
    pub domain: Option<String>,
    #[arg(long, conflicts_with = "domain")]
    pub domain_clear: bool,

    #[command(flatten)]
    pub recurrence: RecurrenceArgs,

    /// Stop recurring; pending instances are removed
    #[arg(long, conflicts_with_all = ["every", "resume"])]
    pub pause: bool,
    /// Recur again with the stored rule
    #[arg(long)]
    pub resume: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct DeleteCommand {
    /// The ID of the task to delete
    pub id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// First day to show (defaults to today)
    #[arg(long, value_parser = parse_date)]
    pub from: Option<NaiveDate>,
    /// Last day to show
    #[arg(long, value_parser = parse_date, conflicts_with = "days")]
    pub to: Option<NaiveDate>,
    /// Number of days to show
    #[arg(long, default_value_t = 7)]
    pub days: u32,
    /// Timezone used to bucket instances into days
    #[arg(long)]
    pub timezone: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct DoCommand {
    /// IDs of the instances or one-off tasks to complete
    #[arg(required = true, num_args = 1..)]
    pub ids: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct IdCommand {
    /// The ID of the instance or task
    pub id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct DomainCommand {
    #[command(subcommand)]
    pub command: DomainSubcommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum DomainSubcommand {
    /// Add a new domain
    Add(DomainNameCommand),
    /// List domains
    List,
    /// Delete a domain
    Delete(DomainNameCommand),
}

#[derive(Parser, Debug, Clone)]
pub struct DomainNameCommand {
    /// The name of the domain
    pub name: String,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| format!("'{s}' is not a date like 2026-01-31"))
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| format!("'{s}' is not a time like 09:30"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_recurrence_args_build_rule_input() {
        let cli = Cli::try_parse_from([
            "cadence", "add", "Stretch", "--every", "weekly", "--on", "mon,wed,fri", "--at", "07:15",
        ])
        .unwrap();
        let Commands::Add(add) = cli.command else {
            panic!("expected add");
        };
        let input = add.recurrence.to_input().unwrap();
        assert_eq!(input.frequency, "weekly");
        assert_eq!(input.interval, 1);
        assert_eq!(input.days_of_week, vec!["mon", "wed", "fri"]);
        assert_eq!(input.anchor_time, NaiveTime::from_hms_opt(7, 15, 0));
    }

    #[test]
    fn test_due_date_conflicts_with_recurrence() {
        let result = Cli::try_parse_from(["cadence", "add", "X", "--due", "2026-02-01", "--every", "daily"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rule_options_need_a_frequency() {
        assert!(Cli::try_parse_from(["cadence", "add", "X", "--on", "mon"]).is_err());
        assert!(Cli::try_parse_from(["cadence", "add", "X", "--at", "9am", "--every", "daily"]).is_err());
    }
}
