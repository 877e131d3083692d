use anyhow::Result;
use cadence_core::service::TaskService;

use crate::cli::Commands;
use crate::config::Config;

pub mod add;
pub mod delete;
pub mod r#do;
pub mod domain;
pub mod edit;
pub mod lifecycle;
pub mod list;
pub mod sync;
pub mod tasks;

pub async fn run(service: &TaskService, config: &Config, command: Commands) -> Result<()> {
    match command {
        Commands::Add(command) => add::add_task(service, config, command).await,
        Commands::Edit(command) => edit::edit_task(service, config, command).await,
        Commands::Delete(command) => delete::delete_task(service, config, command).await,
        Commands::Tasks => tasks::list_tasks(service, config).await,
        Commands::List(command) => list::list_instances(service, config, command).await,
        Commands::Do(command) => r#do::do_items(service, config, command).await,
        Commands::Reopen(command) => lifecycle::reopen(service, config, command).await,
        Commands::Skip(command) => lifecycle::skip(service, config, command).await,
        Commands::Unskip(command) => lifecycle::unskip(service, config, command).await,
        Commands::Undo(command) => lifecycle::undo(service, config, command).await,
        Commands::Resync => sync::resync(service, config),
        Commands::Refresh => sync::refresh(service, config).await,
        Commands::Domain(command) => domain::domain_command(service, config, command).await,
    }
}
