use anyhow::Result;
use cadence_core::service::TaskService;

use crate::cli::{DomainCommand, DomainSubcommand};
use crate::config::Config;
use crate::views::table::display_domains;

pub async fn domain_command(service: &TaskService, config: &Config, command: DomainCommand) -> Result<()> {
    match command.command {
        DomainSubcommand::Add(add) => {
            let domain = service.add_domain(config.owner_id, add.name).await?;
            println!("Domain '{}' created.", domain.name);
        }
        DomainSubcommand::List => {
            let domains = service.list_domains(config.owner_id).await?;
            display_domains(&domains);
        }
        DomainSubcommand::Delete(delete) => {
            let name = delete.name.clone();
            service.delete_domain(config.owner_id, delete.name).await?;
            println!("Domain '{}' deleted.", name);
        }
    }
    Ok(())
}
