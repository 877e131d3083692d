use cadence_core::db;
use cadence_core::error::CoreError;
use cadence_core::recurrence::MaterializationManager;
use cadence_core::repository::SqliteRepository;
use cadence_core::service::TaskService;
use calendar_dir::IcsDirCalendar;
use clap::Parser;
use owo_colors::{OwoColorize, Style};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod calendar_dir;
mod cli;
mod commands;
mod config;
mod util;
mod views;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cadence=warn,cadence_core=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();

    let config = match config::Config::new() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    let service = match build_service(&config).await {
        Ok(service) => service,
        Err(e) => {
            handle_error(e);
            std::process::exit(1);
        }
    };

    let result = commands::run(&service, &config, cli.command).await;

    // Whatever is still inside a grace window is pushed before exit
    service.shutdown().await;

    if let Err(e) = result {
        handle_error(e);
        std::process::exit(1);
    }
}

async fn build_service(config: &config::Config) -> anyhow::Result<TaskService> {
    std::fs::create_dir_all(&config.calendar_dir)?;
    let calendar = IcsDirCalendar::new(&config.calendar_dir);
    debug!(dir = %calendar.dir().display(), "using calendar directory");

    let db_path = config.database_path.to_string_lossy();
    let pool = db::establish_connection(&db_path).await?;
    let manager = MaterializationManager::new(config.materialization.clone());
    let repository = Arc::new(SqliteRepository::new(pool, manager));

    Ok(TaskService::new(repository, Arc::new(calendar), config.sync.clone()))
}

fn handle_error(err: anyhow::Error) {
    let error_style = Style::new().red().bold();

    if let Some(core_error) = err.downcast_ref::<CoreError>() {
        match core_error {
            CoreError::NotFound(s) => {
                eprintln!("{} {}", "Error:".style(error_style), s);
            }
            CoreError::AmbiguousId(options) => {
                eprintln!("{}", "Error: Ambiguous ID.".style(error_style));
                eprintln!("Did you mean one of these?");
                for (id, title) in options {
                    eprintln!("  {} ({})", id.yellow(), title);
                }
            }
            CoreError::Validation(s) => {
                eprintln!("{} Invalid input: {}", "Error:".style(error_style), s);
            }
            CoreError::InvalidTimezone(tz) => {
                eprintln!(
                    "{} Unknown timezone '{}'. Use an IANA name such as Europe/Berlin.",
                    "Error:".style(error_style),
                    tz.yellow()
                );
            }
            CoreError::InvalidTransition { from, transition } => {
                eprintln!(
                    "{} Cannot {} an item that is already {}",
                    "Error:".style(error_style),
                    transition,
                    from.yellow()
                );
            }
            _ => eprintln!("{} {}", "Error:".style(error_style), core_error),
        }
    } else {
        eprintln!("{} {:#}", "Error:".style(error_style), err);
    }
}
