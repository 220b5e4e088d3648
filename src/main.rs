use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use groupcal::storage::config::LoggingConfig;
use groupcal::{BackendRegistry, CalendarManager, Config, SqliteCalendarStore};

mod cli;
use cli::{Command, USAGE, parse_command, run_command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = match parse_command(std::env::args().skip(1)) {
        Ok(Command::Help) => {
            println!("{}", USAGE);
            return Ok(());
        }
        Ok(command) => command,
        Err(err) => {
            eprintln!("Error: {}", err);
            println!("{}", USAGE);
            std::process::exit(2);
        }
    };

    let config = Config::load_or_create().context("Failed to load configuration")?;
    let _guard = setup_logging(&config.logging);

    let store = SqliteCalendarStore::open(&config.database.path).with_context(|| {
        format!("Failed to open database {}", config.database.path.display())
    })?;
    let registry = BackendRegistry::from_config(&config.backends)?;
    let manager = CalendarManager::new(store, registry);

    match run_command(&manager, command).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Command failed: {}", e);
            Err(e.into())
        }
    }
}

fn setup_logging(logging: &LoggingConfig) -> WorkerGuard {
    std::fs::create_dir_all(&logging.directory).ok();

    let file_appender = tracing_appender::rolling::daily(&logging.directory, "groupcal.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .init();

    tracing::info!("groupcal started");
    guard
}
