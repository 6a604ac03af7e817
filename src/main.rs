use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches, Parser};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gator::commands::{Command, State};
use gator::config::Config;
use gator::db::Database;
use gator::handlers::default_commands;

/// Multi-user RSS aggregator
#[derive(Parser, Debug)]
#[command(name = "gator", version, about)]
struct Cli {
    /// Command to run
    #[arg(value_name = "COMMAND")]
    name: String,

    /// Arguments passed to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let commands = default_commands();
    let matches = Cli::command()
        .after_help(format!("Commands: {}", commands.names().join(", ")))
        .get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    let config = Config::load_or_default(Config::default_path()?)?;
    debug!("Loaded configuration from {}", config.path().display());

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| config.db_url.clone());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let db = Arc::new(db);
    let mut state = State::new(Arc::clone(&db), config);
    let result = commands
        .run(&mut state, Command::new(cli.name, cli.args))
        .await;

    db.close().await;
    result?;
    Ok(())
}
