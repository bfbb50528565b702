use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tally_core::TransactionId;
use tally_storage::SqliteGateway;
use tracing_subscriber::EnvFilter;

mod commands;
mod settings;

use settings::Settings;

#[derive(Parser)]
#[command(
    name = "tally",
    version,
    about = "Import categorized income/outcome transactions from CSV uploads"
)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file, overriding the settings file
    #[arg(long, global = true, env = "TALLY_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a CSV file (`title,type,value,category`, one header line)
    Import {
        /// Path, or a file name inside the upload directory
        file: PathBuf,
        /// Leave the file in place after importing
        #[arg(long)]
        keep: bool,
    },
    /// Delete a transaction by id
    Delete { id: TransactionId },
    /// Print every stored transaction
    List,
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        settings.database = database;
    }
    init_tracing(&settings.log_filter);

    if let Some(parent) = settings.database.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let pool = tally_storage::create_db(&settings.database)
        .await
        .with_context(|| format!("Failed to open database {}", settings.database.display()))?;
    let gateway = SqliteGateway::new(pool);

    match cli.command {
        Commands::Import { file, keep } => {
            if keep {
                settings.remove_source = false;
            }
            let created = commands::import(&settings, &gateway, &file).await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        Commands::Delete { id } => {
            commands::delete(&gateway, id).await?;
            tracing::info!("Transaction {id} removed (or was already absent)");
        }
        Commands::List => {
            let transactions = commands::list(&gateway).await?;
            println!("{}", serde_json::to_string_pretty(&transactions)?);
        }
    }

    gateway.pool().close().await;
    Ok(())
}
