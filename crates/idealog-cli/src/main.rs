//! Idealog CLI - capture content ideas and drafts from the terminal
//!
//! Everything is written to the local database first; `push`, `sync`,
//! `merge` and `force-replace` talk to the remote store only when asked.

mod cli;
mod commands;
mod error;


use clap::Parser;
use idealog_core::config::EngineConfig;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::common::{resolve_db_path, resolve_session, Context};
use crate::commands::drafts::run_draft;
use crate::commands::ideas::run_idea;
use crate::commands::status::run_status;
use crate::commands::sync::{run_conflicts, run_force_replace, run_merge, run_push, run_sync};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("idealog=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = Context {
        db_path: resolve_db_path(cli.db_path),
        session: resolve_session(cli.owner)?,
        config: EngineConfig::from_env()?,
        json: cli.json,
    };

    match cli.command {
        Commands::Idea { command } => run_idea(command, &ctx).await?,
        Commands::Draft { command } => run_draft(command, &ctx).await?,
        Commands::Push => run_push(&ctx).await?,
        Commands::Sync => run_sync(&ctx).await?,
        Commands::Merge { policy } => run_merge(policy.into(), &ctx).await?,
        Commands::ForceReplace { yes } => run_force_replace(yes, &ctx).await?,
        Commands::Conflicts { limit } => run_conflicts(limit, &ctx).await?,
        Commands::Status => run_status(&ctx).await?,
    }

    Ok(())
}
