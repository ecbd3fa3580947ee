//! Bazaar CLI - Database migrations and catalog seeding.
//!
//! # Usage
//!
//! ```bash
//! # Create the storefront tables and the order procedure
//! bz-cli migrate
//!
//! # Load categories and products from YAML
//! bz-cli seed crates/cli/seed/catalog.yaml
//!
//! # Check a seed file without touching the database
//! bz-cli seed crates/cli/seed/catalog.yaml --dry-run
//! ```
//!
//! # Environment Variables
//!
//! - `REMOTE_DATABASE_URL` - `PostgreSQL` connection string of the hosted
//!   store (falls back to `DATABASE_URL`)

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "bz-cli")]
#[command(author, version, about = "Bazaar CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Seed categories and products from a YAML file
    Seed {
        /// Path to the catalog YAML file
        file: PathBuf,

        /// Validate the file and report what would be written
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { file, dry_run } => commands::seed::catalog(&file, dry_run).await?,
    }
    Ok(())
}
