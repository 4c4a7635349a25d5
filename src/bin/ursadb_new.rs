//! Creates an empty database.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ursadb::db::Database;

#[derive(Parser)]
#[command(name = "ursadb_new")]
#[command(about = "Create an empty ursadb database")]
#[command(version)]
struct Cli {
    /// Path of the database manifest to create.
    database: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    Database::create(&cli.database)
        .with_context(|| format!("failed to create {}", cli.database.display()))?;
    tracing::info!("Created database {}", cli.database.display());
    Ok(())
}
