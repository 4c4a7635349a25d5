//! The database server.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ursadb::db::{migrate_version, Database};
use ursadb::server::{run_server, DEFAULT_BIND_ADDRESS};
use ursadb::util::fix_rlimit;

#[derive(Parser)]
#[command(name = "ursadb")]
#[command(about = "Trigram database server for querying terabytes of binary files")]
#[command(version)]
struct Cli {
    /// Path to the database manifest.
    database: PathBuf,

    /// Address to bind to.
    #[arg(default_value = DEFAULT_BIND_ADDRESS)]
    bind_address: String,

    /// Enable verbose output (debug messages).
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("UrsaDB v{}", env!("CARGO_PKG_VERSION"));
    fix_rlimit();

    migrate_version(&cli.database)
        .with_context(|| format!("failed to migrate {}", cli.database.display()))?;
    let db = Database::load(&cli.database)
        .with_context(|| format!("failed to load {}", cli.database.display()))?;

    run_server(db, &cli.bind_address).context("server terminated")?;
    Ok(())
}
