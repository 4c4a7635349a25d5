//! Removes files in the database directory that the database no longer
//! references (left over after crashes mid-merge). Dry-run by default.

use anyhow::{bail, Context};
use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ursadb::db::Database;

#[derive(Parser)]
#[command(name = "ursadb_trim")]
#[command(about = "Remove orphaned files from an ursadb database directory")]
#[command(version)]
struct Cli {
    /// Path to the database manifest.
    database: PathBuf,

    /// Actually remove the orphans (default is a dry run).
    #[arg(long)]
    confirm: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let db = Database::load(&cli.database)
        .with_context(|| format!("failed to load {}", cli.database.display()))?;

    let mut db_files: BTreeSet<String> = BTreeSet::new();
    db_files.insert(db.db_name().to_string());

    for dataset in db.working_sets() {
        db_files.insert(dataset.name().to_string());
        db_files.insert(dataset.files_fname().to_string());
        db_files.insert(dataset.cache_fname().to_string());
        for index in dataset.indexes() {
            db_files.insert(index.fname().to_string());
        }
    }
    for iterator in db.iterators().values() {
        db_files.insert(iterator.name().filename().to_string());
        db_files.insert(iterator.backing_name().filename().to_string());
    }

    let suffix = format!(".{}", db.db_name());
    let mut remove_list: Vec<PathBuf> = Vec::new();
    let mut legit_files = 0;

    for entry in std::fs::read_dir(db.db_base())? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let fname = entry.file_name().to_string_lossy().into_owned();

        if fname != db.db_name() && !fname.ends_with(&suffix) {
            tracing::warn!("Unexpected: {}", fname);
            continue;
        }

        if db_files.contains(&fname) {
            legit_files += 1;
        } else {
            tracing::info!("Orphan: {}", fname);
            remove_list.push(entry.path());
        }
    }

    if legit_files != db_files.len() {
        bail!(
            "couldn't find all required database files ({legit_files}/{})",
            db_files.len()
        );
    }

    if remove_list.is_empty() {
        tracing::info!("Database consistent, nothing to do");
        return Ok(());
    }

    tracing::warn!("Found {} dangling files", remove_list.len());

    if !cli.confirm {
        tracing::info!("Dry run finished. To remove unlinked files run:");
        tracing::info!("ursadb_trim --confirm {}", cli.database.display());
        tracing::warn!("Remember to turn off ursadb before doing this");
        return Ok(());
    }

    for path in &remove_list {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::info!("Removed {}", path.display()),
            Err(err) => tracing::error!("Failed to remove {}: {}", path.display(), err),
        }
    }

    Ok(())
}
