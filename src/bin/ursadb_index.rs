//! Offline bulk indexer: walks sample directories and indexes them in
//! batches, committing after every batch so progress survives a crash.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ursadb::db::{migrate_version, Database, DatabaseName, DbChange, Task};
use ursadb::types::IndexType;
use ursadb::util::fix_rlimit;

#[derive(Parser)]
#[command(name = "ursadb_index")]
#[command(about = "Index samples into an ursadb database without a server")]
#[command(version)]
struct Cli {
    /// Path to the database manifest.
    database: PathBuf,

    /// Files or directories to index (directories are walked).
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Index types to build (default: all four).
    #[arg(long = "type", value_name = "TYPE")]
    types: Vec<String>,

    /// Taints to apply to the created datasets.
    #[arg(long = "tag", value_name = "TAINT")]
    tags: Vec<String>,

    /// How many files to index per committed batch.
    #[arg(long, default_value_t = 1024)]
    batch: usize,

    /// Enable verbose output (debug messages).
    #[arg(short, long)]
    verbose: bool,
}

fn collect_file_paths(roots: &[PathBuf]) -> Vec<String> {
    let mut out = Vec::new();
    for root in roots {
        if root.is_file() {
            let path = std::fs::canonicalize(root).unwrap_or_else(|_| root.clone());
            out.push(path.to_string_lossy().into_owned());
            continue;
        }
        for entry in walkdir::WalkDir::new(root) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    let path = std::fs::canonicalize(entry.path())
                        .unwrap_or_else(|_| entry.path().to_path_buf());
                    out.push(path.to_string_lossy().into_owned());
                }
                Ok(_) => {}
                Err(err) => tracing::warn!("Walk error under {}: {}", root.display(), err),
            }
        }
    }
    out.sort();
    out
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

    let types: Vec<IndexType> = if cli.types.is_empty() {
        IndexType::ALL.to_vec()
    } else {
        cli.types
            .iter()
            .map(|name| {
                name.parse::<IndexType>()
                    .map_err(|()| anyhow::anyhow!("unknown index type: {name}"))
            })
            .collect::<anyhow::Result<_>>()?
    };

    tracing::info!("UrsaDB v{}", env!("CARGO_PKG_VERSION"));
    fix_rlimit();
    migrate_version(&cli.database)
        .with_context(|| format!("failed to migrate {}", cli.database.display()))?;
    let mut db = Database::load(&cli.database)
        .with_context(|| format!("failed to load {}", cli.database.display()))?;

    let targets = collect_file_paths(&cli.paths);
    tracing::info!("Found {} files to consider", targets.len());

    for (batch_no, batch) in targets.chunks(cli.batch.max(1)).enumerate() {
        let snap = db.snapshot();
        let request = format!("index {} files (batch {})", batch.len(), batch_no);
        let spec = db
            .allocate_task(&request, "ursadb_index", Vec::new())
            .context("task allocation failed")?;
        let mut task = Task::new(spec);

        tracing::info!("JOB: {}: start: {}", task.spec().id(), request);
        snap.index_files(&mut task, &types, batch)
            .with_context(|| format!("batch {batch_no} failed"))?;

        // Taint every dataset the batch created, before it is committed.
        let inserted: Vec<String> = task
            .changes()
            .iter()
            .filter_map(|change| match change {
                DbChange::Insert { dataset } => Some(dataset.clone()),
                _ => None,
            })
            .collect();
        for fname in inserted {
            let id = DatabaseName::parse(db.db_base().to_path_buf(), &fname)
                .map(|name| name.id().to_string())
                .unwrap_or(fname);
            for tag in &cli.tags {
                task.change(DbChange::ToggleTaint {
                    dataset: id.clone(),
                    taint: tag.clone(),
                });
            }
        }

        drop(snap);
        db.commit_task(task).context("commit failed")?;
        db.collect_garbage();
    }

    tracing::info!("DONE: {} datasets in the database", db.working_sets().len());
    Ok(())
}
