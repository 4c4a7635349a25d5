//! Offline compaction: merges small compatible datasets round after
//! round until the layout reaches a fixed point.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ursadb::command::{Command, CompactType};
use ursadb::daemon::{dispatch_command, dispatch_locks};
use ursadb::db::{migrate_version, Database, Task};
use ursadb::util::{fix_rlimit, get_milli_timestamp};

#[derive(Parser)]
#[command(name = "ursadb_compact")]
#[command(about = "Compact an ursadb database without a server")]
#[command(version)]
struct Cli {
    /// Path to the database manifest.
    database: PathBuf,

    /// Compact a single round instead of running to a fixed point.
    #[arg(short = '1', long)]
    single: bool,

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

    tracing::info!("UrsaDB v{}: {}", env!("CARGO_PKG_VERSION"), cli.database.display());
    fix_rlimit();
    migrate_version(&cli.database)
        .with_context(|| format!("failed to migrate {}", cli.database.display()))?;
    let mut db = Database::load(&cli.database)
        .with_context(|| format!("failed to load {}", cli.database.display()))?;

    let command = Command::Compact(CompactType::Smart);
    let mut round = 0;
    loop {
        let pre_dataset_count = db.working_sets().len();

        let snap = db.snapshot();
        let locks = dispatch_locks(&command, &snap);
        if locks.len() < 2 {
            tracing::info!("DONE: no compact candidates ({} datasets)", pre_dataset_count);
            break;
        }

        let spec = db
            .allocate_task("compact: smart", "ursadb_compact", locks)
            .context("task allocation failed")?;
        let mut task = Task::new(spec);

        tracing::info!("JOB: {}: start: compact: smart", task.spec().id());
        let response =
            dispatch_command(&command, &mut task, &snap).context("compact failed")?;
        tracing::info!("RESP: {}", response);

        let task_ms = get_milli_timestamp().saturating_sub(task.spec().epoch_ms());
        let task_id = task.spec().id();
        drop(snap);
        db.commit_task(task).context("commit failed")?;
        db.collect_garbage();
        tracing::info!("JOB: {}: done ({}ms): compact: smart", task_id, task_ms);

        if cli.single {
            tracing::info!("DONE: single compaction");
            break;
        }

        let post_dataset_count = db.working_sets().len();
        if post_dataset_count == pre_dataset_count {
            tracing::info!("DONE: fixed point: {} datasets", post_dataset_count);
            break;
        }
        round += 1;
        tracing::info!(
            "ROUND: {}: {} -> {} datasets",
            round,
            pre_dataset_count,
            post_dataset_count
        );
    }

    Ok(())
}
