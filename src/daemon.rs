//! The dispatch shell: a pure mapping from parsed commands to responses.
//!
//! `dispatch_command` executes one command against an immutable snapshot
//! under a task handle; all catalog mutations are recorded on the task as
//! changes and applied later by the coordinator. `dispatch_locks` derives
//! the exclusive locks a command needs before its task may be granted.

use std::collections::BTreeMap;

use crate::command::{Command, CompactType, SelectCommand, TaintCommand, TaintMode};
use crate::dataset::{FileResultWriter, InMemoryResultWriter, OnDiskIterator};
use crate::db::{DatabaseLock, DatabaseSnapshot, DbChange, Task};
use crate::error::{DatasetError, DbError, Result, ServerError};
use crate::query::parser::parse_command;
use crate::response::{DatasetEntry, IndexEntry, Response, TaskEntry};

/// The locks a command must hold, derived from the current snapshot.
#[must_use]
pub fn dispatch_locks(command: &Command, snap: &DatabaseSnapshot) -> Vec<DatabaseLock> {
    match command {
        Command::IteratorPop(cmd) => {
            vec![DatabaseLock::Iterator(cmd.iterator_id.clone())]
        }
        Command::Reindex(cmd) => vec![DatabaseLock::Dataset(cmd.dataset_id.clone())],
        Command::Compact(kind) => {
            let candidates = match kind {
                CompactType::All => snap.compact_full_candidates(),
                CompactType::Smart => snap.compact_smart_candidates(),
            };
            candidates.into_iter().map(DatabaseLock::Dataset).collect()
        }
        Command::Taint(cmd) => vec![DatabaseLock::Dataset(cmd.dataset_id.clone())],
        Command::DatasetDrop(dataset_id) => {
            vec![DatabaseLock::Dataset(dataset_id.clone())]
        }
        // Selects, indexing and the introspection commands only read the
        // snapshot or write new files.
        Command::Select(_)
        | Command::Index(_)
        | Command::IndexFrom(_)
        | Command::ConfigGet(_)
        | Command::ConfigSet(..)
        | Command::Status
        | Command::Topology
        | Command::Ping => Vec::new(),
    }
}

fn execute_select(cmd: &SelectCommand, task: &mut Task, snap: &DatabaseSnapshot) -> Result<Response> {
    if cmd.use_iterator {
        let backing = snap.allocate_name("iterator")?;
        let meta = backing.derive_sibling("itermeta");

        let mut writer = FileResultWriter::create(&backing.full_path())?;
        let counters = snap.execute(&cmd.query, &cmd.taints, &cmd.datasets, task, &mut writer)?;
        writer.flush()?;
        log_counters(&counters);

        OnDiskIterator::construct(&meta, &backing, writer.file_count())?;
        task.change(DbChange::NewIterator {
            name: meta.filename().to_string(),
        });
        Ok(Response::select_iterator(meta.id(), writer.file_count()))
    } else {
        let mut writer = InMemoryResultWriter::new();
        let counters = snap.execute(&cmd.query, &cmd.taints, &cmd.datasets, task, &mut writer)?;
        log_counters(&counters);
        Ok(Response::select(writer.into_inner()))
    }
}

fn log_counters(counters: &crate::query::QueryCounters) {
    tracing::debug!(
        "QUERY: {} reads ({}ms), {} ands ({}ms), {} ors ({}ms), {} minofs ({}ms)",
        counters.reads.count(),
        counters.reads.duration_ms(),
        counters.ands.count(),
        counters.ands.duration_ms(),
        counters.ors.count(),
        counters.ors.duration_ms(),
        counters.minofs.count(),
        counters.minofs.duration_ms(),
    );
}

fn execute_taint(cmd: &TaintCommand, task: &mut Task, snap: &DatabaseSnapshot) -> Result<Response> {
    let dataset = snap
        .find_dataset(&cmd.dataset_id)
        .ok_or_else(|| DatasetError::UnknownDataset(cmd.dataset_id.clone()))?;

    let has_taint = dataset.taints().contains(&cmd.taint);
    let wants_taint = cmd.mode == TaintMode::Add;
    if has_taint != wants_taint {
        task.change(DbChange::ToggleTaint {
            dataset: cmd.dataset_id.clone(),
            taint: cmd.taint.clone(),
        });
    }
    Ok(Response::ok())
}

fn execute_topology(snap: &DatabaseSnapshot) -> Result<Response> {
    let mut datasets = Vec::new();
    for dataset in snap.datasets() {
        let mut indexes = Vec::new();
        let mut total_size = 0;
        for index in dataset.indexes() {
            let size = index.real_size().map_err(DatasetError::from)?;
            total_size += size;
            indexes.push(IndexEntry {
                ntype: index.index_type(),
                size,
            });
        }
        datasets.push(DatasetEntry {
            id: dataset.id(),
            size: total_size,
            file_count: dataset.file_count(),
            taints: dataset.taints().clone(),
            indexes,
        });
    }
    Ok(Response::topology(datasets))
}

/// Executes one command. Pure with respect to the database: reads go
/// through the snapshot, writes end up as task changes or new files.
pub fn dispatch_command(
    command: &Command,
    task: &mut Task,
    snap: &DatabaseSnapshot,
) -> Result<Response> {
    match command {
        Command::Select(cmd) => execute_select(cmd, task, snap),
        Command::Index(cmd) => {
            if cmd.ensure_unique {
                snap.recursive_index_paths(task, &cmd.types, &cmd.paths)?;
            } else {
                snap.force_recursive_index_paths(task, &cmd.types, &cmd.paths)?;
            }
            Ok(Response::ok())
        }
        Command::IndexFrom(cmd) => {
            let list = std::fs::read_to_string(&cmd.list_file)?;
            let paths: Vec<String> = list
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            if cmd.ensure_unique {
                snap.index_files(task, &cmd.types, &paths)?;
            } else {
                snap.force_index_files(task, &cmd.types, &paths)?;
            }
            Ok(Response::ok())
        }
        Command::IteratorPop(cmd) => {
            let (files, position, total) =
                snap.read_iterator(task, &cmd.iterator_id, cmd.how_many)?;
            Ok(Response::select_from_iterator(files, position, total))
        }
        Command::Reindex(cmd) => {
            snap.reindex_dataset(task, &cmd.types, &cmd.dataset_id)?;
            Ok(Response::ok())
        }
        Command::Compact(_) => {
            // The candidate choice already happened at lock derivation.
            snap.compact_locked_datasets(task)?;
            Ok(Response::ok())
        }
        Command::ConfigGet(keys) => {
            let all = snap.config().get_all();
            if keys.is_empty() {
                return Ok(Response::config(all));
            }
            let mut selected = BTreeMap::new();
            for key in keys {
                let parsed = crate::db::ConfigKey::parse(key)
                    .ok_or_else(|| DbError::UnknownConfigKey(key.clone()))?;
                selected.insert(parsed.name(), snap.config().get(parsed));
            }
            Ok(Response::config(selected))
        }
        Command::ConfigSet(key, value) => {
            let parsed = crate::db::ConfigKey::parse(key)
                .ok_or_else(|| DbError::UnknownConfigKey(key.clone()))?;
            task.change(DbChange::ConfigChange {
                key: parsed,
                value: *value,
            });
            Ok(Response::ok())
        }
        Command::Taint(cmd) => execute_taint(cmd, task, snap),
        Command::DatasetDrop(dataset_id) => {
            snap.find_dataset(dataset_id)
                .ok_or_else(|| DatasetError::UnknownDataset(dataset_id.clone()))?;
            task.change(DbChange::Drop {
                dataset: dataset_id.clone(),
            });
            Ok(Response::ok())
        }
        Command::Status => {
            let tasks = snap
                .tasks()
                .values()
                .map(|spec| TaskEntry {
                    id: spec.id(),
                    connection_id: spec.conn_id().to_string(),
                    request: spec.request().to_string(),
                    work_done: spec.work_done(),
                    work_estimated: spec.work_estimated(),
                    epoch_ms: spec.epoch_ms(),
                })
                .collect();
            Ok(Response::status(tasks))
        }
        Command::Topology => execute_topology(snap),
        Command::Ping => Ok(Response::ping(task.spec().conn_id())),
    }
}

/// Like [`dispatch_command`], but parses the raw request and converts
/// every error into an error response. On failure the task's changes are
/// discarded so nothing half-done reaches the catalog.
pub fn dispatch_command_safe(request: &str, task: &mut Task, snap: &DatabaseSnapshot) -> Response {
    let command = match parse_command(request) {
        Ok(command) => command,
        Err(err) => return Response::error(&err.to_string(), false),
    };
    match dispatch_command(&command, task, snap) {
        Ok(response) => response,
        Err(err) => {
            *task = Task::new(task.spec_handle());
            Response::error(&err.to_string(), err.is_retry())
        }
    }
}

/// Error-to-response helper for callers that parsed the command already.
#[must_use]
pub fn error_response(err: &ServerError) -> Response {
    Response::error(&err.to_string(), err.is_retry())
}
