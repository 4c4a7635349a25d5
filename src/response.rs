//! Structured responses sent back over the wire.
//!
//! Every response is a single JSON object with a `type` tag and either a
//! `result` or an `error` field.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::IndexType;

/// Server version reported by `ping` and `status`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One row of a `status` response.
pub struct TaskEntry {
    pub id: u64,
    pub connection_id: String,
    pub request: String,
    pub work_done: u64,
    pub work_estimated: u64,
    pub epoch_ms: u64,
}

/// One index of a `topology` response row.
pub struct IndexEntry {
    pub ntype: IndexType,
    pub size: u64,
}

/// One dataset of a `topology` response.
pub struct DatasetEntry {
    pub id: String,
    pub size: u64,
    pub file_count: u64,
    pub taints: BTreeSet<String>,
    pub indexes: Vec<IndexEntry>,
}

#[derive(Debug, Clone)]
pub struct Response {
    content: Value,
}

impl Response {
    fn new(type_name: &str, result: Value) -> Self {
        Self {
            content: json!({ "type": type_name, "result": result }),
        }
    }

    #[must_use]
    pub fn select(files: Vec<String>) -> Self {
        Self::new("select", json!({ "mode": "raw", "files": files }))
    }

    #[must_use]
    pub fn select_from_iterator(
        files: Vec<String>,
        iterator_position: u64,
        total_files: u64,
    ) -> Self {
        Self::new(
            "select",
            json!({
                "mode": "raw",
                "files": files,
                "iterator_position": iterator_position,
                "total_files": total_files,
            }),
        )
    }

    #[must_use]
    pub fn select_iterator(iterator: &str, file_count: u64) -> Self {
        Self::new(
            "select",
            json!({
                "mode": "iterator",
                "iterator": iterator,
                "file_count": file_count,
            }),
        )
    }

    #[must_use]
    pub fn ok() -> Self {
        Self::new("ok", json!({ "status": "ok" }))
    }

    #[must_use]
    pub fn ping(connection_id: &str) -> Self {
        Self::new(
            "ping",
            json!({
                "status": "ok",
                "connection_id": connection_id,
                "ursadb_version": SERVER_VERSION,
            }),
        )
    }

    #[must_use]
    pub fn error(message: &str, retry: bool) -> Self {
        Self {
            content: json!({
                "type": "error",
                "error": { "message": message, "retry": retry },
            }),
        }
    }

    #[must_use]
    pub fn status(tasks: Vec<TaskEntry>) -> Self {
        let tasks: Vec<Value> = tasks
            .into_iter()
            .map(|task| {
                json!({
                    "id": task.id,
                    "connection_id": task.connection_id,
                    "request": task.request,
                    "work_done": task.work_done,
                    "work_estimated": task.work_estimated,
                    "epoch_ms": task.epoch_ms,
                })
            })
            .collect();
        Self::new(
            "status",
            json!({ "tasks": tasks, "ursadb_version": SERVER_VERSION }),
        )
    }

    #[must_use]
    pub fn topology(datasets: Vec<DatasetEntry>) -> Self {
        let mut datasets_json = Map::new();
        for dataset in datasets {
            let indexes: Vec<Value> = dataset
                .indexes
                .iter()
                .map(|index| json!({ "type": index.ntype.name(), "size": index.size }))
                .collect();
            datasets_json.insert(
                dataset.id,
                json!({
                    "indexes": indexes,
                    "size": dataset.size,
                    "file_count": dataset.file_count,
                    "taints": dataset.taints,
                }),
            );
        }
        Self::new("topology", json!({ "datasets": datasets_json }))
    }

    #[must_use]
    pub fn config(keys: BTreeMap<&'static str, u64>) -> Self {
        Self::new("config", json!({ "keys": keys }))
    }

    /// The raw JSON, for tests and logging.
    #[must_use]
    pub fn content(&self) -> &Value {
        &self.content
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        self.content["type"].as_str().unwrap_or("")
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.content)
    }
}
