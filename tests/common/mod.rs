//! Common test utilities for the integration tests.
//!
//! Provides `TestEnv`: a temporary database directory plus the same
//! request pipeline the server runs (parse, locks, task, dispatch,
//! commit, garbage collection), so tests exercise commands end to end.

#![allow(dead_code)] // Test utilities may not all be used in every test file.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use ursadb::daemon::{dispatch_command, dispatch_locks, error_response};
use ursadb::db::{Database, Task};
use ursadb::query::parser::parse_command;
use ursadb::response::Response;

pub struct TestEnv {
    pub dir: TempDir,
    pub db: Database,
}

impl TestEnv {
    /// Creates a fresh empty database in a temporary directory.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp directory");
        let db_path = dir.path().join("db.ursa");
        Database::create(&db_path).expect("failed to create database");
        let db = Database::load(&db_path).expect("failed to load database");
        Self { dir, db }
    }

    /// Writes a sample file (subdirectories allowed in `name`) and
    /// returns its absolute path.
    pub fn write_sample(&self, name: &str, content: &[u8]) -> String {
        let path = self.dir.path().join("samples").join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create samples dir");
        }
        std::fs::write(&path, content).expect("failed to write sample");
        path.to_string_lossy().into_owned()
    }

    pub fn samples_dir(&self) -> PathBuf {
        self.dir.path().join("samples")
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("db.ursa")
    }

    /// Runs one command through the full pipeline and returns the
    /// response, committing any changes like the server would.
    pub fn request(&mut self, line: &str) -> Response {
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(err) => return Response::error(&err.to_string(), false),
        };

        let snap = self.db.snapshot();
        let locks = dispatch_locks(&command, &snap);
        let spec = match self.db.allocate_task(line, "test-client", locks) {
            Ok(spec) => spec,
            Err(err) => return Response::error(&err.to_string(), true),
        };
        let mut task = Task::new(spec);

        let response = match dispatch_command(&command, &mut task, &snap) {
            Ok(response) => response,
            Err(err) => {
                task = Task::new(task.spec_handle());
                error_response(&err)
            }
        };

        drop(snap);
        self.db.commit_task(task).expect("commit failed");
        self.db.collect_garbage();
        response
    }

    /// Runs a select and returns the matched file paths, sorted.
    pub fn select(&mut self, expression: &str) -> Vec<String> {
        let response = self.request(&format!("select {expression};"));
        assert_eq!(
            response.type_name(),
            "select",
            "unexpected response: {response}"
        );
        let mut files: Vec<String> = response.content()["result"]["files"]
            .as_array()
            .expect("files array")
            .iter()
            .map(|value| value.as_str().expect("file path").to_string())
            .collect();
        files.sort();
        files
    }

    /// Runs a select and maps results back to bare sample names.
    pub fn select_names(&mut self, expression: &str) -> Vec<String> {
        self.select(expression)
            .into_iter()
            .map(|path| {
                Path::new(&path)
                    .file_name()
                    .expect("file name")
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    /// Indexes the whole samples directory with the given types.
    pub fn index_samples(&mut self, types: &str) {
        let samples = self.samples_dir().to_string_lossy().into_owned();
        let response = self.request(&format!("index \"{samples}\" with [{types}];"));
        assert_eq!(response.type_name(), "ok", "index failed: {response}");
    }
}
