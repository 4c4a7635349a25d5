//! The network front end: a TCP line protocol over a coordinator thread
//! and a pool of workers.
//!
//! Clients send one `;`-terminated command per line and receive a
//! one-line JSON response. The coordinator owns the database: it parses
//! requests, derives and grants locks, hands the work (with a fresh
//! snapshot) to a worker, and applies the returned change list. Workers
//! never share mutable state; everything travels through channels.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use crate::command::Command;
use crate::daemon::{dispatch_command, dispatch_locks, error_response};
use crate::db::{ConfigKey, Database, DatabaseSnapshot, Task};
use crate::error::Result;
use crate::query::parser::parse_command;
use crate::response::Response;
use crate::util::get_milli_timestamp;

/// Address clients connect to unless one is given on the command line.
pub const DEFAULT_BIND_ADDRESS: &str = "tcp://127.0.0.1:9281";

struct Job {
    command: Command,
    request: String,
    task: Task,
    snap: DatabaseSnapshot,
    reply: Sender<String>,
}

enum Message {
    Request {
        conn_id: String,
        line: String,
        reply: Sender<String>,
    },
    Done {
        task: Task,
        response: Response,
        reply: Sender<String>,
    },
}

fn worker_loop(jobs: Receiver<Job>, done: Sender<Message>) {
    while let Ok(job) = jobs.recv() {
        let Job {
            command,
            request,
            mut task,
            snap,
            reply,
        } = job;

        tracing::info!("TASK: start [{}]: {}", task.spec().id(), request);
        let response = match dispatch_command(&command, &mut task, &snap) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!("TASK: failed [{}]: {}", task.spec().id(), err);
                // A failed task must not leak half-recorded changes.
                task = Task::new(task.spec_handle());
                error_response(&err)
            }
        };

        // Release the snapshot before the commit so garbage collection
        // can reclaim datasets this request was the last user of.
        drop(snap);

        if done
            .send(Message::Done {
                task,
                response,
                reply,
            })
            .is_err()
        {
            break;
        }
    }
}

fn handle_connection(stream: TcpStream, coordinator: Sender<Message>) {
    let conn_id = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);
    let mut writer = stream;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (reply_tx, reply_rx) = bounded::<String>(1);
        let request = Message::Request {
            conn_id: conn_id.clone(),
            line: line.to_string(),
            reply: reply_tx,
        };
        if coordinator.send(request).is_err() {
            break;
        }

        // A dead connection just drops the response; the task commits
        // regardless.
        match reply_rx.recv() {
            Ok(response) => {
                if writeln!(writer, "{response}").is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

fn handle_request(
    db: &mut Database,
    jobs: &Sender<Job>,
    conn_id: String,
    line: String,
    reply: &Sender<String>,
) {
    let command = match parse_command(&line) {
        Ok(command) => command,
        Err(err) => {
            let _ = reply.send(Response::error(&err.to_string(), false).to_string());
            return;
        }
    };

    let snap = db.snapshot();
    let locks = dispatch_locks(&command, &snap);
    let spec = match db.allocate_task(&line, &conn_id, locks) {
        Ok(spec) => spec,
        Err(err) => {
            let _ = reply.send(Response::error(&err.to_string(), true).to_string());
            return;
        }
    };

    let job = Job {
        command,
        request: line,
        task: Task::new(spec),
        snap,
        reply: reply.clone(),
    };
    let _ = jobs.send(job);
}

/// Runs the server until the process is killed.
pub fn run_server(mut db: Database, bind_address: &str) -> Result<()> {
    let addr = bind_address
        .strip_prefix("tcp://")
        .unwrap_or(bind_address)
        .to_string();
    let listener = TcpListener::bind(&addr)?;
    tracing::info!("BIND: {}", bind_address);

    let (coord_tx, coord_rx) = unbounded::<Message>();
    let (job_tx, job_rx) = unbounded::<Job>();

    let num_workers = db.config().get(ConfigKey::DatabaseWorkers).max(1);
    for worker_no in 0..num_workers {
        let jobs = job_rx.clone();
        let done = coord_tx.clone();
        thread::Builder::new()
            .name(format!("worker-{worker_no}"))
            .spawn(move || worker_loop(jobs, done))?;
    }

    {
        let coordinator = coord_tx.clone();
        thread::Builder::new().name("acceptor".to_string()).spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let coordinator = coordinator.clone();
                        thread::spawn(move || handle_connection(stream, coordinator));
                    }
                    Err(err) => tracing::warn!("Failed to accept connection: {}", err),
                }
            }
        })?;
    }

    // The coordinator loop: the only place the database mutates.
    while let Ok(message) = coord_rx.recv() {
        match message {
            Message::Request {
                conn_id,
                line,
                reply,
            } => handle_request(&mut db, &job_tx, conn_id, line, &reply),
            Message::Done {
                task,
                response,
                reply,
            } => {
                let task_id = task.spec().id();
                let task_ms = get_milli_timestamp().saturating_sub(task.spec().epoch_ms());
                match db.commit_task(task) {
                    Ok(()) => {
                        let _ = reply.send(response.to_string());
                    }
                    Err(err) => {
                        tracing::error!("TASK: commit failed [{}]: {}", task_id, err);
                        db.erase_task(task_id);
                        let _ = reply.send(error_response(&err).to_string());
                    }
                }
                tracing::info!("TASK: done [{}] (in {}ms)", task_id, task_ms);
                db.collect_garbage();
            }
        }
    }

    Ok(())
}
