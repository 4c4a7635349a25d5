//! ursadb: a trigram-based search engine for raw byte files.
//!
//! The engine answers "which files could contain this byte pattern" by
//! decomposing queries into n-grams and intersecting compressed posting
//! runs. It never verifies a match: results are a safe over-approximation
//! for a downstream scanner.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          TCP line protocol (server)         │
//! │     ";"-terminated commands, JSON out       │
//! └───────┬──────────────────────────┬──────────┘
//!         │ requests                 │ changes
//! ┌───────▼──────────┐      ┌────────▼──────────┐
//! │   Coordinator    │      │    Worker pool    │
//! │ Database + locks ├──────► snapshot + task   │
//! │ commit + GC      │ jobs │ dispatch_command  │
//! └───────┬──────────┘      └────────┬──────────┘
//!         │                          │
//! ┌───────▼──────────────────────────▼──────────┐
//! │  Datasets: manifest + filename list + taint │
//! │  OnDiskIndex per type (gram3/text4/...)     │
//! │  varint posting runs + query graphs         │
//! └─────────────────────────────────────────────┘
//! ```

pub mod command;
pub mod daemon;
pub mod dataset;
pub mod db;
pub mod error;
pub mod index;
pub mod indexer;
pub mod ngram;
pub mod query;
pub mod response;
pub mod run;
pub mod server;
pub mod types;
pub mod util;

pub use error::{Result, ServerError};
pub use types::{FileId, IndexType, TriGram, NUM_TRIGRAMS};
