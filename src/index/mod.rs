//! The on-disk index format and its writers.

mod bitmap;
mod builder;
mod flat;
mod ondisk;

pub use bitmap::BitmapIndexBuilder;
pub use builder::{BuilderKind, IndexBuilder};
pub use flat::FlatIndexBuilder;
pub use ondisk::{IndexMergeHelper, OnDiskIndex, DB_MAGIC, INDEX_FORMAT_VERSION};
