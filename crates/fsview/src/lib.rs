//! In-memory filesystem view and query engine.
//!
//! fsview keeps a monotonically ticking model of a directory tree,
//! driven by OS change notifications, and answers queries about which
//! files changed since a prior logical point in time.
//!
//! ## Architecture
//!
//! Each watched root owns its view behind a reader/writer lock: the
//! ingestion thread is the sole writer, applying pending notifications
//! in FIFO batches; query threads share the lock for the duration of
//! one generator run. An age-out reaper evicts files that have been
//! deleted for longer than a retention window.
//!
//! ## Module structure
//!
//! - `storage` - Low-level primitives (arena, path keys, node records)
//! - `view` - The tree model, tick clock, recency and suffix indexes,
//!   generators, age-out
//! - `query` - Query parsing, the expression tree, result rendering
//! - `pending` - The FIFO batch between watcher and ingestion
//! - `ingest` - Stat-and-fold processing of pending paths
//! - `watcher` - The notification backend contract and the `notify`
//!   implementation
//! - `root` - Lock discipline, cancellation, cursors, the ingestion
//!   thread, and query execution

pub mod error;
mod ingest;
pub mod pending;
pub mod query;
pub mod root;
pub mod storage;
pub mod view;
pub mod watcher;

// Re-export main types
pub use error::{Result, ViewError};
pub use pending::{PendingCollection, PendingEntry, PendingFlags};
pub use query::{
    clock_string, parse_query, ClockSpec, Field, FieldList, Query, QueryOptions, QueryResult,
    RuleMatch, TermRegistry,
};
pub use root::{RootConfig, WatchedRoot};
pub use storage::{ClockStamp, FileStat, NodeFileType, PathKey};
pub use view::InMemoryView;
pub use watcher::{ConsumeOutcome, FileEventFlags, FsWatcher, NotifyWatcher};
