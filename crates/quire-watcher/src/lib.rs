//! Quire Watcher - scanning, parsing and change observation
//!
//! This crate handles the filesystem side of a space:
//! - Walking the space root and reconciling the index with it
//! - Parsing documents on a pool of background workers
//! - Queueing external changes while the window is blurred
//!
//! Hidden entries are always skipped; .gitignore only when asked.

mod fs;
mod ignore_set;
mod pool;
mod scanner;
mod space;
mod watcher;

pub use fs::{EntryMeta, FileSystem, LocalFs};
pub use ignore_set::{IgnoreGuard, IgnoreSet};
pub use pool::{ParseJob, ParseOutcome, ParsePool};
pub use scanner::{
    index_pending, ParseReport, PendingDoc, ScanError, ScanOptions, ScanResult, Scanner,
};
pub use space::{SpaceGeneration, SpaceGuard};
pub use watcher::{
    convert_event, ChangeWatcher, WatchError, WatchOp, WatchOpKind, WatchSink, WatchState,
};
