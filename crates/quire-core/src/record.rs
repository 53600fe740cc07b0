//! Persisted file records.

use crate::node::{NodeId, TreeNode};
use crate::schema::{Link, Schema};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// One record per filesystem path in a space.
///
/// The path is the key; `id` is the surrogate the in-memory tree uses.
/// Documents carry their parsed schema and the links extracted from it
/// once the parse pipeline has seen them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: NodeId,
    pub path: PathBuf,
    pub is_folder: bool,
    pub sort_index: Option<i64>,

    /// Milliseconds since the Unix epoch, as last seen on disk.
    pub modified: i64,
    pub created: i64,

    pub schema: Option<Schema>,
    pub links: Vec<Link>,
}

impl FileRecord {
    /// Creates a record with a fresh id.
    pub fn new(path: impl Into<PathBuf>, is_folder: bool) -> Self {
        Self {
            id: NodeId::new(),
            path: path.into(),
            is_folder,
            sort_index: None,
            modified: 0,
            created: 0,
            schema: None,
            links: Vec::new(),
        }
    }

    /// Creates the record backing an existing node.
    pub fn for_node(node: &TreeNode) -> Self {
        Self {
            id: node.id,
            path: node.path.clone(),
            is_folder: node.is_folder(),
            sort_index: node.sort_index,
            modified: node.modified,
            created: node.created,
            schema: None,
            links: Vec::new(),
        }
    }

    /// Builder pattern: set timestamps.
    pub fn with_times(mut self, modified: i64, created: i64) -> Self {
        self.modified = modified;
        self.created = created;
        self
    }

    /// Moves the record to `new_path`, keeping its id and content.
    pub fn relocated(mut self, new_path: &Path) -> Self {
        self.path = new_path.to_path_buf();
        self
    }
}

/// Milliseconds since the Unix epoch for a system time, 0 when unknown.
pub fn millis(time: std::io::Result<SystemTime>) -> i64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    millis(Ok(SystemTime::now()))
}
