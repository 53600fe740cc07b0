//! Tree node representation.
//!
//! A TreeNode is the in-memory mirror of one filesystem entry. Nodes
//! never point at each other directly: a parent lists its children by
//! id and a child remembers its parent's id. Resolution goes through
//! the `Tree` arena, so there is no ownership cycle to break.

use crate::record::FileRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Stable surrogate id for a node and its record.
///
/// Renames change the path but keep the id, so tabs and other
/// in-memory references stay valid across them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of entry a node mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The space root directory itself.
    Root,
    /// A directory below the root.
    Folder,
    /// A regular file, document or not.
    File,
}

impl NodeKind {
    /// Roots and folders can hold children.
    pub fn is_folder(self) -> bool {
        match self {
            Self::Root | Self::Folder => true,
            Self::File => false,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Root => "root",
            Self::Folder => "folder",
            Self::File => "file",
        };
        write!(f, "{}", s)
    }
}

/// In-memory node of the workspace tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// Same id as the backing `FileRecord`.
    pub id: NodeId,

    /// Last path component.
    pub name: String,

    /// Absolute filesystem path.
    pub path: PathBuf,

    pub kind: NodeKind,

    /// Parent id, `None` for the root and for ad-hoc opened files.
    pub parent: Option<NodeId>,

    /// Child ids, folders first then by name.
    pub children: Vec<NodeId>,

    pub sort_index: Option<i64>,

    /// Milliseconds since the Unix epoch.
    pub modified: i64,
    pub created: i64,

    /// UI-only: the node's name is being edited.
    pub edit_mode: bool,

    /// UI-only: the folder is expanded.
    pub expanded: bool,
}

impl TreeNode {
    /// Creates a node with a fresh id and no relatives.
    pub fn new(path: impl Into<PathBuf>, kind: NodeKind) -> Self {
        let path = path.into();
        Self {
            id: NodeId::new(),
            name: file_name(&path),
            path,
            kind,
            parent: None,
            children: Vec::new(),
            sort_index: None,
            modified: 0,
            created: 0,
            edit_mode: false,
            expanded: false,
        }
    }

    /// Builds the node mirroring a persisted record.
    pub fn from_record(record: &FileRecord) -> Self {
        let kind = if record.is_folder {
            NodeKind::Folder
        } else {
            NodeKind::File
        };
        Self {
            id: record.id,
            name: file_name(&record.path),
            path: record.path.clone(),
            kind,
            parent: None,
            children: Vec::new(),
            sort_index: record.sort_index,
            modified: record.modified,
            created: record.created,
            edit_mode: false,
            expanded: false,
        }
    }

    /// Builder pattern: set timestamps.
    pub fn with_times(mut self, modified: i64, created: i64) -> Self {
        self.modified = modified;
        self.created = created;
        self
    }

    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }

    /// Whether `name` and folder-ness both match, the collision rule
    /// used by create and move.
    pub fn same_entry(&self, name: &str, is_folder: bool) -> bool {
        self.name == name && self.is_folder() == is_folder
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_name_from_path() {
        let node = TreeNode::new("/notes/a/b.md", NodeKind::File);
        assert_eq!(node.name, "b.md");
        assert!(!node.is_folder());
    }

    #[test]
    fn test_same_entry_checks_kind() {
        let node = TreeNode::new("/notes/a", NodeKind::Folder);
        assert!(node.same_entry("a", true));
        assert!(!node.same_entry("a", false));
        assert!(!node.same_entry("A", true));
    }

    #[test]
    fn test_from_record_keeps_id() {
        let record = FileRecord::new("/notes/x.md", false);
        let node = TreeNode::from_record(&record);
        assert_eq!(node.id, record.id);
        assert_eq!(node.kind, NodeKind::File);
    }
}
