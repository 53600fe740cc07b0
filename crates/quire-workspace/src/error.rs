//! Error types for workspace operations.
//!
//! Collisions, cycles and the tab cap are rejections the user can
//! simply be warned about. Filesystem failures carry the OS error.

use crate::config::ConfigError;
use quire_index::IndexError;
use quire_watcher::{ScanError, WatchError};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkspaceError>;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    /// The node or path is gone.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("'{name}' already exists in '{}'", parent.display())]
    NameCollision { name: String, parent: PathBuf },

    /// Moving a folder into itself or one of its descendants.
    #[error("cannot move '{}' into itself", path.display())]
    CycleRejected { path: PathBuf },

    #[error("invalid name '{0}'")]
    InvalidName(String),

    #[error("'{}' is not a folder", .0.display())]
    NotAFolder(PathBuf),

    #[error("the space root cannot be renamed, moved or deleted")]
    RootImmutable,

    /// Ad-hoc files opened from outside the space can only be viewed.
    #[error("'{}' is not part of the space", .0.display())]
    OutsideSpace(PathBuf),

    #[error("cannot open more than {max} tabs")]
    TabLimit { max: usize },

    #[error("no tab at position {0}")]
    NoSuchTab(usize),

    /// The disk side effect failed; nothing in memory was touched.
    #[error("failed to {op} '{}': {source}", path.display())]
    FilesystemWriteFailure {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl WorkspaceError {
    pub fn fs(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FilesystemWriteFailure {
            op,
            path: path.into(),
            source,
        }
    }

    /// Rejections that leave everything untouched and only deserve a warning.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::NameCollision { .. } | Self::CycleRejected { .. } | Self::TabLimit { .. }
        )
    }

    /// Whether the first scan was declined as too large.
    pub fn is_oversized(&self) -> bool {
        matches!(self, Self::Scan(ScanError::Declined { .. }))
    }
}
