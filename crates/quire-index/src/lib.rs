//! Quire Index - persistent store of file records
//!
//! One `FileRecord` per filesystem path, surviving restarts. The
//! scanner reconciles it against disk at startup and the workspace
//! writes through to it on every mutation.
//!
//! Two implementations ship: `SledIndex` for real use and
//! `MemoryIndex` for tests and throwaway sessions.

mod memory;
mod store;

pub use memory::MemoryIndex;
pub use store::SledIndex;

use quire_core::FileRecord;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Corrupted data: {0}")]
    Corrupted(String),
}

/// A single write in an atomic batch.
#[derive(Debug, Clone)]
pub enum IndexChange {
    Put(FileRecord),
    Delete(PathBuf),
}

/// Keyed record store. Paths are the keys.
pub trait Index: Send + Sync {
    fn get(&self, path: &Path) -> Result<Option<FileRecord>, IndexError>;

    fn put(&self, record: &FileRecord) -> Result<(), IndexError>;

    fn delete(&self, path: &Path) -> Result<(), IndexError>;

    /// Every record whose path lies under `root`, the root included.
    fn list_by_root(&self, root: &Path) -> Result<Vec<FileRecord>, IndexError>;

    /// Total number of records across all spaces.
    fn len(&self) -> Result<usize, IndexError>;

    fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }

    /// Applies all changes, in order, as one unit where the backend allows it.
    fn apply(&self, changes: Vec<IndexChange>) -> Result<(), IndexError> {
        for change in changes {
            match change {
                IndexChange::Put(record) => self.put(&record)?,
                IndexChange::Delete(path) => self.delete(&path)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every `Index` implementation must share.

    use super::*;

    pub fn exercise(index: &dyn Index) {
        let a = FileRecord::new("/space/a", true);
        let b = FileRecord::new("/space/a/b.md", false);
        let other = FileRecord::new("/spaceship/c.md", false);

        index.put(&a).unwrap();
        index.put(&b).unwrap();
        index.put(&other).unwrap();

        assert_eq!(index.get(Path::new("/space/a/b.md")).unwrap(), Some(b.clone()));
        assert_eq!(index.len().unwrap(), 3);

        let listed = index.list_by_root(Path::new("/space")).unwrap();
        assert_eq!(listed.len(), 2, "sibling prefixes must not leak in");

        index
            .apply(vec![
                IndexChange::Delete(b.path.clone()),
                IndexChange::Put(b.clone().relocated(Path::new("/space/a/b2.md"))),
            ])
            .unwrap();
        assert!(index.get(Path::new("/space/a/b.md")).unwrap().is_none());
        let moved = index.get(Path::new("/space/a/b2.md")).unwrap().unwrap();
        assert_eq!(moved.id, b.id);

        index.delete(Path::new("/space/a")).unwrap();
        index.delete(Path::new("/space/missing")).unwrap();
        assert_eq!(index.len().unwrap(), 2);
    }
}
