use crate::{Index, IndexChange, IndexError};
use quire_core::FileRecord;
use sled::{Batch, Db};
use std::path::Path;
use tracing::{info, warn};

/// Bumped whenever the record encoding changes.
const FORMAT_VERSION: &[u8] = b"quire-index-1";
const VERSION_KEY: &[u8] = b"meta:version";
const RECORD_PREFIX: &str = "r:";

pub struct SledIndex {
    db: Db,
}

fn record_key(path: &Path) -> String {
    format!("{}{}", RECORD_PREFIX, path.to_string_lossy())
}

impl SledIndex {
    /// Opens or creates an index at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let db = sled::open(path)?;
        match db.get(VERSION_KEY)? {
            Some(version) if version.as_ref() != FORMAT_VERSION => {
                return Err(IndexError::Corrupted(format!(
                    "unexpected index format {}",
                    String::from_utf8_lossy(&version)
                )));
            }
            Some(_) => {}
            None => {
                db.insert(VERSION_KEY, FORMAT_VERSION)?;
            }
        }
        Ok(Self { db })
    }

    /// Opens the index, wiping it first if it cannot be read.
    ///
    /// The index is a cache of what is on disk, so starting over only
    /// costs a full rescan.
    pub fn open_or_reset<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let path = path.as_ref();
        match Self::open(path) {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!("Index at {} unusable ({}), resetting", path.display(), e);
                if path.exists() {
                    std::fs::remove_dir_all(path).map_err(|io| {
                        IndexError::Corrupted(format!("cannot reset {}: {}", path.display(), io))
                    })?;
                }
                let index = Self::open(path)?;
                info!("Created fresh index at {}", path.display());
                Ok(index)
            }
        }
    }

    /// Removes every record.
    pub fn clear(&self) -> Result<(), IndexError> {
        self.db.clear()?;
        self.db.insert(VERSION_KEY, FORMAT_VERSION)?;
        self.db.flush()?;
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<FileRecord, IndexError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl Index for SledIndex {
    fn get(&self, path: &Path) -> Result<Option<FileRecord>, IndexError> {
        match self.db.get(record_key(path))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, record: &FileRecord) -> Result<(), IndexError> {
        let bytes = bincode::serialize(record)?;
        self.db.insert(record_key(&record.path), bytes)?;
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<(), IndexError> {
        self.db.remove(record_key(path))?;
        Ok(())
    }

    fn list_by_root(&self, root: &Path) -> Result<Vec<FileRecord>, IndexError> {
        let mut records = Vec::new();
        for item in self.db.scan_prefix(record_key(root)) {
            let (_key, value) = item?;
            let record = Self::decode(&value)?;
            // "/space" is a key prefix of "/spaceship/…" too.
            if record.path.starts_with(root) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn len(&self) -> Result<usize, IndexError> {
        Ok(self.db.scan_prefix(RECORD_PREFIX).count())
    }

    /// This operation is atomic: either every change lands or none does.
    fn apply(&self, changes: Vec<IndexChange>) -> Result<(), IndexError> {
        let mut batch = Batch::default();
        for change in changes {
            match change {
                IndexChange::Put(record) => {
                    batch.insert(record_key(&record.path).as_bytes(), bincode::serialize(&record)?);
                }
                IndexChange::Delete(path) => batch.remove(record_key(&path).as_bytes()),
            }
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sled_contract() {
        let dir = tempdir().unwrap();
        let index = SledIndex::open(dir.path()).unwrap();
        crate::contract::exercise(&index);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let record = FileRecord::new("/space/note.md", false);
        {
            let index = SledIndex::open(dir.path()).unwrap();
            index.put(&record).unwrap();
            index.db.flush().unwrap();
        }
        let index = SledIndex::open(dir.path()).unwrap();
        assert_eq!(index.get(Path::new("/space/note.md")).unwrap(), Some(record));
    }

    #[test]
    fn test_open_or_reset_recovers_from_foreign_format() {
        let dir = tempdir().unwrap();
        {
            let db = sled::open(dir.path()).unwrap();
            db.insert(VERSION_KEY, b"something-else".as_ref()).unwrap();
            db.flush().unwrap();
        }
        assert!(SledIndex::open(dir.path()).is_err());
        let index = SledIndex::open_or_reset(dir.path()).unwrap();
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let index = SledIndex::open(dir.path()).unwrap();
        index.put(&FileRecord::new("/s/a.md", false)).unwrap();
        index.clear().unwrap();
        assert_eq!(index.len().unwrap(), 0);
    }
}
