use crate::{Index, IndexChange, IndexError};
use parking_lot::RwLock;
use quire_core::FileRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Non-persistent index backed by a sorted map.
#[derive(Default)]
pub struct MemoryIndex {
    records: RwLock<BTreeMap<PathBuf, FileRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Index for MemoryIndex {
    fn get(&self, path: &Path) -> Result<Option<FileRecord>, IndexError> {
        Ok(self.records.read().get(path).cloned())
    }

    fn put(&self, record: &FileRecord) -> Result<(), IndexError> {
        self.records
            .write()
            .insert(record.path.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<(), IndexError> {
        self.records.write().remove(path);
        Ok(())
    }

    fn list_by_root(&self, root: &Path) -> Result<Vec<FileRecord>, IndexError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.path.starts_with(root))
            .cloned()
            .collect())
    }

    fn len(&self) -> Result<usize, IndexError> {
        Ok(self.records.read().len())
    }

    fn apply(&self, changes: Vec<IndexChange>) -> Result<(), IndexError> {
        let mut records = self.records.write();
        for change in changes {
            match change {
                IndexChange::Put(record) => {
                    records.insert(record.path.clone(), record);
                }
                IndexChange::Delete(path) => {
                    records.remove(&path);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_contract() {
        crate::contract::exercise(&MemoryIndex::new());
    }
}
