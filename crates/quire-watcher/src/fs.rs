//! Filesystem primitives.
//!
//! The workspace performs every disk side effect through this trait so
//! tests can swap in a failing implementation and check that nothing
//! in memory moved.

use quire_core::millis;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What `stat` reports about an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub is_dir: bool,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub modified: i64,
    pub created: i64,
}

impl EntryMeta {
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        let modified = millis(meta.modified());
        let created = match millis(meta.created()) {
            0 => modified,
            t => t,
        };
        Self {
            is_dir: meta.is_dir(),
            size: meta.len(),
            modified,
            created,
        }
    }
}

pub trait FileSystem: Send + Sync {
    /// Entries directly inside `dir`, in no particular order.
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    fn stat(&self, path: &Path) -> io::Result<EntryMeta>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Creates an empty file, failing if anything already exists there.
    fn create_file(&self, path: &Path) -> io::Result<()>;

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Moves `path` somewhere recoverable and returns where it went.
    fn move_to_trash(&self, path: &Path) -> io::Result<PathBuf>;

    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }
}

/// The real disk. Trashed entries go to a directory inside the space.
pub struct LocalFs {
    trash_dir: PathBuf,
}

impl LocalFs {
    pub fn new(trash_dir: impl Into<PathBuf>) -> Self {
        Self {
            trash_dir: trash_dir.into(),
        }
    }

    pub fn trash_dir(&self) -> &Path {
        &self.trash_dir
    }
}

impl FileSystem for LocalFs {
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn stat(&self, path: &Path) -> io::Result<EntryMeta> {
        fs::metadata(path).map(|m| EntryMeta::from_metadata(&m))
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        fs::write(path, contents)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<()> {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map(|_| ())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        if to.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        fs::copy(from, to).map(|_| ())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if to.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        fs::rename(from, to)
    }

    fn move_to_trash(&self, path: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.trash_dir)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entry".to_string());
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f");
        let mut destination = self.trash_dir.join(format!("{}-{}", stamp, name));
        let mut n = 1;
        while destination.exists() {
            n += 1;
            destination = self.trash_dir.join(format!("{}-{}-{}", stamp, n, name));
        }
        fs::rename(path, &destination)?;
        debug!("Trashed {} -> {}", path.display(), destination.display());
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_trash_keeps_content() {
        let dir = tempdir().unwrap();
        let fs = LocalFs::new(dir.path().join(".quire/trash"));
        let file = dir.path().join("a.md");
        std::fs::write(&file, "hello").unwrap();

        let trashed = fs.move_to_trash(&file).unwrap();
        assert!(!file.exists());
        assert_eq!(std::fs::read_to_string(trashed).unwrap(), "hello");
    }

    #[test]
    fn test_rename_refuses_to_clobber() {
        let dir = tempdir().unwrap();
        let fs = LocalFs::new(dir.path().join(".trash"));
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();

        assert!(fs.rename(&a, &b).is_err());
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "b");
    }

    #[test]
    fn test_create_file_is_exclusive() {
        let dir = tempdir().unwrap();
        let fs = LocalFs::new(dir.path().join(".trash"));
        let a = dir.path().join("a.md");
        fs.create_file(&a).unwrap();
        assert!(fs.create_file(&a).is_err());
        assert!(fs.stat(&a).unwrap().modified > 0);
    }
}
