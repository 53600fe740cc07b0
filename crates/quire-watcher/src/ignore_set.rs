//! Suppression of self-inflicted filesystem notifications.
//!
//! Before the workspace touches the disk it registers the affected
//! paths here. Notifications for registered paths are dropped instead
//! of queued, otherwise every interactive rename would come back as an
//! external remove + create.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Default)]
struct Entry {
    /// Operations currently holding the path.
    holds: usize,
    /// When the last hold was released.
    released: Option<Instant>,
}

/// Shared set of paths whose notifications must be suppressed.
///
/// Cloning yields another handle on the same set. Released entries
/// linger for `grace` because the OS reports a change some time
/// after the call that caused it returned.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    entries: Arc<Mutex<HashMap<PathBuf, Entry>>>,
    grace: Duration,
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl IgnoreSet {
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            grace,
        }
    }

    /// Registers `paths` until the returned guard is dropped.
    #[must_use = "the paths are released as soon as the guard drops"]
    pub fn register<I, P>(&self, paths: I) -> IgnoreGuard
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let paths: Vec<PathBuf> = paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        let mut entries = self.entries.lock();
        for path in &paths {
            let entry = entries.entry(path.clone()).or_default();
            entry.holds += 1;
            entry.released = None;
            trace!("Ignoring {}", path.display());
        }
        IgnoreGuard {
            set: self.clone(),
            paths,
        }
    }

    /// Whether notifications for `path` should currently be dropped.
    ///
    /// A path is also covered while an ancestor is registered, which is
    /// how a folder rename swallows the events of everything inside it.
    pub fn contains(&self, path: &Path) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, e| match e.released {
            Some(at) if e.holds == 0 => now.duration_since(at) < self.grace,
            _ => true,
        });
        path.ancestors().any(|p| entries.contains_key(p))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn release(&self, paths: &[PathBuf]) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        for path in paths {
            if let Some(entry) = entries.get_mut(path) {
                entry.holds = entry.holds.saturating_sub(1);
                if entry.holds == 0 {
                    if self.grace.is_zero() {
                        entries.remove(path);
                    } else {
                        entry.released = Some(now);
                    }
                }
            }
        }
    }
}

/// Holds registered paths; dropping it releases them, error paths included.
#[derive(Debug)]
pub struct IgnoreGuard {
    set: IgnoreSet,
    paths: Vec<PathBuf>,
}

impl IgnoreGuard {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for IgnoreGuard {
    fn drop(&mut self) {
        self.set.release(&self.paths);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_registers_and_releases() {
        let set = IgnoreSet::new(Duration::ZERO);
        {
            let _guard = set.register(["/n/a.md", "/n/b.md"]);
            assert!(set.contains(Path::new("/n/a.md")));
            assert!(set.contains(Path::new("/n/b.md")));
        }
        assert!(!set.contains(Path::new("/n/a.md")));
        assert!(set.is_empty());
    }

    #[test]
    fn test_descendants_are_covered() {
        let set = IgnoreSet::new(Duration::ZERO);
        let _guard = set.register(["/n/folder"]);
        assert!(set.contains(Path::new("/n/folder/deep/x.md")));
        assert!(!set.contains(Path::new("/n/folder2/x.md")));
    }

    #[test]
    fn test_grace_window_outlives_guard() {
        let set = IgnoreSet::new(Duration::from_secs(60));
        drop(set.register(["/n/a.md"]));
        assert!(set.contains(Path::new("/n/a.md")));
    }

    #[test]
    fn test_overlapping_holds() {
        let set = IgnoreSet::new(Duration::ZERO);
        let first = set.register(["/n/a.md"]);
        let second = set.register(["/n/a.md"]);
        drop(first);
        assert!(set.contains(Path::new("/n/a.md")));
        drop(second);
        assert!(!set.contains(Path::new("/n/a.md")));
    }
}
