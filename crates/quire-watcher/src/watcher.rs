//! External change observation.
//!
//! While the application window is focused nothing is observed: every
//! change then comes from the user through the workspace. When focus
//! is lost the watcher subscribes to OS notifications for the space
//! root and queues them; when focus returns it unsubscribes and hands
//! the queue back for replay, oldest first.

use crate::ignore_set::IgnoreSet;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use quire_core::paths::is_hidden_below;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: WatchState,
    },
}

/// What happened to a path, as far as replay is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchOpKind {
    Update,
    Remove,
}

/// A queued notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchOp {
    pub kind: WatchOpKind,
    pub path: PathBuf,
}

impl WatchOp {
    pub fn update(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: WatchOpKind::Update,
            path: path.into(),
        }
    }

    pub fn remove(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: WatchOpKind::Remove,
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Window focused, nothing observed.
    Idle,
    /// Window blurred, notifications are queued.
    Observing,
    /// Focus is back, the queue is being replayed.
    Draining,
}

/// Rename cookies already seen as separate from/to halves.
///
/// inotify reports one rename three times: `From`, `To`, then `Both`
/// carrying the same tracker. Only the halves are queued.
#[derive(Debug, Default)]
struct RenamePairs {
    halves: HashSet<usize>,
}

impl RenamePairs {
    /// Renames moved in or out of the root never get their `Both`.
    const MAX_PENDING: usize = 1024;

    fn is_repeat(&mut self, event: &Event) -> bool {
        let Some(tracker) = event.attrs.tracker() else {
            return false;
        };
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From))
            | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                if self.halves.len() >= Self::MAX_PENDING {
                    self.halves.clear();
                }
                self.halves.insert(tracker);
                false
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => self.halves.remove(&tracker),
            _ => false,
        }
    }
}

/// Filters notifications and feeds the queue. Runs on notify's thread.
#[derive(Clone)]
pub struct WatchSink {
    root: PathBuf,
    ignore: IgnoreSet,
    tx: Sender<WatchOp>,
    renames: Arc<Mutex<RenamePairs>>,
}

impl WatchSink {
    /// Queues `op` unless it concerns a hidden path or an ignored one.
    pub fn push(&self, op: WatchOp) -> bool {
        if is_hidden_below(&op.path, &self.root) {
            return false;
        }
        if self.ignore.contains(&op.path) {
            debug!("Dropped self-inflicted {:?} for {}", op.kind, op.path.display());
            return false;
        }
        if self.tx.send(op).is_err() {
            warn!("Failed to queue watch event");
            return false;
        }
        true
    }

    fn handle(&self, event: Event) {
        if self.renames.lock().is_repeat(&event) {
            debug!("Skipped paired rename event for {:?}", event.paths);
            return;
        }
        for op in convert_event(event) {
            self.push(op);
        }
    }
}

/// Maps one notify event to replay ops.
pub fn convert_event(event: Event) -> Vec<WatchOp> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(WatchOp::update).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.into_iter().map(WatchOp::remove).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.into_iter().map(WatchOp::update).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            let mut paths = event.paths.into_iter();
            let mut ops = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                ops.push(WatchOp::remove(from));
            }
            if let Some(to) = paths.next() {
                ops.push(WatchOp::update(to));
            }
            ops
        }
        // Ambiguous renames: the replay stats the path to find out.
        EventKind::Modify(_) => event.paths.into_iter().map(WatchOp::update).collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(WatchOp::remove).collect(),
        _ => Vec::new(),
    }
}

/// Observes a space root while the window is blurred.
pub struct ChangeWatcher {
    state: WatchState,
    sink: WatchSink,
    receiver: Receiver<WatchOp>,
    root_watcher: Option<RecommendedWatcher>,
    file_watchers: HashMap<PathBuf, RecommendedWatcher>,
}

impl ChangeWatcher {
    /// Creates an idle watcher for `root` sharing `ignore` with the workspace.
    pub fn new(root: impl Into<PathBuf>, ignore: IgnoreSet) -> Self {
        let (tx, rx) = channel();
        Self {
            state: WatchState::Idle,
            sink: WatchSink {
                root: root.into(),
                ignore,
                tx,
                renames: Arc::default(),
            },
            receiver: rx,
            root_watcher: None,
            file_watchers: HashMap::new(),
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn root(&self) -> &Path {
        &self.sink.root
    }

    pub fn ignore(&self) -> &IgnoreSet {
        &self.sink.ignore
    }

    /// A handle that queues ops exactly like OS notifications do.
    pub fn sink(&self) -> WatchSink {
        self.sink.clone()
    }

    /// Idle → Observing: subscribe to notifications for the root.
    pub fn blur(&mut self) -> Result<(), WatchError> {
        if self.state != WatchState::Idle {
            return Err(WatchError::InvalidState {
                action: "start observing",
                state: self.state,
            });
        }
        let sink = self.sink.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => sink.handle(event),
                Err(e) => warn!("Watch error: {}", e),
            }
        })?;
        watcher.watch(&self.sink.root, RecursiveMode::Recursive)?;
        info!("Watching {} for external changes", self.sink.root.display());
        self.root_watcher = Some(watcher);
        self.state = WatchState::Observing;
        Ok(())
    }

    /// Observing → Draining: unsubscribe and hand back everything queued,
    /// in arrival order. Calling it while idle drains ad-hoc file events.
    pub fn begin_drain(&mut self) -> Vec<WatchOp> {
        if let Some(watcher) = self.root_watcher.take() {
            drop(watcher);
            debug!("Stopped watching {}", self.sink.root.display());
        }
        self.state = WatchState::Draining;
        let ops: Vec<WatchOp> = self.receiver.try_iter().collect();
        info!("Draining {} queued watch ops", ops.len());
        ops
    }

    /// Draining → Idle.
    pub fn finish_drain(&mut self) {
        self.state = WatchState::Idle;
    }

    /// Watches a single file opened from outside the space.
    pub fn watch_file(&mut self, path: &Path) -> Result<(), WatchError> {
        if self.file_watchers.contains_key(path) {
            return Ok(());
        }
        let sink = self.sink.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => sink.handle(event),
                Err(e) => warn!("Watch error: {}", e),
            }
        })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        debug!("Watching ad-hoc file {}", path.display());
        self.file_watchers.insert(path.to_path_buf(), watcher);
        Ok(())
    }

    pub fn unwatch_file(&mut self, path: &Path) {
        if self.file_watchers.remove(path).is_some() {
            debug!("Stopped watching ad-hoc file {}", path.display());
        }
    }

    pub fn watched_files(&self) -> impl Iterator<Item = &Path> {
        self.file_watchers.keys().map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};
    use std::time::Duration;
    use tempfile::tempdir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_convert_rename_both() {
        let ops = convert_event(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/n/a.md", "/n/b.md"],
        ));
        assert_eq!(ops, vec![WatchOp::remove("/n/a.md"), WatchOp::update("/n/b.md")]);
    }

    #[test]
    fn test_rename_reported_three_times_is_queued_once() {
        let mut watcher = ChangeWatcher::new("/n", IgnoreSet::new(Duration::ZERO));
        let sink = watcher.sink();
        let name = |mode| EventKind::Modify(ModifyKind::Name(mode));

        sink.handle(event(name(RenameMode::From), &["/n/a.md"]).set_tracker(7));
        sink.handle(event(name(RenameMode::To), &["/n/b.md"]).set_tracker(7));
        sink.handle(event(name(RenameMode::Both), &["/n/a.md", "/n/b.md"]).set_tracker(7));
        // A backend reporting only the paired event still gets through.
        sink.handle(event(name(RenameMode::Both), &["/n/c.md", "/n/d.md"]).set_tracker(8));

        assert_eq!(
            watcher.begin_drain(),
            vec![
                WatchOp::remove("/n/a.md"),
                WatchOp::update("/n/b.md"),
                WatchOp::remove("/n/c.md"),
                WatchOp::update("/n/d.md"),
            ]
        );
    }

    #[test]
    fn test_convert_create_and_remove() {
        assert_eq!(
            convert_event(event(EventKind::Create(CreateKind::File), &["/n/a.md"])),
            vec![WatchOp::update("/n/a.md")]
        );
        assert_eq!(
            convert_event(event(EventKind::Remove(RemoveKind::Any), &["/n/a.md"])),
            vec![WatchOp::remove("/n/a.md")]
        );
        assert!(convert_event(event(EventKind::Any, &["/n/a.md"])).is_empty());
    }

    #[test]
    fn test_sink_drops_ignored_and_hidden() {
        let ignore = IgnoreSet::new(Duration::ZERO);
        let mut watcher = ChangeWatcher::new("/n", ignore.clone());
        let sink = watcher.sink();

        let guard = ignore.register(["/n/mine.md"]);
        assert!(!sink.push(WatchOp::update("/n/mine.md")));
        assert!(!sink.push(WatchOp::update("/n/.quire/trash/x.md")));
        assert!(sink.push(WatchOp::update("/n/theirs.md")));
        drop(guard);
        assert!(sink.push(WatchOp::remove("/n/mine.md")));

        let ops = watcher.begin_drain();
        assert_eq!(
            ops,
            vec![WatchOp::update("/n/theirs.md"), WatchOp::remove("/n/mine.md")]
        );
        assert_eq!(watcher.state(), WatchState::Draining);
        watcher.finish_drain();
        assert_eq!(watcher.state(), WatchState::Idle);
    }

    #[test]
    fn test_state_machine() {
        let dir = tempdir().unwrap();
        let mut watcher = ChangeWatcher::new(dir.path(), IgnoreSet::default());
        assert_eq!(watcher.state(), WatchState::Idle);
        watcher.blur().unwrap();
        assert_eq!(watcher.state(), WatchState::Observing);
        assert!(matches!(
            watcher.blur(),
            Err(WatchError::InvalidState { .. })
        ));
        watcher.begin_drain();
        watcher.finish_drain();
        assert_eq!(watcher.state(), WatchState::Idle);
    }

    #[test]
    fn test_observes_external_write() {
        let dir = tempdir().unwrap();
        let mut watcher = ChangeWatcher::new(dir.path(), IgnoreSet::default());
        watcher.blur().unwrap();

        std::fs::write(dir.path().join("external.md"), "# hi").unwrap();
        std::thread::sleep(Duration::from_millis(300));

        let ops = watcher.begin_drain();
        // Delivery timing is backend dependent; whatever did arrive must
        // concern the new file.
        assert!(ops.iter().all(|op| op.path.ends_with("external.md")));
        watcher.finish_drain();
    }
}
