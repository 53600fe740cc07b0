//! Replaying external changes when focus returns.

use super::mutations::NewEntry;
use super::Workspace;
use crate::error::Result;
use crate::events::WorkspaceEvent;
use quire_core::{is_supported, FileRecord, NodeId};
use quire_watcher::{EntryMeta, ParseJob, ParsePool, WatchOpKind, WatchSink, WatchState};
use std::path::Path;
use tracing::{debug, info, warn};

/// What a drain did with the queued ops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    /// Ops for paths the workspace itself was changing.
    pub dropped: usize,
    /// Ops with nothing to do, e.g. the path vanished again.
    pub skipped: usize,
    pub failed: usize,
}

impl Workspace {
    /// The window lost focus: start observing the space.
    pub fn blur(&mut self) -> Result<()> {
        self.watcher.blur()?;
        Ok(())
    }

    pub fn watch_state(&self) -> WatchState {
        self.watcher.state()
    }

    /// Feeds ops into the queue the same way OS notifications do.
    pub fn watch_sink(&self) -> WatchSink {
        self.watcher.sink()
    }

    /// The window regained focus: stop observing and replay everything
    /// queued, strictly in arrival order. A failing op is logged and
    /// the drain goes on.
    pub async fn focus(&mut self, pool: &ParsePool) -> DrainReport {
        let ops = self.watcher.begin_drain();
        let mut report = DrainReport::default();

        for op in ops {
            // An interactive mutation holding the path wins.
            if self.ignore.contains(&op.path) {
                debug!("Dropped {:?} for {}, path is busy", op.kind, op.path.display());
                report.dropped += 1;
                continue;
            }
            let result = match op.kind {
                WatchOpKind::Remove => Ok(self.replay_remove(&op.path)),
                WatchOpKind::Update => self.replay_update(&op.path, pool).await,
            };
            match result {
                Ok(true) => report.applied += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(
                        "Failed to replay {:?} for {}: {}",
                        op.kind,
                        op.path.display(),
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        self.watcher.finish_drain();
        if report.applied > 0 {
            self.emit(WorkspaceEvent::TreeChanged);
        }
        info!(
            "Replayed watch queue: {} applied, {} dropped, {} skipped, {} failed",
            report.applied, report.dropped, report.skipped, report.failed
        );
        report
    }

    /// Same in-memory path as an interactive delete, without touching disk.
    fn replay_remove(&mut self, path: &Path) -> bool {
        match self.tree.find(path) {
            Some(id) if id != self.tree.root() => {
                self.forget(id);
                true
            }
            _ => false,
        }
    }

    async fn replay_update(&mut self, path: &Path, pool: &ParsePool) -> Result<bool> {
        let meta = match self.fs.stat(path) {
            Ok(meta) => meta,
            Err(e) => {
                debug!("{} vanished before replay: {}", path.display(), e);
                return Ok(false);
            }
        };
        match self.tree.find(path) {
            Some(id) => {
                let was_folder = self.node(id)?.is_folder();
                if was_folder != meta.is_dir && id != self.tree.root() {
                    // Replaced by an entry of the other kind.
                    self.forget(id);
                    return self.adopt(path, meta, pool).await;
                }
                self.refresh(id, path, meta, pool).await
            }
            None => self.adopt(path, meta, pool).await,
        }
    }

    /// An entry we know changed on disk.
    async fn refresh(
        &mut self,
        id: NodeId,
        path: &Path,
        meta: EntryMeta,
        pool: &ParsePool,
    ) -> Result<bool> {
        if let Some(node) = self.tree.get_mut(id) {
            node.modified = meta.modified;
        }
        if meta.is_dir || !is_supported(path) {
            if let Some(mut record) = self.index.get(path)? {
                record.modified = meta.modified;
                self.index.put(&record)?;
            }
            return Ok(true);
        }

        let outcome = pool.parse_one(ParseJob::from_disk(path)).await;
        if self.is_displayed(id) {
            self.live.insert(id, outcome.document.schema);
            self.emit(WorkspaceEvent::DocumentReloaded {
                path: path.to_path_buf(),
            });
            debug!("Reloaded open document {}", path.display());
            return Ok(true);
        }

        let mut record = match self.index.get(path)? {
            Some(record) => record,
            None => match self.tree.get(id) {
                Some(node) => FileRecord::for_node(node),
                None => return Ok(false),
            },
        };
        record.schema = Some(outcome.document.schema);
        record.links = outcome.document.links;
        record.modified = meta.modified;
        self.index.put(&record)?;
        Ok(true)
    }

    /// An entry created outside the app. Its parent has to be in the
    /// tree already; folders bring their whole content along.
    async fn adopt(&mut self, path: &Path, meta: EntryMeta, pool: &ParsePool) -> Result<bool> {
        let parent = path.parent().and_then(|p| self.tree.find(p));
        let parent_is_folder = parent
            .and_then(|p| self.tree.get(p))
            .map(|p| p.is_folder())
            .unwrap_or(false);
        if !parent_is_folder || self.is_hidden(path) {
            debug!("Parent of {} is not in the tree, skipping", path.display());
            return Ok(false);
        }

        let mut entries = vec![NewEntry {
            path: path.to_path_buf(),
            meta,
            parse_from: path.to_path_buf(),
        }];
        let mut next = 0;
        while next < entries.len() {
            if entries[next].meta.is_dir {
                let dir = entries[next].path.clone();
                match self.fs.list(&dir) {
                    Ok(mut children) => {
                        children.sort();
                        for child in children {
                            if self.is_hidden(&child) || self.tree.find(&child).is_some() {
                                continue;
                            }
                            match self.fs.stat(&child) {
                                Ok(meta) => entries.push(NewEntry {
                                    parse_from: child.clone(),
                                    path: child,
                                    meta,
                                }),
                                Err(e) => debug!("Skipping {}: {}", child.display(), e),
                            }
                        }
                    }
                    Err(e) => warn!("Cannot list {}: {}", dir.display(), e),
                }
            }
            next += 1;
        }

        let count = entries.len();
        self.materialize(entries, pool).await?;
        debug!("Adopted {} ({} entries)", path.display(), count);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::OpenTarget;
    use super::*;
    use crate::config::WorkspaceConfig;
    use quire_index::Index;
    use quire_watcher::{LocalFs, WatchOp};
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_update_then_remove_converges() {
        let (dir, mut ws, _index, pool) = open_space().await;
        let f = dir.path().join("other/f.md");
        fs::write(&f, "# f").unwrap();

        let sink = ws.watch_sink();
        sink.push(WatchOp::update(&f));
        sink.push(WatchOp::remove(&f));
        let report = ws.focus(&pool).await;

        assert_eq!(report.applied, 2);
        assert!(ws.find(&f).is_none());
        assert_eq!(ws.watch_state(), WatchState::Idle);
    }

    #[tokio::test]
    async fn test_remove_then_update_recreates() {
        let (dir, mut ws, _index, pool) = open_space().await;
        let top = dir.path().join("top.md");
        let old_id = ws.find(&top).unwrap();
        fs::write(&top, "rewritten [x](other/x.md)").unwrap();

        let sink = ws.watch_sink();
        sink.push(WatchOp::remove(&top));
        sink.push(WatchOp::update(&top));
        ws.focus(&pool).await;

        let id = ws.find(&top).unwrap();
        assert_ne!(id, old_id);
        let record = ws.index().get(&top).unwrap().unwrap();
        assert_eq!(record.links[0].target_path, dir.path().join("other/x.md"));
    }

    #[tokio::test]
    async fn test_external_folder_is_adopted_with_content() {
        let (dir, mut ws, _index, pool) = open_space().await;
        let new_dir = dir.path().join("other/inbox");
        fs::create_dir_all(new_dir.join("deep")).unwrap();
        fs::write(new_dir.join("deep/n.md"), "[t](../../../top.md)").unwrap();
        fs::write(new_dir.join(".hidden.md"), "").unwrap();

        ws.watch_sink().push(WatchOp::update(&new_dir));
        ws.focus(&pool).await;

        let deep = ws.find(&new_dir.join("deep")).unwrap();
        let n = ws.find(&new_dir.join("deep/n.md")).unwrap();
        assert_eq!(ws.node(n).unwrap().parent, Some(deep));
        assert!(ws.find(&new_dir.join(".hidden.md")).is_none());
        let record = ws.index().get(&new_dir.join("deep/n.md")).unwrap().unwrap();
        assert_eq!(record.id, n);
        assert_eq!(record.links[0].target_path, dir.path().join("top.md"));
    }

    #[tokio::test]
    async fn test_orphans_are_not_inserted() {
        let (dir, mut ws, _index, pool) = open_space().await;
        let orphan = dir.path().join("fresh/child.md");
        fs::create_dir(dir.path().join("fresh")).unwrap();
        fs::write(&orphan, "").unwrap();

        ws.watch_sink().push(WatchOp::update(&orphan));
        let report = ws.focus(&pool).await;
        assert_eq!(report.skipped, 1);
        assert!(ws.find(&orphan).is_none());
    }

    #[tokio::test]
    async fn test_open_document_is_reloaded_live() {
        let (dir, mut ws, index, pool) = open_space().await;
        let top = dir.path().join("top.md");
        let id = ws.open(OpenTarget::Path(top.clone()), &pool).await.unwrap();
        let mut events = ws.subscribe();
        let stored = index.get(&top).unwrap().unwrap();

        fs::write(&top, "# Changed elsewhere").unwrap();
        ws.watch_sink().push(WatchOp::update(&top));
        ws.focus(&pool).await;

        let live = ws.schema(id).unwrap();
        assert_eq!(live.root.children[0].children[0].text, "Changed elsewhere");
        assert_eq!(
            events.try_recv().unwrap(),
            WorkspaceEvent::DocumentReloaded { path: top.clone() }
        );
        // Not open anywhere else, so the index is left to the editor.
        assert_eq!(index.get(&top).unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn test_closed_document_writes_through() {
        let (dir, mut ws, index, pool) = open_space().await;
        let b = dir.path().join("a/b.md");
        fs::write(&b, "no links now").unwrap();

        ws.watch_sink().push(WatchOp::update(&b));
        ws.focus(&pool).await;

        let record = index.get(&b).unwrap().unwrap();
        assert!(record.links.is_empty());
    }

    #[tokio::test]
    async fn test_busy_paths_are_dropped() {
        let (dir, mut ws, _index, pool) = open_space().await;
        let top = dir.path().join("top.md");
        let sink = ws.watch_sink();
        sink.push(WatchOp::remove(&top));

        // A rename of the same path is in flight while focus returns.
        let guard = ws.ignore_set().register([&top]);
        let report = ws.focus(&pool).await;
        drop(guard);

        assert_eq!(report.dropped, 1);
        assert!(ws.find(&top).is_some());
    }

    #[tokio::test]
    async fn test_own_writes_are_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        layout(dir.path());
        let fs_impl = Arc::new(LocalFs::new(dir.path().join(".quire/trash")));
        let config = WorkspaceConfig {
            ignore_grace_ms: 10_000,
            ..config()
        };
        let (mut ws, _index, pool) = open_with(&dir, fs_impl, config).await;
        ws.blur().unwrap();
        assert_eq!(ws.watch_state(), WatchState::Observing);

        let a = ws.find(&dir.path().join("a")).unwrap();
        ws.rename(a, "renamed").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let report = ws.focus(&pool).await;
        assert_eq!(report.applied, 0);
        assert!(ws.find(&dir.path().join("renamed/b.md")).is_some());
        assert!(ws.find(&dir.path().join("a")).is_none());
    }
}
