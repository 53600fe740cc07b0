//! The live workspace of one open space.
//!
//! A `Workspace` owns the tree, the tabs, the schemas of open documents
//! and the change watcher. Every mutation goes through `&mut self`, so
//! there is exactly one writer. Disk side effects happen first; memory
//! and the index only follow once they succeeded.

mod mutations;
mod sync;

pub use sync::DrainReport;

use crate::config::WorkspaceConfig;
use crate::error::{Result, WorkspaceError};
use crate::events::WorkspaceEvent;
use crate::refactor::{PathChange, Refactor};
use crate::tabs::Tabs;
use quire_core::{is_supported, FileRecord, NodeId, NodeKind, Schema, Tree, TreeNode};
use quire_index::Index;
use quire_watcher::{
    index_pending, ChangeWatcher, FileSystem, IgnoreSet, LocalFs, ParseJob, ParsePool,
    ParseReport, PendingDoc, Scanner, SpaceGeneration, SpaceGuard,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// What to open: a node of the tree or any path on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenTarget {
    Node(NodeId),
    Path(PathBuf),
}

/// The parse work left over from the initial scan.
///
/// Runs independently of the workspace so the host can spawn it. If the
/// workspace is disposed meanwhile, the results are discarded.
pub struct ParseTask {
    pending: Vec<PendingDoc>,
    index: Arc<dyn Index>,
    guard: SpaceGuard,
    batch_size: usize,
}

impl ParseTask {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub async fn run(
        self,
        pool: &ParsePool,
        progress: impl FnMut(usize, usize),
    ) -> Result<ParseReport> {
        let report = index_pending(
            self.pending,
            pool,
            self.index.as_ref(),
            &self.guard,
            self.batch_size,
            progress,
        )
        .await?;
        Ok(report)
    }
}

pub struct Workspace {
    root: PathBuf,
    config: WorkspaceConfig,
    index: Arc<dyn Index>,
    fs: Arc<dyn FileSystem>,
    tree: Tree,
    tabs: Tabs,
    /// Schemas of documents referenced by a tab or opened ad hoc.
    live: HashMap<NodeId, Schema>,
    /// Files opened from outside the space.
    adhoc: HashSet<NodeId>,
    ignore: IgnoreSet,
    watcher: ChangeWatcher,
    generation: SpaceGeneration,
    pending: Vec<PendingDoc>,
    events: broadcast::Sender<WorkspaceEvent>,
}

impl Workspace {
    /// Opens the space at `root` with its own config and the local disk.
    ///
    /// `confirm` is asked before a first scan of an oversized space.
    pub async fn init(
        root: impl Into<PathBuf>,
        index: Arc<dyn Index>,
        confirm: impl Fn(usize) -> bool + Send + 'static,
    ) -> Result<Self> {
        let root = root.into();
        let config = WorkspaceConfig::load(&root)?;
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFs::new(config.trash_dir(&root)));
        Self::init_with(root, config, index, fs, confirm).await
    }

    /// The directory walk runs on the blocking pool, `confirm` included.
    pub async fn init_with(
        root: impl Into<PathBuf>,
        config: WorkspaceConfig,
        index: Arc<dyn Index>,
        fs: Arc<dyn FileSystem>,
        confirm: impl Fn(usize) -> bool + Send + 'static,
    ) -> Result<Self> {
        let root = root.into();
        let scan = {
            let root = root.clone();
            let index = Arc::clone(&index);
            let options = config.scan_options();
            tokio::task::spawn_blocking(move || {
                Scanner::new(index.as_ref(), options).scan(&root, &confirm)
            })
            .await??
        };
        for (path, reason) in &scan.skipped {
            warn!("Skipped {}: {}", path.display(), reason);
        }

        let ignore = IgnoreSet::new(config.ignore_grace());
        let watcher = ChangeWatcher::new(&root, ignore.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            "Opened space {} ({} entries, {} documents to parse)",
            root.display(),
            scan.visited,
            scan.pending.len()
        );

        Ok(Self {
            tabs: Tabs::new(config.max_tabs),
            root,
            config,
            index,
            fs,
            tree: scan.tree,
            live: HashMap::new(),
            adhoc: HashSet::new(),
            ignore,
            watcher,
            generation: SpaceGeneration::new(),
            pending: scan.pending,
            events,
        })
    }

    /// Hands out the documents the scan found stale. Later calls get
    /// an empty task.
    pub fn parse_task(&mut self) -> ParseTask {
        ParseTask {
            pending: std::mem::take(&mut self.pending),
            index: Arc::clone(&self.index),
            guard: self.generation.guard(),
            batch_size: self.config.parse_batch_size,
        }
    }

    /// Closes the space. Outstanding parse tasks go stale and all
    /// watches are dropped.
    pub fn dispose(self) {
        self.generation.advance();
        info!("Closed space {}", self.root.display());
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tabs(&self) -> &Tabs {
        &self.tabs
    }

    pub fn index(&self) -> &dyn Index {
        self.index.as_ref()
    }

    pub fn ignore_set(&self) -> &IgnoreSet {
        &self.ignore
    }

    pub fn find(&self, path: &Path) -> Option<NodeId> {
        self.tree.find(path)
    }

    pub fn node(&self, id: NodeId) -> Result<&TreeNode> {
        self.tree
            .get(id)
            .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))
    }

    /// The live schema of an open document.
    pub fn schema(&self, id: NodeId) -> Option<&Schema> {
        self.live.get(&id)
    }

    /// The node shown by the active tab.
    pub fn current(&self) -> Option<NodeId> {
        self.tabs.active().current()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.events.subscribe()
    }

    /// Opens a node or path in the active tab.
    ///
    /// Folders are only expanded. Paths outside the tree become ad-hoc
    /// nodes with a watch of their own.
    pub async fn open(&mut self, target: OpenTarget, pool: &ParsePool) -> Result<NodeId> {
        let id = match target {
            OpenTarget::Node(id) => {
                self.node(id)?;
                id
            }
            OpenTarget::Path(path) => match self.tree.find(&path) {
                Some(id) => id,
                None => self.open_adhoc(&path, pool).await?,
            },
        };

        self.reveal(id);
        if self.node(id)?.is_folder() {
            if let Some(node) = self.tree.get_mut(id) {
                node.expanded = true;
            }
            self.emit(WorkspaceEvent::TreeChanged);
            return Ok(id);
        }

        self.ensure_live(id, pool).await?;
        self.tabs.active_mut().push(id);
        debug!("Opened {}", self.node(id)?.path.display());
        self.emit(WorkspaceEvent::TreeChanged);
        Ok(id)
    }

    async fn open_adhoc(&mut self, path: &Path, pool: &ParsePool) -> Result<NodeId> {
        let meta = self
            .fs
            .stat(path)
            .map_err(|e| WorkspaceError::NotFound(format!("{}: {}", path.display(), e)))?;
        if meta.is_dir {
            return Err(WorkspaceError::OutsideSpace(path.to_path_buf()));
        }
        self.watcher.watch_file(path)?;

        let outcome = pool.parse_one(ParseJob::from_disk(path)).await;
        let node = TreeNode::new(path, NodeKind::File).with_times(meta.modified, meta.created);
        let id = self.tree.insert_detached(node);
        self.adhoc.insert(id);
        self.live.insert(id, outcome.document.schema);
        info!("Opened {} outside the space", path.display());
        Ok(id)
    }

    /// Loads a document's schema into the live cache, parsing it now
    /// when the background pipeline has not got to it yet.
    async fn ensure_live(&mut self, id: NodeId, pool: &ParsePool) -> Result<()> {
        let path = self.node(id)?.path.clone();
        if self.live.contains_key(&id) || !is_supported(&path) {
            return Ok(());
        }
        let schema = match self.index.get(&path)? {
            Some(FileRecord {
                schema: Some(schema),
                ..
            }) => schema,
            record => {
                let outcome = pool.parse_one(ParseJob::from_disk(&path)).await;
                if let Some(mut record) = record {
                    record.schema = Some(outcome.document.schema.clone());
                    record.links = outcome.document.links;
                    self.index.put(&record)?;
                }
                outcome.document.schema
            }
        };
        self.live.insert(id, schema);
        Ok(())
    }

    pub fn new_tab(&mut self) -> Result<usize> {
        self.tabs.new_tab().map_err(|e| self.reject(e))
    }

    /// Closing the last remaining tab is a no-op returning false.
    pub fn close_tab(&mut self, index: usize) -> Result<bool> {
        let closed = self.tabs.close_tab(index)?;
        if closed {
            self.prune_live();
        }
        Ok(closed)
    }

    pub fn select_tab(&mut self, index: usize) -> Result<()> {
        self.tabs.select(index)
    }

    pub fn back(&mut self) -> Option<NodeId> {
        self.tabs.active_mut().back()
    }

    pub fn forward(&mut self) -> Option<NodeId> {
        self.tabs.active_mut().forward()
    }

    /// Whether a tab shows `id` now or can navigate back to it.
    fn is_displayed(&self, id: NodeId) -> bool {
        self.tabs.references(id) || self.adhoc.contains(&id)
    }

    fn prune_live(&mut self) {
        let keep: HashSet<NodeId> = self
            .live
            .keys()
            .copied()
            .filter(|id| self.is_displayed(*id))
            .collect();
        self.live.retain(|id, _| keep.contains(id));
    }

    /// Expands every ancestor folder of `id`.
    fn reveal(&mut self, id: NodeId) {
        for ancestor in self.tree.ancestors(id) {
            if let Some(node) = self.tree.get_mut(ancestor) {
                node.expanded = true;
            }
        }
    }

    /// Rewrites links after paths changed: dependents first, then the
    /// own links of every moved document. Failures only warn, the move
    /// itself already happened.
    fn relink(&mut self, changes: &[PathChange]) {
        let refactor = Refactor::new(
            &self.root,
            self.index.as_ref(),
            self.fs.as_ref(),
            &self.ignore,
        )
        .write_back(self.config.write_back_links);

        let mut touched = match refactor.refresh_dependents(changes) {
            Ok(paths) => paths,
            Err(e) => {
                self.warn_user(format!("Failed to update links: {}", e));
                Vec::new()
            }
        };
        for change in changes.iter().filter(|c| is_supported(&c.new)) {
            match refactor.refresh_own_links(&change.new) {
                Ok(true) => touched.push(change.new.clone()),
                Ok(false) => {}
                Err(e) => self.warn_user(format!(
                    "Failed to update links in {}: {}",
                    change.new.display(),
                    e
                )),
            }
        }
        touched.sort();
        touched.dedup();
        self.reload_documents(&touched);
    }

    /// Refreshes the live schema of any open document among `paths`.
    fn reload_documents(&mut self, paths: &[PathBuf]) {
        for path in paths {
            let Some(id) = self.tree.find(path) else {
                continue;
            };
            if !self.live.contains_key(&id) {
                continue;
            }
            match self.index.get(path) {
                Ok(Some(record)) => {
                    if let Some(schema) = record.schema {
                        self.live.insert(id, schema);
                        self.emit(WorkspaceEvent::DocumentReloaded { path: path.clone() });
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Cannot reload {}: {}", path.display(), e),
            }
        }
    }

    fn emit(&self, event: WorkspaceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn warn_user(&self, message: String) {
        warn!("{}", message);
        self.emit(WorkspaceEvent::Warning { message });
    }

    /// Surfaces lightweight rejections as warnings and passes the error on.
    fn reject(&self, error: WorkspaceError) -> WorkspaceError {
        if error.is_warning() {
            self.warn_user(error.to_string());
        }
        error
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use quire_index::MemoryIndex;
    use std::fs;
    use std::io;
    use tempfile::TempDir;

    pub fn config() -> WorkspaceConfig {
        WorkspaceConfig {
            ignore_grace_ms: 0,
            ..WorkspaceConfig::default()
        }
    }

    /// A space with:
    ///
    /// ```text
    /// a/b.md      -> [c](c/d.md)
    /// a/c/d.md    -> [b](../b.md)
    /// a/img/p.png
    /// top.md      -> [b](a/b.md) ![p](./a/img/p.png)
    /// other/
    /// ```
    pub fn layout(root: &Path) {
        fs::create_dir_all(root.join("a/c")).unwrap();
        fs::create_dir_all(root.join("a/img")).unwrap();
        fs::create_dir_all(root.join("other")).unwrap();
        fs::write(root.join("a/b.md"), "[c](c/d.md)").unwrap();
        fs::write(root.join("a/c/d.md"), "[b](../b.md)").unwrap();
        fs::write(root.join("a/img/p.png"), [0u8; 8]).unwrap();
        fs::write(root.join("top.md"), "[b](a/b.md) ![p](./a/img/p.png)").unwrap();
    }

    pub async fn open_with(
        dir: &TempDir,
        fs_impl: Arc<dyn FileSystem>,
        config: WorkspaceConfig,
    ) -> (Workspace, Arc<MemoryIndex>, ParsePool) {
        let index = Arc::new(MemoryIndex::new());
        let pool = ParsePool::new(2);
        let mut ws = Workspace::init_with(dir.path(), config, index.clone(), fs_impl, |_| true)
            .await
            .unwrap();
        ws.parse_task().run(&pool, |_, _| {}).await.unwrap();
        (ws, index, pool)
    }

    pub async fn open_space() -> (TempDir, Workspace, Arc<MemoryIndex>, ParsePool) {
        let dir = tempfile::tempdir().unwrap();
        layout(dir.path());
        let fs_impl = Arc::new(LocalFs::new(dir.path().join(".quire/trash")));
        let (ws, index, pool) = open_with(&dir, fs_impl, config()).await;
        (dir, ws, index, pool)
    }

    /// Local disk whose writes all fail.
    pub struct ReadOnlyFs(pub LocalFs);

    fn denied() -> io::Error {
        io::Error::new(io::ErrorKind::PermissionDenied, "read-only")
    }

    impl FileSystem for ReadOnlyFs {
        fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
            self.0.list(dir)
        }
        fn stat(&self, path: &Path) -> io::Result<quire_watcher::EntryMeta> {
            self.0.stat(path)
        }
        fn read_to_string(&self, path: &Path) -> io::Result<String> {
            self.0.read_to_string(path)
        }
        fn write(&self, _: &Path, _: &str) -> io::Result<()> {
            Err(denied())
        }
        fn create_dir(&self, _: &Path) -> io::Result<()> {
            Err(denied())
        }
        fn create_file(&self, _: &Path) -> io::Result<()> {
            Err(denied())
        }
        fn copy_file(&self, _: &Path, _: &Path) -> io::Result<()> {
            Err(denied())
        }
        fn rename(&self, _: &Path, _: &Path) -> io::Result<()> {
            Err(denied())
        }
        fn move_to_trash(&self, _: &Path) -> io::Result<PathBuf> {
            Err(denied())
        }
    }

    pub fn url_at(ws: &Workspace, path: &Path) -> Vec<String> {
        let record = ws.index().get(path).unwrap().unwrap();
        record
            .schema
            .unwrap()
            .references()
            .into_iter()
            .filter_map(|(_, e)| e.url.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_init_mirrors_disk_and_parses() {
        let (dir, ws, index, _pool) = open_space().await;
        let b = ws.find(&dir.path().join("a/b.md")).unwrap();
        assert_eq!(ws.node(b).unwrap().kind, NodeKind::File);
        assert_eq!(ws.tree().len(), 9);

        let record = index.get(&dir.path().join("a/b.md")).unwrap().unwrap();
        assert_eq!(record.id, b);
        assert_eq!(record.links[0].target_path, dir.path().join("a/c/d.md"));
    }

    #[tokio::test]
    async fn test_open_pushes_history_and_reveals() {
        let (dir, mut ws, _index, pool) = open_space().await;
        let d = ws
            .open(OpenTarget::Path(dir.path().join("a/c/d.md")), &pool)
            .await
            .unwrap();
        let top = ws
            .open(OpenTarget::Path(dir.path().join("top.md")), &pool)
            .await
            .unwrap();

        assert_eq!(ws.tabs().active().history(), &[d, top]);
        assert!(ws.schema(d).is_some());
        let a = ws.find(&dir.path().join("a")).unwrap();
        let c = ws.find(&dir.path().join("a/c")).unwrap();
        assert!(ws.node(a).unwrap().expanded);
        assert!(ws.node(c).unwrap().expanded);

        assert_eq!(ws.back(), Some(d));
        let b = ws.open(OpenTarget::Path(dir.path().join("a/b.md")), &pool).await.unwrap();
        assert_eq!(ws.tabs().active().history(), &[d, b]);
        assert_eq!(ws.forward(), None);
    }

    #[tokio::test]
    async fn test_open_folder_only_expands() {
        let (dir, mut ws, _index, pool) = open_space().await;
        let other = ws.find(&dir.path().join("other")).unwrap();
        ws.open(OpenTarget::Node(other), &pool).await.unwrap();
        assert!(ws.node(other).unwrap().expanded);
        assert!(ws.tabs().active().history().is_empty());
    }

    #[tokio::test]
    async fn test_open_outside_space_is_adhoc() {
        let (_dir, mut ws, _index, pool) = open_space().await;
        let outside = tempfile::tempdir().unwrap();
        let file = outside.path().join("loose.md");
        std::fs::write(&file, "# Loose").unwrap();

        let id = ws.open(OpenTarget::Path(file.clone()), &pool).await.unwrap();
        let node = ws.node(id).unwrap();
        assert_eq!(node.parent, None);
        assert_eq!(ws.current(), Some(id));
        assert!(!ws.schema(id).unwrap().is_empty());
        assert!(ws.index().get(&file).unwrap().is_none());

        assert!(matches!(
            ws.rename(id, "renamed.md"),
            Err(WorkspaceError::OutsideSpace(_))
        ));
    }

    #[tokio::test]
    async fn test_tab_cap_warns_without_mutation() {
        let (_dir, mut ws, _index, _pool) = open_space().await;
        let mut events = ws.subscribe();
        for _ in 1..30 {
            ws.new_tab().unwrap();
        }
        let err = ws.new_tab().unwrap_err();
        assert!(matches!(err, WorkspaceError::TabLimit { max: 30 }));
        assert_eq!(ws.tabs().len(), 30);
        assert!(matches!(
            events.try_recv(),
            Ok(WorkspaceEvent::Warning { .. })
        ));
    }

    #[tokio::test]
    async fn test_dispose_discards_outstanding_parses() {
        let dir = tempfile::tempdir().unwrap();
        layout(dir.path());
        let index = Arc::new(quire_index::MemoryIndex::new());
        let pool = ParsePool::new(1);
        let mut ws = Workspace::init_with(
            dir.path(),
            config(),
            index.clone(),
            Arc::new(LocalFs::new(dir.path().join(".quire/trash"))),
            |_| true,
        )
        .await
        .unwrap();

        let task = ws.parse_task();
        assert_eq!(task.len(), 3);
        assert!(ws.parse_task().is_empty());
        ws.dispose();

        let report = task.run(&pool, |_, _| {}).await.unwrap();
        assert_eq!(report.discarded, 3);
        let record = index.get(&dir.path().join("top.md")).unwrap().unwrap();
        assert!(record.schema.is_none());
    }

    #[tokio::test]
    async fn test_oversized_space_can_be_declined() {
        let dir = tempfile::tempdir().unwrap();
        layout(dir.path());
        let index = Arc::new(quire_index::MemoryIndex::new());
        let config = WorkspaceConfig {
            oversized_threshold: 2,
            ..config()
        };
        let err = Workspace::init_with(
            dir.path(),
            config,
            index.clone(),
            Arc::new(LocalFs::new(dir.path().join(".quire/trash"))),
            |_| false,
        )
        .await
        .err()
        .unwrap();
        assert!(err.is_oversized());
        assert!(index.is_empty().unwrap());
    }
}
