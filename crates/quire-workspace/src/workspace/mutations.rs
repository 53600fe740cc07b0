//! Create, rename, move, paste and delete.

use super::Workspace;
use crate::error::{Result, WorkspaceError};
use crate::events::WorkspaceEvent;
use crate::refactor::{PathChange, Refactor};
use quire_core::paths::is_hidden_below;
use quire_core::{is_supported, FileRecord, NodeId, NodeKind, Schema, TreeNode};
use quire_index::IndexChange;
use quire_watcher::{EntryMeta, ParseJob, ParsePool};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An entry that exists on disk but not yet in the tree.
pub(super) struct NewEntry {
    pub path: PathBuf,
    pub meta: EntryMeta,
    /// Where to read the content for parsing. Differs from `path` for
    /// pasted copies, whose links must resolve against the original.
    pub parse_from: PathBuf,
}

fn valid_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(WorkspaceError::InvalidName(name.to_string()));
    }
    Ok(name)
}

impl Workspace {
    /// Creates an empty file or folder under `parent`.
    pub fn create(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> Result<NodeId> {
        let name = valid_name(name)?;
        if kind == NodeKind::Root {
            return Err(WorkspaceError::InvalidName(name.to_string()));
        }
        let parent_node = self.node(parent)?;
        if !parent_node.is_folder() {
            return Err(WorkspaceError::NotAFolder(parent_node.path.clone()));
        }
        if self.tree.child_named(parent, name, kind.is_folder()).is_some() {
            let error = WorkspaceError::NameCollision {
                name: name.to_string(),
                parent: parent_node.path.clone(),
            };
            return Err(self.reject(error));
        }
        let path = parent_node.path.join(name);

        {
            let _guard = self.ignore.register([&path]);
            let created = match kind {
                NodeKind::Folder => self.fs.create_dir(&path),
                _ => self.fs.create_file(&path),
            };
            created.map_err(|e| WorkspaceError::fs("create", &path, e))?;
        }

        let mut node = TreeNode::new(&path, kind);
        if let Ok(meta) = self.fs.stat(&path) {
            node = node.with_times(meta.modified, meta.created);
        }
        let mut record = FileRecord::for_node(&node);
        if is_supported(&path) {
            record.schema = Some(Schema::empty());
        }
        self.index.put(&record)?;

        let id = self
            .tree
            .insert(parent, node)
            .ok_or_else(|| WorkspaceError::NotFound(parent.to_string()))?;
        info!("Created {} {}", kind, path.display());
        self.emit(WorkspaceEvent::TreeChanged);
        Ok(id)
    }

    /// stable → editing.
    pub fn begin_edit(&mut self, id: NodeId) -> Result<()> {
        if id == self.tree.root() {
            return Err(WorkspaceError::RootImmutable);
        }
        let node = self
            .tree
            .get_mut(id)
            .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))?;
        node.edit_mode = true;
        Ok(())
    }

    /// editing → stable. An empty name reverts instead of renaming.
    pub fn commit_edit(&mut self, id: NodeId, name: &str) -> Result<()> {
        if let Some(node) = self.tree.get_mut(id) {
            node.edit_mode = false;
        }
        if name.trim().is_empty() {
            debug!("Empty name, edit reverted");
            return Ok(());
        }
        self.rename(id, name)
    }

    /// Renames on disk, then re-paths the node and its descendants,
    /// moves their records and rewrites affected links.
    pub fn rename(&mut self, id: NodeId, new_name: &str) -> Result<()> {
        if new_name.trim().is_empty() {
            return Ok(());
        }
        let name = valid_name(new_name)?;
        let node = self.node(id)?;
        if node.kind == NodeKind::Root {
            return Err(WorkspaceError::RootImmutable);
        }
        let Some(parent) = node.parent else {
            return Err(WorkspaceError::OutsideSpace(node.path.clone()));
        };
        if node.name == name {
            return Ok(());
        }
        if self.tree.child_named(parent, name, node.is_folder()).is_some() {
            let parent_path = node.path.parent().map(Path::to_path_buf).unwrap_or_default();
            let error = WorkspaceError::NameCollision {
                name: name.to_string(),
                parent: parent_path,
            };
            return Err(self.reject(error));
        }
        let new_path = node.path.with_file_name(name);
        self.relocate(id, &new_path, None, "rename")
    }

    /// Moves `id` into `target`. Refused without any change when the
    /// name is taken there or `target` lies inside `id`.
    pub fn move_node(&mut self, id: NodeId, target: NodeId) -> Result<()> {
        let node = self.node(id)?;
        if node.kind == NodeKind::Root {
            return Err(WorkspaceError::RootImmutable);
        }
        if node.parent.is_none() {
            return Err(WorkspaceError::OutsideSpace(node.path.clone()));
        }
        let (name, path, is_folder, parent) =
            (node.name.clone(), node.path.clone(), node.is_folder(), node.parent);

        let target_node = self.node(target)?;
        if !target_node.is_folder() {
            return Err(WorkspaceError::NotAFolder(target_node.path.clone()));
        }
        let target_path = target_node.path.clone();
        if self.tree.is_within(target, id) {
            return Err(self.reject(WorkspaceError::CycleRejected { path }));
        }
        if parent == Some(target) {
            return Ok(());
        }
        if self.tree.child_named(target, &name, is_folder).is_some() {
            let error = WorkspaceError::NameCollision {
                name,
                parent: target_path,
            };
            return Err(self.reject(error));
        }

        let new_path = target_path.join(&name);
        self.relocate(id, &new_path, Some(target), "move")
    }

    fn relocate(
        &mut self,
        id: NodeId,
        new_path: &Path,
        new_parent: Option<NodeId>,
        op: &'static str,
    ) -> Result<()> {
        let old_path = self.node(id)?.path.clone();
        let _guard = self.ignore.register([old_path.as_path(), new_path]);
        self.fs
            .rename(&old_path, new_path)
            .map_err(|e| WorkspaceError::fs(op, &old_path, e))?;

        if let Some(target) = new_parent {
            if !self.tree.attach(id, target) {
                warn!("Could not attach {} under {}", id, target);
            }
        }
        let moved = self.tree.repath(id, new_path);
        if let Some(parent) = self.tree.get(id).and_then(|n| n.parent) {
            self.tree.sort_children(parent);
        }
        info!(
            "{} {} -> {} ({} entries)",
            if op == "move" { "Moved" } else { "Renamed" },
            old_path.display(),
            new_path.display(),
            moved.len()
        );

        let mut deletes = Vec::with_capacity(moved.len());
        let mut puts = Vec::with_capacity(moved.len());
        for (node_id, old, new) in &moved {
            let Some(node) = self.tree.get(*node_id) else {
                continue;
            };
            let mut record = match self.index.get(old)? {
                Some(record) => record.relocated(new),
                None => FileRecord::for_node(node),
            };
            record.sort_index = node.sort_index;
            deletes.push(IndexChange::Delete(old.clone()));
            puts.push(IndexChange::Put(record));
        }
        deletes.extend(puts);
        self.index.apply(deletes)?;

        let changes: Vec<PathChange> = moved
            .into_iter()
            .map(|(_, old, new)| PathChange::new(old, new))
            .collect();
        self.relink(&changes);
        self.emit(WorkspaceEvent::TreeChanged);
        Ok(())
    }

    /// Copies a file or folder from anywhere into `target`, picking a
    /// free name. Links in copied documents keep pointing at what the
    /// originals pointed at.
    pub async fn paste(
        &mut self,
        source: &Path,
        target: NodeId,
        pool: &ParsePool,
    ) -> Result<NodeId> {
        let target_node = self.node(target)?;
        if !target_node.is_folder() {
            return Err(WorkspaceError::NotAFolder(target_node.path.clone()));
        }
        let target_path = target_node.path.clone();
        let meta = self
            .fs
            .stat(source)
            .map_err(|e| WorkspaceError::NotFound(format!("{}: {}", source.display(), e)))?;
        if meta.is_dir && target_path.starts_with(source) {
            let error = WorkspaceError::CycleRejected {
                path: source.to_path_buf(),
            };
            return Err(self.reject(error));
        }
        let original = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| WorkspaceError::InvalidName(source.display().to_string()))?;
        let name = self.copy_name(target, &target_path, &original, meta.is_dir);
        let dest = target_path.join(&name);

        let copied = {
            let _guard = self.ignore.register([&dest]);
            match self.copy_entry(source, &dest, meta.is_dir) {
                Ok(copied) => copied,
                Err(e) => {
                    if self.fs.exists(&dest) {
                        if let Err(cleanup) = self.fs.move_to_trash(&dest) {
                            warn!("Could not clean up {}: {}", dest.display(), cleanup);
                        }
                    }
                    return Err(WorkspaceError::fs("paste", &dest, e));
                }
            }
        };

        let mut entries = Vec::with_capacity(copied.len());
        for (from, to) in copied {
            match self.fs.stat(&to) {
                Ok(meta) => entries.push(NewEntry {
                    path: to,
                    meta,
                    parse_from: from,
                }),
                Err(e) => warn!("Copied entry {} vanished: {}", to.display(), e),
            }
        }
        let created = self.materialize(entries, pool).await?;

        let refactor = Refactor::new(
            &self.root,
            self.index.as_ref(),
            self.fs.as_ref(),
            &self.ignore,
        )
        .write_back(self.config.write_back_links);
        for id in &created {
            let Some(node) = self.tree.get(*id) else {
                continue;
            };
            if node.is_folder() || !is_supported(&node.path) {
                continue;
            }
            if let Err(e) = refactor.refresh_own_links(&node.path) {
                warn!("Failed to update links in {}: {}", node.path.display(), e);
            }
        }

        info!("Pasted {} as {}", source.display(), dest.display());
        self.emit(WorkspaceEvent::TreeChanged);
        self.find(&dest)
            .ok_or_else(|| WorkspaceError::NotFound(dest.display().to_string()))
    }

    /// `name`, or `name copy`, `name copy 2`, ... before the extension.
    fn copy_name(
        &self,
        folder: NodeId,
        folder_path: &Path,
        original: &str,
        is_dir: bool,
    ) -> String {
        let taken = |name: &str| {
            self.tree.child_named(folder, name, is_dir).is_some()
                || self.fs.exists(&folder_path.join(name))
        };
        if !taken(original) {
            return original.to_string();
        }
        let (stem, ext) = match original.rfind('.') {
            Some(i) if i > 0 && !is_dir => original.split_at(i),
            _ => (original, ""),
        };
        let mut n = 1;
        loop {
            let candidate = if n == 1 {
                format!("{} copy{}", stem, ext)
            } else {
                format!("{} copy {}{}", stem, n, ext)
            };
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Copies recursively, parents first. Returns `(original, copy)` pairs.
    fn copy_entry(
        &self,
        source: &Path,
        dest: &Path,
        is_dir: bool,
    ) -> io::Result<Vec<(PathBuf, PathBuf)>> {
        let mut copied = Vec::new();
        let mut stack = vec![(source.to_path_buf(), dest.to_path_buf(), is_dir)];
        while let Some((from, to, is_dir)) = stack.pop() {
            if is_dir {
                self.fs.create_dir(&to)?;
                let mut children = self.fs.list(&from)?;
                children.sort();
                for child in children.into_iter().rev() {
                    let Some(name) = child.file_name().map(|n| n.to_os_string()) else {
                        continue;
                    };
                    if name.to_string_lossy().starts_with('.') {
                        continue;
                    }
                    let child_is_dir = self.fs.stat(&child)?.is_dir;
                    stack.push((child, to.join(name), child_is_dir));
                }
            } else {
                self.fs.copy_file(&from, &to)?;
            }
            copied.push((from, to));
        }
        Ok(copied)
    }

    /// Adds entries already on disk to the index and the tree, parents
    /// first. Documents are parsed before anything is written.
    pub(super) async fn materialize(
        &mut self,
        entries: Vec<NewEntry>,
        pool: &ParsePool,
    ) -> Result<Vec<NodeId>> {
        let mut nodes = Vec::with_capacity(entries.len());
        let mut records = Vec::with_capacity(entries.len());
        let mut jobs = Vec::new();

        for entry in &entries {
            let kind = if entry.meta.is_dir {
                NodeKind::Folder
            } else {
                NodeKind::File
            };
            let node = TreeNode::new(&entry.path, kind)
                .with_times(entry.meta.modified, entry.meta.created);
            let record = FileRecord::for_node(&node);
            if !entry.meta.is_dir && is_supported(&entry.path) {
                jobs.push((records.len(), ParseJob::from_disk(&entry.parse_from)));
            }
            nodes.push(node);
            records.push(record);
        }

        for batch in jobs.chunks(self.config.parse_batch_size.max(1)) {
            let outcomes = pool
                .parse_batch(batch.iter().map(|(_, job)| job.clone()).collect())
                .await;
            for ((i, _), outcome) in batch.iter().zip(outcomes) {
                records[*i].schema = Some(outcome.document.schema);
                records[*i].links = outcome.document.links;
            }
        }

        self.index
            .apply(records.into_iter().map(IndexChange::Put).collect())?;

        let mut created = Vec::with_capacity(nodes.len());
        for node in nodes {
            let parent = node.path.parent().and_then(|p| self.tree.find(p));
            let Some(parent) = parent else {
                warn!("No parent for {}, not added", node.path.display());
                continue;
            };
            let path = node.path.clone();
            match self.tree.insert(parent, node) {
                Some(id) => created.push(id),
                None => warn!("Parent of {} is not a folder", path.display()),
            }
        }
        Ok(created)
    }

    /// Moves the entry to the trash and forgets it. Ad-hoc files are
    /// only closed; they do not belong to the space.
    pub fn delete(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        if node.kind == NodeKind::Root {
            return Err(WorkspaceError::RootImmutable);
        }
        let path = node.path.clone();
        if !self.adhoc.contains(&id) {
            let _guard = self.ignore.register([&path]);
            let trashed = self
                .fs
                .move_to_trash(&path)
                .map_err(|e| WorkspaceError::fs("delete", &path, e))?;
            info!("Moved {} to {}", path.display(), trashed.display());
        }
        self.forget(id);
        Ok(())
    }

    /// Drops `id` and its subtree from memory: tree, tabs, live
    /// schemas and ad-hoc watches. Records stay until the next scan.
    pub(super) fn forget(&mut self, id: NodeId) -> usize {
        let removed = self.tree.remove(id);
        for node in &removed {
            self.tabs.remove_node(node.id);
            self.live.remove(&node.id);
            if self.adhoc.remove(&node.id) {
                self.watcher.unwatch_file(&node.path);
            }
        }
        debug!("Forgot {} nodes", removed.len());
        self.emit(WorkspaceEvent::TreeChanged);
        removed.len()
    }

    /// Whether `path` should be left out of the tree.
    pub(super) fn is_hidden(&self, path: &Path) -> bool {
        is_hidden_below(path, &self.root)
    }
}
