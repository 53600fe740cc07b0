//! The in-memory workspace tree.
//!
//! An arena of `TreeNode`s keyed by id plus a path index. Parents own
//! the ordering of their children; children only remember the parent
//! id. Every structural change keeps both maps in step.

use crate::node::{file_name, NodeId, NodeKind, TreeNode};
use crate::paths;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Tree {
    root: NodeId,
    nodes: HashMap<NodeId, TreeNode>,
    by_path: HashMap<PathBuf, NodeId>,
}

/// Folders first, then case-sensitive lexicographic by name.
pub fn entry_order(a: &TreeNode, b: &TreeNode) -> Ordering {
    b.is_folder()
        .cmp(&a.is_folder())
        .then_with(|| a.name.cmp(&b.name))
}

impl Tree {
    /// Creates a tree holding only the root node.
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self::with_root(TreeNode::new(root_path, NodeKind::Root))
    }

    /// Creates a tree from an existing root node (its id is kept).
    pub fn with_root(mut root: TreeNode) -> Self {
        root.kind = NodeKind::Root;
        root.parent = None;
        root.children.clear();
        root.expanded = true;
        let id = root.id;
        let mut by_path = HashMap::new();
        by_path.insert(root.path.clone(), id);
        let mut nodes = HashMap::new();
        nodes.insert(id, root);
        Self {
            root: id,
            nodes,
            by_path,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_path(&self) -> &Path {
        &self.nodes[&self.root].path
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(&id)
    }

    /// Finds the node mirroring `path`.
    pub fn find(&self, path: &Path) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of nodes, root and detached nodes included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    /// Whether `path` lives under this tree's root directory.
    pub fn covers(&self, path: &Path) -> bool {
        path.starts_with(self.root_path())
    }

    /// The child of `parent` with this name and folder-ness, if any.
    pub fn child_named(&self, parent: NodeId, name: &str, is_folder: bool) -> Option<NodeId> {
        let parent = self.nodes.get(&parent)?;
        parent.children.iter().copied().find(|id| {
            self.nodes
                .get(id)
                .map(|n| n.same_entry(name, is_folder))
                .unwrap_or(false)
        })
    }

    /// Inserts `node` under `parent`, keeping the children sorted.
    ///
    /// Returns `None` when the parent is unknown or not a folder.
    pub fn insert(&mut self, parent: NodeId, mut node: TreeNode) -> Option<NodeId> {
        if !self.nodes.get(&parent)?.is_folder() {
            return None;
        }
        let id = node.id;
        node.parent = Some(parent);
        self.by_path.insert(node.path.clone(), id);
        self.nodes.insert(id, node);
        self.attach_sorted(parent, id);
        Some(id)
    }

    /// Inserts a node that belongs to no folder (a file opened from
    /// outside the space).
    pub fn insert_detached(&mut self, mut node: TreeNode) -> NodeId {
        let id = node.id;
        node.parent = None;
        self.by_path.insert(node.path.clone(), id);
        self.nodes.insert(id, node);
        id
    }

    /// Removes `id` from its parent's children. The subtree stays in the arena.
    pub fn detach(&mut self, id: NodeId) {
        let parent = match self.nodes.get_mut(&id) {
            Some(node) => node.parent.take(),
            None => return,
        };
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
    }

    /// Hangs a detached node under `parent` in sorted position.
    pub fn attach(&mut self, id: NodeId, parent: NodeId) -> bool {
        if !self.nodes.contains_key(&id)
            || !self.nodes.get(&parent).map(|p| p.is_folder()).unwrap_or(false)
            || self.is_within(parent, id)
        {
            return false;
        }
        self.detach(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = Some(parent);
        }
        self.attach_sorted(parent, id);
        true
    }

    fn attach_sorted(&mut self, parent: NodeId, id: NodeId) {
        let pos = {
            let node = &self.nodes[&id];
            let siblings = &self.nodes[&parent].children;
            siblings
                .iter()
                .position(|s| {
                    self.nodes
                        .get(s)
                        .map(|s| entry_order(node, s) == Ordering::Less)
                        .unwrap_or(false)
                })
                .unwrap_or(siblings.len())
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.insert(pos, id);
        }
        self.renumber(parent);
    }

    /// Re-sorts the children of `parent` and refreshes their sort indices.
    pub fn sort_children(&mut self, parent: NodeId) {
        let mut children = match self.nodes.get(&parent) {
            Some(p) => p.children.clone(),
            None => return,
        };
        children.sort_by(|a, b| entry_order(&self.nodes[a], &self.nodes[b]));
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children = children;
        }
        self.renumber(parent);
    }

    fn renumber(&mut self, parent: NodeId) {
        let children = match self.nodes.get(&parent) {
            Some(p) => p.children.clone(),
            None => return,
        };
        for (i, child) in children.iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(child) {
                node.sort_index = Some(i as i64);
            }
        }
    }

    /// `id` followed by all its descendants, parents before children.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get(&next) {
                out.push(next);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Parent chain of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(parent) = current {
            out.push(parent);
            current = self.nodes.get(&parent).and_then(|n| n.parent);
        }
        out
    }

    /// Whether `id` is `ancestor` or lies beneath it.
    pub fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        id == ancestor || self.ancestors(id).contains(&ancestor)
    }

    /// Re-points `id` and all descendants from their current paths to
    /// paths under `new_path`. Returns `(id, old, new)` per moved node.
    pub fn repath(&mut self, id: NodeId, new_path: &Path) -> Vec<(NodeId, PathBuf, PathBuf)> {
        let old_root = match self.nodes.get(&id) {
            Some(node) => node.path.clone(),
            None => return Vec::new(),
        };
        let mut moved = Vec::new();
        for node_id in self.subtree(id) {
            let Some(node) = self.nodes.get_mut(&node_id) else {
                continue;
            };
            let Some(updated) = paths::rebase(&node.path, &old_root, new_path) else {
                continue;
            };
            let old = std::mem::replace(&mut node.path, updated.clone());
            node.name = file_name(&node.path);
            self.by_path.remove(&old);
            self.by_path.insert(updated.clone(), node_id);
            moved.push((node_id, old, updated));
        }
        moved
    }

    /// Drops `id` and its subtree from the arena, returning the removed nodes.
    pub fn remove(&mut self, id: NodeId) -> Vec<TreeNode> {
        if id == self.root {
            return Vec::new();
        }
        self.detach(id);
        let mut removed = Vec::new();
        for node_id in self.subtree(id) {
            if let Some(node) = self.nodes.remove(&node_id) {
                if self.by_path.get(&node.path) == Some(&node_id) {
                    self.by_path.remove(&node.path);
                }
                removed.push(node);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Tree, NodeId, NodeId, NodeId) {
        let mut tree = Tree::new("/n");
        let root = tree.root();
        let a = tree
            .insert(root, TreeNode::new("/n/a", NodeKind::Folder))
            .unwrap();
        let b = tree
            .insert(a, TreeNode::new("/n/a/b.md", NodeKind::File))
            .unwrap();
        let c = tree
            .insert(a, TreeNode::new("/n/a/c", NodeKind::Folder))
            .unwrap();
        (tree, a, b, c)
    }

    #[test]
    fn test_children_sorted_folders_first() {
        let (tree, a, b, c) = sample();
        assert_eq!(tree.get(a).unwrap().children, vec![c, b]);
        assert_eq!(tree.get(c).unwrap().sort_index, Some(0));
        assert_eq!(tree.get(b).unwrap().sort_index, Some(1));
    }

    #[test]
    fn test_repath_cascades() {
        let (mut tree, a, b, _) = sample();
        let moved = tree.repath(a, Path::new("/n/a2"));
        assert_eq!(moved.len(), 3);
        assert_eq!(tree.get(b).unwrap().path, PathBuf::from("/n/a2/b.md"));
        assert!(tree.find(Path::new("/n/a2/c")).is_some());
        assert!(tree.find(Path::new("/n/a/b.md")).is_none());
        assert_eq!(tree.get(a).unwrap().name, "a2");
    }

    #[test]
    fn test_is_within_and_ancestors() {
        let (tree, a, b, c) = sample();
        assert!(tree.is_within(b, a));
        assert!(tree.is_within(a, a));
        assert!(!tree.is_within(a, c));
        assert_eq!(tree.ancestors(b), vec![a, tree.root()]);
    }

    #[test]
    fn test_remove_subtree() {
        let (mut tree, a, b, _) = sample();
        let removed = tree.remove(a);
        assert_eq!(removed.len(), 3);
        assert!(!tree.contains(b));
        assert!(tree.get(tree.root()).unwrap().children.is_empty());
        assert!(tree.find(Path::new("/n/a/b.md")).is_none());
    }

    #[test]
    fn test_child_named_and_attach() {
        let (mut tree, a, b, c) = sample();
        assert_eq!(tree.child_named(a, "b.md", false), Some(b));
        assert_eq!(tree.child_named(a, "b.md", true), None);
        assert!(tree.attach(b, c));
        assert_eq!(tree.get(b).unwrap().parent, Some(c));
        assert_eq!(tree.get(a).unwrap().children, vec![c]);
        assert!(!tree.attach(c, b));
    }
}
