//! Navigation tabs.
//!
//! Each tab keeps a browser-style history of visited nodes. Opening a
//! node drops any forward history past the cursor.

use crate::error::{Result, WorkspaceError};
use quire_core::NodeId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tab {
    history: Vec<NodeId>,
    cursor: usize,
}

impl Tab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<NodeId> {
        self.history.get(self.cursor).copied()
    }

    pub fn history(&self) -> &[NodeId] {
        &self.history
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Visits `id`, truncating forward history. Re-opening the current
    /// node is a no-op.
    pub fn push(&mut self, id: NodeId) {
        if self.current() == Some(id) {
            return;
        }
        if !self.history.is_empty() {
            self.history.truncate(self.cursor + 1);
        }
        self.history.push(id);
        self.cursor = self.history.len() - 1;
    }

    pub fn back(&mut self) -> Option<NodeId> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.current()
    }

    pub fn forward(&mut self) -> Option<NodeId> {
        if self.cursor + 1 >= self.history.len() {
            return None;
        }
        self.cursor += 1;
        self.current()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.history.contains(&id)
    }

    /// Drops every occurrence of `id`, keeping the cursor in range.
    ///
    /// Entries removed before the cursor shift it left so it keeps
    /// pointing at the same visit where possible.
    pub fn remove(&mut self, id: NodeId) -> bool {
        let before = self.history[..self.cursor.min(self.history.len())]
            .iter()
            .filter(|h| **h == id)
            .count();
        let len = self.history.len();
        self.history.retain(|h| *h != id);
        if self.history.len() == len {
            return false;
        }
        self.cursor = self
            .cursor
            .saturating_sub(before)
            .min(self.history.len().saturating_sub(1));
        true
    }
}

/// The set of open tabs. At least one tab always exists.
#[derive(Debug, Clone)]
pub struct Tabs {
    tabs: Vec<Tab>,
    active: usize,
    max: usize,
}

impl Tabs {
    pub fn new(max: usize) -> Self {
        Self {
            tabs: vec![Tab::new()],
            active: 0,
            max: max.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active(&self) -> &Tab {
        &self.tabs[self.active]
    }

    pub fn active_mut(&mut self) -> &mut Tab {
        &mut self.tabs[self.active]
    }

    pub fn get(&self, index: usize) -> Option<&Tab> {
        self.tabs.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tab> {
        self.tabs.iter()
    }

    /// Opens an empty tab and makes it active.
    pub fn new_tab(&mut self) -> Result<usize> {
        if self.tabs.len() >= self.max {
            return Err(WorkspaceError::TabLimit { max: self.max });
        }
        self.tabs.push(Tab::new());
        self.active = self.tabs.len() - 1;
        Ok(self.active)
    }

    /// Closes tab `index`. Closing the only tab does nothing and
    /// returns false.
    pub fn close_tab(&mut self, index: usize) -> Result<bool> {
        if index >= self.tabs.len() {
            return Err(WorkspaceError::NoSuchTab(index));
        }
        if self.tabs.len() == 1 {
            return Ok(false);
        }
        self.tabs.remove(index);
        if self.active > index || self.active >= self.tabs.len() {
            self.active = self.active.saturating_sub(1);
        }
        Ok(true)
    }

    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.tabs.len() {
            return Err(WorkspaceError::NoSuchTab(index));
        }
        self.active = index;
        Ok(())
    }

    /// Removes `id` from every tab's history.
    pub fn remove_node(&mut self, id: NodeId) {
        for tab in &mut self.tabs {
            tab.remove(id);
        }
    }

    /// Whether any tab's history references `id`.
    pub fn references(&self, id: NodeId) -> bool {
        self.tabs.iter().any(|t| t.contains(id))
    }
}
