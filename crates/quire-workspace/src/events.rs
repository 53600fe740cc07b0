//! Notifications for the UI layer.

use std::path::PathBuf;

/// Broadcast to every subscriber of a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceEvent {
    /// Nodes were added, removed, renamed or moved.
    TreeChanged,

    /// An open document's schema changed underneath its tab.
    DocumentReloaded { path: PathBuf },

    /// A rejected operation or a non-fatal failure worth showing.
    Warning { message: String },
}
