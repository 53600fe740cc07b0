//! Quire Workspace - the live file tree of an open space
//!
//! A `Workspace` owns everything the app keeps about one space:
//! - The in-memory tree mirrored from disk, with expand state
//! - Navigation tabs and the documents they display
//! - Interactive mutations (create, rename, move, paste, delete)
//! - Replay of external changes queued while the window was blurred
//!
//! Renames and moves keep links intact: every document pointing at a
//! moved entry is rewritten, and so are the relative links inside a
//! moved document.
//!
//! # Example
//!
//! ```no_run
//! use quire_index::MemoryIndex;
//! use quire_watcher::ParsePool;
//! use quire_workspace::{OpenTarget, Workspace};
//! use std::sync::Arc;
//!
//! # async fn run() -> quire_workspace::Result<()> {
//! let mut ws = Workspace::init("/notes", Arc::new(MemoryIndex::new()), |_| true).await?;
//! let pool = ParsePool::new(ws.config().parse_workers);
//! ws.parse_task().run(&pool, |done, total| println!("{}/{}", done, total)).await?;
//! ws.open(OpenTarget::Path("/notes/today.md".into()), &pool).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod events;
mod refactor;
mod tabs;
mod workspace;

pub use config::{ConfigError, WorkspaceConfig, SPACE_DIR};
pub use error::{Result, WorkspaceError};
pub use events::WorkspaceEvent;
pub use refactor::{PathChange, Refactor};
pub use tabs::{Tab, Tabs};
pub use workspace::{DrainReport, OpenTarget, ParseTask, Workspace};
