//! Per-space configuration.
//!
//! Lives at `<root>/.quire/config.json`. Every field has a default, so
//! a missing file or a partial one is fine.

use quire_watcher::ScanOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Name of the hidden per-space directory.
pub const SPACE_DIR: &str = ".quire";

const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Open tabs allowed at once.
    pub max_tabs: usize,

    /// Documents per parse batch.
    pub parse_batch_size: usize,

    pub parse_workers: usize,

    /// Entry count above which a first scan asks before indexing.
    pub oversized_threshold: usize,

    pub respect_gitignore: bool,
    pub follow_symlinks: bool,

    /// How long a released ignore entry keeps swallowing notifications.
    pub ignore_grace_ms: u64,

    /// Patch rewritten link urls into the document files too.
    pub write_back_links: bool,

    /// Where deleted entries go. Defaults to `<root>/.quire/trash`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trash_dir: Option<PathBuf>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            max_tabs: 30,
            parse_batch_size: 30,
            parse_workers: 4,
            oversized_threshold: 5000,
            respect_gitignore: false,
            follow_symlinks: false,
            ignore_grace_ms: 500,
            write_back_links: true,
            trash_dir: None,
        }
    }
}

impl WorkspaceConfig {
    pub fn path(root: &Path) -> PathBuf {
        root.join(SPACE_DIR).join(CONFIG_FILE)
    }

    /// Loads the space's config, falling back to defaults when there is none.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(root);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn save(&self, root: &Path) -> Result<(), ConfigError> {
        let path = Self::path(root);
        let io = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, text).map_err(io)
    }

    pub fn trash_dir(&self, root: &Path) -> PathBuf {
        self.trash_dir
            .clone()
            .unwrap_or_else(|| root.join(SPACE_DIR).join("trash"))
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            follow_symlinks: self.follow_symlinks,
            respect_gitignore: self.respect_gitignore,
            oversized_threshold: self.oversized_threshold,
        }
    }

    pub fn ignore_grace(&self) -> Duration {
        Duration::from_millis(self.ignore_grace_ms)
    }
}
