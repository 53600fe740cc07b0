//! Space scanning.
//!
//! Walks a space root, reconciles what it finds against the index and
//! builds the in-memory tree. Documents that are new or changed on disk
//! come back as `pending` for the background parse pipeline.

use crate::fs::EntryMeta;
use crate::pool::{ParseJob, ParsePool};
use crate::space::SpaceGuard;
use ignore::WalkBuilder;
use quire_core::{is_supported, FileRecord, Tree, TreeNode};
use quire_index::{Index, IndexChange, IndexError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(
        "cannot read space folder '{}': {source}. Select it again or create it",
        path.display()
    )]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("indexing {entries} entries was declined")]
    Declined { entries: usize },

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Options for scanning a space.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Follow symbolic links when walking directories.
    pub follow_symlinks: bool,

    /// Skip entries matched by `.gitignore` / `.ignore` files.
    pub respect_gitignore: bool,

    /// A first scan finding more entries than this asks for confirmation.
    pub oversized_threshold: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            respect_gitignore: false,
            oversized_threshold: 5000,
        }
    }
}

/// A document waiting to be parsed, with the modification time seen on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDoc {
    pub path: PathBuf,
    pub modified: i64,
}

/// Result of scanning a space.
pub struct ScanResult {
    /// The mirrored tree; `Tree::find` is the path → node index.
    pub tree: Tree,

    /// Documents to hand to `index_pending`.
    pub pending: Vec<PendingDoc>,

    /// Entries seen on disk, root excluded.
    pub visited: usize,

    /// Records created for entries new to the index.
    pub created: usize,

    /// Records dropped because their entry is gone.
    pub removed: usize,

    /// Entries that could not be read: (path, reason). Their records,
    /// and those of anything below them, are kept.
    pub skipped: Vec<(PathBuf, String)>,

    /// Time taken in milliseconds.
    pub duration_ms: u64,
}

struct Walked {
    path: PathBuf,
    meta: EntryMeta,
}

pub struct Scanner<'a> {
    index: &'a dyn Index,
    options: ScanOptions,
}

impl<'a> Scanner<'a> {
    pub fn new(index: &'a dyn Index, options: ScanOptions) -> Self {
        Self { index, options }
    }

    /// Scans `root` and reconciles the index with it.
    ///
    /// `confirm` is asked before a first scan of an oversized space
    /// writes anything; returning false aborts with `Declined`.
    pub fn scan(
        &self,
        root: &Path,
        confirm: &dyn Fn(usize) -> bool,
    ) -> Result<ScanResult, ScanError> {
        let start = Instant::now();
        info!("Scanning {}", root.display());

        let root_meta = check_root(root)?;
        let existing: HashMap<PathBuf, FileRecord> = self
            .index
            .list_by_root(root)?
            .into_iter()
            .map(|r| (r.path.clone(), r))
            .collect();

        let mut skipped = Vec::new();
        let mut unreadable = Vec::new();
        let walked = self.walk(root, &mut skipped, &mut unreadable);

        if existing.is_empty() && walked.len() > self.options.oversized_threshold {
            warn!(
                "First scan of {} found {} entries",
                root.display(),
                walked.len()
            );
            if !confirm(walked.len()) {
                return Err(ScanError::Declined {
                    entries: walked.len(),
                });
            }
        }

        let mut changes = Vec::new();
        let root_record = match existing.get(root) {
            Some(record) if record.is_folder => record.clone(),
            _ => {
                let record =
                    FileRecord::new(root, true).with_times(root_meta.modified, root_meta.created);
                changes.push(IndexChange::Put(record.clone()));
                record
            }
        };
        let mut tree = Tree::with_root(TreeNode::from_record(&root_record));

        let mut existence: HashSet<PathBuf> = HashSet::with_capacity(walked.len() + 1);
        existence.insert(root.to_path_buf());
        let mut pending = Vec::new();
        let mut created = 0;

        for entry in &walked {
            let Some(parent) = entry.path.parent().and_then(|p| tree.find(p)) else {
                debug!("Parent of {} was skipped, skipping", entry.path.display());
                continue;
            };
            let is_document = !entry.meta.is_dir && is_supported(&entry.path);

            let record = match existing.get(&entry.path) {
                Some(record) if record.is_folder == entry.meta.is_dir => {
                    if is_document
                        && (record.schema.is_none() || record.modified != entry.meta.modified)
                    {
                        debug!("Stale: {}", entry.path.display());
                        pending.push(PendingDoc {
                            path: entry.path.clone(),
                            modified: entry.meta.modified,
                        });
                    } else if !is_document && record.modified != entry.meta.modified {
                        let updated = record
                            .clone()
                            .with_times(entry.meta.modified, record.created);
                        changes.push(IndexChange::Put(updated));
                    }
                    record.clone()
                }
                _ => {
                    let record = FileRecord::new(&entry.path, entry.meta.is_dir)
                        .with_times(entry.meta.modified, entry.meta.created);
                    changes.push(IndexChange::Put(record.clone()));
                    created += 1;
                    if is_document {
                        pending.push(PendingDoc {
                            path: entry.path.clone(),
                            modified: entry.meta.modified,
                        });
                    }
                    record
                }
            };

            let mut node = TreeNode::from_record(&record);
            node.modified = entry.meta.modified;
            tree.insert(parent, node);
            existence.insert(entry.path.clone());
        }

        let mut removed = 0;
        for path in existing.keys() {
            if existence.contains(path) {
                continue;
            }
            if unreadable.iter().any(|u| path.starts_with(u)) {
                debug!("Keeping {}, it could not be read", path.display());
            } else {
                debug!("Removing vanished entry from index: {}", path.display());
                changes.push(IndexChange::Delete(path.clone()));
                removed += 1;
            }
        }

        self.index.apply(changes)?;

        let duration = start.elapsed();
        info!(
            "Scanned {} entries ({} new, {} removed, {} to parse) in {:?}",
            walked.len(),
            created,
            removed,
            pending.len(),
            duration
        );

        Ok(ScanResult {
            tree,
            pending,
            visited: walked.len(),
            created,
            removed,
            skipped,
            duration_ms: duration.as_millis() as u64,
        })
    }

    /// Depth-first walk; parents are always yielded before their children.
    ///
    /// Failures land in `skipped`; the paths they name also go to
    /// `unreadable`, which shields them from the delete pass.
    fn walk(
        &self,
        root: &Path,
        skipped: &mut Vec<(PathBuf, String)>,
        unreadable: &mut Vec<PathBuf>,
    ) -> Vec<Walked> {
        let respect = self.options.respect_gitignore;
        let walker = WalkBuilder::new(root)
            .hidden(true) // Skip hidden entries, the .quire folder included
            .git_ignore(respect)
            .git_global(respect)
            .git_exclude(respect)
            .ignore(respect)
            .parents(respect)
            .require_git(false)
            .follow_links(self.options.follow_symlinks)
            .build();

        let mut walked = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    match error_path(&e) {
                        Some(path) => {
                            unreadable.push(path.to_path_buf());
                            skipped.push((path.to_path_buf(), e.to_string()));
                        }
                        None => skipped.push((root.to_path_buf(), e.to_string())),
                    }
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let path = entry.path().to_path_buf();
            match entry.metadata() {
                Ok(meta) => walked.push(Walked {
                    path,
                    meta: EntryMeta::from_metadata(&meta),
                }),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    unreadable.push(path.clone());
                    skipped.push((path, e.to_string()));
                }
            }
        }
        walked
    }
}

/// The entry a walk error is about. Errors from ignore files name none.
fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        _ => None,
    }
}

fn check_root(root: &Path) -> Result<EntryMeta, ScanError> {
    let unreadable = |source| ScanError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    };
    let meta = std::fs::metadata(root).map_err(unreadable)?;
    if !meta.is_dir() {
        return Err(unreadable(std::io::Error::new(
            std::io::ErrorKind::Other,
            "not a directory",
        )));
    }
    std::fs::read_dir(root).map_err(unreadable)?;
    Ok(EntryMeta::from_metadata(&meta))
}

/// Outcome of running the parse pipeline over pending documents.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParseReport {
    pub parsed: usize,
    pub failed: usize,
    /// Results thrown away because the space was closed meanwhile.
    pub discarded: usize,
    pub batches: usize,
}

/// Parses pending documents in batches and stores the results.
///
/// Each batch is awaited before the next is sent so `progress` sees
/// `(done, total)` after every batch. If `guard` goes stale, the batch
/// in flight is dropped and no further batches are sent.
pub async fn index_pending(
    pending: Vec<PendingDoc>,
    pool: &ParsePool,
    index: &dyn Index,
    guard: &SpaceGuard,
    batch_size: usize,
    mut progress: impl FnMut(usize, usize),
) -> Result<ParseReport, IndexError> {
    let total = pending.len();
    let mut report = ParseReport::default();
    let mut done = 0;

    for batch in pending.chunks(batch_size.max(1)) {
        let jobs = batch.iter().map(|d| ParseJob::from_disk(&d.path)).collect();
        let outcomes = pool.parse_batch(jobs).await;
        report.batches += 1;

        if !guard.is_current() {
            report.discarded = total - done;
            info!(
                "Space closed during parsing, discarded {} results",
                report.discarded
            );
            return Ok(report);
        }

        let mut changes = Vec::with_capacity(outcomes.len());
        for (doc, outcome) in batch.iter().zip(outcomes) {
            if outcome.is_ok() {
                report.parsed += 1;
            } else {
                report.failed += 1;
            }
            let Some(mut record) = index.get(&doc.path)? else {
                debug!("Record for {} vanished before parse finished", doc.path.display());
                continue;
            };
            record.schema = Some(outcome.document.schema);
            record.links = outcome.document.links;
            record.modified = doc.modified;
            changes.push(IndexChange::Put(record));
        }
        index.apply(changes)?;

        done += batch.len();
        progress(done, total);
        debug!("Parsed batch {} ({}/{})", report.batches, done, total);
    }

    info!(
        "Parsed {} documents ({} failed) in {} batches",
        report.parsed, report.failed, report.batches
    );
    Ok(report)
}
