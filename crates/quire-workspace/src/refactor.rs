//! Link rewriting after renames and moves.
//!
//! Documents record every local link with its resolved target. When a
//! path changes, two things can break: links *to* the moved entry from
//! elsewhere (dependents) and relative links *inside* a moved document
//! (own links). Both are recomputed from the recorded targets, so a
//! second pass over the same state finds nothing to do.

use crate::error::{Result, WorkspaceError};
use quire_core::paths::{is_absolute_url, is_external, rewrite_url};
use quire_core::{reference_spans, FileRecord};
use quire_index::Index;
use quire_watcher::{FileSystem, IgnoreSet};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One path that changed, old and new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub old: PathBuf,
    pub new: PathBuf,
}

impl PathChange {
    pub fn new(old: impl Into<PathBuf>, new: impl Into<PathBuf>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }
}

/// A replacement inside a document's text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TextEdit {
    offset: usize,
    remove_len: usize,
    insert_text: String,
}

pub struct Refactor<'a> {
    root: &'a Path,
    index: &'a dyn Index,
    fs: &'a dyn FileSystem,
    ignore: &'a IgnoreSet,
    write_back: bool,
}

impl<'a> Refactor<'a> {
    pub fn new(
        root: &'a Path,
        index: &'a dyn Index,
        fs: &'a dyn FileSystem,
        ignore: &'a IgnoreSet,
    ) -> Self {
        Self {
            root,
            index,
            fs,
            ignore,
            write_back: true,
        }
    }

    /// Builder pattern: whether rewritten urls are patched into the files.
    pub fn write_back(mut self, enabled: bool) -> Self {
        self.write_back = enabled;
        self
    }

    /// Re-targets links pointing at any changed old path.
    ///
    /// Folder moves pass one change per descendant. Returns the
    /// documents whose record was updated.
    pub fn refresh_dependents(&self, changes: &[PathChange]) -> Result<Vec<PathBuf>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        let moved: HashMap<&Path, &Path> = changes
            .iter()
            .map(|c| (c.old.as_path(), c.new.as_path()))
            .collect();

        let mut updated = Vec::new();
        for mut record in self.index.list_by_root(self.root)? {
            let affected = record
                .links
                .iter()
                .any(|l| moved.contains_key(l.target_path.as_path()));
            if !affected {
                continue;
            }
            let Some(mut schema) = record.schema.take() else {
                continue;
            };
            let dir = parent_dir(&record.path);
            let mut rewrites = Vec::new();

            for link in &mut record.links {
                let Some(new_target) = moved.get(link.target_path.as_path()) else {
                    continue;
                };
                link.target_path = new_target.to_path_buf();
                let Some(element) = schema.get_mut(&link.address) else {
                    warn!(
                        "Link address {:?} missing in {}",
                        link.address,
                        record.path.display()
                    );
                    continue;
                };
                let Some(url) = element.url.clone() else {
                    continue;
                };
                let rewritten = rewrite_url(&dir, new_target, &url);
                if rewritten != url {
                    debug!("{}: {} -> {}", record.path.display(), url, rewritten);
                    element.url = Some(rewritten.clone());
                    rewrites.push((url, rewritten));
                }
            }

            record.schema = Some(schema);
            let path = record.path.clone();
            self.persist(record, &rewrites)?;
            updated.push(path);
        }

        if !updated.is_empty() {
            info!("Updated links in {} dependent documents", updated.len());
        }
        Ok(updated)
    }

    /// Recomputes the relative links of the document at `doc` from its
    /// current location. Absolute and external urls are left alone.
    ///
    /// Returns whether anything changed.
    pub fn refresh_own_links(&self, doc: &Path) -> Result<bool> {
        let Some(mut record) = self.index.get(doc)? else {
            return Ok(false);
        };
        let Some(mut schema) = record.schema.take() else {
            return Ok(false);
        };
        let dir = parent_dir(&record.path);
        let mut rewrites = Vec::new();

        for link in &record.links {
            let Some(element) = schema.get_mut(&link.address) else {
                continue;
            };
            let Some(url) = element.url.clone() else {
                continue;
            };
            if is_external(&url) || is_absolute_url(&url) {
                continue;
            }
            let rewritten = rewrite_url(&dir, &link.target_path, &url);
            if rewritten != url {
                debug!("{}: {} -> {}", record.path.display(), url, rewritten);
                element.url = Some(rewritten.clone());
                rewrites.push((url, rewritten));
            }
        }

        if rewrites.is_empty() {
            return Ok(false);
        }
        record.schema = Some(schema);
        self.persist(record, &rewrites)?;
        Ok(true)
    }

    /// Stores the record and, when enabled, patches the file text.
    fn persist(&self, mut record: FileRecord, rewrites: &[(String, String)]) -> Result<()> {
        if self.write_back && !rewrites.is_empty() {
            let _guard = self.ignore.register([&record.path]);
            match self.fs.read_to_string(&record.path) {
                Ok(text) => {
                    let edits = url_edits(&text, rewrites);
                    if !edits.is_empty() {
                        let patched = apply_edits(&text, edits);
                        self.fs
                            .write(&record.path, &patched)
                            .map_err(|e| WorkspaceError::fs("rewrite links in", &record.path, e))?;
                        if let Ok(meta) = self.fs.stat(&record.path) {
                            record.modified = meta.modified;
                        }
                    }
                }
                Err(e) => warn!("Cannot patch links in {}: {}", record.path.display(), e),
            }
        }
        self.index.put(&record)?;
        Ok(())
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// Replaces the url of every link and image whose url has a rewrite.
/// Code spans and fenced blocks are not links and stay as they are.
fn url_edits(text: &str, rewrites: &[(String, String)]) -> Vec<TextEdit> {
    reference_spans(text)
        .into_iter()
        .filter_map(|span| {
            let url = &text[span.clone()];
            let (_, new) = rewrites.iter().find(|(old, _)| old == url)?;
            Some(TextEdit {
                offset: span.start,
                remove_len: span.len(),
                insert_text: new.clone(),
            })
        })
        .collect()
}

/// Applies edits back to front so earlier offsets stay valid.
fn apply_edits(text: &str, mut edits: Vec<TextEdit>) -> String {
    edits.sort_by_key(|e| e.offset);
    let mut out = text.to_string();
    for edit in edits.iter().rev() {
        out.replace_range(edit.offset..edit.offset + edit.remove_len, &edit.insert_text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::parse_source;
    use quire_index::MemoryIndex;
    use quire_watcher::LocalFs;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn store(index: &MemoryIndex, path: &Path, text: &str) {
        fs::write(path, text).unwrap();
        let doc = parse_source(text, path);
        let mut record = FileRecord::new(path, false);
        record.schema = Some(doc.schema);
        record.links = doc.links;
        index.put(&record).unwrap();
    }

    fn first_url(index: &MemoryIndex, path: &Path) -> String {
        let record = index.get(path).unwrap().unwrap();
        let schema = record.schema.unwrap();
        let (_, element) = schema.references().into_iter().next().unwrap();
        element.url.clone().unwrap()
    }

    #[test]
    fn test_url_edits_cover_all_forms() {
        let text = "[a](old.md) ![i](<old.md>) [t](old.md \"title\") [x](other.md)";
        let rewrites = vec![("old.md".to_string(), "new/old.md".to_string())];
        let patched = apply_edits(text, url_edits(text, &rewrites));
        assert_eq!(
            patched,
            "[a](new/old.md) ![i](<new/old.md>) [t](new/old.md \"title\") [x](other.md)"
        );
    }

    #[test]
    fn test_code_is_never_rewritten() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let index = MemoryIndex::new();
        let fs_impl = LocalFs::new(root.join(".quire/trash"));
        let ignore = IgnoreSet::new(Duration::ZERO);

        let a = root.join("a.md");
        store(&index, &a, "Example: `[x](b.md)`\n\n```\n[y](b.md)\n```\n\nReal [z](b.md)");

        let refactor = Refactor::new(root, &index, &fs_impl, &ignore);
        let changes = vec![PathChange::new(root.join("b.md"), root.join("c.md"))];
        refactor.refresh_dependents(&changes).unwrap();

        let text = fs::read_to_string(&a).unwrap();
        assert_eq!(text, "Example: `[x](b.md)`\n\n```\n[y](b.md)\n```\n\nReal [z](c.md)");
        let record = index.get(&a).unwrap().unwrap();
        assert_eq!(record.schema, Some(parse_source(&text, &a).schema));
    }

    #[test]
    fn test_dependents_follow_rename() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let index = MemoryIndex::new();
        let fs_impl = LocalFs::new(root.join(".quire/trash"));
        let ignore = IgnoreSet::new(Duration::ZERO);

        let a = root.join("a.md");
        store(&index, &a, "see [b](./b.md#part)");
        fs::write(root.join("b2.md"), "").unwrap();

        let refactor = Refactor::new(root, &index, &fs_impl, &ignore);
        let changes = vec![PathChange::new(root.join("b.md"), root.join("b2.md"))];
        let updated = refactor.refresh_dependents(&changes).unwrap();

        assert_eq!(updated, vec![a.clone()]);
        assert_eq!(first_url(&index, &a), "./b2.md#part");
        let record = index.get(&a).unwrap().unwrap();
        assert_eq!(record.links[0].target_path, root.join("b2.md"));
        assert_eq!(fs::read_to_string(&a).unwrap(), "see [b](./b2.md#part)");

        assert!(refactor.refresh_dependents(&changes).unwrap().is_empty());
    }

    #[test]
    fn test_own_links_are_idempotent() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub/img")).unwrap();
        let index = MemoryIndex::new();
        let fs_impl = LocalFs::new(root.join(".quire/trash"));
        let ignore = IgnoreSet::new(Duration::ZERO);

        // Document parsed at its old place, then moved one level down.
        let old = root.join("A.md");
        let new = root.join("sub/A.md");
        let text = "![p](./sub/img/p.png)";
        let doc = parse_source(text, &old);
        fs::write(&new, text).unwrap();
        let mut record = FileRecord::new(&new, false);
        record.schema = Some(doc.schema);
        record.links = doc.links;
        index.put(&record).unwrap();

        let refactor = Refactor::new(root, &index, &fs_impl, &ignore);
        assert!(refactor.refresh_own_links(&new).unwrap());
        let once = index.get(&new).unwrap().unwrap();
        assert_eq!(first_url(&index, &new), "./img/p.png");

        assert!(!refactor.refresh_own_links(&new).unwrap());
        let twice = index.get(&new).unwrap().unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.links[0].target_path, root.join("sub/img/p.png"));
        assert_eq!(fs::read_to_string(&new).unwrap(), "![p](./img/p.png)");
    }

    #[test]
    fn test_absolute_urls_stay_absolute() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let index = MemoryIndex::new();
        let fs_impl = LocalFs::new(root.join(".quire/trash"));
        let ignore = IgnoreSet::new(Duration::ZERO);

        let a = root.join("a.md");
        let target = root.join("b.md");
        store(&index, &a, &format!("[b]({})", target.display()));

        let refactor = Refactor::new(root, &index, &fs_impl, &ignore).write_back(false);
        assert!(!refactor.refresh_own_links(&a).unwrap());

        let moved = root.join("c.md");
        refactor
            .refresh_dependents(&[PathChange::new(&target, &moved)])
            .unwrap();
        assert_eq!(first_url(&index, &a), moved.display().to_string());
        assert_eq!(
            fs::read_to_string(&a).unwrap(),
            format!("[b]({})", target.display()),
            "file untouched without write-back"
        );
    }
}
