//! Path arithmetic for link resolution.
//!
//! Everything here is lexical: no filesystem access, no symlink
//! resolution. Urls always use `/` regardless of platform.

use std::path::{Component, Path, PathBuf};

/// Collapses `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Splits `url` into its path part and optional `#fragment` / `?query` suffix.
pub fn split_fragment(url: &str) -> (&str, &str) {
    match url.find(['#', '?']) {
        Some(i) => (&url[..i], &url[i..]),
        None => (url, ""),
    }
}

/// Whether `url` points outside the filesystem (web links, mail, anchors).
pub fn is_external(url: &str) -> bool {
    let (path, _) = split_fragment(url);
    if path.is_empty() {
        return true;
    }
    if path.contains("://") {
        return true;
    }
    ["mailto:", "data:", "tel:", "javascript:"]
        .iter()
        .any(|scheme| path.starts_with(scheme))
}

/// Whether `url` is written as an absolute filesystem path.
pub fn is_absolute_url(url: &str) -> bool {
    let (path, _) = split_fragment(url);
    Path::new(&decode_spaces(path)).is_absolute()
}

/// Resolves a local url against the directory of the referencing document.
///
/// Returns `None` for external urls.
pub fn resolve(base_dir: &Path, url: &str) -> Option<PathBuf> {
    if is_external(url) {
        return None;
    }
    let (path, _) = split_fragment(url);
    let decoded = decode_spaces(path);
    let candidate = Path::new(&decoded);
    if candidate.is_absolute() {
        Some(normalize(candidate))
    } else {
        Some(normalize(&base_dir.join(candidate)))
    }
}

/// Relative path from `from_dir` to `target`, `/`-separated.
///
/// Both paths are expected to be absolute and normalized.
pub fn relative_path(from_dir: &Path, target: &Path) -> String {
    let from: Vec<Component> = from_dir.components().collect();
    let to: Vec<Component> = target.components().collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..from.len() {
        parts.push("..".to_string());
    }
    for component in &to[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Rewrites `previous` so it points at `target` from `from_dir`.
///
/// Keeps the fragment, the `./` prefix style, `%20` encoding and
/// absolute-vs-relative form of the previous url, so recomputing an
/// already correct url returns it unchanged.
pub fn rewrite_url(from_dir: &Path, target: &Path, previous: &str) -> String {
    let (old_path, suffix) = split_fragment(previous);

    let mut path = if is_absolute_url(previous) {
        target.to_string_lossy().replace('\\', "/")
    } else {
        let rel = relative_path(from_dir, target);
        if old_path.starts_with("./") && !rel.starts_with("..") {
            format!("./{}", rel)
        } else {
            rel
        }
    };

    if old_path.contains("%20") {
        path = path.replace(' ', "%20");
    }

    format!("{}{}", path, suffix)
}

/// Moves `path` from under `old_prefix` to under `new_prefix`.
pub fn rebase(path: &Path, old_prefix: &Path, new_prefix: &Path) -> Option<PathBuf> {
    let rest = path.strip_prefix(old_prefix).ok()?;
    if rest.as_os_str().is_empty() {
        Some(new_prefix.to_path_buf())
    } else {
        Some(new_prefix.join(rest))
    }
}

/// Whether any component of `path` below `root` is hidden (starts with `.`).
///
/// Paths outside `root` only have their file name checked.
pub fn is_hidden_below(path: &Path, root: &Path) -> bool {
    let hidden = |name: &std::ffi::OsStr| name.to_string_lossy().starts_with('.');
    match path.strip_prefix(root) {
        Ok(rest) => rest.components().any(|c| match c {
            Component::Normal(name) => hidden(name),
            _ => false,
        }),
        Err(_) => path.file_name().map(hidden).unwrap_or(false),
    }
}

fn decode_spaces(path: &str) -> String {
    path.replace("%20", " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_dots() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = Path::new("/notes/a");
        assert_eq!(
            resolve(base, "./img/p.png"),
            Some(PathBuf::from("/notes/a/img/p.png"))
        );
        assert_eq!(
            resolve(base, "../b.md#intro"),
            Some(PathBuf::from("/notes/b.md"))
        );
        assert_eq!(resolve(base, "/x/y.md"), Some(PathBuf::from("/x/y.md")));
        assert_eq!(
            resolve(base, "my%20note.md"),
            Some(PathBuf::from("/notes/a/my note.md"))
        );
        assert_eq!(resolve(base, "https://example.com/a.png"), None);
        assert_eq!(resolve(base, "#heading"), None);
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/notes/a"), Path::new("/notes/b/c.md")),
            "../b/c.md"
        );
        assert_eq!(
            relative_path(Path::new("/notes"), Path::new("/notes/c.md")),
            "c.md"
        );
    }

    #[test]
    fn test_rewrite_url_preserves_style() {
        let from = Path::new("/notes/a");
        assert_eq!(
            rewrite_url(from, Path::new("/notes/a/img/p.png"), "./old/p.png"),
            "./img/p.png"
        );
        assert_eq!(
            rewrite_url(from, Path::new("/notes/b.md"), "./b.md#top"),
            "../b.md#top"
        );
        assert_eq!(
            rewrite_url(from, Path::new("/notes/new dir/b.md"), "old%20dir/b.md"),
            "../new%20dir/b.md"
        );
        assert_eq!(
            rewrite_url(from, Path::new("/elsewhere/b.md"), "/notes/b.md"),
            "/elsewhere/b.md"
        );
    }

    #[test]
    fn test_rewrite_url_is_stable() {
        let from = Path::new("/notes/a");
        let target = Path::new("/notes/a/img/p.png");
        let once = rewrite_url(from, target, "./img/p.png");
        assert_eq!(once, "./img/p.png");
        assert_eq!(rewrite_url(from, target, &once), once);
    }

    #[test]
    fn test_rebase() {
        assert_eq!(
            rebase(Path::new("/a/c/d.md"), Path::new("/a"), Path::new("/a2")),
            Some(PathBuf::from("/a2/c/d.md"))
        );
        assert_eq!(
            rebase(Path::new("/a"), Path::new("/a"), Path::new("/a2")),
            Some(PathBuf::from("/a2"))
        );
        assert_eq!(rebase(Path::new("/ab/x"), Path::new("/a"), Path::new("/z")), None);
    }

    #[test]
    fn test_hidden_below_root() {
        let root = Path::new("/notes");
        assert!(is_hidden_below(Path::new("/notes/.quire/trash/x.md"), root));
        assert!(!is_hidden_below(Path::new("/notes/a/x.md"), root));
        assert!(!is_hidden_below(Path::new("/tmp/.cache/x.md"), root));
    }
}
