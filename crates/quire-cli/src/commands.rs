//! CLI command implementations.

use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use quire_core::{NodeId, NodeKind, Tree};
use quire_index::SledIndex;
use quire_watcher::ParsePool;
use quire_workspace::{Workspace, WorkspaceConfig, WorkspaceEvent, SPACE_DIR};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Where the space lives and how to open it.
pub struct Space {
    pub root: PathBuf,
    pub index: Option<PathBuf>,
    pub yes: bool,
}

impl Space {
    fn root(&self) -> Result<PathBuf> {
        self.root
            .canonicalize()
            .map_err(|e| format!("cannot open space {}: {}", self.root.display(), e).into())
    }

    fn index_path(&self) -> PathBuf {
        match &self.index {
            Some(path) => path.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("quire")
                .join("index"),
        }
    }

    /// Opens the workspace and parses whatever the scan found stale.
    async fn open(&self) -> Result<(Workspace, ParsePool)> {
        let root = self.root()?;
        let index = Arc::new(SledIndex::open_or_reset(self.index_path())?);
        let yes = self.yes;
        let confirm = move |entries: usize| {
            yes || Confirm::new()
                .with_prompt(format!(
                    "{} contains {} entries. Index all of them?",
                    root.display(),
                    entries
                ))
                .default(false)
                .interact()
                .unwrap_or(false)
        };

        let mut ws = Workspace::init(self.root()?, index, confirm).await?;
        let pool = ParsePool::new(ws.config().parse_workers);
        let task = ws.parse_task();
        if task.is_empty() {
            return Ok((ws, pool));
        }

        let bar = ProgressBar::new(task.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?,
        );
        bar.set_message("Parsing documents...");
        let report = task
            .run(&pool, |done, _| bar.set_position(done as u64))
            .await?;
        bar.finish_and_clear();

        println!(
            "{} Parsed {} documents in {} batches",
            "✓".green(),
            report.parsed.to_string().cyan(),
            report.batches
        );
        if report.failed > 0 {
            eprintln!(
                "{} {} documents could not be read",
                "⚠".yellow(),
                report.failed
            );
        }
        Ok((ws, pool))
    }
}

/// Resolves a command-line path to a node of the tree.
fn locate(ws: &Workspace, path: &Path) -> Result<NodeId> {
    let full = path
        .canonicalize()
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    ws.find(&full)
        .ok_or_else(|| format!("{} is not part of {}", full.display(), ws.root().display()).into())
}

fn shown(ws: &Workspace, path: &Path) -> String {
    path.strip_prefix(ws.root())
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Writes a default config into the space.
pub fn init(space: &Space) -> Result<()> {
    let root = space.root()?;
    let config_path = WorkspaceConfig::path(&root);

    if config_path.exists() {
        println!("{} Already initialized", "✓".green());
        return Ok(());
    }

    WorkspaceConfig::default().save(&root)?;

    println!("{} Initialized Quire in {}", "✓".green(), root.display());
    println!("  Settings live in {}", root.join(SPACE_DIR).display());
    println!("  Run {} to index your notes", "quire scan".cyan());

    Ok(())
}

/// Reconciles the index with disk.
pub async fn scan(space: &Space) -> Result<()> {
    println!("{}", "Scanning space...".cyan());
    let (ws, _pool) = space.open().await?;

    let folders = ws.tree().nodes().filter(|n| n.is_folder()).count();
    println!(
        "{} {} files and {} folders in {}",
        "✓".green(),
        (ws.tree().len() - folders).to_string().cyan(),
        folders.saturating_sub(1).to_string().cyan(),
        ws.root().display()
    );
    println!(
        "  {} records in the index",
        ws.index().list_by_root(ws.root())?.len()
    );
    ws.dispose();
    Ok(())
}

/// Prints the file tree.
pub async fn tree(space: &Space, long: bool) -> Result<()> {
    let (ws, _pool) = space.open().await?;
    println!("{}", ws.root().display().to_string().bold());
    print_children(ws.tree(), ws.tree().root(), 1, long);
    ws.dispose();
    Ok(())
}

fn print_children(tree: &Tree, id: NodeId, depth: usize, long: bool) {
    let Some(node) = tree.get(id) else {
        return;
    };
    for child in &node.children {
        let Some(entry) = tree.get(*child) else {
            continue;
        };
        let name = if entry.is_folder() {
            format!("{}/", entry.name).blue().to_string()
        } else {
            entry.name.clone()
        };
        if long {
            let modified = chrono::DateTime::from_timestamp_millis(entry.modified)
                .map(|t| {
                    t.with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M")
                        .to_string()
                })
                .unwrap_or_default();
            println!("{}{} {}", "  ".repeat(depth), name, modified.dimmed());
        } else {
            println!("{}{}", "  ".repeat(depth), name);
        }
        if entry.is_folder() {
            print_children(tree, *child, depth + 1, long);
        }
    }
}

/// Creates a file or folder.
pub async fn create(space: &Space, parent: &Path, name: &str, folder: bool) -> Result<()> {
    let (mut ws, _pool) = space.open().await?;
    let parent = locate(&ws, parent)?;
    let kind = if folder { NodeKind::Folder } else { NodeKind::File };
    let id = ws.create(parent, name, kind)?;
    println!(
        "{} Created {}",
        "✓".green(),
        shown(&ws, &ws.node(id)?.path).cyan()
    );
    ws.dispose();
    Ok(())
}

pub async fn rename(space: &Space, path: &Path, name: &str) -> Result<()> {
    let (mut ws, _pool) = space.open().await?;
    let id = locate(&ws, path)?;
    let before = ws.node(id)?.path.clone();
    let mut events = ws.subscribe();
    ws.rename(id, name)?;
    println!(
        "{} {} -> {}",
        "✓".green(),
        shown(&ws, &before),
        shown(&ws, &ws.node(id)?.path).cyan()
    );
    print_warnings(&mut events);
    ws.dispose();
    Ok(())
}

pub async fn move_entry(space: &Space, path: &Path, target: &Path) -> Result<()> {
    let (mut ws, _pool) = space.open().await?;
    let id = locate(&ws, path)?;
    let target = locate(&ws, target)?;
    let before = ws.node(id)?.path.clone();
    let mut events = ws.subscribe();
    ws.move_node(id, target)?;
    println!(
        "{} {} -> {}",
        "✓".green(),
        shown(&ws, &before),
        shown(&ws, &ws.node(id)?.path).cyan()
    );
    print_warnings(&mut events);
    ws.dispose();
    Ok(())
}

pub async fn copy(space: &Space, source: &Path, target: &Path) -> Result<()> {
    let (mut ws, pool) = space.open().await?;
    let source = source
        .canonicalize()
        .map_err(|e| format!("{}: {}", source.display(), e))?;
    let target = locate(&ws, target)?;
    let id = ws.paste(&source, target, &pool).await?;
    println!(
        "{} Copied to {}",
        "✓".green(),
        shown(&ws, &ws.node(id)?.path).cyan()
    );
    ws.dispose();
    Ok(())
}

pub async fn remove(space: &Space, path: &Path) -> Result<()> {
    let (mut ws, _pool) = space.open().await?;
    let id = locate(&ws, path)?;
    let gone = ws.node(id)?.path.clone();
    ws.delete(id)?;
    println!(
        "{} Moved {} to {}",
        "✓".green(),
        shown(&ws, &gone),
        ws.config().trash_dir(ws.root()).display()
    );
    ws.dispose();
    Ok(())
}

/// Lists a document's links, or the documents linking to it.
pub async fn links(space: &Space, path: &Path, incoming: bool) -> Result<()> {
    let (ws, _pool) = space.open().await?;
    let id = locate(&ws, path)?;
    let path = ws.node(id)?.path.clone();

    if incoming {
        let sources: Vec<_> = ws
            .index()
            .list_by_root(ws.root())?
            .into_iter()
            .filter(|r| r.links.iter().any(|l| l.target_path == path))
            .collect();
        if sources.is_empty() {
            println!("Nothing links to {}", shown(&ws, &path));
        }
        for record in sources {
            println!("  {}", shown(&ws, &record.path).cyan());
        }
        ws.dispose();
        return Ok(());
    }

    let Some(record) = ws.index().get(&path)? else {
        println!("{} is not indexed", shown(&ws, &path));
        ws.dispose();
        return Ok(());
    };
    let schema = record.schema.as_ref();
    if record.links.is_empty() {
        println!("No links in {}", shown(&ws, &path));
    }
    for link in &record.links {
        let url = schema
            .and_then(|s| s.get(&link.address))
            .and_then(|e| e.url.clone())
            .unwrap_or_default();
        let target = shown(&ws, &link.target_path);
        let target = if link.target_path.exists() {
            target.cyan()
        } else {
            format!("{} (missing)", target).red()
        };
        println!("  {} -> {}", url, target);
    }
    ws.dispose();
    Ok(())
}

/// Observes the space and replays what changed every `interval` seconds.
pub async fn watch(space: &Space, interval: u64) -> Result<()> {
    let (mut ws, pool) = space.open().await?;
    let mut events = ws.subscribe();
    println!("{} Watching {}", "✓".green(), ws.root().display());
    println!("  Press {} to stop", "Ctrl+C".cyan());

    loop {
        ws.blur()?;
        let stop = tokio::select! {
            _ = tokio::signal::ctrl_c() => true,
            _ = tokio::time::sleep(Duration::from_secs(interval.max(1))) => false,
        };

        let report = ws.focus(&pool).await;
        if report.applied + report.failed > 0 {
            println!(
                "{} {} changes applied{}",
                "↻".cyan(),
                report.applied,
                if report.failed > 0 {
                    format!(", {} failed", report.failed).red().to_string()
                } else {
                    String::new()
                }
            );
        }
        print_warnings(&mut events);
        if stop {
            break;
        }
    }

    ws.dispose();
    Ok(())
}

fn print_warnings(events: &mut tokio::sync::broadcast::Receiver<WorkspaceEvent>) {
    while let Ok(event) = events.try_recv() {
        if let WorkspaceEvent::Warning { message } = event {
            eprintln!("{} {}", "⚠ Warning:".yellow(), message);
        }
    }
}
