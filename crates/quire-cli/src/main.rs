//! Quire CLI - drives a workspace from the terminal
//!
//! Every command opens the space, brings the index up to date and then
//! does its one thing. `watch` stays around and replays outside changes
//! at a fixed interval, the way the app does on focus.

use clap::{Parser, Subcommand};
use colored::Colorize;
use quire_workspace::WorkspaceError;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "quire")]
#[command(author = "Quire Contributors")]
#[command(version)]
#[command(about = "Keeps a folder of notes, its index and its links in sync", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Space root (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Index database location
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    /// Index oversized spaces without asking
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config into the space
    Init,

    /// Reconcile the index with disk and parse stale documents
    Scan,

    /// Print the file tree
    Tree {
        /// Show modification times
        #[arg(short, long)]
        long: bool,
    },

    /// Create a file or folder
    New {
        /// Folder to create in
        parent: PathBuf,

        name: String,

        /// Create a folder instead of a file
        #[arg(short, long)]
        folder: bool,
    },

    /// Rename an entry, updating links to and inside it
    Rename { path: PathBuf, name: String },

    /// Move an entry into another folder
    Mv { path: PathBuf, target: PathBuf },

    /// Copy an entry into a folder
    Cp { source: PathBuf, target: PathBuf },

    /// Move an entry to the trash
    Rm { path: PathBuf },

    /// List the links of a document
    Links {
        path: PathBuf,

        /// List documents linking here instead
        #[arg(short, long)]
        incoming: bool,
    },

    /// Replay outside changes until interrupted
    Watch {
        /// Seconds between replays
        #[arg(short, long, default_value = "2")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let space = commands::Space {
        root: cli.root,
        index: cli.index,
        yes: cli.yes,
    };

    let result = match cli.command {
        Commands::Init => commands::init(&space),
        Commands::Scan => commands::scan(&space).await,
        Commands::Tree { long } => commands::tree(&space, long).await,
        Commands::New {
            parent,
            name,
            folder,
        } => commands::create(&space, &parent, &name, folder).await,
        Commands::Rename { path, name } => commands::rename(&space, &path, &name).await,
        Commands::Mv { path, target } => commands::move_entry(&space, &path, &target).await,
        Commands::Cp { source, target } => commands::copy(&space, &source, &target).await,
        Commands::Rm { path } => commands::remove(&space, &path).await,
        Commands::Links { path, incoming } => commands::links(&space, &path, incoming).await,
        Commands::Watch { interval } => commands::watch(&space, interval).await,
    };

    if let Err(e) = result {
        let warning = e
            .downcast_ref::<WorkspaceError>()
            .map(WorkspaceError::is_warning)
            .unwrap_or(false);
        if warning {
            eprintln!("{} {}", "warning:".yellow().bold(), e);
        } else {
            eprintln!("{} {}", "error:".red().bold(), e);
        }
        std::process::exit(1);
    }
}
