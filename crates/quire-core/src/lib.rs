//! Quire Core - document model and file tree types
//!
//! This crate holds the types every other Quire crate speaks:
//! persisted `FileRecord`s, the in-memory `Tree` of `TreeNode`s,
//! the parsed document `Schema` and the `Link`s recorded inside it.
//! It also owns the markdown parser that turns raw file content
//! into a schema.
//!
//! # Example
//!
//! ```no_run
//! use quire_core::parse_file;
//! use std::path::Path;
//!
//! let doc = parse_file(Path::new("/notes/today.md")).unwrap();
//! for link in &doc.links {
//!     println!("{:?} -> {}", link.address, link.target_path.display());
//! }
//! ```

pub mod error;
pub mod node;
pub mod parser;
pub mod paths;
pub mod record;
pub mod schema;
pub mod tree;

pub use error::{ParseError, Result};
pub use node::{NodeId, NodeKind, TreeNode};
pub use parser::{
    extract_links, is_supported, parse_file, parse_source, reference_spans, ParsedDocument,
};
pub use record::{millis, now_millis, FileRecord};
pub use schema::{Element, ElementKind, Link, Schema};
pub use tree::Tree;
