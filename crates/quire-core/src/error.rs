//! Error types for the parsing module.
//!
//! A parse error never takes down a batch. Callers substitute an
//! empty document and keep going, so these mostly end up in logs.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience type for functions that can fail during parsing.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Things that can go wrong when parsing a document.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Couldn't read the file from disk.
    #[error("failed to read file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid UTF-8 text.
    #[error("file is not valid UTF-8: '{}'", .0.display())]
    InvalidEncoding(PathBuf),

    /// File extension doesn't map to a document type we parse.
    #[error("unsupported document type for file '{}'", .0.display())]
    Unsupported(PathBuf),
}

impl ParseError {
    /// Creates an IO error with the path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::InvalidData {
            return Self::InvalidEncoding(path);
        }
        Self::Io { path, source }
    }
}
