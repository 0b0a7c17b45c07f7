//! Error types for repomap operations

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RepoMapError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown refresh mode '{0}' (expected auto, always, files or manual)")]
    UnknownRefreshMode(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Glob pattern error: {0}")]
    GlobPattern(String),

    #[error("Schema version mismatch: tag cache is v{found}, expected v{expected}. Delete .repomap/tags.db to rebuild it.")]
    SchemaVersionMismatch { found: i32, expected: i32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure to extract tags from a single file.
///
/// Never aborts a batch: the file contributes zero tags and the failure is
/// reported as a [`crate::Diagnostic`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Tag extraction failed for {}: {message}", .path.display())]
pub struct ExtractionError {
    pub path: PathBuf,
    pub message: String,
}

impl ExtractionError {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}
