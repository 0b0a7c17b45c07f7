//! Tag model: symbol occurrences and the file identity they belong to

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Whether a tag defines or references its identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Definition,
    Reference,
}

/// One symbol occurrence at a specific file/line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub abs_path: PathBuf,
    /// Forward-slash path relative to the repository root
    pub rel_path: String,
    /// 1-indexed line number
    pub line: usize,
    pub name: String,
    pub kind: TagKind,
    /// Text of the enclosing declaration line, used when the file can't be read at render time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Tag {
    pub fn definition(file: &SourceFile, line: usize, name: impl Into<String>) -> Self {
        Self {
            abs_path: file.abs_path.clone(),
            rel_path: file.rel_path.clone(),
            line,
            name: name.into(),
            kind: TagKind::Definition,
            signature: None,
        }
    }

    pub fn reference(file: &SourceFile, line: usize, name: impl Into<String>) -> Self {
        Self {
            abs_path: file.abs_path.clone(),
            rel_path: file.rel_path.clone(),
            line,
            name: name.into(),
            kind: TagKind::Reference,
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn is_definition(&self) -> bool {
        self.kind == TagKind::Definition
    }
}

/// A file of the working set: absolute path plus its repository-relative form
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceFile {
    pub abs_path: PathBuf,
    pub rel_path: String,
}

impl SourceFile {
    pub fn new(abs_path: impl Into<PathBuf>, rel_path: impl Into<String>) -> Self {
        Self {
            abs_path: abs_path.into(),
            rel_path: rel_path.into(),
        }
    }

    /// Build from an absolute path, deriving the relative path against `root`.
    /// Paths outside the root keep their absolute form.
    pub fn from_abs(root: &Path, abs_path: impl Into<PathBuf>) -> Self {
        let abs_path = abs_path.into();
        let rel_path = relative_path(root, &abs_path);
        Self { abs_path, rel_path }
    }
}

/// Forward-slash path of `path` relative to `root`
pub fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// How file fingerprints are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Modification time and size (cheap, one `stat` per file)
    #[default]
    Metadata,
    /// SHA-256 of the content, plus size
    Content,
}

/// Identifies a file's content state; equal fingerprints mean cached tags are still valid
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub mtime_ns: i64,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Fingerprint {
    pub fn compute(path: &Path, mode: FingerprintMode) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            ));
        }

        match mode {
            FingerprintMode::Metadata => {
                let mtime_ns = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
                    .unwrap_or(0);
                Ok(Self {
                    mtime_ns,
                    size: meta.len(),
                    content_hash: None,
                })
            }
            FingerprintMode::Content => {
                let bytes = fs::read(path)?;
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                Ok(Self {
                    mtime_ns: 0,
                    size: bytes.len() as u64,
                    content_hash: Some(hex::encode(hasher.finalize())),
                })
            }
        }
    }
}
