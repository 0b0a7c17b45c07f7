//! Repository file listing

use crate::error::RepoMapError;
use crate::tag::relative_path;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Lists the files of a repository as sorted forward-slash relative paths
pub trait FileLister: Send + Sync {
    fn list_files(&self, root: &Path) -> crate::Result<Vec<String>>;
}

/// Filesystem walk honoring `.gitignore` plus configured ignore patterns
#[derive(Debug, Clone)]
pub struct WalkLister {
    ignore_set: GlobSet,
}

impl WalkLister {
    pub fn new(patterns: &[String]) -> crate::Result<Self> {
        Ok(Self {
            ignore_set: build_ignore_set(patterns)?,
        })
    }

    pub fn is_ignored(&self, relative: &Path) -> bool {
        self.ignore_set.is_match(relative)
    }
}

/// Bare names match at any depth, both as a file and as a directory prefix
fn build_ignore_set(patterns: &[String]) -> crate::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob_pattern = if pattern.contains('*') || pattern.contains('?') {
            pattern.clone()
        } else {
            format!("**/{}", pattern)
        };
        builder.add(Glob::new(&glob_pattern).map_err(|e| RepoMapError::GlobPattern(e.to_string()))?);
        builder.add(
            Glob::new(&format!("**/{}/**", pattern))
                .map_err(|e| RepoMapError::GlobPattern(e.to_string()))?,
        );
    }
    builder
        .build()
        .map_err(|e| RepoMapError::GlobPattern(e.to_string()))
}

impl FileLister for WalkLister {
    fn list_files(&self, root: &Path) -> crate::Result<Vec<String>> {
        let mut builder = WalkBuilder::new(root);
        builder.hidden(false);
        builder.git_ignore(true);
        builder.git_global(true);
        builder.git_exclude(true);
        builder.require_git(false);

        let mut files = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!("skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if self.is_ignored(relative) {
                continue;
            }
            files.push(relative_path(root, path));
        }

        files.sort();
        tracing::debug!("listed {} files under {}", files.len(), root.display());
        Ok(files)
    }
}

/// Fixed file list, for callers that already know their working set
#[derive(Debug, Clone, Default)]
pub struct StaticLister {
    files: Vec<String>,
}

impl StaticLister {
    pub fn new(files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut files: Vec<String> = files.into_iter().map(Into::into).collect();
        files.sort();
        files.dedup();
        Self { files }
    }
}

impl FileLister for StaticLister {
    fn list_files(&self, _root: &Path) -> crate::Result<Vec<String>> {
        Ok(self.files.clone())
    }
}

/// Absolute form of a caller-supplied path, relative paths resolved against `root`
pub fn absolutize(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
