//! Tag cache: per-file tags keyed by fingerprint, refreshed per request policy.
//!
//! One cache is owned per repository root (normally by [`crate::RepoMap`]) and
//! lives until it is dropped or explicitly cleared. Slots are locked per file,
//! so extracting one file never blocks lookups of another.

mod store;

pub use store::TagStore;

use crate::config::CacheConfig;
use crate::error::ExtractionError;
use crate::extract::{Language, TagExtractor};
use crate::tag::{Fingerprint, FingerprintMode, SourceFile, Tag};
use crate::RepoMapError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// When cached tags are considered stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Reuse an entry whose fingerprint matches, re-extract otherwise
    #[default]
    Auto,
    /// Always re-extract
    Always,
    /// Like `Auto`, but files flagged as changed are re-extracted regardless
    Files,
    /// Never re-extract a cached file unless the whole batch is forced
    Manual,
}

impl RefreshMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Always => "always",
            Self::Files => "files",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshMode {
    type Err = RepoMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "files" => Ok(Self::Files),
            "manual" => Ok(Self::Manual),
            _ => Err(RepoMapError::UnknownRefreshMode(s.to_string())),
        }
    }
}

/// Cached tags for one file
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub tags: Arc<Vec<Tag>>,
    /// Write order across the whole cache; later writes win
    pub generation: u64,
}

/// How one lookup may use the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub mode: RefreshMode,
    /// Re-extract even if the policy would reuse the entry
    pub force: bool,
}

impl Lookup {
    pub fn new(mode: RefreshMode, force: bool) -> Self {
        Self { mode, force }
    }

    fn must_extract(&self, entry: &CacheEntry, current: &Fingerprint) -> bool {
        if self.force {
            return true;
        }
        match self.mode {
            RefreshMode::Always => true,
            RefreshMode::Auto | RefreshMode::Files => entry.fingerprint != *current,
            RefreshMode::Manual => false,
        }
    }
}

/// Counters for observability and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub extractions: usize,
    pub entries: usize,
}

type Slot = Arc<RwLock<Option<CacheEntry>>>;

pub struct TagCache {
    extractor: Arc<dyn TagExtractor>,
    fingerprint_mode: FingerprintMode,
    slots: RwLock<HashMap<PathBuf, Slot>>,
    store: Option<Mutex<TagStore>>,
    generation: AtomicU64,
    hits: AtomicUsize,
    extractions: AtomicUsize,
}

impl TagCache {
    /// In-memory cache
    pub fn new(extractor: Arc<dyn TagExtractor>, fingerprint_mode: FingerprintMode) -> Self {
        Self {
            extractor,
            fingerprint_mode,
            slots: RwLock::new(HashMap::new()),
            store: None,
            generation: AtomicU64::new(0),
            hits: AtomicUsize::new(0),
            extractions: AtomicUsize::new(0),
        }
    }

    /// Cache for `repo_root`, seeded from and written through to `.repomap/tags.db`
    /// when persistence is enabled
    pub fn open(
        repo_root: &Path,
        extractor: Arc<dyn TagExtractor>,
        config: &CacheConfig,
    ) -> crate::Result<Self> {
        let cache = Self::new(extractor, config.fingerprint);
        if config.persist {
            let store = TagStore::open(repo_root)?;
            cache.seed(store.load_all()?);
            return Ok(cache.with_store(store));
        }
        Ok(cache)
    }

    pub fn with_store(mut self, store: TagStore) -> Self {
        self.store = Some(Mutex::new(store));
        self
    }

    /// Insert entries loaded from elsewhere, keeping the newest per path
    pub fn seed(&self, entries: Vec<(PathBuf, CacheEntry)>) {
        for (path, entry) in entries {
            self.generation.fetch_max(entry.generation, Ordering::SeqCst);
            let slot = self.slot(&path);
            let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
            let newer = guard
                .as_ref()
                .map_or(true, |existing| entry.generation >= existing.generation);
            if newer {
                *guard = Some(entry);
            }
        }
    }

    /// Tags for `file`, extracting when the lookup policy says the entry is stale.
    ///
    /// Successful extraction always refreshes the stored entry, whatever the mode.
    pub fn get_tags(
        &self,
        file: &SourceFile,
        lookup: Lookup,
    ) -> Result<Arc<Vec<Tag>>, ExtractionError> {
        let current = Fingerprint::compute(&file.abs_path, self.fingerprint_mode)
            .map_err(|e| ExtractionError::new(&file.abs_path, e.to_string()))?;
        let slot = self.slot(&file.abs_path);

        let observed = {
            let guard = slot.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = guard.as_ref() {
                if !lookup.must_extract(entry, &current) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Arc::clone(&entry.tags));
                }
            }
            guard.as_ref().map(|e| e.generation)
        };

        let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = guard.as_ref() {
            let rewritten = observed != Some(entry.generation);
            if rewritten && entry.fingerprint == current {
                // Another request refreshed this file while we waited; trust the newest write
                tracing::debug!(
                    "tag cache entry for {} refreshed concurrently, reusing generation {}",
                    file.rel_path,
                    entry.generation
                );
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(&entry.tags));
            }
        }

        let language = Language::from_path(&file.abs_path);
        let tags = self.extractor.extract_tags(file, language)?;
        self.extractions.fetch_add(1, Ordering::Relaxed);

        match Fingerprint::compute(&file.abs_path, self.fingerprint_mode) {
            Ok(after) if after == current => {}
            _ => tracing::debug!(
                "{} changed during extraction; entry keeps the pre-read fingerprint",
                file.rel_path
            ),
        }

        let entry = CacheEntry {
            fingerprint: current,
            tags: Arc::new(tags),
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        };
        self.persist(&file.abs_path, &entry);

        let tags = Arc::clone(&entry.tags);
        *guard = Some(entry);
        tracing::debug!("extracted {} tags from {}", tags.len(), file.rel_path);
        Ok(tags)
    }

    /// Drop the entry for one file
    pub fn invalidate(&self, path: &Path) {
        let removed = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        if removed.is_some() {
            if let Some(store) = &self.store {
                let store = store.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = store.remove(path) {
                    tracing::warn!("failed to remove persisted tags for {}: {e}", path.display());
                }
            }
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if let Some(store) = &self.store {
            let store = store.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = store.clear() {
                tracing::warn!("failed to clear persisted tag cache: {e}");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let entries = slots
            .values()
            .filter(|slot| {
                slot.read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .count();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            extractions: self.extractions.load(Ordering::Relaxed),
            entries,
        }
    }

    /// Slot for `path`, created on first use. The map lock is held only for the lookup.
    fn slot(&self, path: &Path) -> Slot {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(path.to_path_buf()).or_default())
    }

    fn persist(&self, path: &Path, entry: &CacheEntry) {
        let Some(store) = &self.store else { return };
        let store = store.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = store.save(path, entry) {
            tracing::warn!("failed to persist tags for {}: {e}", path.display());
        }
    }
}
