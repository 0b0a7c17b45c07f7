//! Map session: one repository root, one tag cache, many requests

use crate::cache::{CacheStats, Lookup, RefreshMode, TagCache};
use crate::config::Config;
use crate::discovery::{absolutize, FileLister, WalkLister};
use crate::error::{ExtractionError, RepoMapError};
use crate::extract::{ExtractorRegistry, TagExtractor};
use crate::graph::{GraphSignals, ReferenceGraph};
use crate::mentions::{files_named_by, ContextMentionResolver, MentionResolver};
use crate::rank::{self, FileRanks, Priors, RankedTag};
use crate::render::{fit_to_budget, LineContextCache};
use crate::tag::{relative_path, SourceFile, Tag};
use crate::tokens::{TiktokenCounter, TokenCounter};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Inputs of one map request. Paths may be absolute or relative to the root.
#[derive(Debug, Clone, Default)]
pub struct MapRequest {
    pub chat_files: BTreeSet<PathBuf>,
    pub other_files: BTreeSet<PathBuf>,
    pub mentioned_files: BTreeSet<PathBuf>,
    pub mentioned_identifiers: BTreeSet<String>,
    /// Falls back to `[map] refresh` from the config
    pub refresh: Option<RefreshMode>,
    pub force_refresh: bool,
    /// Files re-extracted regardless of fingerprint under `files` refresh
    pub changed_files: BTreeSet<PathBuf>,
}

impl MapRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chat_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.chat_files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn other_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.other_files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn mentioned_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.mentioned_files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn mentioned_identifiers<I, S>(mut self, idents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mentioned_identifiers
            .extend(idents.into_iter().map(Into::into));
        self
    }

    pub fn changed_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.changed_files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn refresh(mut self, mode: RefreshMode) -> Self {
        self.refresh = Some(mode);
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }
}

/// Caller-level inputs, before the working set is known
#[derive(Debug, Clone, Default)]
pub struct MapInputs {
    pub chat_files: Vec<PathBuf>,
    /// Extra files to rank beyond the listed repository files
    pub include_files: Vec<PathBuf>,
    pub context: Option<String>,
    pub mentioned_files: Vec<PathBuf>,
    pub mentioned_identifiers: Vec<String>,
    pub refresh: Option<RefreshMode>,
    pub force_refresh: bool,
}

/// Non-fatal per-file problem met while serving a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub message: String,
}

impl From<ExtractionError> for Diagnostic {
    fn from(err: ExtractionError) -> Self {
        Self {
            path: err.path,
            message: err.message,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMap {
    pub text: String,
    /// Leading map entries (tags, then bare files) that made it into `text`
    pub included: usize,
    pub tokens: usize,
    pub budget_too_small: bool,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTags {
    pub tags: Vec<RankedTag>,
    /// Length of the full ranking before any limit
    pub total: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Everything ranked for one request
struct Ranking {
    graph: ReferenceGraph,
    ranks: FileRanks,
    tags: Vec<RankedTag>,
    chat_files: BTreeSet<PathBuf>,
    diagnostics: Vec<Diagnostic>,
}

pub struct RepoMapBuilder {
    root: PathBuf,
    config: Option<Config>,
    extractor: Option<Arc<dyn TagExtractor>>,
    counter: Option<Arc<dyn TokenCounter>>,
    lister: Option<Arc<dyn FileLister>>,
    resolver: Option<Arc<dyn MentionResolver>>,
}

impl RepoMapBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn TagExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn lister(mut self, lister: Arc<dyn FileLister>) -> Self {
        self.lister = Some(lister);
        self
    }

    pub fn mention_resolver(mut self, resolver: Arc<dyn MentionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Unset collaborators default to tree-sitter extraction, `cl100k_base`
    /// counting, a `.gitignore`-aware walk and the context resolver. Without an
    /// explicit config, `<root>/.repomap/config.toml` is loaded when present.
    pub fn build(self) -> crate::Result<RepoMap> {
        let root = if self.root.is_absolute() {
            self.root
        } else {
            std::env::current_dir()?.join(self.root)
        };
        if !root.is_dir() {
            return Err(RepoMapError::InvalidRequest(format!(
                "repository root {} is not a directory",
                root.display()
            )));
        }

        let config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => Config::load_or_default(&root)?,
        };
        let extractor = self
            .extractor
            .unwrap_or_else(|| Arc::new(ExtractorRegistry::with_tree_sitter()));
        let lister: Arc<dyn FileLister> = match self.lister {
            Some(lister) => lister,
            None => Arc::new(WalkLister::new(&config.ignore.patterns)?),
        };
        let cache = TagCache::open(&root, extractor, &config.cache)?;

        Ok(RepoMap {
            root,
            config,
            cache,
            counter: self.counter.unwrap_or_else(|| Arc::new(TiktokenCounter::new())),
            lister,
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(ContextMentionResolver)),
            last_chat: Mutex::new(BTreeSet::new()),
        })
    }
}

/// Repository map façade. Safe to share across threads; requests against the
/// same instance share its tag cache.
pub struct RepoMap {
    root: PathBuf,
    config: Config,
    cache: TagCache,
    counter: Arc<dyn TokenCounter>,
    lister: Arc<dyn FileLister>,
    resolver: Arc<dyn MentionResolver>,
    /// Chat set of the previous request, for `files` refresh
    last_chat: Mutex<BTreeSet<PathBuf>>,
}

impl RepoMap {
    pub fn builder(root: impl Into<PathBuf>) -> RepoMapBuilder {
        RepoMapBuilder {
            root: root.into(),
            config: None,
            extractor: None,
            counter: None,
            lister: None,
            resolver: None,
        }
    }

    /// Façade with every collaborator at its default
    pub fn open(root: impl Into<PathBuf>) -> crate::Result<Self> {
        Self::builder(root).build()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &TagCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Resolve caller-level inputs into a request: list the repository, drop
    /// chat and include files that don't exist, and fold context mentions in
    pub fn prepare(&self, inputs: &MapInputs) -> crate::Result<MapRequest> {
        let chat = self.existing_files(&inputs.chat_files);
        let include = self.existing_files(&inputs.include_files);

        let repo_rel = self.lister.list_files(&self.root)?;
        let repo_abs: BTreeSet<PathBuf> = repo_rel.iter().map(|rel| self.root.join(rel)).collect();

        let other_files: BTreeSet<PathBuf> = repo_abs
            .iter()
            .chain(&include)
            .chain(&chat)
            .filter(|path| !chat.contains(*path))
            .cloned()
            .collect();

        let chat_rel: BTreeSet<String> = chat.iter().map(|p| relative_path(&self.root, p)).collect();

        let mut mentioned_rel: BTreeSet<String> = inputs
            .mentioned_files
            .iter()
            .map(|p| relative_path(&self.root, &absolutize(&self.root, p)))
            .collect();
        let mut identifiers: BTreeSet<String> =
            inputs.mentioned_identifiers.iter().cloned().collect();

        if let Some(context) = inputs.context.as_deref().filter(|c| !c.trim().is_empty()) {
            let mentions = self.resolver.resolve_mentions(context, &repo_rel, &chat_rel);
            mentioned_rel.extend(mentions.files);
            identifiers.extend(mentions.identifiers);
        }
        mentioned_rel.extend(files_named_by(&identifiers, &repo_rel));

        tracing::debug!(
            "prepared request: {} chat, {} other, {} mentioned files, {} identifiers",
            chat.len(),
            other_files.len(),
            mentioned_rel.len(),
            identifiers.len()
        );

        Ok(MapRequest {
            chat_files: chat,
            other_files,
            mentioned_files: mentioned_rel
                .iter()
                .map(|rel| absolutize(&self.root, Path::new(rel)))
                .collect(),
            mentioned_identifiers: identifiers,
            refresh: inputs.refresh,
            force_refresh: inputs.force_refresh,
            changed_files: BTreeSet::new(),
        })
    }

    fn existing_files(&self, paths: &[PathBuf]) -> BTreeSet<PathBuf> {
        paths
            .iter()
            .map(|p| absolutize(&self.root, p))
            .filter(|p| p.is_file())
            .collect()
    }

    /// Render the most relevant definitions that fit in `token_budget` tokens.
    ///
    /// An empty working set yields empty text. When even one entry overflows
    /// the budget, that entry is returned with `budget_too_small` set.
    pub fn generate_map(&self, request: &MapRequest, token_budget: usize) -> crate::Result<RenderedMap> {
        if token_budget == 0 {
            return Err(RepoMapError::InvalidRequest(
                "token budget must be at least 1".to_string(),
            ));
        }

        let ranking = self.rank(request);
        let entries = rank::map_entries(&ranking.tags, &ranking.graph, &ranking.ranks, &ranking.chat_files);
        let mut lines = LineContextCache::new();
        let fit = fit_to_budget(
            &entries,
            token_budget,
            self.counter.as_ref(),
            self.config.map.max_line_length,
            &mut lines,
        );

        if fit.budget_too_small {
            tracing::warn!(
                "token budget {} is too small; returning a single entry of {} tokens",
                token_budget,
                fit.tokens
            );
        }
        tracing::debug!(
            "map: {} of {} entries, {} tokens",
            fit.count,
            entries.len(),
            fit.tokens
        );

        Ok(RenderedMap {
            text: fit.text,
            included: fit.count,
            tokens: fit.tokens,
            budget_too_small: fit.budget_too_small,
            diagnostics: ranking.diagnostics,
        })
    }

    /// The full ranked definition list, truncated to `limit` when given
    pub fn generate_ranked_tags(
        &self,
        request: &MapRequest,
        limit: Option<usize>,
    ) -> crate::Result<RankedTags> {
        let ranking = self.rank(request);
        let total = ranking.tags.len();
        let mut tags = ranking.tags;
        if let Some(limit) = limit {
            tags.truncate(limit);
        }
        Ok(RankedTags {
            tags,
            total,
            diagnostics: ranking.diagnostics,
        })
    }

    fn rank(&self, request: &MapRequest) -> Ranking {
        let abs = |paths: &BTreeSet<PathBuf>| -> BTreeSet<PathBuf> {
            paths.iter().map(|p| absolutize(&self.root, p)).collect()
        };
        let chat_files = abs(&request.chat_files);
        let mentioned_files = abs(&request.mentioned_files);

        let mut working_set = chat_files.clone();
        working_set.extend(abs(&request.other_files));
        working_set.extend(mentioned_files.iter().filter(|p| p.is_file()).cloned());

        let mode = request.refresh.unwrap_or(self.config.map.refresh);
        let flagged = self.flagged_files(mode, &chat_files, abs(&request.changed_files));

        let (tags, diagnostics) = self.collect_tags(&working_set, mode, request.force_refresh, &flagged);

        let weights = &self.config.weights;
        let graph = ReferenceGraph::build(
            &tags,
            GraphSignals {
                chat_files: &chat_files,
                mentioned_files: &mentioned_files,
                mentioned_idents: &request.mentioned_identifiers,
                weights,
            },
        );
        let personalization = rank::personalization(
            &graph,
            &tags,
            Priors {
                chat_files: &chat_files,
                mentioned_files: &mentioned_files,
                mentioned_idents: &request.mentioned_identifiers,
                weights: &self.config.personalization,
            },
        );
        let ranks = rank::pagerank(&graph, &personalization, &self.config.ranking);
        let ranked = rank::rank_definitions(
            &graph,
            &ranks,
            &tags,
            &chat_files,
            weights.unreferenced_definition_weight,
        );

        Ranking {
            graph,
            ranks,
            tags: ranked,
            chat_files,
            diagnostics,
        }
    }

    /// Files forced under `files` refresh: the caller's changed files plus
    /// files that joined the chat since the previous request
    fn flagged_files(
        &self,
        mode: RefreshMode,
        chat_files: &BTreeSet<PathBuf>,
        changed: BTreeSet<PathBuf>,
    ) -> BTreeSet<PathBuf> {
        let mut last_chat = self.last_chat.lock().unwrap_or_else(PoisonError::into_inner);
        let mut flagged = BTreeSet::new();
        if mode == RefreshMode::Files {
            flagged = changed;
            flagged.extend(chat_files.difference(&last_chat).cloned());
        }
        *last_chat = chat_files.clone();
        flagged
    }

    /// Tags for every file of the working set, extracted in parallel. Files
    /// that fail are left out and reported as diagnostics.
    fn collect_tags(
        &self,
        working_set: &BTreeSet<PathBuf>,
        mode: RefreshMode,
        force: bool,
        flagged: &BTreeSet<PathBuf>,
    ) -> (BTreeMap<SourceFile, Arc<Vec<Tag>>>, Vec<Diagnostic>) {
        let files: Vec<SourceFile> = working_set
            .iter()
            .map(|p| SourceFile::from_abs(&self.root, p.clone()))
            .collect();

        let results: Vec<(SourceFile, Result<Arc<Vec<Tag>>, ExtractionError>)> = files
            .into_par_iter()
            .map(|file| {
                let lookup = Lookup::new(mode, force || flagged.contains(&file.abs_path));
                let tags = self.cache.get_tags(&file, lookup);
                (file, tags)
            })
            .collect();

        let mut tags = BTreeMap::new();
        let mut diagnostics = Vec::new();
        for (file, result) in results {
            match result {
                Ok(file_tags) => {
                    tags.insert(file, file_tags);
                }
                Err(err) => {
                    tracing::warn!("{err}");
                    diagnostics.push(Diagnostic::from(err));
                }
            }
        }
        diagnostics.sort_by(|a, b| a.path.cmp(&b.path));
        (tags, diagnostics)
    }
}
