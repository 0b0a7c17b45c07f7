//! repomap core - relevance-ranked repository maps for LLM prompts
//!
//! Tags (definitions and references) are extracted per file and cached by
//! fingerprint, linked into a weighted reference graph, ranked with
//! personalized PageRank, and rendered into the largest map that fits a
//! token budget.

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod graph;
pub mod mentions;
pub mod parse;
pub mod rank;
pub mod render;
pub mod session;
pub mod tag;
pub mod tokens;

pub use cache::{CacheStats, Lookup, RefreshMode, TagCache, TagStore};
pub use config::Config;
pub use discovery::{FileLister, StaticLister, WalkLister};
pub use error::{ExtractionError, RepoMapError};
pub use extract::{ExtractorRegistry, Language, TagExtractor};
pub use graph::{EdgeRecord, ReferenceGraph};
pub use mentions::{ContextMentionResolver, MentionResolver, Mentions};
pub use parse::TreeSitterExtractor;
pub use rank::{MapEntry, RankedTag};
pub use render::{fit_to_budget, render, BudgetFit, LineContextCache};
pub use session::{Diagnostic, MapInputs, MapRequest, RankedTags, RenderedMap, RepoMap, RepoMapBuilder};
pub use tag::{Fingerprint, FingerprintMode, SourceFile, Tag, TagKind};
pub use tokens::{HeuristicCounter, TiktokenCounter, TokenCounter};

/// Result type alias for repomap operations
pub type Result<T> = std::result::Result<T, RepoMapError>;
