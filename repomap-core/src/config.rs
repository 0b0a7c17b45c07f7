//! Configuration for repomap

use crate::cache::RefreshMode;
use crate::tag::FingerprintMode;
use crate::RepoMapError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory (under the repository root) holding config and the persisted tag cache
pub const REPOMAP_DIR: &str = ".repomap";

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# repomap configuration

[map]
# Token budget for the rendered map
map_tokens = 2048
# When cached tags are re-extracted: auto, always, files, manual
refresh = "auto"
# Rendered code lines are truncated to this many characters
max_line_length = 100

[weights]
# Edge multiplier when the identifier or the defining file was mentioned
mention_boost = 10.0
# Edge multiplier when the referencing file is in the chat
chat_boost = 50.0
# Identifiers starting with "_"
private_ident_factor = 0.1
# Long snake_case / kebab-case / camelCase identifiers
descriptive_ident_factor = 10.0
# Identifiers defined in more than `widely_defined_threshold` files
widely_defined_factor = 0.1
widely_defined_threshold = 5
# Share given to a definition nobody references when splitting file rank
unreferenced_definition_weight = 0.1

[personalization]
chat_prior = 100.0
mention_prior = 50.0
identifier_prior = 25.0
baseline_prior = 1.0

[ranking]
damping = 0.85
tolerance = 1e-8
max_iterations = 100

[cache]
# Persist extracted tags in .repomap/tags.db across runs
persist = false
# "metadata" (mtime + size) or "content" (sha256)
fingerprint = "metadata"

[ignore]
# Additional patterns to ignore (beyond .gitignore)
patterns = [
    ".git",
    ".repomap",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    "*.min.js",
    "*.lock",
]
"#;

/// repomap configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub weights: EdgeWeights,
    #[serde(default)]
    pub personalization: PersonalizationPriors,
    #[serde(default)]
    pub ranking: RankingParams,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ignore: IgnoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    #[serde(default = "default_map_tokens")]
    pub map_tokens: usize,
    #[serde(default)]
    pub refresh: RefreshMode,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// Multipliers applied to reference-graph edges.
///
/// These are tuning knobs; only their relative effect (boosted beats
/// unboosted) is a contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeWeights {
    #[serde(default = "default_mention_boost")]
    pub mention_boost: f64,
    #[serde(default = "default_chat_boost")]
    pub chat_boost: f64,
    #[serde(default = "default_private_ident_factor")]
    pub private_ident_factor: f64,
    #[serde(default = "default_descriptive_ident_factor")]
    pub descriptive_ident_factor: f64,
    #[serde(default = "default_widely_defined_factor")]
    pub widely_defined_factor: f64,
    #[serde(default = "default_widely_defined_threshold")]
    pub widely_defined_threshold: usize,
    #[serde(default = "default_unreferenced_definition_weight")]
    pub unreferenced_definition_weight: f64,
}

/// Prior weights of the personalization vector, before normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalizationPriors {
    #[serde(default = "default_chat_prior")]
    pub chat_prior: f64,
    #[serde(default = "default_mention_prior")]
    pub mention_prior: f64,
    #[serde(default = "default_identifier_prior")]
    pub identifier_prior: f64,
    #[serde(default = "default_baseline_prior")]
    pub baseline_prior: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingParams {
    #[serde(default = "default_damping")]
    pub damping: f64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub persist: bool,
    #[serde(default)]
    pub fingerprint: FingerprintMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreConfig {
    #[serde(default = "default_ignore_patterns")]
    pub patterns: Vec<String>,
}

// Default value functions
fn default_map_tokens() -> usize {
    2048
}
fn default_max_line_length() -> usize {
    100
}
fn default_mention_boost() -> f64 {
    10.0
}
fn default_chat_boost() -> f64 {
    50.0
}
fn default_private_ident_factor() -> f64 {
    0.1
}
fn default_descriptive_ident_factor() -> f64 {
    10.0
}
fn default_widely_defined_factor() -> f64 {
    0.1
}
fn default_widely_defined_threshold() -> usize {
    5
}
fn default_unreferenced_definition_weight() -> f64 {
    0.1
}
fn default_chat_prior() -> f64 {
    100.0
}
fn default_mention_prior() -> f64 {
    50.0
}
fn default_identifier_prior() -> f64 {
    25.0
}
fn default_baseline_prior() -> f64 {
    1.0
}
fn default_damping() -> f64 {
    0.85
}
fn default_tolerance() -> f64 {
    1e-8
}
fn default_max_iterations() -> usize {
    100
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".git".to_string(),
        ".repomap".to_string(),
        "node_modules".to_string(),
        "target".to_string(),
        "__pycache__".to_string(),
    ]
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            map_tokens: default_map_tokens(),
            refresh: RefreshMode::default(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for EdgeWeights {
    fn default() -> Self {
        Self {
            mention_boost: default_mention_boost(),
            chat_boost: default_chat_boost(),
            private_ident_factor: default_private_ident_factor(),
            descriptive_ident_factor: default_descriptive_ident_factor(),
            widely_defined_factor: default_widely_defined_factor(),
            widely_defined_threshold: default_widely_defined_threshold(),
            unreferenced_definition_weight: default_unreferenced_definition_weight(),
        }
    }
}

impl Default for PersonalizationPriors {
    fn default() -> Self {
        Self {
            chat_prior: default_chat_prior(),
            mention_prior: default_mention_prior(),
            identifier_prior: default_identifier_prior(),
            baseline_prior: default_baseline_prior(),
        }
    }
}

impl Default for RankingParams {
    fn default() -> Self {
        Self {
            damping: default_damping(),
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            patterns: default_ignore_patterns(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load `<root>/.repomap/config.toml`, or defaults when absent
    pub fn load_or_default(repo_root: &Path) -> crate::Result<Self> {
        let path = Self::default_path(repo_root);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn default_path(repo_root: &Path) -> PathBuf {
        repo_root.join(REPOMAP_DIR).join("config.toml")
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| RepoMapError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make ranking or rendering meaningless
    pub fn validate(&self) -> crate::Result<()> {
        let w = &self.weights;
        let p = &self.personalization;
        let factors = [
            ("weights.mention_boost", w.mention_boost),
            ("weights.chat_boost", w.chat_boost),
            ("weights.private_ident_factor", w.private_ident_factor),
            ("weights.descriptive_ident_factor", w.descriptive_ident_factor),
            ("weights.widely_defined_factor", w.widely_defined_factor),
            ("weights.unreferenced_definition_weight", w.unreferenced_definition_weight),
            ("personalization.chat_prior", p.chat_prior),
            ("personalization.mention_prior", p.mention_prior),
            ("personalization.identifier_prior", p.identifier_prior),
            ("personalization.baseline_prior", p.baseline_prior),
        ];
        for (name, value) in factors {
            if !value.is_finite() || value <= 0.0 {
                return Err(RepoMapError::ConfigParse(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }

        let damping = self.ranking.damping;
        if !(damping > 0.0 && damping < 1.0) {
            return Err(RepoMapError::ConfigParse(format!(
                "ranking.damping must be in (0, 1), got {damping}"
            )));
        }
        if !self.ranking.tolerance.is_finite() || self.ranking.tolerance < 0.0 {
            return Err(RepoMapError::ConfigParse(
                "ranking.tolerance must be a non-negative number".to_string(),
            ));
        }
        if self.ranking.max_iterations == 0 {
            return Err(RepoMapError::ConfigParse(
                "ranking.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.map.map_tokens == 0 {
            return Err(RepoMapError::ConfigParse(
                "map.map_tokens must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.map.map_tokens, 2048);
        assert_eq!(config.map.refresh, RefreshMode::Auto);
        assert_eq!(config.ranking.max_iterations, 100);
        assert!(config.ignore.patterns.iter().any(|p| p == ".repomap"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.weights.chat_boost, 50.0);
        assert_eq!(config.personalization.baseline_prior, 1.0);
        assert_eq!(config.cache.fingerprint, FingerprintMode::Metadata);
        assert!(!config.cache.persist);
    }

    #[test]
    fn test_unknown_refresh_mode_rejected() {
        let err = Config::from_toml("[map]\nrefresh = \"sometimes\"\n").unwrap_err();
        assert!(matches!(err, RepoMapError::ConfigParse(_)));
    }

    #[test]
    fn test_refresh_mode_parses() {
        let config = Config::from_toml("[map]\nrefresh = \"manual\"\n").unwrap();
        assert_eq!(config.map.refresh, RefreshMode::Manual);
    }

    #[test]
    fn test_invalid_damping_rejected() {
        let err = Config::from_toml("[ranking]\ndamping = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("damping"));
    }

    #[test]
    fn test_non_positive_boost_rejected() {
        assert!(Config::from_toml("[weights]\nmention_boost = 0.0\n").is_err());
        assert!(Config::from_toml("[personalization]\nchat_prior = -1.0\n").is_err());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_default(tmp.path()).unwrap();
        assert_eq!(config.map.max_line_length, 100);
    }
}
