//! Personalized PageRank over the reference graph, and apportionment of file
//! rank to definition tags

use crate::config::{PersonalizationPriors, RankingParams};
use crate::graph::{DefinitionKey, ReferenceGraph};
use crate::tag::{SourceFile, Tag, TagKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A definition tag with its share of its file's rank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTag {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub line: usize,
    pub name: String,
    pub kind: TagKind,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl RankedTag {
    fn from_tag(tag: &Tag, score: f64) -> Self {
        Self {
            rel_path: tag.rel_path.clone(),
            abs_path: tag.abs_path.clone(),
            line: tag.line,
            name: tag.name.clone(),
            kind: tag.kind,
            score,
            signature: tag.signature.clone(),
        }
    }
}

/// Descending score, then path, line and name
pub fn compare_ranked(a: &RankedTag, b: &RankedTag) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.rel_path.cmp(&b.rel_path))
        .then_with(|| a.line.cmp(&b.line))
        .then_with(|| a.name.cmp(&b.name))
}

/// Request signals that seed the personalization vector
#[derive(Debug, Clone, Copy)]
pub struct Priors<'a> {
    pub chat_files: &'a BTreeSet<PathBuf>,
    pub mentioned_files: &'a BTreeSet<PathBuf>,
    pub mentioned_idents: &'a BTreeSet<String>,
    pub weights: &'a PersonalizationPriors,
}

/// Prior weight per node (indexed like the graph), normalized to sum to 1.
///
/// Each file takes the highest tier it qualifies for: chat, mentioned file,
/// linked to a mentioned identifier, then baseline.
pub fn personalization(
    graph: &ReferenceGraph,
    tags: &BTreeMap<SourceFile, Arc<Vec<Tag>>>,
    priors: Priors<'_>,
) -> Vec<f64> {
    let mut vector: Vec<f64> = graph
        .files()
        .map(|file| {
            if priors.chat_files.contains(&file.abs_path) {
                priors.weights.chat_prior
            } else if priors.mentioned_files.contains(&file.abs_path) {
                priors.weights.mention_prior
            } else if linked_to_identifier(file, tags.get(file), priors.mentioned_idents) {
                priors.weights.identifier_prior
            } else {
                priors.weights.baseline_prior
            }
        })
        .collect();

    let total: f64 = vector.iter().sum();
    if total > 0.0 {
        for weight in &mut vector {
            *weight /= total;
        }
    }
    vector
}

/// The file's stem or a path component names a mentioned identifier, or the
/// file defines one
fn linked_to_identifier(
    file: &SourceFile,
    tags: Option<&Arc<Vec<Tag>>>,
    idents: &BTreeSet<String>,
) -> bool {
    if idents.is_empty() {
        return false;
    }
    let path = Path::new(&file.rel_path);
    let stem_matches = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| idents.contains(stem));
    let component_matches = file.rel_path.split('/').any(|part| idents.contains(part));
    let defines = tags.is_some_and(|tags| {
        tags.iter()
            .any(|t| t.is_definition() && idents.contains(&t.name))
    });
    stem_matches || component_matches || defines
}

/// Converged (or capped) rank per file
#[derive(Debug, Clone)]
pub struct FileRanks {
    ranks: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

impl FileRanks {
    pub fn get(&self, idx: usize) -> f64 {
        self.ranks.get(idx).copied().unwrap_or(0.0)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.ranks
    }

    pub fn of(&self, graph: &ReferenceGraph, path: &Path) -> f64 {
        graph.index_of(path).map_or(0.0, |idx| self.get(idx))
    }
}

/// Power iteration with teleport to `personalization`.
///
/// Rank leaving a node is split over its out-edges by weight; nodes with no
/// out-edges hand their rank back through the personalization vector, so
/// total mass stays 1. Stops when the L1 delta drops below the tolerance or
/// at the iteration cap.
pub fn pagerank(graph: &ReferenceGraph, personalization: &[f64], params: &RankingParams) -> FileRanks {
    let n = graph.node_count();
    if n == 0 {
        return FileRanks {
            ranks: Vec::new(),
            iterations: 0,
            converged: true,
        };
    }

    let damping = params.damping;
    let out_weights = graph.out_weights();
    let mut ranks = personalization.to_vec();
    let mut next = vec![0.0; n];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iterations {
        iterations += 1;
        let dangling: f64 = ranks
            .iter()
            .zip(&out_weights)
            .filter(|(_, out)| **out <= 0.0)
            .map(|(rank, _)| rank)
            .sum();

        for (idx, slot) in next.iter_mut().enumerate() {
            let inflow: f64 = graph
                .incoming(idx)
                .map(|(src, weight)| ranks[src] * weight / out_weights[src])
                .sum();
            *slot = (1.0 - damping) * personalization[idx]
                + damping * (inflow + dangling * personalization[idx]);
        }

        let delta: f64 = ranks.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
        std::mem::swap(&mut ranks, &mut next);
        if delta < params.tolerance {
            converged = true;
            break;
        }
    }

    tracing::debug!(
        "pagerank over {} files: {} iterations, converged={}",
        n,
        iterations,
        converged
    );
    FileRanks {
        ranks,
        iterations,
        converged,
    }
}

/// Split each non-chat file's rank over its definition tags.
///
/// A definition's share is proportional to the reference weight it receives
/// plus `unreferenced_weight`, so unreferenced definitions still appear.
pub fn rank_definitions(
    graph: &ReferenceGraph,
    ranks: &FileRanks,
    tags: &BTreeMap<SourceFile, Arc<Vec<Tag>>>,
    chat_files: &BTreeSet<PathBuf>,
    unreferenced_weight: f64,
) -> Vec<RankedTag> {
    let mut ranked = Vec::new();
    for (file, file_tags) in tags {
        if chat_files.contains(&file.abs_path) {
            continue;
        }
        let mut seen = HashSet::new();
        let defs: Vec<(&Tag, f64)> = file_tags
            .iter()
            .filter(|t| t.is_definition())
            .filter(|t| seen.insert(DefinitionKey::of(t)))
            .map(|t| (t, graph.definition_weight(t) + unreferenced_weight))
            .collect();
        let total: f64 = defs.iter().map(|(_, w)| w).sum();
        if defs.is_empty() || total <= 0.0 {
            continue;
        }

        let file_rank = ranks.of(graph, &file.abs_path);
        ranked.extend(
            defs.into_iter()
                .map(|(tag, weight)| RankedTag::from_tag(tag, file_rank * weight / total)),
        );
    }
    ranked.sort_by(compare_ranked);
    ranked
}

/// One unit of the rendered map
#[derive(Debug, Clone, PartialEq)]
pub enum MapEntry {
    Tag(RankedTag),
    /// A file with no definitions, listed by name only
    File { rel_path: String, abs_path: PathBuf },
}

impl MapEntry {
    pub fn rel_path(&self) -> &str {
        match self {
            Self::Tag(tag) => &tag.rel_path,
            Self::File { rel_path, .. } => rel_path,
        }
    }
}

/// Ranked tags followed by the non-chat files that contributed no
/// definitions, most important file first
pub fn map_entries(
    ranked: &[RankedTag],
    graph: &ReferenceGraph,
    ranks: &FileRanks,
    chat_files: &BTreeSet<PathBuf>,
) -> Vec<MapEntry> {
    let tagged: HashSet<&Path> = ranked.iter().map(|t| t.abs_path.as_path()).collect();
    let mut untagged: Vec<(&SourceFile, f64)> = graph
        .files()
        .filter(|f| !chat_files.contains(&f.abs_path) && !tagged.contains(f.abs_path.as_path()))
        .map(|f| (f, ranks.of(graph, &f.abs_path)))
        .collect();
    untagged.sort_by(|(fa, ra), (fb, rb)| rb.total_cmp(ra).then_with(|| fa.rel_path.cmp(&fb.rel_path)));

    ranked
        .iter()
        .cloned()
        .map(MapEntry::Tag)
        .chain(untagged.into_iter().map(|(f, _)| MapEntry::File {
            rel_path: f.rel_path.clone(),
            abs_path: f.abs_path.clone(),
        }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdgeWeights;
    use crate::graph::GraphSignals;

    struct Fixture {
        tags: BTreeMap<SourceFile, Arc<Vec<Tag>>>,
        chat: BTreeSet<PathBuf>,
        mentioned_files: BTreeSet<PathBuf>,
        mentioned_idents: BTreeSet<String>,
        weights: EdgeWeights,
        priors: PersonalizationPriors,
        params: RankingParams,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tags: BTreeMap::new(),
                chat: BTreeSet::new(),
                mentioned_files: BTreeSet::new(),
                mentioned_idents: BTreeSet::new(),
                weights: EdgeWeights::default(),
                priors: PersonalizationPriors::default(),
                params: RankingParams::default(),
            }
        }

        fn file(&mut self, rel: &str, defs: &[&str], refs: &[&str]) -> SourceFile {
            let file = SourceFile::new(format!("/repo/{rel}"), rel);
            let mut tags: Vec<Tag> = defs
                .iter()
                .enumerate()
                .map(|(i, d)| Tag::definition(&file, i + 1, *d))
                .collect();
            tags.extend(
                refs.iter()
                    .enumerate()
                    .map(|(i, r)| Tag::reference(&file, 100 + i, *r)),
            );
            self.tags.insert(file.clone(), Arc::new(tags));
            file
        }

        fn run(&self) -> (ReferenceGraph, FileRanks, Vec<RankedTag>) {
            let graph = ReferenceGraph::build(
                &self.tags,
                GraphSignals {
                    chat_files: &self.chat,
                    mentioned_files: &self.mentioned_files,
                    mentioned_idents: &self.mentioned_idents,
                    weights: &self.weights,
                },
            );
            let p = personalization(
                &graph,
                &self.tags,
                Priors {
                    chat_files: &self.chat,
                    mentioned_files: &self.mentioned_files,
                    mentioned_idents: &self.mentioned_idents,
                    weights: &self.priors,
                },
            );
            let ranks = pagerank(&graph, &p, &self.params);
            let ranked = rank_definitions(
                &graph,
                &ranks,
                &self.tags,
                &self.chat,
                self.weights.unreferenced_definition_weight,
            );
            (graph, ranks, ranked)
        }
    }

    fn names(ranked: &[RankedTag]) -> Vec<&str> {
        ranked.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_referenced_file_outranks_referrer() {
        let mut fx = Fixture::new();
        let alpha = fx.file("alpha.py", &["alpha"], &["beta"]);
        let beta = fx.file("beta.py", &["beta"], &[]);
        let (graph, ranks, ranked) = fx.run();

        assert!(ranks.of(&graph, &beta.abs_path) >= ranks.of(&graph, &alpha.abs_path));
        assert_eq!(names(&ranked), vec!["beta", "alpha"]);
    }

    #[test]
    fn test_rank_mass_is_preserved() {
        let mut fx = Fixture::new();
        fx.file("a.py", &["a"], &["b", "c"]);
        fx.file("b.py", &["b"], &["c"]);
        fx.file("c.py", &["c"], &[]);
        fx.file("d.py", &["d"], &[]);
        let (_, ranks, _) = fx.run();

        let total: f64 = ranks.as_slice().iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(ranks.converged);
    }

    #[test]
    fn test_all_isolated_files_keep_their_prior() {
        let mut fx = Fixture::new();
        fx.file("a.py", &["a"], &[]);
        fx.file("b.py", &["b"], &[]);
        let (_, ranks, _) = fx.run();
        for rank in ranks.as_slice() {
            assert!((rank - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_isolated_file_beside_edges_falls_below_prior() {
        let mut fx = Fixture::new();
        fx.file("a.py", &["a"], &["b"]);
        fx.file("b.py", &["b"], &["a"]);
        let lonely = fx.file("lonely.py", &["lonely"], &[]);
        let (graph, ranks, _) = fx.run();

        let prior = 1.0 / 3.0;
        let rank = ranks.of(&graph, &lonely.abs_path);
        assert!(rank > 0.0);
        assert!(rank < prior);
        let total: f64 = ranks.as_slice().iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unreferenced_file_stays_at_or_below_baseline() {
        let mut fx = Fixture::new();
        fx.file("a.py", &["a"], &["b"]);
        fx.file("b.py", &["b"], &["a"]);
        let lonely = fx.file("lonely.py", &["lonely"], &["a"]);
        let (graph, ranks, _) = fx.run();

        let baseline = 1.0 / 3.0;
        assert!(ranks.of(&graph, &lonely.abs_path) <= baseline + 1e-12);
    }

    #[test]
    fn test_iteration_cap_terminates() {
        let mut fx = Fixture::new();
        fx.file("a.py", &["a"], &["b"]);
        fx.file("b.py", &["b"], &["a"]);
        fx.params.max_iterations = 1;
        fx.params.tolerance = 0.0;
        let (_, ranks, _) = fx.run();
        assert_eq!(ranks.iterations, 1);
        assert!(!ranks.converged);
    }

    #[test]
    fn test_chat_files_excluded_but_propagate() {
        let mut fx = Fixture::new();
        let chat = fx.file("chat.py", &["main"], &["helper"]);
        fx.file("helper.py", &["helper"], &[]);
        fx.file("other.py", &["other"], &[]);
        fx.chat.insert(chat.abs_path);
        let (_, _, ranked) = fx.run();

        assert!(!names(&ranked).contains(&"main"));
        assert_eq!(names(&ranked)[0], "helper");
    }

    #[test]
    fn test_mentioned_file_is_boosted() {
        let mut fx = Fixture::new();
        fx.file("a.py", &["a"], &[]);
        let b = fx.file("b.py", &["b"], &[]);
        fx.mentioned_files.insert(b.abs_path);
        let (_, _, ranked) = fx.run();
        assert_eq!(names(&ranked), vec!["b", "a"]);
    }

    #[test]
    fn test_identifier_linked_file_is_boosted() {
        let mut fx = Fixture::new();
        fx.file("a.py", &["a"], &[]);
        fx.file("parser.py", &["parse"], &[]);
        fx.mentioned_idents.insert("parser".to_string());
        let (_, _, ranked) = fx.run();
        assert_eq!(ranked[0].rel_path, "parser.py");
    }

    #[test]
    fn test_apportionment_favors_referenced_definition() {
        let mut fx = Fixture::new();
        fx.file("lib.py", &["used", "unused"], &[]);
        fx.file("main.py", &[], &["used", "used"]);
        let (_, _, ranked) = fx.run();

        let used = ranked.iter().find(|t| t.name == "used").unwrap();
        let unused = ranked.iter().find(|t| t.name == "unused").unwrap();
        assert!(used.score > unused.score);
        assert!(unused.score > 0.0);
    }

    #[test]
    fn test_ties_break_by_path_then_line() {
        let mut fx = Fixture::new();
        fx.file("b.py", &["x"], &[]);
        fx.file("a.py", &["y", "z"], &[]);
        fx.file("c.py", &["w"], &[]);
        let (_, _, ranked) = fx.run();

        let a: Vec<_> = ranked.iter().filter(|t| t.rel_path == "a.py").collect();
        assert_eq!(a[0].name, "y");
        assert_eq!(a[1].name, "z");
        let order: Vec<_> = ranked
            .iter()
            .filter(|t| t.rel_path != "a.py")
            .map(|t| t.rel_path.as_str())
            .collect();
        assert_eq!(order, vec!["b.py", "c.py"]);
    }

    #[test]
    fn test_map_entries_append_untagged_files() {
        let mut fx = Fixture::new();
        fx.file("a.py", &["a"], &[]);
        fx.file("README.md", &[], &[]);
        let chat = fx.file("chat.py", &[], &[]);
        fx.chat.insert(chat.abs_path);
        let (graph, ranks, ranked) = fx.run();

        let entries = map_entries(&ranked, &graph, &ranks, &fx.chat);
        let paths: Vec<_> = entries.iter().map(MapEntry::rel_path).collect();
        assert_eq!(paths, vec!["a.py", "README.md"]);
        assert!(matches!(entries[1], MapEntry::File { .. }));
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let mut fx = Fixture::new();
        fx.file("a.py", &["a", "shared"], &["b", "c"]);
        fx.file("b.py", &["b", "shared"], &["c", "a"]);
        fx.file("c.py", &["c"], &["shared"]);
        assert_eq!(fx.run().2, fx.run().2);
    }
}
