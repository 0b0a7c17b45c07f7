//! Weighted reference multigraph over the files of a working set

use crate::config::EdgeWeights;
use crate::tag::{SourceFile, Tag};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One reference-to-definition link between two files
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    /// Identifier that produced the edge
    pub ident: String,
    pub weight: f64,
    /// Line of the reference in the source file
    pub reference_line: usize,
    /// Line of the definition in the target file
    pub definition_line: usize,
}

/// Identity of a definition tag within the graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionKey {
    pub path: PathBuf,
    pub line: usize,
    pub name: String,
}

impl DefinitionKey {
    pub fn of(tag: &Tag) -> Self {
        Self {
            path: tag.abs_path.clone(),
            line: tag.line,
            name: tag.name.clone(),
        }
    }
}

/// Signals that shape edge weights for one request
#[derive(Debug, Clone, Copy)]
pub struct GraphSignals<'a> {
    pub chat_files: &'a BTreeSet<PathBuf>,
    pub mentioned_files: &'a BTreeSet<PathBuf>,
    pub mentioned_idents: &'a BTreeSet<String>,
    pub weights: &'a EdgeWeights,
}

/// Directed multigraph: nodes are files, edges run from a referencing file to
/// the file defining the referenced identifier. Parallel edges are kept.
#[derive(Debug, Default)]
pub struct ReferenceGraph {
    graph: DiGraph<SourceFile, EdgeRecord>,
    nodes: HashMap<PathBuf, NodeIndex>,
    /// Weight each definition receives from incoming edges and same-file references
    definition_weights: HashMap<DefinitionKey, f64>,
}

impl ReferenceGraph {
    /// Build the graph for `tags`, one entry per file of the working set.
    ///
    /// Nodes and edges are added in path order, so identical inputs always
    /// produce identical node indices and edge lists.
    pub fn build(tags: &BTreeMap<SourceFile, Arc<Vec<Tag>>>, signals: GraphSignals<'_>) -> Self {
        let mut graph = Self::default();
        for file in tags.keys() {
            graph.add_file(file.clone());
        }

        let mut definitions: BTreeMap<&str, Vec<&Tag>> = BTreeMap::new();
        for tag in tags.values().flat_map(|t| t.iter()).filter(|t| t.is_definition()) {
            definitions.entry(tag.name.as_str()).or_default().push(tag);
        }
        let defining_files: HashMap<&str, usize> = definitions
            .iter()
            .map(|(name, defs)| {
                let files: BTreeSet<&Path> = defs.iter().map(|d| d.abs_path.as_path()).collect();
                (*name, files.len())
            })
            .collect();

        for (file, file_tags) in tags {
            let Some(&source) = graph.nodes.get(&file.abs_path) else {
                continue;
            };
            for reference in file_tags.iter().filter(|t| !t.is_definition()) {
                let Some(defs) = definitions.get(reference.name.as_str()) else {
                    continue;
                };
                let defined_in = defining_files.get(reference.name.as_str()).copied().unwrap_or(1);

                for def in defs {
                    let weight = edge_weight(&reference.name, defined_in, file, def, signals);
                    *graph
                        .definition_weights
                        .entry(DefinitionKey::of(def))
                        .or_insert(0.0) += weight;

                    if def.abs_path == file.abs_path {
                        continue;
                    }
                    let Some(&target) = graph.nodes.get(&def.abs_path) else {
                        continue;
                    };
                    graph.graph.add_edge(
                        source,
                        target,
                        EdgeRecord {
                            ident: reference.name.clone(),
                            weight,
                            reference_line: reference.line,
                            definition_line: def.line,
                        },
                    );
                }
            }
        }

        tracing::debug!(
            "reference graph: {} files, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        graph
    }

    fn add_file(&mut self, file: SourceFile) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(&file.abs_path) {
            return idx;
        }
        let path = file.abs_path.clone();
        let idx = self.graph.add_node(file);
        self.nodes.insert(path, idx);
        idx
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Files in node-index order
    pub fn files(&self) -> impl Iterator<Item = &SourceFile> + '_ {
        self.graph.node_indices().map(|idx| &self.graph[idx])
    }

    pub fn index_of(&self, path: &Path) -> Option<usize> {
        self.nodes.get(path).map(|idx| idx.index())
    }

    /// Every edge as (source file, target file, record)
    pub fn edges(&self) -> impl Iterator<Item = (&SourceFile, &SourceFile, &EdgeRecord)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (&self.graph[e.source()], &self.graph[e.target()], e.weight()))
    }

    /// Edges arriving at node `idx` as (source index, weight)
    pub fn incoming(&self, idx: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.graph
            .edges_directed(NodeIndex::new(idx), Direction::Incoming)
            .map(|e| (e.source().index(), e.weight().weight))
    }

    /// Total weight leaving each node, indexed by node
    pub fn out_weights(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.graph.node_count()];
        for edge in self.graph.edge_references() {
            totals[edge.source().index()] += edge.weight().weight;
        }
        totals
    }

    /// Sum of reference weight received by one definition, including references
    /// from its own file
    pub fn definition_weight(&self, tag: &Tag) -> f64 {
        self.definition_weights
            .get(&DefinitionKey::of(tag))
            .copied()
            .unwrap_or(0.0)
    }
}

fn edge_weight(
    ident: &str,
    defined_in: usize,
    source: &SourceFile,
    definition: &Tag,
    signals: GraphSignals<'_>,
) -> f64 {
    let w = signals.weights;
    let mut weight = 1.0 / defined_in.max(1) as f64;

    if signals.mentioned_idents.contains(ident)
        || signals.mentioned_files.contains(&definition.abs_path)
    {
        weight *= w.mention_boost;
    }
    if signals.chat_files.contains(&source.abs_path) {
        weight *= w.chat_boost;
    }
    if is_descriptive(ident) {
        weight *= w.descriptive_ident_factor;
    }
    if ident.starts_with('_') {
        weight *= w.private_ident_factor;
    }
    if defined_in > w.widely_defined_threshold {
        weight *= w.widely_defined_factor;
    }
    weight
}

/// Long identifiers in snake_case, kebab-case or camelCase
fn is_descriptive(ident: &str) -> bool {
    if ident.chars().count() < 8 {
        return false;
    }
    let has_alpha = ident.chars().any(char::is_alphabetic);
    let snake = ident.contains('_') && has_alpha;
    let kebab = ident.contains('-') && has_alpha;
    let camel = ident.chars().any(char::is_uppercase) && ident.chars().any(char::is_lowercase);
    snake || kebab || camel
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        tags: BTreeMap<SourceFile, Arc<Vec<Tag>>>,
        weights: EdgeWeights,
        chat: BTreeSet<PathBuf>,
        mentioned_files: BTreeSet<PathBuf>,
        mentioned_idents: BTreeSet<String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tags: BTreeMap::new(),
                weights: EdgeWeights::default(),
                chat: BTreeSet::new(),
                mentioned_files: BTreeSet::new(),
                mentioned_idents: BTreeSet::new(),
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

        fn build(&self) -> ReferenceGraph {
            ReferenceGraph::build(
                &self.tags,
                GraphSignals {
                    chat_files: &self.chat,
                    mentioned_files: &self.mentioned_files,
                    mentioned_idents: &self.mentioned_idents,
                    weights: &self.weights,
                },
            )
        }
    }

    fn edge_weights(graph: &ReferenceGraph) -> Vec<(String, String, String, f64)> {
        graph
            .edges()
            .map(|(s, t, e)| (s.rel_path.clone(), t.rel_path.clone(), e.ident.clone(), e.weight))
            .collect()
    }

    #[test]
    fn test_reference_creates_edge_to_definer() {
        let mut fx = Fixture::new();
        fx.file("alpha.py", &["alpha"], &["beta"]);
        fx.file("beta.py", &["beta"], &[]);
        let graph = fx.build();

        assert_eq!(graph.node_count(), 2);
        let edges = edge_weights(&graph);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].0, "alpha.py");
        assert_eq!(edges[0].1, "beta.py");
        assert_eq!(edges[0].2, "beta");
        assert!(edges[0].3 > 0.0);
    }

    #[test]
    fn test_self_references_are_not_edges() {
        let mut fx = Fixture::new();
        let a = fx.file("a.py", &["helper"], &["helper", "helper"]);
        let graph = fx.build();

        assert_eq!(graph.edge_count(), 0);
        let def = Tag::definition(&a, 1, "helper");
        assert!((graph.definition_weight(&def) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_repeated_references_keep_parallel_edges() {
        let mut fx = Fixture::new();
        fx.file("a.py", &[], &["util", "util", "util"]);
        fx.file("b.py", &["util"], &[]);
        let graph = fx.build();

        assert_eq!(graph.edge_count(), 3);
        assert!((graph.out_weights()[0] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rarity_divides_by_defining_files() {
        let mut fx = Fixture::new();
        fx.file("a.py", &[], &["run"]);
        fx.file("b.py", &["run"], &[]);
        fx.file("c.py", &["run"], &[]);
        let graph = fx.build();

        for (_, _, _, weight) in edge_weights(&graph) {
            assert!((weight - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_boosts_raise_weight() {
        let mut plain = Fixture::new();
        plain.file("a.py", &[], &["run"]);
        plain.file("b.py", &["run"], &[]);
        let base = edge_weights(&plain.build())[0].3;

        let mut mentioned = Fixture::new();
        mentioned.file("a.py", &[], &["run"]);
        mentioned.file("b.py", &["run"], &[]);
        mentioned.mentioned_idents.insert("run".to_string());
        assert!(edge_weights(&mentioned.build())[0].3 > base);

        let mut file_mention = Fixture::new();
        file_mention.file("a.py", &[], &["run"]);
        let b = file_mention.file("b.py", &["run"], &[]);
        file_mention.mentioned_files.insert(b.abs_path);
        assert!(edge_weights(&file_mention.build())[0].3 > base);

        let mut chat = Fixture::new();
        let a = chat.file("a.py", &[], &["run"]);
        chat.file("b.py", &["run"], &[]);
        chat.chat.insert(a.abs_path);
        assert!(edge_weights(&chat.build())[0].3 > base);
    }

    #[test]
    fn test_identifier_shape_factors() {
        assert!(is_descriptive("load_config"));
        assert!(is_descriptive("loadConfig"));
        assert!(is_descriptive("load-config"));
        assert!(!is_descriptive("load"));
        assert!(!is_descriptive("loadconfig"));

        let mut fx = Fixture::new();
        fx.file("a.py", &[], &["_tmp", "tmp"]);
        fx.file("b.py", &["_tmp", "tmp"], &[]);
        let edges = edge_weights(&fx.build());
        let private = edges.iter().find(|e| e.2 == "_tmp").unwrap().3;
        let public = edges.iter().find(|e| e.2 == "tmp").unwrap().3;
        assert!(private < public);
    }

    #[test]
    fn test_isolated_files_are_nodes() {
        let mut fx = Fixture::new();
        fx.file("lonely.py", &["lonely"], &[]);
        fx.file("other.py", &[], &[]);
        let graph = fx.build();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_build_is_reproducible() {
        let mut fx = Fixture::new();
        fx.file("a.py", &["a"], &["b", "c"]);
        fx.file("b.py", &["b"], &["c", "a"]);
        fx.file("c.py", &["c"], &["a"]);
        assert_eq!(edge_weights(&fx.build()), edge_weights(&fx.build()));
    }
}
