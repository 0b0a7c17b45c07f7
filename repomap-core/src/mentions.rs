//! Free-text context to mentioned files and identifiers

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Files and identifiers a piece of context points at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mentions {
    /// Repository-relative paths
    pub files: BTreeSet<String>,
    pub identifiers: BTreeSet<String>,
}

/// Turns context text into candidate mentions
pub trait MentionResolver: Send + Sync {
    /// `repo_files` are the repository's relative paths, `chat_files` the
    /// relative paths already in the chat
    fn resolve_mentions(
        &self,
        context: &str,
        repo_files: &[String],
        chat_files: &BTreeSet<String>,
    ) -> Mentions;
}

/// Word-based resolver: exact relative paths, unique distinctive basenames,
/// and every word as a candidate identifier
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextMentionResolver;

const TRAILING_PUNCTUATION: &[char] = &[',', '.', '!', ';', ':', '?'];
const QUOTES: &[char] = &['"', '\'', '`', '*', '_'];

impl MentionResolver for ContextMentionResolver {
    fn resolve_mentions(
        &self,
        context: &str,
        repo_files: &[String],
        chat_files: &BTreeSet<String>,
    ) -> Mentions {
        Mentions {
            files: file_mentions(context, repo_files, chat_files),
            identifiers: identifiers(context),
        }
    }
}

/// Maximal runs of word characters
pub fn identifiers(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn file_mentions(
    text: &str,
    repo_files: &[String],
    chat_files: &BTreeSet<String>,
) -> BTreeSet<String> {
    let words: BTreeSet<String> = text
        .split_whitespace()
        .map(|w| w.trim_end_matches(TRAILING_PUNCTUATION))
        .map(|w| w.trim_matches(QUOTES))
        .filter(|w| !w.is_empty())
        .map(|w| w.replace('\\', "/"))
        .collect();

    let mut mentioned: BTreeSet<String> = repo_files
        .iter()
        .filter(|rel| words.contains(rel.as_str()))
        .cloned()
        .collect();

    let mut by_basename: HashMap<&str, Vec<&String>> = HashMap::new();
    for rel in repo_files {
        let name = basename(rel);
        if name.contains(['/', '\\', '.', '_', '-']) {
            by_basename.entry(name).or_default().push(rel);
        }
    }
    let chat_basenames: BTreeSet<&str> = chat_files.iter().map(|rel| basename(rel)).collect();

    for (name, rels) in by_basename {
        if chat_basenames.contains(name) || rels.len() != 1 {
            continue;
        }
        if words.contains(name) {
            mentioned.insert(rels[0].clone());
        }
    }
    mentioned
}

/// Files whose stem equals an identifier, case-insensitively. Identifiers and
/// stems shorter than five characters never match.
pub fn files_named_by(identifiers: &BTreeSet<String>, repo_files: &[String]) -> BTreeSet<String> {
    let mut by_stem: HashMap<String, Vec<&String>> = HashMap::new();
    for rel in repo_files {
        let Some(stem) = Path::new(rel).file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.chars().count() < 5 {
            continue;
        }
        by_stem.entry(stem.to_lowercase()).or_default().push(rel);
    }

    identifiers
        .iter()
        .filter(|ident| ident.chars().count() >= 5)
        .filter_map(|ident| by_stem.get(&ident.to_lowercase()))
        .flatten()
        .map(|rel| (*rel).clone())
        .collect()
}

fn basename(rel: &str) -> &str {
    rel.rsplit('/').next().unwrap_or(rel)
}
