//! Map rendering and token-budget fitting

use crate::rank::MapEntry;
use crate::tokens::TokenCounter;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LINE_PREFIX: char = '│';
const GAP_MARKER: &str = "⋮";

/// Source lines of one file with their indentation, read once per request
#[derive(Debug)]
struct FileLines {
    lines: Vec<String>,
    /// Leading whitespace width, `None` for blank lines
    indents: Vec<Option<usize>>,
}

impl FileLines {
    fn parse(source: &str) -> Self {
        let lines: Vec<String> = source.lines().map(str::to_string).collect();
        let indents = lines
            .iter()
            .map(|l| {
                if l.trim().is_empty() {
                    None
                } else {
                    Some(l.len() - l.trim_start().len())
                }
            })
            .collect();
        Self { lines, indents }
    }

    /// `idx` plus the nearest preceding non-blank lines with strictly smaller
    /// indentation, outermost last
    fn with_scopes(&self, idx: usize) -> Vec<usize> {
        let mut shown = vec![idx];
        let Some(mut indent) = self.indents.get(idx).copied().flatten() else {
            return shown;
        };
        for candidate in (0..idx).rev() {
            if indent == 0 {
                break;
            }
            if let Some(candidate_indent) = self.indents[candidate] {
                if candidate_indent < indent {
                    shown.push(candidate);
                    indent = candidate_indent;
                }
            }
        }
        shown
    }
}

/// Line data reused across the renders of one budget search
#[derive(Debug, Default)]
pub struct LineContextCache {
    files: HashMap<PathBuf, Option<Arc<FileLines>>>,
}

impl LineContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lines(&mut self, path: &Path) -> Option<Arc<FileLines>> {
        self.files
            .entry(path.to_path_buf())
            .or_insert_with(|| match fs::read(path) {
                Ok(bytes) => Some(Arc::new(FileLines::parse(&String::from_utf8_lossy(&bytes)))),
                Err(e) => {
                    tracing::debug!("cannot read {} for rendering: {e}", path.display());
                    None
                }
            })
            .clone()
    }
}

/// Render `entries` as a map: files in path order, each tagged file as a
/// header followed by its tag lines and their enclosing scopes.
pub fn render(entries: &[MapEntry], max_line_length: usize, cache: &mut LineContextCache) -> String {
    let mut groups: BTreeMap<&str, Vec<&MapEntry>> = BTreeMap::new();
    for entry in entries {
        groups.entry(entry.rel_path()).or_default().push(entry);
    }

    let mut out = String::new();
    for (rel_path, group) in groups {
        let tags: Vec<_> = group
            .iter()
            .filter_map(|e| match e {
                MapEntry::Tag(tag) => Some(tag),
                MapEntry::File { .. } => None,
            })
            .collect();

        out.push('\n');
        if tags.is_empty() {
            out.push_str(rel_path);
            out.push('\n');
            continue;
        }
        out.push_str(rel_path);
        out.push_str(":\n");

        let Some(lines) = cache.lines(&tags[0].abs_path) else {
            for tag in &tags {
                let text = tag.signature.as_deref().unwrap_or(&tag.name);
                push_line(&mut out, text, max_line_length);
            }
            continue;
        };

        let shown: BTreeSet<usize> = tags
            .iter()
            .filter_map(|t| t.line.checked_sub(1))
            .filter(|&idx| idx < lines.lines.len())
            .flat_map(|idx| lines.with_scopes(idx))
            .collect();
        render_lines(&mut out, &lines, &shown, max_line_length);
    }
    out
}

fn render_lines(out: &mut String, lines: &FileLines, shown: &BTreeSet<usize>, max_line_length: usize) {
    let mut previous: Option<usize> = None;
    for &idx in shown {
        let gap = match previous {
            None => idx > 0,
            Some(prev) => idx > prev + 1,
        };
        if gap {
            out.push_str(GAP_MARKER);
            out.push('\n');
        }
        push_line(out, &lines.lines[idx], max_line_length);
        previous = Some(idx);
    }
    if previous.is_some_and(|last| last + 1 < lines.lines.len()) {
        out.push_str(GAP_MARKER);
        out.push('\n');
    }
}

fn push_line(out: &mut String, text: &str, max_line_length: usize) {
    out.push(LINE_PREFIX);
    out.extend(text.chars().take(max_line_length));
    out.push('\n');
}

/// Outcome of fitting a ranked list into a token budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetFit {
    /// Number of leading entries rendered
    pub count: usize,
    pub text: String,
    pub tokens: usize,
    /// Even a single entry exceeds the budget; `text` holds that single entry
    pub budget_too_small: bool,
}

/// Largest prefix of `entries` whose rendering fits in `budget` tokens.
///
/// Binary search over the prefix length assumes the rendered size grows with
/// the prefix. When no prefix fits, the one-entry rendering is returned with
/// `budget_too_small` set.
pub fn fit_to_budget(
    entries: &[MapEntry],
    budget: usize,
    counter: &dyn TokenCounter,
    max_line_length: usize,
    cache: &mut LineContextCache,
) -> BudgetFit {
    if entries.is_empty() {
        return BudgetFit {
            count: 0,
            text: String::new(),
            tokens: 0,
            budget_too_small: false,
        };
    }

    let mut best: Option<BudgetFit> = None;
    let (mut lo, mut hi) = (1, entries.len());
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let text = render(&entries[..mid], max_line_length, cache);
        let tokens = counter.count_tokens(&text);
        if tokens <= budget {
            best = Some(BudgetFit {
                count: mid,
                text,
                tokens,
                budget_too_small: false,
            });
            lo = mid + 1;
        } else {
            hi = mid - 1;
        }
    }

    best.unwrap_or_else(|| {
        let text = render(&entries[..1], max_line_length, cache);
        let tokens = counter.count_tokens(&text);
        tracing::debug!("budget of {budget} tokens too small; one entry needs {tokens}");
        BudgetFit {
            count: 1,
            text,
            tokens,
            budget_too_small: true,
        }
    })
}
