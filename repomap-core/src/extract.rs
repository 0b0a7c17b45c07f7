//! Tag extraction capability and language dispatch

use crate::error::ExtractionError;
use crate::tag::{SourceFile, Tag};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Language identifier, detected from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("rs") => Some(Self::Rust),
            Some("py" | "pyi") => Some(Self::Python),
            Some("js" | "jsx" | "mjs" | "cjs") => Some(Self::JavaScript),
            Some("ts" | "mts" | "cts") => Some(Self::TypeScript),
            Some("tsx") => Some(Self::Tsx),
            Some("go") => Some(Self::Go),
            _ => None,
        }
    }
}

/// Produces the symbol occurrences of one file.
///
/// Implementations must be deterministic for a given file content; the tag
/// cache calls them from several threads at once.
pub trait TagExtractor: Send + Sync {
    fn extract_tags(
        &self,
        file: &SourceFile,
        language: Option<Language>,
    ) -> Result<Vec<Tag>, ExtractionError>;
}

/// Routes each file to the extractor registered for its language.
///
/// Files whose language has no extractor contribute zero tags.
#[derive(Default, Clone)]
pub struct ExtractorRegistry {
    by_language: HashMap<Language, Arc<dyn TagExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled tree-sitter extractor for every supported language
    pub fn with_tree_sitter() -> Self {
        let extractor: Arc<dyn TagExtractor> = Arc::new(crate::parse::TreeSitterExtractor);
        let mut registry = Self::new();
        for language in crate::parse::TreeSitterExtractor::LANGUAGES {
            registry.register(*language, Arc::clone(&extractor));
        }
        registry
    }

    pub fn register(&mut self, language: Language, extractor: Arc<dyn TagExtractor>) {
        self.by_language.insert(language, extractor);
    }

    pub fn supports(&self, language: Language) -> bool {
        self.by_language.contains_key(&language)
    }
}

impl TagExtractor for ExtractorRegistry {
    fn extract_tags(
        &self,
        file: &SourceFile,
        language: Option<Language>,
    ) -> Result<Vec<Tag>, ExtractionError> {
        let language = language.or_else(|| Language::from_path(&file.abs_path));
        match language.and_then(|l| self.by_language.get(&l).map(|e| (l, e))) {
            Some((language, extractor)) => extractor.extract_tags(file, Some(language)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(AtomicUsize);

    impl TagExtractor for Fixed {
        fn extract_tags(
            &self,
            file: &SourceFile,
            _language: Option<Language>,
        ) -> Result<Vec<Tag>, ExtractionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Tag::definition(file, 1, "fixed")])
        }
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(Language::from_path(Path::new("src/main.rs")), Some(Language::Rust));
        assert_eq!(Language::from_path(Path::new("app.tsx")), Some(Language::Tsx));
        assert_eq!(Language::from_path(Path::new("app.ts")), Some(Language::TypeScript));
        assert_eq!(Language::from_path(Path::new("script.mjs")), Some(Language::JavaScript));
        assert_eq!(Language::from_path(Path::new("main.go")), Some(Language::Go));
        assert_eq!(Language::from_path(Path::new("README.md")), None);
    }

    #[test]
    fn test_registry_dispatches_by_language() {
        let fixed = Arc::new(Fixed(AtomicUsize::new(0)));
        let mut registry = ExtractorRegistry::new();
        registry.register(Language::Python, fixed.clone());

        let py = SourceFile::new("/repo/a.py", "a.py");
        let md = SourceFile::new("/repo/README.md", "README.md");
        assert_eq!(registry.extract_tags(&py, None).unwrap().len(), 1);
        assert!(registry.extract_tags(&md, None).unwrap().is_empty());
        assert_eq!(fixed.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registry_honors_language_hint() {
        let fixed = Arc::new(Fixed(AtomicUsize::new(0)));
        let mut registry = ExtractorRegistry::new();
        registry.register(Language::Go, fixed);

        let odd = SourceFile::new("/repo/BUILD", "BUILD");
        assert_eq!(registry.extract_tags(&odd, Some(Language::Go)).unwrap().len(), 1);
    }

    #[test]
    fn test_tree_sitter_registry_supports_all_languages() {
        let registry = ExtractorRegistry::with_tree_sitter();
        for language in [Language::Rust, Language::Python, Language::Go, Language::Tsx] {
            assert!(registry.supports(language));
        }
    }
}
