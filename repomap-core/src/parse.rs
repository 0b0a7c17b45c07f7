//! Tree-sitter tag extraction for code files

use crate::error::ExtractionError;
use crate::extract::{Language, TagExtractor};
use crate::tag::{SourceFile, Tag};
use std::fs;

/// Extracts definition and reference tags with the bundled tree-sitter grammars
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeSitterExtractor;

impl TreeSitterExtractor {
    pub const LANGUAGES: &'static [Language] = &[
        Language::Rust,
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Tsx,
        Language::Go,
    ];

    /// Extract tags from in-memory source
    pub fn extract_source(
        &self,
        file: &SourceFile,
        source: &str,
        language: Language,
    ) -> Result<Vec<Tag>, ExtractionError> {
        let mut parser = tree_sitter::Parser::new();
        let grammar: tree_sitter::Language = match language {
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
        };

        parser
            .set_language(&grammar)
            .map_err(|e| ExtractionError::new(&file.abs_path, e.to_string()))?;

        let tree = parser.parse(source, None).ok_or_else(|| {
            ExtractionError::new(&file.abs_path, "tree-sitter produced no tree")
        })?;

        let mut tags = Vec::new();
        collect_tags(&tree.root_node(), source, file, language, &mut tags);
        Ok(tags)
    }
}

impl TagExtractor for TreeSitterExtractor {
    fn extract_tags(
        &self,
        file: &SourceFile,
        language: Option<Language>,
    ) -> Result<Vec<Tag>, ExtractionError> {
        let Some(language) = language.or_else(|| Language::from_path(&file.abs_path)) else {
            return Ok(Vec::new());
        };
        let bytes = fs::read(&file.abs_path)
            .map_err(|e| ExtractionError::new(&file.abs_path, e.to_string()))?;
        let source = String::from_utf8_lossy(&bytes);
        self.extract_source(file, &source, language)
    }
}

/// Recursively collect definitions and references
fn collect_tags(
    node: &tree_sitter::Node,
    source: &str,
    file: &SourceFile,
    language: Language,
    tags: &mut Vec<Tag>,
) {
    if let Some(name_node) = definition_name(node, language) {
        let name = node_text(&name_node, source);
        if !name.is_empty() {
            let line = node.start_position().row + 1;
            tags.push(Tag::definition(file, line, name).with_signature(first_line(node, source)));
        }
    }

    collect_references(node, source, file, language, tags);

    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            collect_tags(&child, source, file, language, tags);
        }
    }
}

/// Name node of a definition, if `node` declares something worth mapping
fn definition_name<'a>(
    node: &tree_sitter::Node<'a>,
    language: Language,
) -> Option<tree_sitter::Node<'a>> {
    let kind = node.kind();
    let declares = match language {
        Language::Rust => matches!(
            kind,
            "function_item"
                | "function_signature_item"
                | "struct_item"
                | "enum_item"
                | "union_item"
                | "trait_item"
                | "type_item"
                | "mod_item"
                | "macro_definition"
                | "const_item"
                | "static_item"
        ),
        Language::Python => matches!(kind, "function_definition" | "class_definition"),
        Language::JavaScript | Language::TypeScript | Language::Tsx => {
            if kind == "variable_declarator" {
                // const handler = () => {...}
                let value = node.child_by_field_name("value")?;
                matches!(value.kind(), "arrow_function" | "function_expression" | "function")
            } else {
                matches!(
                    kind,
                    "function_declaration"
                        | "generator_function_declaration"
                        | "class_declaration"
                        | "abstract_class_declaration"
                        | "method_definition"
                        | "interface_declaration"
                        | "type_alias_declaration"
                        | "enum_declaration"
                )
            }
        }
        Language::Go => matches!(
            kind,
            "function_declaration" | "method_declaration" | "type_spec"
        ),
    };

    if declares {
        node.child_by_field_name("name")
    } else {
        None
    }
}

/// Extract references (calls, imports, type uses) from a tree-sitter node
fn collect_references(
    node: &tree_sitter::Node,
    source: &str,
    file: &SourceFile,
    language: Language,
    tags: &mut Vec<Tag>,
) {
    let kind = node.kind();
    let line = node.start_position().row + 1;

    match (language, kind) {
        // foo(), obj.foo(), module::foo(), pkg.Foo()
        (Language::Python, "call") | (_, "call_expression") => {
            if let Some(func) = node.child_by_field_name("function") {
                let name = call_target(&func, source);
                if !name.is_empty() {
                    tags.push(Tag::reference(file, line, name));
                }
            }
        }
        // import beta / from pkg.mod import Name
        (Language::Python, "import_statement" | "import_from_statement") => {
            for i in 0..node.child_count() {
                let Some(child) = node.child(i) else { continue };
                let name = match child.kind() {
                    "dotted_name" => node_text(&child, source),
                    "aliased_import" => child
                        .child_by_field_name("name")
                        .map(|n| node_text(&n, source))
                        .unwrap_or_default(),
                    _ => continue,
                };
                if let Some(last) = name.rsplit('.').next().filter(|s| !s.is_empty()) {
                    tags.push(Tag::reference(file, child.start_position().row + 1, last));
                }
            }
        }
        (Language::JavaScript | Language::TypeScript | Language::Tsx, "import_statement") => {
            for i in 0..node.child_count() {
                if let Some(child) = node.child(i) {
                    import_names(&child, source, file, tags);
                }
            }
        }
        (Language::Rust, "use_declaration") => {
            for i in 0..node.child_count() {
                if let Some(child) = node.child(i) {
                    rust_use_names(&child, source, file, tags);
                }
            }
        }
        (Language::Go, "import_spec") => {
            if let Some(path_node) = node.child_by_field_name("path") {
                let path = node_text(&path_node, source);
                let path = path.trim_matches('"');
                if let Some(last) = path.rsplit('/').next().filter(|s| !s.is_empty()) {
                    tags.push(Tag::reference(file, line, last));
                }
            }
        }
        // Type names used outside their own declaration
        (Language::Rust | Language::TypeScript | Language::Tsx | Language::Go, "type_identifier") => {
            if !is_declared_name(node) {
                let name = node_text(node, source);
                if !name.is_empty() {
                    tags.push(Tag::reference(file, line, name));
                }
            }
        }
        _ => {}
    }
}

/// Extract the called name from a call's function node
fn call_target(func_node: &tree_sitter::Node, source: &str) -> String {
    match func_node.kind() {
        "identifier" => node_text(func_node, source),
        "member_expression" | "attribute" | "field_expression" => {
            // obj.method or obj.attr
            func_node
                .child_by_field_name("property")
                .or_else(|| func_node.child_by_field_name("attribute"))
                .or_else(|| func_node.child_by_field_name("field"))
                .map(|p| node_text(&p, source))
                .unwrap_or_default()
        }
        // Rust: module::function
        "scoped_identifier" => func_node
            .child_by_field_name("name")
            .map(|n| node_text(&n, source))
            .unwrap_or_default(),
        // Go: obj.Method
        "selector_expression" => func_node
            .child_by_field_name("field")
            .map(|f| node_text(&f, source))
            .unwrap_or_default(),
        // Rust: Vec::<T>::new, JS: foo<T>()
        "generic_function" => func_node
            .child_by_field_name("function")
            .map(|f| call_target(&f, source))
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// Extract import names from JS/TS import clauses
fn import_names(node: &tree_sitter::Node, source: &str, file: &SourceFile, tags: &mut Vec<Tag>) {
    match node.kind() {
        "import_clause" | "named_imports" | "import_specifier" | "namespace_import" => {
            for i in 0..node.child_count() {
                if let Some(child) = node.child(i) {
                    import_names(&child, source, file, tags);
                }
            }
        }
        "identifier" => {
            let name = node_text(node, source);
            if !name.is_empty() {
                tags.push(Tag::reference(file, node.start_position().row + 1, name));
            }
        }
        _ => {}
    }
}

/// Extract use names from Rust use declarations
fn rust_use_names(node: &tree_sitter::Node, source: &str, file: &SourceFile, tags: &mut Vec<Tag>) {
    match node.kind() {
        "use_tree" | "use_list" | "scoped_use_list" | "use_as_clause" => {
            for i in 0..node.child_count() {
                if let Some(child) = node.child(i) {
                    rust_use_names(&child, source, file, tags);
                }
            }
        }
        "identifier" => {
            let name = node_text(node, source);
            if !name.is_empty() {
                tags.push(Tag::reference(file, node.start_position().row + 1, name));
            }
        }
        "scoped_identifier" => {
            if let Some(name_node) = node.child_by_field_name("name") {
                let name = node_text(&name_node, source);
                if !name.is_empty() {
                    tags.push(Tag::reference(file, node.start_position().row + 1, name));
                }
            }
        }
        _ => {}
    }
}

/// True when `node` is the `name` field of its parent (i.e. the thing being declared)
fn is_declared_name(node: &tree_sitter::Node) -> bool {
    node.parent()
        .and_then(|p| p.child_by_field_name("name"))
        .is_some_and(|n| n.id() == node.id())
}

fn node_text(node: &tree_sitter::Node, source: &str) -> String {
    source[node.start_byte()..node.end_byte()].to_string()
}

fn first_line(node: &tree_sitter::Node, source: &str) -> String {
    source[node.start_byte()..node.end_byte()]
        .lines()
        .next()
        .unwrap_or_default()
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::TagKind;

    fn extract(path: &str, source: &str, language: Language) -> Vec<Tag> {
        let file = SourceFile::new(format!("/repo/{path}"), path);
        TreeSitterExtractor.extract_source(&file, source, language).unwrap()
    }

    fn names(tags: &[Tag], kind: TagKind) -> Vec<&str> {
        tags.iter().filter(|t| t.kind == kind).map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_python_definitions_and_references() {
        let source = "import beta\n\ndef alpha():\n    return beta.beta()\n";
        let tags = extract("alpha.py", source, Language::Python);

        assert_eq!(names(&tags, TagKind::Definition), vec!["alpha"]);
        let refs = names(&tags, TagKind::Reference);
        assert!(refs.contains(&"beta"));

        let alpha = tags.iter().find(|t| t.name == "alpha").unwrap();
        assert_eq!(alpha.line, 3);
        assert_eq!(alpha.signature.as_deref(), Some("def alpha():"));
        assert_eq!(alpha.rel_path, "alpha.py");
    }

    #[test]
    fn test_python_class_and_method() {
        let source = "class MyClass:\n    def my_method(self, a):\n        return a\n";
        let tags = extract("m.py", source, Language::Python);
        let defs = names(&tags, TagKind::Definition);
        assert_eq!(defs, vec!["MyClass", "my_method"]);
        let method = tags.iter().find(|t| t.name == "my_method").unwrap();
        assert_eq!(method.line, 2);
    }

    #[test]
    fn test_python_from_import_uses_last_segment() {
        let source = "from pkg.models import Widget\nw = Widget()\n";
        let tags = extract("m.py", source, Language::Python);
        let refs = names(&tags, TagKind::Reference);
        assert!(refs.contains(&"models"));
        assert!(refs.contains(&"Widget"));
    }

    #[test]
    fn test_rust_definitions_and_type_references() {
        let source = r#"
use crate::config::Config;

struct Foo {
    bar: Config,
}

impl Foo {
    fn new() -> Self {
        helper();
        Self { bar: Config::default() }
    }
}
"#;
        let tags = extract("src/foo.rs", source, Language::Rust);
        let defs = names(&tags, TagKind::Definition);
        assert!(defs.contains(&"Foo"));
        assert!(defs.contains(&"new"));

        let refs = names(&tags, TagKind::Reference);
        assert!(refs.contains(&"Config"));
        assert!(refs.contains(&"helper"));
        assert!(refs.contains(&"default"));
        // The struct's own name is a definition, not a reference
        let foo_refs: Vec<_> = tags
            .iter()
            .filter(|t| t.name == "Foo" && t.kind == TagKind::Reference)
            .map(|t| t.line)
            .collect();
        assert!(!foo_refs.contains(&4));
    }

    #[test]
    fn test_tsx_arrow_component_is_definition() {
        let source = "import React from 'react';\n\nexport const App: React.FC = () => <div>Dashboard</div>;\n";
        let tags = extract("frontend/ui.tsx", source, Language::Tsx);
        assert!(names(&tags, TagKind::Definition).contains(&"App"));
        assert!(names(&tags, TagKind::Reference).contains(&"React"));
    }

    #[test]
    fn test_typescript_interface_and_call() {
        let source = "interface Greeter { greet(): string }\nfunction greet(g: Greeter) { return g.greet(); }\n";
        let tags = extract("g.ts", source, Language::TypeScript);
        let defs = names(&tags, TagKind::Definition);
        assert!(defs.contains(&"Greeter"));
        assert!(defs.contains(&"greet"));
        let refs = names(&tags, TagKind::Reference);
        assert!(refs.contains(&"Greeter"));
        assert!(refs.contains(&"greet"));
    }

    #[test]
    fn test_go_method_and_type() {
        let source = "package main\n\nimport \"net/http\"\n\ntype Server struct{}\n\nfunc (s *Server) Serve() { http.ListenAndServe(\":80\", nil) }\n";
        let tags = extract("main.go", source, Language::Go);
        let defs = names(&tags, TagKind::Definition);
        assert!(defs.contains(&"Server"));
        assert!(defs.contains(&"Serve"));
        let refs = names(&tags, TagKind::Reference);
        assert!(refs.contains(&"http"));
        assert!(refs.contains(&"ListenAndServe"));
        assert!(refs.contains(&"Server"));
    }

    #[test]
    fn test_missing_file_is_extraction_error() {
        let file = SourceFile::new("/definitely/not/here.py", "here.py");
        let err = TreeSitterExtractor
            .extract_tags(&file, Some(Language::Python))
            .unwrap_err();
        assert_eq!(err.path, file.abs_path);
    }

    #[test]
    fn test_unknown_language_yields_no_tags() {
        let file = SourceFile::new("/repo/notes.txt", "notes.txt");
        assert!(TreeSitterExtractor.extract_tags(&file, None).unwrap().is_empty());
    }
}
