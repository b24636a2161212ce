//! Rust symbol extraction using tree-sitter-rust.
//!
//! Extracts function/type definitions, call sites, and use/mod imports.

use crate::error::EngineError;
use crate::model::SymbolKind;

use super::{node_text, CallFact, FileFacts, ImportFact, LanguageParser, SymbolFact};

/// Parser that extracts facts from Rust source code.
pub struct RustParser {
    parser: tree_sitter::Parser,
}

impl RustParser {
    pub fn new() -> Result<Self, EngineError> {
        let mut parser = tree_sitter::Parser::new();
        let language = tree_sitter_rust::language();
        parser
            .set_language(&language)
            .map_err(|e| EngineError::SourceRead(format!("rust grammar: {}", e)))?;
        Ok(Self { parser })
    }

    /// Walk the tree recursively, tracking the enclosing function name for
    /// call attribution.
    fn walk(
        &self,
        node: &tree_sitter::Node,
        source: &[u8],
        enclosing_fn: Option<&str>,
        facts: &mut FileFacts,
    ) {
        let kind = node.kind();

        let mut next_enclosing = enclosing_fn.map(|s| s.to_string());

        match kind {
            "function_item" => {
                if let Some(name) = self.field_text(node, "name", source) {
                    facts.symbols.push(SymbolFact {
                        name: name.clone(),
                        kind: SymbolKind::Function,
                    });
                    next_enclosing = Some(name);
                }
            }
            // struct/enum/trait all map to the language-agnostic "class"
            "struct_item" | "enum_item" | "trait_item" => {
                if let Some(name) = self.field_text(node, "name", source) {
                    facts.symbols.push(SymbolFact {
                        name,
                        kind: SymbolKind::Class,
                    });
                }
            }
            "use_declaration" => {
                if let Some(module) = self.use_target(node, source) {
                    facts.imports.push(ImportFact { module });
                }
            }
            "mod_item" => {
                // `mod foo;` without a body references another file
                if node.child_by_field_name("body").is_none() {
                    if let Some(name) = self.field_text(node, "name", source) {
                        facts.imports.push(ImportFact { module: name });
                    }
                }
            }
            "call_expression" => {
                if let (Some(caller), Some(callee)) =
                    (enclosing_fn, self.callee_name(node, source))
                {
                    facts.calls.push(CallFact {
                        caller: caller.to_string(),
                        callee,
                    });
                }
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(&child, source, next_enclosing.as_deref(), facts);
        }
    }

    /// Text of a named field child, if present.
    fn field_text(
        &self,
        node: &tree_sitter::Node,
        field: &str,
        source: &[u8],
    ) -> Option<String> {
        let child = node.child_by_field_name(field)?;
        let text = node_text(&child, source);
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Candidate module name from a use declaration.
    ///
    /// `use crate::foo::bar` → "foo"; `use super::util` → "util";
    /// `use foo::bar::Baz` → "foo". Brace groups and wildcards fall back to
    /// the first plain segment; empty results are dropped.
    fn use_target(&self, node: &tree_sitter::Node, source: &[u8]) -> Option<String> {
        let text = node_text(node, source);
        let body = text
            .trim()
            .strip_prefix("use")?
            .trim()
            .trim_end_matches(';')
            .trim();

        for segment in body.split("::") {
            let segment = segment.trim();
            match segment {
                "crate" | "super" | "self" | "" => continue,
                _ => {
                    // Stop at brace groups, wildcards, and renames
                    if segment.starts_with('{') || segment.starts_with('*') {
                        return None;
                    }
                    let name: String = segment
                        .chars()
                        .take_while(|c| c.is_alphanumeric() || *c == '_')
                        .collect();
                    if name.is_empty() {
                        return None;
                    }
                    return Some(name);
                }
            }
        }
        None
    }

    /// Name of the called function for a call_expression node.
    ///
    /// Handles direct calls (`helper()`), path calls (`module::helper()`,
    /// last segment wins), and method calls (`value.helper()`).
    fn callee_name(&self, node: &tree_sitter::Node, source: &[u8]) -> Option<String> {
        let function = node.child_by_field_name("function")?;
        match function.kind() {
            "identifier" => Some(node_text(&function, source)),
            "scoped_identifier" => {
                let name = function.child_by_field_name("name")?;
                Some(node_text(&name, source))
            }
            "field_expression" => {
                let field = function.child_by_field_name("field")?;
                Some(node_text(&field, source))
            }
            _ => None,
        }
        .filter(|name| !name.is_empty())
    }
}

impl LanguageParser for RustParser {
    fn extract(&mut self, source: &[u8]) -> FileFacts {
        let tree = match self.parser.parse(source, None) {
            Some(t) => t,
            None => return FileFacts::default(), // Parse error: return empty
        };

        let mut facts = FileFacts::default();
        self.walk(&tree.root_node(), source, None, &mut facts);
        facts
    }
}
