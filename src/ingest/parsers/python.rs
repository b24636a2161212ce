//! Python symbol extraction using tree-sitter-python.
//!
//! Extracts functions, classes, call sites, and import statements.

use crate::error::EngineError;
use crate::model::SymbolKind;

use super::{node_text, CallFact, FileFacts, ImportFact, LanguageParser, SymbolFact};

/// Parser that extracts facts from Python source code.
pub struct PythonParser {
    parser: tree_sitter::Parser,
}

impl PythonParser {
    pub fn new() -> Result<Self, EngineError> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_python::language())
            .map_err(|e| EngineError::SourceRead(format!("python grammar: {}", e)))?;
        Ok(Self { parser })
    }

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
            "function_definition" => {
                if let Some(name) = self.field_text(node, "name", source) {
                    facts.symbols.push(SymbolFact {
                        name: name.clone(),
                        kind: SymbolKind::Function,
                    });
                    next_enclosing = Some(name);
                }
            }
            "class_definition" => {
                if let Some(name) = self.field_text(node, "name", source) {
                    facts.symbols.push(SymbolFact {
                        name,
                        kind: SymbolKind::Class,
                    });
                }
            }
            "import_statement" | "import_from_statement" => {
                self.collect_imports(node, source, facts);
            }
            "call" => {
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

    /// Collect candidate module names from an import node.
    ///
    /// `import b` → "b"; `import pkg.mod` → "pkg"; `from util import f` →
    /// "util"; `from . import b` → "b". Every dotted name contributes its
    /// first segment; unresolvable candidates are dropped later.
    fn collect_imports(&self, node: &tree_sitter::Node, source: &[u8], facts: &mut FileFacts) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "dotted_name" => {
                    if let Some(first) = self.first_segment(&child, source) {
                        facts.imports.push(ImportFact { module: first });
                    }
                }
                "aliased_import" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        if let Some(first) = self.first_segment(&name, source) {
                            facts.imports.push(ImportFact { module: first });
                        }
                    }
                }
                "relative_import" => {
                    // `from .util import f`: the dotted name inside the
                    // relative prefix is still a candidate
                    let mut inner = child.walk();
                    for part in child.children(&mut inner) {
                        if part.kind() == "dotted_name" {
                            if let Some(first) = self.first_segment(&part, source) {
                                facts.imports.push(ImportFact { module: first });
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// First identifier of a dotted name.
    fn first_segment(&self, node: &tree_sitter::Node, source: &[u8]) -> Option<String> {
        let text = node_text(node, source);
        let first = text.split('.').next()?.trim();
        if first.is_empty() {
            None
        } else {
            Some(first.to_string())
        }
    }

    /// Name of the called function for a call node.
    ///
    /// `f()` → "f"; `obj.method()` → "method"; `pkg.mod.f()` → "f".
    fn callee_name(&self, node: &tree_sitter::Node, source: &[u8]) -> Option<String> {
        let function = node.child_by_field_name("function")?;
        match function.kind() {
            "identifier" => Some(node_text(&function, source)),
            "attribute" => {
                let attr = function.child_by_field_name("attribute")?;
                Some(node_text(&attr, source))
            }
            _ => None,
        }
        .filter(|name| !name.is_empty())
    }
}

impl LanguageParser for PythonParser {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> FileFacts {
        PythonParser::new().unwrap().extract(source.as_bytes())
    }

    #[test]
    fn test_extracts_functions_and_classes() {
        let facts = extract(
            r#"
class Widget:
    def render(self):
        pass

def main():
    pass
"#,
        );

        assert!(facts.symbols.contains(&SymbolFact {
            name: "Widget".into(),
            kind: SymbolKind::Class
        }));
        assert!(facts.symbols.contains(&SymbolFact {
            name: "render".into(),
            kind: SymbolKind::Function
        }));
        assert!(facts.symbols.contains(&SymbolFact {
            name: "main".into(),
            kind: SymbolKind::Function
        }));
    }

    #[test]
    fn test_calls_attributed_to_enclosing_function() {
        let facts = extract(
            r#"
def caller():
    helper()
    obj.method()

def helper():
    pass
"#,
        );

        assert!(facts.calls.contains(&CallFact {
            caller: "caller".into(),
            callee: "helper".into()
        }));
        assert!(facts.calls.contains(&CallFact {
            caller: "caller".into(),
            callee: "method".into()
        }));
    }

    #[test]
    fn test_module_level_calls_are_not_recorded() {
        let facts = extract("helper()\n");
        assert!(facts.calls.is_empty());
    }

    #[test]
    fn test_import_candidates() {
        let facts = extract(
            r#"
import b
import pkg.mod
from util import f
from . import sibling
import numpy as np
"#,
        );

        let modules: Vec<_> = facts.imports.iter().map(|i| i.module.as_str()).collect();
        assert!(modules.contains(&"b"));
        assert!(modules.contains(&"pkg"));
        assert!(modules.contains(&"util"));
        assert!(modules.contains(&"sibling"));
        assert!(modules.contains(&"numpy"));
    }
}
