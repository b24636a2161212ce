//! Language-specific symbol and relationship extraction.
//!
//! A closed set of tree-sitter parsers behind a common "extract facts"
//! capability, selected by a language-keyed lookup rather than runtime type
//! inspection. Each parser is a pure function of the source bytes: no
//! filesystem access, no global state, no caching.

mod python;
mod rust;

pub use python::PythonParser;
pub use rust::RustParser;

use crate::error::EngineError;
use crate::model::SymbolKind;

/// A symbol definition extracted from source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFact {
    pub name: String,
    pub kind: SymbolKind,
}

/// A call site extracted from source code.
///
/// `caller` is the name of the enclosing function or method; calls outside
/// any function body are not recorded (CALLS edges join two symbols).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFact {
    pub caller: String,
    pub callee: String,
}

/// An import statement extracted from source code.
///
/// `module` is the candidate module name, matched against repository file
/// stems during edge resolution. Candidates that resolve to nothing are
/// dropped silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFact {
    pub module: String,
}

/// Everything extracted from one file in one parse.
#[derive(Debug, Clone, Default)]
pub struct FileFacts {
    pub symbols: Vec<SymbolFact>,
    pub calls: Vec<CallFact>,
    pub imports: Vec<ImportFact>,
}

/// Common capability implemented by every language parser.
pub trait LanguageParser {
    /// Extract symbols, calls, and imports from source bytes.
    ///
    /// A file that fails to parse yields empty facts, not an error: broken
    /// source is still indexed for path/size/content.
    fn extract(&mut self, source: &[u8]) -> FileFacts;
}

/// Registry of available parsers, keyed by language name.
///
/// Parsers are constructed once per ingestion run and reused across files.
pub struct ParserRegistry {
    rust: RustParser,
    python: PythonParser,
}

impl ParserRegistry {
    pub fn new() -> Result<Self, EngineError> {
        Ok(Self {
            rust: RustParser::new()?,
            python: PythonParser::new()?,
        })
    }

    /// Select the parser for a language, if one is registered.
    pub fn for_language(&mut self, lang: &str) -> Option<&mut dyn LanguageParser> {
        match lang {
            "rust" => Some(&mut self.rust),
            "python" => Some(&mut self.python),
            _ => None,
        }
    }
}

/// Slice node text out of the source, lossy on invalid UTF-8.
pub(crate) fn node_text(node: &tree_sitter::Node, source: &[u8]) -> String {
    let start = node.start_byte();
    let end = node.end_byte();
    if start >= end || end > source.len() {
        return String::new();
    }
    String::from_utf8_lossy(&source[start..end]).into_owned()
}
