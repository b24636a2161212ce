//! File classification by extension.
//!
//! Pure lookup table. Unrecognized extensions are still indexed for
//! path/size, just without symbol extraction (language = "unknown").

use std::path::Path;

/// Language name for unrecognized extensions.
pub const LANG_UNKNOWN: &str = "unknown";

/// Detect programming language from a file path extension.
///
/// # Supported Extensions
/// - `.rs` → "rust"
/// - `.py` → "python"
/// - `.js` → "javascript"
/// - `.ts`, `.tsx` → "typescript"
/// - `.java` → "java"
/// - `.c`, `.h` → "c"
/// - `.cpp`, `.cc`, `.cxx`, `.hpp` → "cpp"
/// - `.go` → "go"
/// - `.rb` → "ruby"
/// - anything else → "unknown"
pub fn detect_language(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "rs" => "rust",
        "py" => "python",
        "js" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "go" => "go",
        "rb" => "ruby",
        _ => LANG_UNKNOWN,
    }
}

/// Whether a symbol parser is registered for this language.
///
/// The parser set is closed: rust and python ship with the crate. Files in
/// other languages are indexed without symbols.
pub fn has_parser(lang: &str) -> bool {
    matches!(lang, "rust" | "python")
}
