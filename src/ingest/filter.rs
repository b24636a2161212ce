//! File filtering for gitignore-style rules and include/exclude globs.
//!
//! Filtering precedence:
//! 1. Hard internal ignores (db files, .git/, target/, etc.)
//! 2. Gitignore-style rules (.gitignore, .ignore)
//! 3. Include patterns (if any provided)
//! 4. Exclude patterns
//!
//! All filtering is a pure function of the inputs: same inputs always
//! produce the same output. Unlike the language filter applied at symbol
//! extraction time, files that pass here are indexed regardless of
//! extension.

use ignore::gitignore::Gitignore;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Internal directories that are always ignored (hard-coded).
const INTERNAL_IGNORE_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
];

/// File name suffixes that are always ignored (hard-coded).
const INTERNAL_IGNORE_SUFFIXES: &[&str] = &[
    ".db",
    ".db-journal",
    ".db-wal",
    ".db-shm",
    ".sqlite",
    ".sqlite3",
];

/// Why a path was skipped during scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAFile,
    IgnoredInternal,
    IgnoredByGitignore,
    ExcludedByGlob,
}

/// Filter configuration for a single ingestion run.
pub struct FileFilter {
    /// Root directory for path normalization
    root: PathBuf,
    /// Gitignore-style matcher compiled from .gitignore/.ignore
    gitignore: Option<Gitignore>,
    /// Include patterns (empty = include all)
    include_patterns: Vec<globset::GlobMatcher>,
    /// Exclude patterns
    exclude_patterns: Vec<globset::GlobMatcher>,
}

impl FileFilter {
    /// Build a filter for the given root directory.
    ///
    /// Malformed glob patterns are a validation error; malformed gitignore
    /// files are logged and ignored so a bad rule cannot block ingestion.
    pub fn new(
        root: &Path,
        include_patterns: &[String],
        exclude_patterns: &[String],
    ) -> Result<Self, EngineError> {
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let gitignore = Self::load_gitignore(&root);

        Ok(Self {
            root,
            gitignore,
            include_patterns: Self::compile_globs(include_patterns)?,
            exclude_patterns: Self::compile_globs(exclude_patterns)?,
        })
    }

    /// Load gitignore-style rules from .gitignore and .ignore files.
    fn load_gitignore(root: &Path) -> Option<Gitignore> {
        let mut builder = ignore::gitignore::GitignoreBuilder::new(root);

        for name in [".gitignore", ".ignore"] {
            let path = root.join(name);
            if path.exists() {
                if let Some(err) = builder.add(&path) {
                    tracing::warn!(file = %path.display(), error = %err, "skipping unreadable ignore file");
                }
            }
        }

        builder.build().ok()
    }

    /// Compile glob patterns into matchers.
    fn compile_globs(patterns: &[String]) -> Result<Vec<globset::GlobMatcher>, EngineError> {
        let mut matchers = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let glob = globset::Glob::new(pattern).map_err(|e| {
                EngineError::Validation(format!("invalid glob pattern '{}': {}", pattern, e))
            })?;
            matchers.push(glob.compile_matcher());
        }
        Ok(matchers)
    }

    /// Check if a path should be skipped, returning the reason if so.
    ///
    /// Rules are checked in precedence order; the first applicable reason
    /// wins.
    pub fn should_skip(&self, path: &Path) -> Option<SkipReason> {
        if !path.is_file() {
            return Some(SkipReason::NotAFile);
        }

        if self.is_internal_ignore(path) {
            return Some(SkipReason::IgnoredInternal);
        }

        if let Some(ref gitignore) = self.gitignore {
            let check_path = path.strip_prefix(&self.root).unwrap_or(path);

            if gitignore.matched(check_path, false).is_ignore() {
                return Some(SkipReason::IgnoredByGitignore);
            }

            // Directory patterns like "build/" only match the directory
            // itself, so every ancestor has to be checked too.
            let mut current = check_path.parent();
            while let Some(ancestor) = current {
                if ancestor.as_os_str().is_empty() {
                    break;
                }
                if gitignore.matched(ancestor, true).is_ignore() {
                    return Some(SkipReason::IgnoredByGitignore);
                }
                current = ancestor.parent();
            }
        }

        if !self.include_patterns.is_empty() {
            let rel = self.relative_path(path);
            if !self.include_patterns.iter().any(|m| m.is_match(&rel)) {
                return Some(SkipReason::ExcludedByGlob);
            }
        }

        if !self.exclude_patterns.is_empty() {
            let rel = self.relative_path(path);
            if self.exclude_patterns.iter().any(|m| m.is_match(&rel)) {
                return Some(SkipReason::ExcludedByGlob);
            }
        }

        None
    }

    /// Check if a path matches internal ignore rules.
    fn is_internal_ignore(&self, path: &Path) -> bool {
        if let Some(file_name) = path.file_name() {
            let file_name = file_name.to_string_lossy();
            if INTERNAL_IGNORE_SUFFIXES
                .iter()
                .any(|suffix| file_name.ends_with(suffix))
            {
                return true;
            }
        }

        if let Ok(rel) = path.strip_prefix(&self.root) {
            for component in rel.components() {
                if let std::path::Component::Normal(dir) = component {
                    let dir = dir.to_string_lossy();
                    if INTERNAL_IGNORE_DIRS.contains(&dir.as_ref()) {
                        return true;
                    }
                }
            }
        }

        false
    }

    /// Path relative to root, forward slashes.
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| path.to_string_lossy().into_owned())
    }
}
