use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};

use crate::config::IngestSection;

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A candidate source file found under the ingestion root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    pub abs_path: PathBuf,
    /// Root-relative, `/`-separated.
    pub rel_path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Default)]
pub struct WalkResult {
    pub files: Vec<WalkedFile>,
    /// Files over `max_file_bytes`.
    pub oversized: Vec<String>,
}

/// Compiled glob set matched against root-relative paths.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    patterns: Vec<Pattern>,
}

impl PathMatcher {
    /// Invalid patterns are logged and skipped.
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Invalid glob pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_match(&self, rel_path: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(rel_path, MATCH))
    }
}

/// Root-relative path with `/` separators.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Collect files matching any include pattern and no exclude pattern, sorted by path.
pub fn walk_source_tree(root: &Path, config: &IngestSection) -> WalkResult {
    let excludes = PathMatcher::new(&config.exclude_patterns);
    let mut matched: Vec<PathBuf> = Vec::new();

    for pattern in &config.include_patterns {
        let escaped_root = Pattern::escape(&root.to_string_lossy());
        let full_pattern = format!("{escaped_root}/{pattern}");
        match glob::glob_with(&full_pattern, MATCH) {
            Ok(paths) => {
                for entry in paths.flatten() {
                    if entry.is_file() && !excludes.is_match(&relative_path(root, &entry)) {
                        matched.push(entry);
                    }
                }
            }
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Invalid glob pattern");
            }
        }
    }

    matched.sort();
    matched.dedup();

    let mut result = WalkResult::default();
    for abs_path in matched {
        let rel_path = relative_path(root, &abs_path);
        let size_bytes = match std::fs::metadata(&abs_path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!(path = %rel_path, error = %e, "Cannot stat file");
                continue;
            }
        };
        if size_bytes > config.max_file_bytes {
            debug!(path = %rel_path, size_bytes, "Skipping oversized file");
            result.oversized.push(rel_path);
            continue;
        }
        result.files.push(WalkedFile {
            abs_path,
            rel_path,
            size_bytes,
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn includes_and_excludes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "src/lib.rs", "pub fn a() {}");
        write(root, "src/util/mod.rs", "pub fn b() {}");
        write(root, "target/debug/gen.rs", "fn c() {}");
        write(root, "node_modules/x/index.js", "function d() {}");
        write(root, "README.md", "# readme");

        let result = walk_source_tree(root, &IngestSection::default());
        let paths: Vec<&str> = result.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["src/lib.rs", "src/util/mod.rs"]);
        assert_eq!(result.files[0].size_bytes, 13);
    }

    #[test]
    fn skips_oversized_files() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "big.py", &"x = 1\n".repeat(100));
        write(tmp.path(), "small.py", "x = 1\n");
        let config = IngestSection {
            max_file_bytes: 64,
            ..IngestSection::default()
        };
        let result = walk_source_tree(tmp.path(), &config);
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.oversized, vec!["big.py"]);
    }

    #[test]
    fn test_patterns_match_relative_paths() {
        let matcher = PathMatcher::new(&IngestSection::default().test_patterns);
        assert!(matcher.is_match("tests/integration.rs"));
        assert!(matcher.is_match("crates/core/tests/it.rs"));
        assert!(matcher.is_match("server/server_test.go"));
        assert!(matcher.is_match("pkg/test_auth.py"));
        assert!(matcher.is_match("web/src/app.spec.ts"));
        assert!(!matcher.is_match("src/testing.rs"));
        assert!(!matcher.is_match("src/test_utils/mod.rs"));
    }
}
