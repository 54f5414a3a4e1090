use std::path::{Path, PathBuf};

use atlas_graphs::ComplexityModel;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Directory under the ingestion root holding the database and config.
pub const ATLAS_DIR: &str = ".atlas";
pub const CONFIG_FILE: &str = "config.toml";
pub const DB_FILE: &str = "atlas.db";

/// Top-level Atlas configuration, matching `.atlas/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtlasConfig {
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub cluster: ClusterSection,
    #[serde(default)]
    pub query: QuerySection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub store: StoreSection,
}

impl AtlasConfig {
    /// Parse a config file. Missing sections fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `<root>/.atlas/config.toml` when present, defaults otherwise.
    pub fn load_for_root(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(ATLAS_DIR).join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Database location: the configured path, or `<root>/.atlas/atlas.db`.
    pub fn db_path(&self, root: &Path) -> PathBuf {
        match &self.store.path {
            Some(p) if Path::new(p).is_absolute() => PathBuf::from(p),
            Some(p) => root.join(p),
            None => root.join(ATLAS_DIR).join(DB_FILE),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.cluster;
        if c.min_size == 0 || c.min_size > c.max_size {
            return Err(ConfigError::Invalid(format!(
                "cluster size bounds {}..={} are empty",
                c.min_size, c.max_size
            )));
        }
        if c.min_tokens > c.max_tokens {
            return Err(ConfigError::Invalid(format!(
                "cluster token bounds {}..={} are empty",
                c.min_tokens, c.max_tokens
            )));
        }
        if !(0.0..=1.0).contains(&c.min_cohesion) {
            return Err(ConfigError::Invalid(format!(
                "min_cohesion {} outside 0..=1",
                c.min_cohesion
            )));
        }
        let w = &c.weights;
        if [w.dependency, w.data_flow, w.co_change, w.textual]
            .iter()
            .any(|x| *x < 0.0)
            || w.total() <= 0.0
        {
            return Err(ConfigError::Invalid(
                "affinity weights must be non-negative with a positive sum".into(),
            ));
        }
        if self.store.retain_generations == 0 {
            return Err(ConfigError::Invalid(
                "retain_generations must be at least 1".into(),
            ));
        }
        if self.query.max_traversal_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_traversal_depth must be at least 1".into(),
            ));
        }
        for pattern in self
            .ingest
            .include_patterns
            .iter()
            .chain(&self.ingest.exclude_patterns)
            .chain(&self.ingest.test_patterns)
        {
            glob::Pattern::new(pattern)
                .map_err(|e| ConfigError::Invalid(format!("bad glob `{pattern}`: {e}")))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Files matching these are test code; all their entities get `is_test`.
    pub test_patterns: Vec<String>,
    /// Drop test entities from the persisted graph.
    pub exclude_tests: bool,
    /// Larger files are skipped.
    pub max_file_bytes: u64,
    /// Extraction threads; 0 uses the rayon default.
    pub workers: usize,
    pub complexity: ComplexityModel,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            include_patterns: vec![
                "**/*.rs".into(),
                "**/*.py".into(),
                "**/*.pyi".into(),
                "**/*.ts".into(),
                "**/*.tsx".into(),
                "**/*.js".into(),
                "**/*.jsx".into(),
                "**/*.mjs".into(),
                "**/*.go".into(),
                "**/*.java".into(),
                "bin/*".into(),
                "scripts/*".into(),
            ],
            exclude_patterns: vec![
                "**/node_modules/**".into(),
                "**/vendor/**".into(),
                "**/target/**".into(),
                "**/.git/**".into(),
                "**/.atlas/**".into(),
                "**/dist/**".into(),
                "**/build/**".into(),
            ],
            test_patterns: vec![
                "**/tests/**".into(),
                "**/test/**".into(),
                "**/__tests__/**".into(),
                "**/*_test.go".into(),
                "**/test_*.py".into(),
                "**/*_test.py".into(),
                "**/*.test.ts".into(),
                "**/*.spec.ts".into(),
                "**/*.test.js".into(),
                "**/*.spec.js".into(),
                "**/*Test.java".into(),
            ],
            exclude_tests: true,
            max_file_bytes: 1_048_576,
            workers: 0,
            complexity: ComplexityModel::Cyclomatic,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    /// Mine co-change counts from git when the root is a repository.
    pub enabled: bool,
    /// Commits walked back from HEAD; 0 means all.
    pub max_commits: u32,
    /// Commits touching more files than this are ignored (bulk renames, formatting).
    pub max_files_per_commit: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_commits: 2000,
            max_files_per_commit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityWeights {
    pub dependency: f64,
    pub data_flow: f64,
    pub co_change: f64,
    pub textual: f64,
}

impl AffinityWeights {
    pub fn total(&self) -> f64 {
        self.dependency + self.data_flow + self.co_change + self.textual
    }
}

impl Default for AffinityWeights {
    fn default() -> Self {
        Self {
            dependency: 1.0,
            data_flow: 0.8,
            co_change: 0.6,
            textual: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Seed for the modularity pass visit order.
    pub seed: u64,
    pub min_size: usize,
    pub max_size: usize,
    pub min_tokens: u32,
    pub max_tokens: u32,
    pub min_cohesion: f64,
    /// Entity pairs below this normalised affinity get no edge.
    pub min_affinity: f64,
    /// Tokens shared by more entities than this do not produce candidate pairs.
    pub max_token_df: usize,
    /// Weight of the size term in boundary refinement.
    pub size_penalty: f64,
    pub weights: AffinityWeights,
    /// Refresh clusters as part of every ingest.
    pub on_ingest: bool,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            seed: 42,
            min_size: 3,
            max_size: 20,
            min_tokens: 500,
            max_tokens: 4000,
            min_cohesion: 0.80,
            min_affinity: 0.1,
            max_token_df: 50,
            size_penalty: 0.02,
            weights: AffinityWeights::default(),
            on_ingest: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySection {
    /// Applied when the caller passes no timeout.
    pub timeout_ms: u64,
    pub max_traversal_depth: u32,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_traversal_depth: 6,
        }
    }
}

/// Ordering among context candidates with equal relevance per token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Cheaper candidate first.
    #[default]
    SmallerFirst,
    /// More expensive candidate first.
    LargerFirst,
    /// Identifier order only.
    Lexicographic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub default_budget: u32,
    /// Candidates below this relevance are logged and skipped.
    pub min_relevance: f64,
    pub dependency_weight: f64,
    pub temporal_weight: f64,
    pub tie_break: TieBreak,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            default_budget: 8_000,
            min_relevance: 0.05,
            dependency_weight: 0.7,
            temporal_weight: 0.3,
            tie_break: TieBreak::SmallerFirst,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Database path, relative to the root unless absolute.
    pub path: Option<String>,
    /// Generations kept after a successful ingestion, the new one included.
    pub retain_generations: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: None,
            retain_generations: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AtlasConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: AtlasConfig = toml::from_str(
            r#"
[cluster]
min_tokens = 0
seed = 7
on_ingest = false

[context]
tie_break = "larger_first"

[ingest]
complexity = "lines"
"#,
        )
        .unwrap();
        assert_eq!(config.cluster.min_tokens, 0);
        assert_eq!(config.cluster.seed, 7);
        assert_eq!(config.cluster.max_size, 20);
        assert!(!config.cluster.on_ingest);
        assert!((config.cluster.weights.dependency - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.context.tie_break, TieBreak::LargerFirst);
        assert_eq!(config.ingest.complexity, ComplexityModel::Lines);
        assert!(config.ingest.exclude_tests);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_inverted_bounds() {
        let mut config = AtlasConfig::default();
        config.cluster.min_size = 30;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_bad_glob() {
        let mut config = AtlasConfig::default();
        config.ingest.exclude_patterns.push("[".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_for_root_without_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AtlasConfig::load_for_root(tmp.path()).unwrap();
        assert_eq!(config.store.retain_generations, 2);
        assert_eq!(
            config.db_path(tmp.path()),
            tmp.path().join(".atlas").join("atlas.db")
        );
    }

    #[test]
    fn load_reports_parse_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[cluster\nseed = ").unwrap();
        assert!(matches!(AtlasConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
