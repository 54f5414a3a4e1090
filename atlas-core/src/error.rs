use std::time::Duration;

/// Top-level Atlas error type.
///
/// All fallible operations in `atlas-core` return [`Result<T, AtlasError>`](Result).
/// Each variant wraps a layer-specific error enum so callers can match on
/// the source without losing type information.
#[derive(thiserror::Error, Debug)]
pub enum AtlasError {
    /// Error from the graph store (`SQLite` operations, schema setup).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error during ingestion outside of per-file failures.
    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    /// Error from the extraction engine (tree-sitter setup).
    #[error("Graph engine error: {0}")]
    Graph(#[from] atlas_graphs::GraphError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A query request was rejected before it ran.
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Clustering could not run.
    #[error("Clustering error: {0}")]
    Cluster(#[from] ClusterError),

    /// The caller cancelled the operation; nothing was persisted.
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation exceeded its deadline; nothing was persisted.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl AtlasError {
    /// Stable classification string for callers and exit codes.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Store(_) => "store_unavailable",
            Self::Extract(_) | Self::Graph(_) => "extract_failed",
            Self::Config(_) => "invalid_config",
            Self::Query(_) => "invalid_query",
            Self::Cluster(_) => "cluster_failed",
            Self::Cancelled => "cancelled",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Errors from the SQLite-backed graph store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database file could not be opened or created.
    #[error("Store unavailable at {path}: {message}")]
    Unavailable { path: String, message: String },

    /// A generation id was requested that the store does not hold.
    #[error("Generation not found: {0}")]
    GenerationNotFound(String),

    /// JSON encoding of stored columns failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors during ingestion that are not attributed to a single file.
#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    /// Git history could not be read.
    #[error("Git error: {0}")]
    Git(String),

    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The ingestion root does not exist or is not a directory.
    #[error("Cannot ingest {0}: not a directory")]
    NotADirectory(String),
}

/// Query validation failures. A query that runs and matches nothing is not an error.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    /// The predicate references a field outside the strategy's field set.
    #[error("Field `{field}` is not available to the {strategy} strategy")]
    FieldNotAllowed { strategy: String, field: String },

    /// The predicate is malformed (bad regex, non-boolean value on a flag field).
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    /// The request lacks the input its strategy needs.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Traversal depth above the configured ceiling.
    #[error("Traversal depth {requested} exceeds maximum {max}")]
    DepthExceeded { requested: u32, max: u32 },
}

/// Errors from the clustering engine.
#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    /// No generation has been ingested yet.
    #[error("No active generation; run ingestion first")]
    NoGeneration,

    /// The background clustering task panicked or was aborted.
    #[error("Clustering worker failed: {0}")]
    Worker(String),
}

/// Errors in Atlas configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience alias for `Result<T, AtlasError>`.
pub type Result<T> = std::result::Result<T, AtlasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_are_stable() {
        let store = AtlasError::Store(StoreError::Unavailable {
            path: "/x/atlas.db".into(),
            message: "read-only".into(),
        });
        assert_eq!(store.class(), "store_unavailable");
        assert_eq!(AtlasError::Cancelled.class(), "cancelled");
        assert_eq!(
            AtlasError::Timeout(Duration::from_millis(5)).class(),
            "timeout"
        );
        let query = AtlasError::from(QueryError::MissingInput("seed".into()));
        assert_eq!(query.class(), "invalid_query");
    }

    #[test]
    fn messages_name_the_field() {
        let err = QueryError::FieldNotAllowed {
            strategy: "metadata".into(),
            field: "body".into(),
        };
        assert_eq!(
            err.to_string(),
            "Field `body` is not available to the metadata strategy"
        );
    }
}
