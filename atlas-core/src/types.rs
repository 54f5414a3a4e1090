use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use atlas_graphs::{EntityKind, RawRef, RefKind};

// ── Entities ───────────────────────────────────────────────────────

/// A persisted code entity. `body_text` is only populated when requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEntity {
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub language: String,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    pub is_public: bool,
    pub is_test: bool,
    pub complexity_score: Option<i64>,
    /// Estimated tokens for signature plus body.
    pub token_count: u32,
}

impl CodeEntity {
    /// `language:kind:path:qualified_name:start-end`.
    pub fn make_id(
        language: &str,
        kind: EntityKind,
        file_path: &str,
        qualified_name: &str,
        line_start: u32,
        line_end: u32,
    ) -> String {
        format!(
            "{language}:{}:{file_path}:{qualified_name}:{line_start}-{line_end}",
            kind.as_str()
        )
    }
}

/// An entity together with its unresolved references, as written by ingestion
/// and reloaded for incremental carry-over.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntity {
    pub entity: CodeEntity,
    pub raw_refs: Vec<RawRef>,
}

/// Query output row: an entity plus optional traversal depth and references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(flatten)]
    pub entity: CodeEntity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_refs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_refs: Option<Vec<String>>,
}

impl From<CodeEntity> for EntityRecord {
    fn from(entity: CodeEntity) -> Self {
        Self {
            entity,
            depth: None,
            forward_refs: None,
            reverse_refs: None,
        }
    }
}

// ── Edges ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Calls,
    ReferencesType,
    Other,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calls => "calls",
            Self::ReferencesType => "references_type",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "calls" => Self::Calls,
            "references_type" => Self::ReferencesType,
            _ => Self::Other,
        }
    }
}

impl From<RefKind> for EdgeKind {
    fn from(kind: RefKind) -> Self {
        match kind {
            RefKind::Call => Self::Calls,
            RefKind::TypeRef => Self::ReferencesType,
        }
    }
}

/// A resolved reference. `position` orders the source entity's forward refs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from_id: String,
    pub to_id: String,
    pub edge_kind: EdgeKind,
    pub position: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Follow edges from referrer to referee.
    #[default]
    Forward,
    /// Follow edges from referee back to referrers.
    Reverse,
}

// ── Generations ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    Full,
    Incremental,
}

impl IngestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationCounts {
    pub files: u64,
    pub entities: u64,
    pub edges: u64,
}

/// One self-contained ingestion result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub generation_id: String,
    pub created_at: DateTime<Utc>,
    pub root_path: String,
    pub mode: IngestMode,
    pub counts: GenerationCounts,
}

impl Generation {
    /// Sortable id: UTC timestamp followed by a short random suffix.
    pub fn new_id(at: DateTime<Utc>) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", at.format("%Y%m%dT%H%M%S%3fZ"), &suffix[..8])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub language: String,
    /// SHA-256 of the file contents, lower-case hex.
    pub content_hash: String,
    pub size_bytes: u64,
    pub parse_error: Option<String>,
    /// Test entities dropped from this file by the exclusion policy.
    pub excluded_entities: u32,
    /// Hash of the extraction settings the file was processed under. A file
    /// is only reused when both its content and this fingerprint match.
    #[serde(default)]
    pub extract_fingerprint: String,
}

/// Number of commits that touched both files. `file_a < file_b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoChange {
    pub file_a: String,
    pub file_b: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChurn {
    pub path: String,
    pub commits: u32,
}

/// Everything a new generation holds, written by one `commit_generation` call.
#[derive(Debug, Clone)]
pub struct StagedGeneration {
    pub generation: Generation,
    pub files: Vec<FileRecord>,
    pub entities: Vec<PendingEntity>,
    pub edges: Vec<DependencyEdge>,
    pub co_changes: Vec<CoChange>,
    pub churn: Vec<FileChurn>,
}

// ── Clusters ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticCluster {
    pub cluster_id: String,
    pub name: String,
    /// Sorted entity ids.
    pub member_ids: Vec<String>,
    pub cohesion_score: f64,
    pub coupling_score: f64,
    pub modularity: f64,
    pub token_count: u32,
}

// ── Stats ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub generation_id: String,
    pub files: u64,
    pub files_with_errors: u64,
    pub entities: u64,
    pub test_entities: u64,
    pub edges: u64,
    pub clusters: u64,
    pub clustered_entities: u64,
    pub co_change_pairs: u64,
    pub entities_by_language: Vec<(String, u64)>,
    pub entities_by_kind: Vec<(String, u64)>,
    pub db_size_bytes: u64,
}

/// Rough token estimate: about 3.5 characters per token, at least one for non-empty text.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let tokens = (text.len() as f64 / 3.5).ceil().max(1.0) as u32;
    tokens
}
