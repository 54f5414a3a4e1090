use crate::types::{
    CoChange, CodeEntity, DependencyEdge, Direction, FileChurn, FileRecord, Generation,
    PendingEntity, SemanticCluster, StagedGeneration, StoreStats,
};

use super::predicate::Predicate;

/// Options for [`GraphStore::find_entities`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub include_body: bool,
    /// Keep entities flagged `is_test`.
    pub include_tests: bool,
    /// Maximum rows returned; `None` means no limit.
    pub limit: Option<usize>,
}

/// The graph store abstraction. Every read names its generation explicitly.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    // ── Generations ────────────────────────────────────────────────

    /// The generation readers should use, if any ingestion has completed.
    async fn active_generation(&self) -> crate::error::Result<Option<Generation>>;

    /// All retained generations, newest first.
    async fn list_generations(&self) -> crate::error::Result<Vec<Generation>>;

    /// Insert a whole generation, make it active and prune all but the newest
    /// `retain` generations, in one transaction. Returns the pruned ids.
    async fn commit_generation(
        &self,
        staged: &StagedGeneration,
        retain: usize,
    ) -> crate::error::Result<Vec<String>>;

    // ── Entities ───────────────────────────────────────────────────

    async fn get_entity(
        &self,
        generation: &str,
        entity_id: &str,
        include_body: bool,
    ) -> crate::error::Result<Option<CodeEntity>>;

    /// Fetch several entities by id. Missing ids are skipped; order follows `ids`.
    async fn get_entities(
        &self,
        generation: &str,
        ids: &[String],
        include_body: bool,
    ) -> crate::error::Result<Vec<CodeEntity>>;

    /// Entities matching `predicate`, ordered by entity id.
    async fn find_entities(
        &self,
        generation: &str,
        predicate: &Predicate,
        options: &FindOptions,
    ) -> crate::error::Result<Vec<CodeEntity>>;

    async fn load_entities(
        &self,
        generation: &str,
        include_body: bool,
    ) -> crate::error::Result<Vec<CodeEntity>>;

    /// Entities with bodies and raw references for the given files, used to
    /// carry unchanged files forward into a new generation.
    async fn load_entities_for_files(
        &self,
        generation: &str,
        paths: &[String],
    ) -> crate::error::Result<Vec<PendingEntity>>;

    // ── Edges ──────────────────────────────────────────────────────

    /// Referenced entity ids in source order.
    async fn forward_refs(&self, generation: &str, entity_id: &str)
    -> crate::error::Result<Vec<String>>;

    /// Referencing entity ids, sorted.
    async fn reverse_refs(&self, generation: &str, entity_id: &str)
    -> crate::error::Result<Vec<String>>;

    /// Edges leaving `ids` (forward) or arriving at them (reverse). Edges keep
    /// their stored orientation. Edges into test entities are skipped unless
    /// `include_tests` is set.
    async fn neighbors(
        &self,
        generation: &str,
        ids: &[String],
        direction: Direction,
        include_tests: bool,
    ) -> crate::error::Result<Vec<DependencyEdge>>;

    async fn load_edges(&self, generation: &str) -> crate::error::Result<Vec<DependencyEdge>>;

    // ── Files and history ──────────────────────────────────────────

    async fn load_file_records(&self, generation: &str) -> crate::error::Result<Vec<FileRecord>>;

    async fn load_co_change(&self, generation: &str) -> crate::error::Result<Vec<CoChange>>;

    async fn load_churn(&self, generation: &str) -> crate::error::Result<Vec<FileChurn>>;

    // ── Clusters ───────────────────────────────────────────────────

    /// Replace the generation's cluster set atomically.
    async fn publish_clusters(
        &self,
        generation: &str,
        clusters: &[SemanticCluster],
    ) -> crate::error::Result<()>;

    async fn load_clusters(&self, generation: &str) -> crate::error::Result<Vec<SemanticCluster>>;

    async fn cluster_for_entity(
        &self,
        generation: &str,
        entity_id: &str,
    ) -> crate::error::Result<Option<SemanticCluster>>;

    /// Clusters whose name contains `pattern` (case-insensitive).
    async fn find_clusters(
        &self,
        generation: &str,
        pattern: &str,
    ) -> crate::error::Result<Vec<SemanticCluster>>;

    // ── Stats ──────────────────────────────────────────────────────

    async fn stats(&self, generation: &str) -> crate::error::Result<StoreStats>;
}
