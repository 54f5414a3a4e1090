// Semantic clustering: affinity graph, Louvain, boundary refinement, bounds.
//
// Graph algorithms intentionally cast int↔float.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

pub mod affinity;
pub mod louvain;
pub mod refine;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ClusterSection;
use crate::error::{AtlasError, ClusterError};
use crate::progress::{NoopReporter, ProgressReporter, Stage};
use crate::store::GraphStore;
use crate::types::{
    CoChange, CodeEntity, DependencyEdge, FileChurn, SemanticCluster, StagedGeneration,
};

use self::affinity::{AffinityGraph, build_affinity, name_tokens};
use self::louvain::{louvain, modularity_terms};
use self::refine::{BoundsInput, refine_boundaries};

/// Summary of one clustering run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub generation_id: String,
    pub clusters: u64,
    pub clustered_entities: u64,
    pub unclustered_entities: u64,
    pub affinity_edges: u64,
    /// Oversized clusters that were split.
    pub resplits: u64,
    pub merges: u64,
    pub rejected: u64,
    pub refinement_moves: u64,
    /// Sum of published clusters' modularity contributions.
    pub modularity: f64,
    pub duration_ms: u64,
}

/// What an ingest did about the new generation's clusters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClusterRefresh {
    /// `cluster.on_ingest` is off; the generation has no clusters until
    /// `atlas clusters run` runs.
    #[default]
    Skipped,
    Recomputed { clusters: u64 },
    /// Clustering inputs matched the previous generation, so its clusters
    /// were copied.
    CarriedForward { clusters: u64 },
    /// The generation is committed but clustering failed or was cancelled.
    Pending { reason: String },
}

/// Result of the pure clustering computation.
#[derive(Debug, Clone, Default)]
pub struct Clustering {
    pub clusters: Vec<SemanticCluster>,
    pub entities: usize,
    pub affinity_edges: usize,
    pub resplits: usize,
    pub merges: usize,
    pub rejected: usize,
    pub refinement_moves: usize,
}

impl Clustering {
    pub fn modularity(&self) -> f64 {
        self.clusters.iter().map(|c| c.modularity).sum()
    }
}

fn check(cancel: &CancellationToken) -> crate::error::Result<()> {
    if cancel.is_cancelled() {
        Err(AtlasError::Cancelled)
    } else {
        Ok(())
    }
}

/// Cluster one generation's entities. Deterministic for fixed inputs and seed.
pub fn cluster_entities(
    entities: &[CodeEntity],
    edges: &[DependencyEdge],
    co_changes: &[CoChange],
    churn: &[FileChurn],
    config: &ClusterSection,
    cancel: &CancellationToken,
) -> crate::error::Result<Clustering> {
    let graph = build_affinity(entities, edges, co_changes, churn, config);
    let weighted = graph.weighted_edges();
    debug!(
        nodes = graph.node_count(),
        edges = weighted.len(),
        "Affinity graph built"
    );
    check(cancel)?;

    let mut membership = louvain(graph.node_count(), &weighted, config.seed);
    check(cancel)?;

    let adj = graph.adjacency();
    let refinement_moves = refine_boundaries(&adj, &mut membership, config.size_penalty);

    let mut initial: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (node, &c) in membership.iter().enumerate() {
        initial.entry(c).or_default().push(node);
    }
    let bounds = BoundsInput {
        adj: &adj,
        tokens: &graph.tokens,
        config,
    };
    let bounded = bounds.enforce(initial.into_values().collect());
    check(cancel)?;

    // Unclustered nodes count as singleton communities for modularity.
    let mut final_membership = vec![usize::MAX; graph.node_count()];
    for (c, group) in bounded.groups.iter().enumerate() {
        for &node in group {
            final_membership[node] = c;
        }
    }
    let mut next = bounded.groups.len();
    for slot in &mut final_membership {
        if *slot == usize::MAX {
            *slot = next;
            next += 1;
        }
    }
    let terms = modularity_terms(&weighted, &final_membership, next);

    let clusters = bounded
        .groups
        .iter()
        .enumerate()
        .map(|(c, group)| SemanticCluster {
            cluster_id: format!("cluster-{:03}", c + 1),
            name: cluster_name(&graph, group),
            member_ids: group.iter().map(|&i| graph.ids[i].clone()).collect(),
            cohesion_score: bounds.cohesion(group),
            coupling_score: coupling(&graph, group),
            modularity: terms[c],
            token_count: group.iter().map(|&i| graph.tokens[i]).sum(),
        })
        .collect();

    Ok(Clustering {
        clusters,
        entities: graph.node_count(),
        affinity_edges: weighted.len(),
        resplits: bounded.resplits,
        merges: bounded.merges,
        rejected: bounded.rejected,
        refinement_moves,
    })
}

/// Hash of everything [`cluster_entities`] reads, independent of input order.
pub fn input_digest(
    entities: &[CodeEntity],
    edges: &[DependencyEdge],
    co_changes: &[CoChange],
    churn: &[FileChurn],
) -> String {
    let mut lines: Vec<String> = entities
        .iter()
        .map(|e| {
            format!(
                "e\t{}\t{}\t{}\t{}\t{}\t{}",
                e.entity_id, e.name, e.file_path, e.signature, e.token_count, e.is_test
            )
        })
        .collect();
    lines.extend(
        edges
            .iter()
            .map(|d| format!("d\t{}\t{}\t{}", d.from_id, d.to_id, d.edge_kind.as_str())),
    );
    lines.extend(
        co_changes
            .iter()
            .map(|c| format!("c\t{}\t{}\t{}", c.file_a, c.file_b, c.count)),
    );
    lines.extend(churn.iter().map(|c| format!("h\t{}\t{}", c.path, c.commits)));
    lines.sort_unstable();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            use std::fmt::Write as _;
            let _ = write!(s, "{b:02x}");
            s
        })
}

/// External dependency edges over all dependency edges touching the group.
fn coupling(graph: &AffinityGraph, group: &[usize]) -> f64 {
    let members: BTreeSet<usize> = group.iter().copied().collect();
    let (mut internal, mut external) = (0usize, 0usize);
    for &(a, b) in &graph.dependencies {
        match (members.contains(&a), members.contains(&b)) {
            (true, true) => internal += 1,
            (true, false) | (false, true) => external += 1,
            (false, false) => {}
        }
    }
    let total = internal + external;
    if total == 0 {
        0.0
    } else {
        external as f64 / total as f64
    }
}

/// `<common directory>::<dominant name token>`.
fn cluster_name(graph: &AffinityGraph, group: &[usize]) -> String {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for &i in group {
        for token in name_tokens(&graph.names[i]) {
            *counts.entry(token).or_default() += 1;
        }
    }
    let mut token = String::from("misc");
    let mut best = 0;
    for (t, n) in counts {
        if n > best {
            best = n;
            token = t;
        }
    }

    let dirs: Vec<Vec<&str>> = group
        .iter()
        .map(|&i| {
            let mut parts: Vec<&str> = graph.files[i].split('/').collect();
            parts.pop();
            parts
        })
        .collect();
    let mut common: Vec<&str> = dirs.first().cloned().unwrap_or_default();
    for d in dirs.iter().skip(1) {
        let shared = common.iter().zip(d).take_while(|(a, b)| a == b).count();
        common.truncate(shared);
    }

    if common.is_empty() {
        token
    } else {
        format!("{}::{token}", common.join("/"))
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Batch clustering over the active generation.
pub struct ClusterEngine {
    store: Arc<dyn GraphStore>,
    config: ClusterSection,
    reporter: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for ClusterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ClusterEngine {
    pub fn new(store: Arc<dyn GraphStore>, config: ClusterSection) -> Self {
        Self {
            store,
            config,
            reporter: Arc::new(NoopReporter),
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub async fn run_with_timeout(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> crate::error::Result<ClusterReport> {
        match tokio::time::timeout(timeout, self.run(cancel)).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(AtlasError::Timeout(timeout))
            }
        }
    }

    /// Cluster the active generation and publish the result atomically,
    /// replacing any earlier cluster set for that generation.
    pub async fn run(&self, cancel: &CancellationToken) -> crate::error::Result<ClusterReport> {
        let generation = self
            .store
            .active_generation()
            .await?
            .ok_or(ClusterError::NoGeneration)?;
        self.run_generation(&generation.generation_id, cancel).await
    }

    /// Clusters of `prior` when `staged` feeds clustering exactly the same
    /// inputs. `None` when anything differs or `prior` was never clustered.
    pub async fn reusable_clusters(
        &self,
        prior: &str,
        staged: &StagedGeneration,
    ) -> crate::error::Result<Option<Vec<SemanticCluster>>> {
        let clusters = self.store.load_clusters(prior).await?;
        if clusters.is_empty() {
            return Ok(None);
        }
        let staged_entities: Vec<CodeEntity> =
            staged.entities.iter().map(|p| p.entity.clone()).collect();
        let next = input_digest(
            &staged_entities,
            &staged.edges,
            &staged.co_changes,
            &staged.churn,
        );
        let previous = input_digest(
            &self.store.load_entities(prior, false).await?,
            &self.store.load_edges(prior).await?,
            &self.store.load_co_change(prior).await?,
            &self.store.load_churn(prior).await?,
        );
        debug!(prior, unchanged = next == previous, "Compared clustering inputs");
        Ok((next == previous).then_some(clusters))
    }

    /// Bring `generation_id`'s clusters up to date after it was committed.
    /// Never fails: problems leave the generation [`ClusterRefresh::Pending`].
    pub async fn refresh(
        &self,
        generation_id: &str,
        carried: Option<Vec<SemanticCluster>>,
        cancel: &CancellationToken,
    ) -> ClusterRefresh {
        if let Some(clusters) = carried {
            return match self.store.publish_clusters(generation_id, &clusters).await {
                Ok(()) => {
                    info!(clusters = clusters.len(), "Clusters carried forward");
                    ClusterRefresh::CarriedForward {
                        clusters: clusters.len() as u64,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Carrying clusters forward failed");
                    ClusterRefresh::Pending {
                        reason: e.to_string(),
                    }
                }
            };
        }
        match self.run_generation(generation_id, cancel).await {
            Ok(report) => ClusterRefresh::Recomputed {
                clusters: report.clusters,
            },
            Err(e) => {
                warn!(error = %e, "Clustering after ingest failed, run `atlas clusters run` to retry");
                ClusterRefresh::Pending {
                    reason: e.to_string(),
                }
            }
        }
    }

    #[instrument(skip_all, name = "cluster", fields(generation = generation_id))]
    pub async fn run_generation(
        &self,
        generation_id: &str,
        cancel: &CancellationToken,
    ) -> crate::error::Result<ClusterReport> {
        let start = Instant::now();
        let generation_id = generation_id.to_string();

        self.reporter.start(Stage::Cluster, None);
        let entities = self.store.load_entities(&generation_id, false).await?;
        let edges = self.store.load_edges(&generation_id).await?;
        let co_changes = self.store.load_co_change(&generation_id).await?;
        let churn = self.store.load_churn(&generation_id).await?;
        check(cancel)?;

        let config = self.config.clone();
        let token = cancel.clone();
        let clustering = tokio::task::spawn_blocking(move || {
            cluster_entities(&entities, &edges, &co_changes, &churn, &config, &token)
        })
        .await
        .map_err(|e| ClusterError::Worker(e.to_string()))??;
        check(cancel)?;

        self.store
            .publish_clusters(&generation_id, &clustering.clusters)
            .await?;
        self.reporter.finish();

        let clustered: usize = clustering.clusters.iter().map(|c| c.member_ids.len()).sum();
        let report = ClusterReport {
            generation_id,
            clusters: clustering.clusters.len() as u64,
            clustered_entities: clustered as u64,
            unclustered_entities: (clustering.entities - clustered) as u64,
            affinity_edges: clustering.affinity_edges as u64,
            resplits: clustering.resplits as u64,
            merges: clustering.merges as u64,
            rejected: clustering.rejected as u64,
            refinement_moves: clustering.refinement_moves as u64,
            modularity: clustering.modularity(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            clusters = report.clusters,
            clustered = report.clustered_entities,
            resplits = report.resplits,
            rejected = report.rejected,
            modularity = report.modularity,
            "Clustering complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::SqliteStore;
    use crate::types::{
        EdgeKind, EntityKind, Generation, GenerationCounts, IngestMode, PendingEntity,
        StagedGeneration,
    };

    fn entity(file: &str, name: &str, signature: &str) -> CodeEntity {
        CodeEntity {
            entity_id: format!("rust:function:{file}:{name}:1-5"),
            entity_kind: EntityKind::Function,
            language: "rust".into(),
            name: name.into(),
            qualified_name: name.into(),
            file_path: file.into(),
            line_start: 1,
            line_end: 5,
            signature: signature.into(),
            body_text: None,
            is_public: true,
            is_test: false,
            complexity_score: None,
            token_count: 200,
        }
    }

    fn call(from: &CodeEntity, to: &CodeEntity) -> DependencyEdge {
        DependencyEdge {
            from_id: from.entity_id.clone(),
            to_id: to.entity_id.clone(),
            edge_kind: EdgeKind::Calls,
            position: 0,
        }
    }

    /// Two tightly knit groups of four with no links between them.
    fn two_groups() -> (Vec<CodeEntity>, Vec<DependencyEdge>) {
        let auth: Vec<CodeEntity> = ["session_open", "session_close", "session_check", "session_renew"]
            .iter()
            .map(|n| entity("src/auth/session.rs", n, &format!("fn {n}(s: Session) -> Token")))
            .collect();
        let billing: Vec<CodeEntity> = ["invoice_create", "invoice_send", "invoice_void", "invoice_total"]
            .iter()
            .map(|n| entity("src/billing/invoice.rs", n, &format!("fn {n}(i: Invoice) -> Money")))
            .collect();
        let mut edges = Vec::new();
        for group in [&auth, &billing] {
            for k in 1..group.len() {
                edges.push(call(&group[0], &group[k]));
            }
        }
        let mut entities = auth;
        entities.extend(billing);
        (entities, edges)
    }

    fn config() -> ClusterSection {
        ClusterSection {
            min_size: 2,
            max_size: 6,
            min_tokens: 100,
            max_tokens: 4_000,
            min_cohesion: 0.8,
            ..ClusterSection::default()
        }
    }

    #[test]
    fn finds_the_two_groups() {
        let (entities, edges) = two_groups();
        let result =
            cluster_entities(&entities, &edges, &[], &[], &config(), &CancellationToken::new())
                .unwrap();
        assert_eq!(result.clusters.len(), 2);
        let first = &result.clusters[0];
        assert_eq!(first.cluster_id, "cluster-001");
        assert_eq!(first.member_ids.len(), 4);
        assert!(first.member_ids.iter().all(|id| id.contains("auth")));
        assert_eq!(first.name, "src/auth::session");
        assert!((first.cohesion_score - 1.0).abs() < 1e-9);
        assert!(first.coupling_score.abs() < 1e-9);
        assert_eq!(first.token_count, 800);
        assert!(result.modularity() > 0.3);
    }

    #[test]
    fn respects_bounds() {
        let (entities, edges) = two_groups();
        let cfg = ClusterSection {
            max_size: 3,
            min_size: 2,
            min_cohesion: 0.0,
            ..config()
        };
        let result =
            cluster_entities(&entities, &edges, &[], &[], &cfg, &CancellationToken::new()).unwrap();
        assert!(result.resplits >= 1);
        for cluster in &result.clusters {
            assert!(cluster.member_ids.len() <= 3 && cluster.member_ids.len() >= 2);
        }
    }

    #[test]
    fn cancelled_before_work() {
        let (entities, edges) = two_groups();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = cluster_entities(&entities, &edges, &[], &[], &config(), &cancel).unwrap_err();
        assert!(matches!(err, AtlasError::Cancelled));
    }

    #[tokio::test]
    async fn engine_publishes_and_is_repeatable() {
        let (entities, edges) = two_groups();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store
            .commit_generation(
                &StagedGeneration {
                    generation: Generation {
                        generation_id: "g1".into(),
                        created_at: Utc::now(),
                        root_path: "/repo".into(),
                        mode: IngestMode::Full,
                        counts: GenerationCounts::default(),
                    },
                    files: Vec::new(),
                    entities: entities
                        .into_iter()
                        .map(|entity| PendingEntity {
                            entity,
                            raw_refs: Vec::new(),
                        })
                        .collect(),
                    edges,
                    co_changes: Vec::new(),
                    churn: Vec::new(),
                },
                2,
            )
            .await
            .unwrap();

        let engine = ClusterEngine::new(store.clone(), config());
        let first = engine.run(&CancellationToken::new()).await.unwrap();
        let published = store.load_clusters("g1").await.unwrap();
        let second = engine.run(&CancellationToken::new()).await.unwrap();
        let republished = store.load_clusters("g1").await.unwrap();

        assert_eq!(first.clusters, 2);
        assert_eq!(first.clustered_entities, 8);
        assert_eq!(first.generation_id, second.generation_id);
        assert_eq!(published, republished);
    }

    #[tokio::test]
    async fn engine_needs_a_generation() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = ClusterEngine::new(store, config());
        let err = engine.run(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.class(), "cluster_failed");
    }
}
