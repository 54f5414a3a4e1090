// Query engine: five budgeted strategies over one captured generation.
//
// Every query reads the store only. Zero matches is a successful empty
// response; validation failures surface as `QueryError`.

pub mod traversal;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::QuerySection;
use crate::error::{AtlasError, QueryError};
use crate::store::{Field, FindOptions, GraphStore, Op, Predicate};
use crate::types::{
    CodeEntity, DependencyEdge, Direction, EntityRecord, SemanticCluster, estimate_tokens,
};

// ── Strategies ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Auto,
    Metadata,
    Signature,
    Body,
    Traversal,
    Cluster,
}

/// Result ceiling for one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Budget {
    pub max_results: usize,
    pub max_tokens: u32,
}

const METADATA_FIELDS: &[Field] = &[
    Field::EntityId,
    Field::Name,
    Field::QualifiedName,
    Field::FilePath,
    Field::Kind,
    Field::Language,
    Field::IsPublic,
];

const SIGNATURE_FIELDS: &[Field] = &[
    Field::EntityId,
    Field::Name,
    Field::QualifiedName,
    Field::FilePath,
    Field::Kind,
    Field::Language,
    Field::IsPublic,
    Field::Signature,
];

const BODY_FIELDS: &[Field] = &[
    Field::EntityId,
    Field::Name,
    Field::QualifiedName,
    Field::FilePath,
    Field::Kind,
    Field::Language,
    Field::IsPublic,
    Field::Signature,
    Field::Body,
];

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Metadata => "metadata",
            Self::Signature => "signature",
            Self::Body => "body",
            Self::Traversal => "traversal",
            Self::Cluster => "cluster",
        }
    }

    pub fn budget(self) -> Budget {
        let (max_results, max_tokens) = match self {
            Self::Auto | Self::Metadata => (200, 4_000),
            Self::Signature => (100, 8_000),
            Self::Body => (50, 20_000),
            Self::Traversal => (500, 16_000),
            Self::Cluster => (20, 8_000),
        };
        Budget {
            max_results,
            max_tokens,
        }
    }

    /// Predicate fields this strategy may match on. Traversal and cluster
    /// queries take no predicate.
    pub fn allowed_fields(self) -> &'static [Field] {
        match self {
            Self::Auto | Self::Body => BODY_FIELDS,
            Self::Metadata => METADATA_FIELDS,
            Self::Signature => SIGNATURE_FIELDS,
            Self::Traversal | Self::Cluster => &[],
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Requests ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalSpec {
    pub seed: String,
    #[serde(default)]
    pub direction: Direction,
    pub max_depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterSelector {
    /// Case-insensitive substring of the cluster name.
    Name(String),
    /// The cluster owning this entity.
    Entity(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub strategy: Strategy,
    pub predicate: Option<Predicate>,
    pub traversal: Option<TraversalSpec>,
    pub cluster: Option<ClusterSelector>,
    pub include_body: bool,
    pub include_refs: bool,
    pub include_tests: bool,
    /// Lowers the strategy's result ceiling; never raises it.
    pub limit: Option<usize>,
    /// Read this generation instead of the active one.
    pub generation: Option<String>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl QueryRequest {
    /// Auto-dispatched search for `text` in names, qualified names and paths.
    pub fn pattern(text: &str) -> Self {
        Self {
            predicate: Some(Predicate::Or(vec![
                Predicate::cmp(Field::Name, Op::Contains, text),
                Predicate::cmp(Field::QualifiedName, Op::Contains, text),
                Predicate::cmp(Field::FilePath, Op::Contains, text),
            ])),
            ..Self::default()
        }
    }

    pub fn traversal(seed: &str, direction: Direction, max_depth: u32) -> Self {
        Self {
            strategy: Strategy::Traversal,
            traversal: Some(TraversalSpec {
                seed: seed.to_string(),
                direction,
                max_depth,
            }),
            ..Self::default()
        }
    }
}

// ── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOutput {
    Entities {
        entities: Vec<EntityRecord>,
    },
    Subgraph {
        entities: Vec<EntityRecord>,
        edges: Vec<DependencyEdge>,
    },
    Clusters {
        clusters: Vec<SemanticCluster>,
    },
}

impl QueryOutput {
    pub fn len(&self) -> usize {
        match self {
            Self::Entities { entities } | Self::Subgraph { entities, .. } => entities.len(),
            Self::Clusters { clusters } => clusters.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Empty when nothing has been ingested yet.
    pub generation_id: String,
    /// The strategy that actually ran.
    pub strategy: Strategy,
    /// Results were cut at the strategy's budget.
    pub truncated: bool,
    pub estimated_tokens: u32,
    #[serde(flatten)]
    pub output: QueryOutput,
}

impl QueryResponse {
    fn empty(generation_id: String, strategy: Strategy) -> Self {
        let output = match strategy {
            Strategy::Traversal => QueryOutput::Subgraph {
                entities: Vec::new(),
                edges: Vec::new(),
            },
            Strategy::Cluster => QueryOutput::Clusters {
                clusters: Vec::new(),
            },
            _ => QueryOutput::Entities {
                entities: Vec::new(),
            },
        };
        Self {
            generation_id,
            strategy,
            truncated: false,
            estimated_tokens: 0,
            output,
        }
    }
}

// ── Dispatch ───────────────────────────────────────────────────────

/// Pick the strategy a request runs under and check its predicate fits.
pub fn resolve_strategy(request: &QueryRequest) -> Result<Strategy, QueryError> {
    let strategy = match request.strategy {
        Strategy::Auto => {
            if request.traversal.is_some() {
                Strategy::Traversal
            } else if request.cluster.is_some() {
                Strategy::Cluster
            } else {
                let predicate = request.predicate.as_ref().ok_or_else(|| {
                    QueryError::MissingInput(
                        "a predicate, traversal spec or cluster selector".into(),
                    )
                })?;
                let fields = predicate.fields();
                [Strategy::Metadata, Strategy::Signature, Strategy::Body]
                    .into_iter()
                    .find(|s| fields.iter().all(|f| s.allowed_fields().contains(f)))
                    .unwrap_or(Strategy::Body)
            }
        }
        explicit => explicit,
    };

    match strategy {
        Strategy::Traversal if request.traversal.is_none() => {
            return Err(QueryError::MissingInput("traversal spec".into()));
        }
        Strategy::Cluster if request.cluster.is_none() => {
            return Err(QueryError::MissingInput("cluster selector".into()));
        }
        Strategy::Metadata | Strategy::Signature | Strategy::Body
            if request.predicate.is_none() =>
        {
            return Err(QueryError::MissingInput("predicate".into()));
        }
        _ => {}
    }

    if let Some(predicate) = &request.predicate {
        let allowed = strategy.allowed_fields();
        if let Some(field) = predicate.fields().into_iter().find(|f| !allowed.contains(f)) {
            return Err(QueryError::FieldNotAllowed {
                strategy: strategy.to_string(),
                field: field.as_str().to_string(),
            });
        }
        predicate.validate()?;
    }
    Ok(strategy)
}

/// Estimated tokens a record adds to a response.
fn record_tokens(entity: &CodeEntity, include_body: bool) -> u32 {
    let header = estimate_tokens(&entity.qualified_name)
        + estimate_tokens(&entity.signature)
        + estimate_tokens(&entity.file_path);
    if include_body {
        header + entity.token_count
    } else {
        header
    }
}

fn cluster_tokens(cluster: &SemanticCluster) -> u32 {
    estimate_tokens(&cluster.name) + estimate_tokens(&cluster.member_ids.join(" "))
}

/// Keep the longest prefix of `items` under both ceilings.
fn take_within<T>(items: Vec<T>, budget: Budget, cost: impl Fn(&T) -> u32) -> (Vec<T>, u32, bool) {
    let total = items.len();
    let mut spent = 0u32;
    let mut kept = Vec::new();
    for item in items {
        if kept.len() >= budget.max_results {
            break;
        }
        let c = cost(&item);
        if spent + c > budget.max_tokens {
            break;
        }
        spent += c;
        kept.push(item);
    }
    let truncated = kept.len() < total;
    (kept, spent, truncated)
}

// ── Engine ─────────────────────────────────────────────────────────

pub struct QueryEngine {
    store: Arc<dyn GraphStore>,
    config: QuerySection,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QueryEngine {
    pub fn new(store: Arc<dyn GraphStore>, config: QuerySection) -> Self {
        Self { store, config }
    }

    /// Run a query under the request timeout (or the configured default)
    /// and the cancellation token.
    #[instrument(skip_all, name = "query", fields(strategy = request.strategy.as_str()))]
    pub async fn run(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> crate::error::Result<QueryResponse> {
        let timeout = request
            .timeout
            .unwrap_or_else(|| Duration::from_millis(self.config.timeout_ms));
        let start = Instant::now();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AtlasError::Cancelled),
            result = tokio::time::timeout(timeout, self.execute(request, cancel)) => {
                result.map_err(|_| AtlasError::Timeout(timeout))??
            }
        };

        info!(
            strategy = response.strategy.as_str(),
            results = response.output.len(),
            truncated = response.truncated,
            duration_ms = start.elapsed().as_millis(),
            "Query complete"
        );
        Ok(response)
    }

    async fn execute(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> crate::error::Result<QueryResponse> {
        let strategy = resolve_strategy(request)?;
        if let (Strategy::Traversal, Some(spec)) = (strategy, &request.traversal) {
            if spec.max_depth > self.config.max_traversal_depth {
                return Err(QueryError::DepthExceeded {
                    requested: spec.max_depth,
                    max: self.config.max_traversal_depth,
                }
                .into());
            }
        }

        let generation = match &request.generation {
            Some(id) => id.clone(),
            None => match self.store.active_generation().await? {
                Some(g) => g.generation_id,
                None => {
                    debug!("No active generation; returning empty result");
                    return Ok(QueryResponse::empty(String::new(), strategy));
                }
            },
        };

        let mut budget = strategy.budget();
        if let Some(limit) = request.limit {
            budget.max_results = budget.max_results.min(limit);
        }

        match strategy {
            Strategy::Traversal => {
                self.run_traversal(&generation, request, budget, cancel)
                    .await
            }
            Strategy::Cluster => self.run_cluster(&generation, request, budget).await,
            _ => {
                self.run_search(&generation, strategy, request, budget)
                    .await
            }
        }
    }

    async fn run_search(
        &self,
        generation: &str,
        strategy: Strategy,
        request: &QueryRequest,
        budget: Budget,
    ) -> crate::error::Result<QueryResponse> {
        let Some(predicate) = &request.predicate else {
            return Err(QueryError::MissingInput("predicate".into()).into());
        };
        let found = self
            .store
            .find_entities(
                generation,
                predicate,
                &FindOptions {
                    include_body: request.include_body,
                    include_tests: request.include_tests,
                    limit: Some(budget.max_results + 1),
                },
            )
            .await?;
        let (kept, tokens, truncated) = take_within(found, budget, |e| {
            record_tokens(e, request.include_body)
        });
        let entities = self.with_refs(generation, kept, request).await?;

        Ok(QueryResponse {
            generation_id: generation.to_string(),
            strategy,
            truncated,
            estimated_tokens: tokens,
            output: QueryOutput::Entities { entities },
        })
    }

    async fn run_traversal(
        &self,
        generation: &str,
        request: &QueryRequest,
        budget: Budget,
        cancel: &CancellationToken,
    ) -> crate::error::Result<QueryResponse> {
        let Some(spec) = &request.traversal else {
            return Err(QueryError::MissingInput("traversal spec".into()).into());
        };
        let seed = self
            .store
            .get_entity(generation, &spec.seed, request.include_body)
            .await?;
        let Some(seed) = seed.filter(|e| request.include_tests || !e.is_test) else {
            return Ok(QueryResponse::empty(
                generation.to_string(),
                Strategy::Traversal,
            ));
        };

        let order = traversal::breadth_first(
            self.store.as_ref(),
            generation,
            &seed.entity_id,
            spec.direction,
            spec.max_depth,
            request.include_tests,
        )
        .await?;
        if cancel.is_cancelled() {
            return Err(AtlasError::Cancelled);
        }

        let ids: Vec<String> = order.iter().map(|(id, _)| id.clone()).collect();
        let depths = traversal::depth_map(&order);
        let fetched = self
            .store
            .get_entities(generation, &ids, request.include_body)
            .await?;
        let (kept, tokens, truncated) = take_within(fetched, budget, |e| {
            record_tokens(e, request.include_body)
        });

        let kept_ids: Vec<String> = kept.iter().map(|e| e.entity_id.clone()).collect();
        let edges = traversal::induced_edges(self.store.as_ref(), generation, &kept_ids).await?;
        let mut entities = self.with_refs(generation, kept, request).await?;
        for record in &mut entities {
            record.depth = depths.get(record.entity.entity_id.as_str()).copied();
        }

        Ok(QueryResponse {
            generation_id: generation.to_string(),
            strategy: Strategy::Traversal,
            truncated,
            estimated_tokens: tokens,
            output: QueryOutput::Subgraph { entities, edges },
        })
    }

    async fn run_cluster(
        &self,
        generation: &str,
        request: &QueryRequest,
        budget: Budget,
    ) -> crate::error::Result<QueryResponse> {
        let clusters = match &request.cluster {
            Some(ClusterSelector::Name(pattern)) => {
                self.store.find_clusters(generation, pattern).await?
            }
            Some(ClusterSelector::Entity(id)) => self
                .store
                .cluster_for_entity(generation, id)
                .await?
                .into_iter()
                .collect(),
            None => return Err(QueryError::MissingInput("cluster selector".into()).into()),
        };
        let (clusters, tokens, truncated) = take_within(clusters, budget, cluster_tokens);

        Ok(QueryResponse {
            generation_id: generation.to_string(),
            strategy: Strategy::Cluster,
            truncated,
            estimated_tokens: tokens,
            output: QueryOutput::Clusters { clusters },
        })
    }

    async fn with_refs(
        &self,
        generation: &str,
        entities: Vec<CodeEntity>,
        request: &QueryRequest,
    ) -> crate::error::Result<Vec<EntityRecord>> {
        let mut records = Vec::with_capacity(entities.len());
        for entity in entities {
            let mut record = EntityRecord::from(entity);
            if request.include_refs {
                let id = record.entity.entity_id.clone();
                let mut forward = self.store.forward_refs(generation, &id).await?;
                let mut reverse = self.store.reverse_refs(generation, &id).await?;
                if !request.include_tests {
                    let visible = self.visible(generation, &forward, &reverse).await?;
                    forward.retain(|r| visible.contains(r));
                    reverse.retain(|r| visible.contains(r));
                }
                record.forward_refs = Some(forward);
                record.reverse_refs = Some(reverse);
            }
            records.push(record);
        }
        Ok(records)
    }

    /// The subset of referenced ids that are not test entities.
    async fn visible(
        &self,
        generation: &str,
        forward: &[String],
        reverse: &[String],
    ) -> crate::error::Result<HashSet<String>> {
        let ids: Vec<String> = forward.iter().chain(reverse).cloned().collect();
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        Ok(self
            .store
            .get_entities(generation, &ids, false)
            .await?
            .into_iter()
            .filter(|e| !e.is_test)
            .map(|e| e.entity_id)
            .collect())
    }
}
