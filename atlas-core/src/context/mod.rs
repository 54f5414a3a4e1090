// Context selection: pack the most relevant clusters around a focus into a
// token budget.
#![allow(clippy::cast_precision_loss)]

pub mod keywords;

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::{ContextSection, TieBreak};
use crate::error::{AtlasError, QueryError};
use crate::store::GraphStore;
use crate::types::{CodeEntity, SemanticCluster};

// ── Inputs ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Focus {
    /// An entity id. Test entities never match.
    Entity(String),
    /// Free text scored against names, signatures and paths.
    Keywords(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Understand,
    Modify,
    Debug,
    Review,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Understand => "understand",
            Self::Modify => "modify",
            Self::Debug => "debug",
            Self::Review => "review",
        }
    }

    /// Weights for edges leaving the seed (forward) and arriving at it (reverse).
    pub fn direction_weights(self) -> (f64, f64) {
        match self {
            Self::Understand => (1.0, 0.5),
            Self::Modify => (0.5, 1.0),
            Self::Debug => (0.7, 1.0),
            Self::Review => (0.8, 0.8),
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "understand" => Ok(Self::Understand),
            "modify" => Ok(Self::Modify),
            "debug" => Ok(Self::Debug),
            "review" => Ok(Self::Review),
            other => Err(QueryError::MissingInput(format!(
                "task type `{other}` (expected understand, modify, debug or review)"
            ))),
        }
    }
}

// ── Output ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Cluster,
    Entity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub kind: ItemKind,
    /// Cluster id or entity id.
    pub id: String,
    pub name: String,
    pub entity_ids: Vec<String>,
    pub relevance: f64,
    pub tokens: u32,
    pub running_total: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    OverBudget,
    BelowRelevanceThreshold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub id: String,
    pub reason: ExclusionReason,
    pub relevance: f64,
    pub tokens: u32,
}

/// Selected context. `total_tokens` never exceeds `budget`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPack {
    pub generation_id: String,
    pub task_type: TaskType,
    /// Entity the pack is centred on; `None` when the focus matched nothing.
    pub focus_entity: Option<String>,
    pub budget: u32,
    pub total_tokens: u32,
    pub items: Vec<ContextItem>,
    pub exclusions: Vec<Exclusion>,
}

impl ContextPack {
    fn empty(generation_id: String, task_type: TaskType, budget: u32) -> Self {
        Self {
            generation_id,
            task_type,
            focus_entity: None,
            budget,
            total_tokens: 0,
            items: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    fn push(&mut self, mut item: ContextItem) {
        self.total_tokens += item.tokens;
        item.running_total = self.total_tokens;
        self.items.push(item);
    }

    fn fits(&self, tokens: u32) -> bool {
        u64::from(self.total_tokens) + u64::from(tokens) <= u64::from(self.budget)
    }

    fn exclude(&mut self, id: &str, reason: ExclusionReason, relevance: f64, tokens: u32) {
        self.exclusions.push(Exclusion {
            id: id.to_string(),
            reason,
            relevance,
            tokens,
        });
    }
}

// ── Ranking ────────────────────────────────────────────────────────

/// A cluster, or an unclustered neighbour of the seed, competing for budget.
#[derive(Debug, Clone)]
struct Candidate {
    kind: ItemKind,
    id: String,
    name: String,
    members: Vec<String>,
    tokens: u32,
    dependency: f64,
    temporal: f64,
    relevance: f64,
}

impl Candidate {
    fn density(&self) -> f64 {
        self.relevance / f64::from(self.tokens.max(1))
    }
}

fn rank(a: &Candidate, b: &Candidate, tie_break: TieBreak) -> Ordering {
    b.density()
        .total_cmp(&a.density())
        .then_with(|| match tie_break {
            TieBreak::SmallerFirst => a.tokens.cmp(&b.tokens),
            TieBreak::LargerFirst => b.tokens.cmp(&a.tokens),
            TieBreak::Lexicographic => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

// ── Selector ───────────────────────────────────────────────────────

pub struct ContextSelector {
    store: Arc<dyn GraphStore>,
    config: ContextSection,
}

impl std::fmt::Debug for ContextSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextSelector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContextSelector {
    pub fn new(store: Arc<dyn GraphStore>, config: ContextSection) -> Self {
        Self { store, config }
    }

    pub async fn select_with_timeout(
        &self,
        focus: &Focus,
        task: TaskType,
        budget: Option<u32>,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> crate::error::Result<ContextPack> {
        tokio::time::timeout(timeout, self.select(focus, task, budget, cancel))
            .await
            .map_err(|_| AtlasError::Timeout(timeout))?
    }

    /// Build a context pack around `focus` within `budget` tokens (the
    /// configured default when `None`). A focus that matches nothing yields
    /// an empty pack.
    #[instrument(skip_all, name = "context", fields(task = task.as_str()))]
    pub async fn select(
        &self,
        focus: &Focus,
        task: TaskType,
        budget: Option<u32>,
        cancel: &CancellationToken,
    ) -> crate::error::Result<ContextPack> {
        let budget = budget.unwrap_or(self.config.default_budget);
        let Some(generation) = self.store.active_generation().await? else {
            return Ok(ContextPack::empty(String::new(), task, budget));
        };
        let generation_id = generation.generation_id;
        let mut pack = ContextPack::empty(generation_id.clone(), task, budget);

        let entities = self.store.load_entities(&generation_id, false).await?;
        let focus_entity = match focus {
            Focus::Entity(id) => entities.iter().find(|e| &e.entity_id == id && !e.is_test),
            Focus::Keywords(text) => keywords::best_match(&entities, &keywords::keywords(text)),
        };
        let Some(focus_entity) = focus_entity.cloned() else {
            debug!("Focus matched no entity");
            return Ok(pack);
        };
        pack.focus_entity = Some(focus_entity.entity_id.clone());
        if cancel.is_cancelled() {
            return Err(AtlasError::Cancelled);
        }

        let by_id: HashMap<&str, &CodeEntity> =
            entities.iter().map(|e| (e.entity_id.as_str(), e)).collect();
        let tokens_of = |ids: &[String]| -> u32 {
            ids.iter()
                .filter_map(|id| by_id.get(id.as_str()))
                .map(|e| e.token_count)
                .sum()
        };

        let clusters = self.store.load_clusters(&generation_id).await?;
        let seed_cluster = clusters
            .iter()
            .find(|c| c.member_ids.contains(&focus_entity.entity_id));

        // ── Seed ───────────────────────────────────────────────────
        let seed_members: Vec<String> = match seed_cluster {
            Some(c) => c.member_ids.clone(),
            None => vec![focus_entity.entity_id.clone()],
        };
        let seed_tokens = tokens_of(&seed_members);
        if pack.fits(seed_tokens) {
            pack.push(match seed_cluster {
                Some(c) => ContextItem {
                    kind: ItemKind::Cluster,
                    id: c.cluster_id.clone(),
                    name: c.name.clone(),
                    entity_ids: c.member_ids.clone(),
                    relevance: 1.0,
                    tokens: seed_tokens,
                    running_total: 0,
                },
                None => entity_item(&focus_entity, 1.0),
            });
        } else {
            let mut ordered: Vec<&CodeEntity> = vec![&focus_entity];
            ordered.extend(
                seed_members
                    .iter()
                    .filter(|id| **id != focus_entity.entity_id)
                    .filter_map(|id| by_id.get(id.as_str()).copied()),
            );
            for entity in ordered {
                if pack.fits(entity.token_count) {
                    pack.push(entity_item(entity, 1.0));
                } else {
                    pack.exclude(
                        &entity.entity_id,
                        ExclusionReason::OverBudget,
                        1.0,
                        entity.token_count,
                    );
                }
            }
        }

        // ── Candidates ─────────────────────────────────────────────
        let seed_set: HashSet<&str> = seed_members.iter().map(String::as_str).collect();
        let clustered: HashSet<&str> = clusters
            .iter()
            .flat_map(|c| c.member_ids.iter().map(String::as_str))
            .collect();
        let edges = self.store.load_edges(&generation_id).await?;
        let co_changes = self.store.load_co_change(&generation_id).await?;
        if cancel.is_cancelled() {
            return Err(AtlasError::Cancelled);
        }

        let mut candidates: Vec<Candidate> = clusters
            .iter()
            .filter(|c| seed_cluster.is_none_or(|s| s.cluster_id != c.cluster_id))
            .map(|c| cluster_candidate(c, tokens_of(&c.member_ids)))
            .collect();

        let mut neighbours: BTreeSet<&str> = BTreeSet::new();
        for edge in &edges {
            let (from, to) = (edge.from_id.as_str(), edge.to_id.as_str());
            if seed_set.contains(from) && !seed_set.contains(to) && !clustered.contains(to) {
                neighbours.insert(to);
            }
            if seed_set.contains(to) && !seed_set.contains(from) && !clustered.contains(from) {
                neighbours.insert(from);
            }
        }
        for id in neighbours {
            if let Some(entity) = by_id.get(id).filter(|e| !e.is_test) {
                candidates.push(Candidate {
                    kind: ItemKind::Entity,
                    id: entity.entity_id.clone(),
                    name: entity.qualified_name.clone(),
                    members: vec![entity.entity_id.clone()],
                    tokens: entity.token_count,
                    dependency: 0.0,
                    temporal: 0.0,
                    relevance: 0.0,
                });
            }
        }

        // ── Relevance ──────────────────────────────────────────────
        let (forward, reverse) = task.direction_weights();
        let owner: HashMap<String, usize> = candidates
            .iter()
            .enumerate()
            .flat_map(|(k, c)| c.members.iter().map(move |m| (m.clone(), k)))
            .collect();
        for edge in &edges {
            let (from, to) = (edge.from_id.as_str(), edge.to_id.as_str());
            if seed_set.contains(from) {
                if let Some(&k) = owner.get(to) {
                    candidates[k].dependency += forward;
                }
            } else if seed_set.contains(to) {
                if let Some(&k) = owner.get(from) {
                    candidates[k].dependency += reverse;
                }
            }
        }

        let seed_files: BTreeSet<&str> = seed_members
            .iter()
            .filter_map(|id| by_id.get(id.as_str()))
            .map(|e| e.file_path.as_str())
            .collect();
        let mut pair_counts: HashMap<(&str, &str), u32> = HashMap::new();
        for pair in &co_changes {
            pair_counts.insert((pair.file_a.as_str(), pair.file_b.as_str()), pair.count);
            pair_counts.insert((pair.file_b.as_str(), pair.file_a.as_str()), pair.count);
        }
        for candidate in &mut candidates {
            let files: BTreeSet<&str> = candidate
                .members
                .iter()
                .filter_map(|id| by_id.get(id.as_str()))
                .map(|e| e.file_path.as_str())
                .collect();
            candidate.temporal = seed_files
                .iter()
                .flat_map(|s| files.iter().map(move |f| (*s, *f)))
                .filter(|(s, f)| s != f)
                .filter_map(|key| pair_counts.get(&key))
                .map(|&n| f64::from(n))
                .sum();
        }

        let max_dep = candidates.iter().map(|c| c.dependency).fold(0.0, f64::max);
        let max_tmp = candidates.iter().map(|c| c.temporal).fold(0.0, f64::max);
        for c in &mut candidates {
            let dep = if max_dep > 0.0 { c.dependency / max_dep } else { 0.0 };
            let tmp = if max_tmp > 0.0 { c.temporal / max_tmp } else { 0.0 };
            c.relevance = self.config.dependency_weight * dep + self.config.temporal_weight * tmp;
        }
        candidates.sort_by(|a, b| rank(a, b, self.config.tie_break));

        // ── Greedy fill ────────────────────────────────────────────
        for c in candidates {
            if c.relevance < self.config.min_relevance {
                pack.exclude(&c.id, ExclusionReason::BelowRelevanceThreshold, c.relevance, c.tokens);
            } else if !pack.fits(c.tokens) {
                pack.exclude(&c.id, ExclusionReason::OverBudget, c.relevance, c.tokens);
            } else {
                pack.push(ContextItem {
                    kind: c.kind,
                    id: c.id,
                    name: c.name,
                    entity_ids: c.members,
                    relevance: c.relevance,
                    tokens: c.tokens,
                    running_total: 0,
                });
            }
        }

        info!(
            items = pack.items.len(),
            excluded = pack.exclusions.len(),
            total_tokens = pack.total_tokens,
            budget,
            "Context pack selected"
        );
        Ok(pack)
    }
}

fn entity_item(entity: &CodeEntity, relevance: f64) -> ContextItem {
    ContextItem {
        kind: ItemKind::Entity,
        id: entity.entity_id.clone(),
        name: entity.qualified_name.clone(),
        entity_ids: vec![entity.entity_id.clone()],
        relevance,
        tokens: entity.token_count,
        running_total: 0,
    }
}

fn cluster_candidate(cluster: &SemanticCluster, tokens: u32) -> Candidate {
    Candidate {
        kind: ItemKind::Cluster,
        id: cluster.cluster_id.clone(),
        name: cluster.name.clone(),
        members: cluster.member_ids.clone(),
        tokens,
        dependency: 0.0,
        temporal: 0.0,
        relevance: 0.0,
    }
}
