// Affinity graph: four normalised signals per candidate entity pair.
#![allow(clippy::cast_precision_loss)]

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::graph::{NodeIndex, UnGraph};

use crate::config::ClusterSection;
use crate::types::{CoChange, CodeEntity, DependencyEdge, FileChurn};

/// Weighted undirected graph over entities. Node `i` is `ids[i]`; ids are sorted.
#[derive(Debug, Clone, Default)]
pub struct AffinityGraph {
    pub ids: Vec<String>,
    pub files: Vec<String>,
    pub names: Vec<String>,
    pub tokens: Vec<u32>,
    pub graph: UnGraph<usize, f64>,
    /// Unordered dependency pairs `(i, j)` with `i < j`.
    pub dependencies: BTreeSet<(usize, usize)>,
}

impl AffinityGraph {
    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Edges as `(i, j, weight)`, in insertion order.
    pub fn weighted_edges(&self) -> Vec<(usize, usize, f64)> {
        self.graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                Some((a.index(), b.index(), self.graph[e]))
            })
            .collect()
    }

    /// Adjacency lists with weights, one per node.
    pub fn adjacency(&self) -> Vec<Vec<(usize, f64)>> {
        let mut adj = vec![Vec::new(); self.node_count()];
        for (a, b, w) in self.weighted_edges() {
            adj[a].push((b, w));
            adj[b].push((a, w));
        }
        adj
    }
}

/// Per-pair signal values, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Signals {
    pub dependency: f64,
    pub data_flow: f64,
    pub co_change: f64,
    pub textual: f64,
}

impl Signals {
    /// Weighted sum of the signals divided by the total weight, so the result
    /// stays in `[0, 1]` and `min_affinity` holds whatever the weight scale.
    /// Scaling every weight by the same factor changes nothing.
    pub fn combine(&self, config: &ClusterSection) -> f64 {
        let w = &config.weights;
        let total = w.total();
        if total <= 0.0 {
            return 0.0;
        }
        (w.dependency * self.dependency
            + w.data_flow * self.data_flow
            + w.co_change * self.co_change
            + w.textual * self.textual)
            / total
    }
}

// ── Tokens ─────────────────────────────────────────────────────────

/// Lowercase sub-tokens of an identifier, split on `_` and case changes.
/// Single characters are dropped.
pub fn name_tokens(name: &str) -> BTreeSet<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut out = BTreeSet::new();
    let mut current = String::new();
    for (i, &ch) in chars.iter().enumerate() {
        if !ch.is_alphanumeric() {
            flush(&mut current, &mut out);
            continue;
        }
        if ch.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
            // `parseHTTPRequest` splits as parse, http, request
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                flush(&mut current, &mut out);
            }
        }
        current.extend(ch.to_lowercase());
    }
    flush(&mut current, &mut out);
    out
}

fn flush(current: &mut String, out: &mut BTreeSet<String>) {
    if current.chars().count() > 1 {
        out.insert(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// Capitalised identifiers in a signature other than the entity's own name.
pub fn type_tokens(signature: &str, own_name: &str) -> BTreeSet<String> {
    signature
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().next().is_some_and(char::is_uppercase))
        .filter(|t| *t != own_name)
        .map(str::to_string)
        .collect()
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

fn ordered(a: usize, b: usize) -> (usize, usize) {
    if a < b { (a, b) } else { (b, a) }
}

/// Add every pair from each posting list no longer than `max_df`.
fn pairs_from_index(
    index: &BTreeMap<String, Vec<usize>>,
    max_df: usize,
    out: &mut BTreeSet<(usize, usize)>,
) {
    for postings in index.values() {
        if postings.len() < 2 || postings.len() > max_df {
            continue;
        }
        for (k, &a) in postings.iter().enumerate() {
            for &b in &postings[k + 1..] {
                out.insert(ordered(a, b));
            }
        }
    }
}

// ── Build ──────────────────────────────────────────────────────────

/// Build the affinity graph over non-test entities.
pub fn build_affinity(
    entities: &[CodeEntity],
    edges: &[DependencyEdge],
    co_changes: &[CoChange],
    churn: &[FileChurn],
    config: &ClusterSection,
) -> AffinityGraph {
    let mut members: Vec<&CodeEntity> = entities.iter().filter(|e| !e.is_test).collect();
    members.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    members.dedup_by(|a, b| a.entity_id == b.entity_id);

    let index_of: HashMap<&str, usize> = members
        .iter()
        .enumerate()
        .map(|(i, e)| (e.entity_id.as_str(), i))
        .collect();

    let names: Vec<BTreeSet<String>> = members.iter().map(|e| name_tokens(&e.name)).collect();
    let types: Vec<BTreeSet<String>> = members
        .iter()
        .map(|e| type_tokens(&e.signature, &e.name))
        .collect();

    let mut dependencies = BTreeSet::new();
    for edge in edges {
        if let (Some(&a), Some(&b)) = (
            index_of.get(edge.from_id.as_str()),
            index_of.get(edge.to_id.as_str()),
        ) {
            if a != b {
                dependencies.insert(ordered(a, b));
            }
        }
    }

    // Inverted indexes produce candidate pairs without comparing all pairs.
    let mut candidates: BTreeSet<(usize, usize)> = dependencies.clone();
    let mut by_name: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut by_type: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut by_file: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, e) in members.iter().enumerate() {
        for t in &names[i] {
            by_name.entry(t.clone()).or_default().push(i);
        }
        for t in &types[i] {
            by_type.entry(t.clone()).or_default().push(i);
        }
        by_file.entry(e.file_path.as_str()).or_default().push(i);
    }
    pairs_from_index(&by_name, config.max_token_df, &mut candidates);
    pairs_from_index(&by_type, config.max_token_df, &mut candidates);

    let churn_of: HashMap<&str, u32> = churn.iter().map(|c| (c.path.as_str(), c.commits)).collect();
    let mut co_change: HashMap<(&str, &str), f64> = HashMap::new();
    for pair in co_changes {
        let min_churn = churn_of
            .get(pair.file_a.as_str())
            .copied()
            .unwrap_or(0)
            .min(churn_of.get(pair.file_b.as_str()).copied().unwrap_or(0));
        if min_churn == 0 || pair.file_a == pair.file_b {
            continue;
        }
        let strength = (f64::from(pair.count) / f64::from(min_churn)).min(1.0);
        co_change.insert((pair.file_a.as_str(), pair.file_b.as_str()), strength);
        co_change.insert((pair.file_b.as_str(), pair.file_a.as_str()), strength);

        let (Some(left), Some(right)) = (
            by_file.get(pair.file_a.as_str()),
            by_file.get(pair.file_b.as_str()),
        ) else {
            continue;
        };
        if left.len() > config.max_token_df || right.len() > config.max_token_df {
            continue;
        }
        for &a in left {
            for &b in right {
                candidates.insert(ordered(a, b));
            }
        }
    }

    let mut graph = UnGraph::<usize, f64>::with_capacity(members.len(), candidates.len());
    for i in 0..members.len() {
        graph.add_node(i);
    }
    for &(a, b) in &candidates {
        let (ea, eb) = (members[a], members[b]);
        let signals = Signals {
            dependency: if dependencies.contains(&(a, b)) { 1.0 } else { 0.0 },
            data_flow: jaccard(&types[a], &types[b]),
            co_change: co_change
                .get(&(ea.file_path.as_str(), eb.file_path.as_str()))
                .copied()
                .unwrap_or(0.0),
            textual: jaccard(&names[a], &names[b]),
        };
        let affinity = signals.combine(config);
        if affinity >= config.min_affinity && affinity > 0.0 {
            graph.add_edge(NodeIndex::new(a), NodeIndex::new(b), affinity);
        }
    }

    AffinityGraph {
        ids: members.iter().map(|e| e.entity_id.clone()).collect(),
        files: members.iter().map(|e| e.file_path.clone()).collect(),
        names: members.iter().map(|e| e.name.clone()).collect(),
        tokens: members.iter().map(|e| e.token_count).collect(),
        graph,
        dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AffinityWeights;
    use crate::types::{EdgeKind, EntityKind};

    fn entity(id: &str, name: &str, file: &str, signature: &str) -> CodeEntity {
        CodeEntity {
            entity_id: id.into(),
            entity_kind: EntityKind::Function,
            language: "rust".into(),
            name: name.into(),
            qualified_name: name.into(),
            file_path: file.into(),
            line_start: 1,
            line_end: 2,
            signature: signature.into(),
            body_text: None,
            is_public: true,
            is_test: false,
            complexity_score: None,
            token_count: 100,
        }
    }

    #[test]
    fn splits_identifiers() {
        let tokens: Vec<String> = name_tokens("parseHTTPRequest_body").into_iter().collect();
        assert_eq!(tokens, vec!["body", "http", "parse", "request"]);
        let tokens: Vec<String> = name_tokens("load_user_id").into_iter().collect();
        assert_eq!(tokens, vec!["id", "load", "user"]);
    }

    #[test]
    fn type_tokens_skip_own_name() {
        let tokens = type_tokens("pub fn new(cfg: Config) -> Session", "Session");
        assert_eq!(tokens.into_iter().collect::<Vec<_>>(), vec!["Config"]);
    }

    #[test]
    fn combines_signals() {
        let entities = vec![
            entity("a", "load_user", "src/user.rs", "fn load_user(id: UserId) -> User"),
            entity("b", "save_user", "src/user.rs", "fn save_user(u: User) -> UserId"),
            entity("c", "render_page", "src/page.rs", "fn render_page() -> Html"),
        ];
        let edges = vec![DependencyEdge {
            from_id: "b".into(),
            to_id: "a".into(),
            edge_kind: EdgeKind::Calls,
            position: 0,
        }];
        let config = ClusterSection::default();
        let graph = build_affinity(&entities, &edges, &[], &[], &config);
        let weighted = graph.weighted_edges();
        assert_eq!(weighted.len(), 1);
        let (a, b, w) = weighted[0];
        assert_eq!((a, b), (0, 1));
        // dependency 1.0, data flow 1.0, textual 1/3
        let expected = (1.0 + 0.8 + 0.4 / 3.0) / 2.8;
        assert!((w - expected).abs() < 1e-9);
    }

    #[test]
    fn weight_scale_does_not_change_affinity() {
        let signals = Signals {
            dependency: 1.0,
            data_flow: 0.5,
            co_change: 0.25,
            textual: 0.0,
        };
        let base = ClusterSection::default();
        let mut scaled = ClusterSection::default();
        scaled.weights.dependency *= 10.0;
        scaled.weights.data_flow *= 10.0;
        scaled.weights.co_change *= 10.0;
        scaled.weights.textual *= 10.0;
        let expected = (1.0 + 0.8 * 0.5 + 0.6 * 0.25) / 2.8;
        assert!((signals.combine(&base) - expected).abs() < 1e-9);
        assert!((signals.combine(&scaled) - expected).abs() < 1e-9);

        let zero = ClusterSection {
            weights: AffinityWeights {
                dependency: 0.0,
                data_flow: 0.0,
                co_change: 0.0,
                textual: 0.0,
            },
            ..ClusterSection::default()
        };
        assert!(signals.combine(&zero).abs() < f64::EPSILON);
    }

    #[test]
    fn co_change_is_cross_file_and_normalised() {
        let entities = vec![
            entity("a", "alpha", "src/a.rs", "fn alpha()"),
            entity("b", "beta", "src/b.rs", "fn beta()"),
        ];
        let co = vec![CoChange {
            file_a: "src/a.rs".into(),
            file_b: "src/b.rs".into(),
            count: 4,
        }];
        let churn = vec![
            FileChurn {
                path: "src/a.rs".into(),
                commits: 4,
            },
            FileChurn {
                path: "src/b.rs".into(),
                commits: 8,
            },
        ];
        let config = ClusterSection::default();
        let graph = build_affinity(&entities, &[], &co, &churn, &config);
        let weighted = graph.weighted_edges();
        assert_eq!(weighted.len(), 1);
        assert!((weighted[0].2 - 0.6 / 2.8).abs() < 1e-9);
    }

    #[test]
    fn frequent_tokens_do_not_pair() {
        let entities: Vec<CodeEntity> = (0..5)
            .map(|i| entity(&format!("e{i}"), &format!("get_{i}x"), "src/x.rs", "fn f()"))
            .collect();
        let config = ClusterSection {
            max_token_df: 3,
            ..ClusterSection::default()
        };
        let graph = build_affinity(&entities, &[], &[], &[], &config);
        assert_eq!(graph.graph.edge_count(), 0);
    }
}
