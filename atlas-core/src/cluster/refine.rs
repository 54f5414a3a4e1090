// Boundary refinement and size/token/cohesion bounds.
#![allow(clippy::cast_precision_loss)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::config::ClusterSection;

use super::louvain::louvain;

const EPS: f64 = 1e-12;
const MAX_PASSES: usize = 50;

fn size_cost(size: usize) -> f64 {
    let s = size as f64;
    s * (1.0 + s).log2()
}

/// Description length of a partition: `penalty·Σ|c|·log2(1+|c|) + cut weight`.
pub fn description_length(adj: &[Vec<(usize, f64)>], membership: &[usize], penalty: f64) -> f64 {
    let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
    for &c in membership {
        *sizes.entry(c).or_default() += 1;
    }
    let size_term: f64 = sizes.values().map(|&s| size_cost(s)).sum();
    let mut cut = 0.0;
    for (i, neighbors) in adj.iter().enumerate() {
        for &(j, w) in neighbors {
            if i < j && membership[i] != membership[j] {
                cut += w;
            }
        }
    }
    penalty * size_term + cut
}

/// Move boundary nodes while a move lowers the description length.
/// Returns the number of moves made.
pub fn refine_boundaries(adj: &[Vec<(usize, f64)>], membership: &mut [usize], penalty: f64) -> usize {
    let mut sizes: HashMap<usize, usize> = HashMap::new();
    for &c in membership.iter() {
        *sizes.entry(c).or_default() += 1;
    }

    let mut moves = 0;
    for _ in 0..MAX_PASSES {
        let mut moved = false;
        for i in 0..membership.len() {
            let current = membership[i];
            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for &(j, w) in &adj[i] {
                *links.entry(membership[j]).or_default() += w;
            }
            if links.keys().all(|&c| c == current) {
                continue;
            }
            let to_current = links.get(&current).copied().unwrap_or(0.0);
            let cur_size = sizes[&current];
            let leave = size_cost(cur_size - 1) - size_cost(cur_size);

            let mut best: Option<(usize, f64)> = None;
            for (&c, &w) in &links {
                if c == current {
                    continue;
                }
                let target_size = sizes.get(&c).copied().unwrap_or(0);
                let join = size_cost(target_size + 1) - size_cost(target_size);
                let delta = (to_current - w) + penalty * (leave + join);
                if delta < -EPS && best.is_none_or(|(_, d)| delta < d - EPS) {
                    best = Some((c, delta));
                }
            }

            if let Some((target, _)) = best {
                membership[i] = target;
                *sizes.entry(current).or_default() -= 1;
                *sizes.entry(target).or_default() += 1;
                moves += 1;
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }
    moves
}

// ── Bounds ─────────────────────────────────────────────────────────

/// Groups after bounds enforcement, with the counts reported per run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bounded {
    /// Sorted groups of node indices, ordered by smallest member.
    pub groups: Vec<Vec<usize>>,
    pub resplits: usize,
    pub merges: usize,
    pub rejected: usize,
}

/// Inputs to bounds enforcement over one affinity graph.
#[derive(Debug)]
pub struct BoundsInput<'a> {
    pub adj: &'a [Vec<(usize, f64)>],
    pub tokens: &'a [u32],
    pub config: &'a ClusterSection,
}

impl BoundsInput<'_> {
    fn group_tokens(&self, group: &[usize]) -> u64 {
        group.iter().map(|&i| u64::from(self.tokens[i])).sum()
    }

    fn oversized(&self, group: &[usize]) -> bool {
        group.len() > self.config.max_size
            || self.group_tokens(group) > u64::from(self.config.max_tokens)
    }

    fn undersized(&self, group: &[usize]) -> bool {
        group.len() < self.config.min_size
            || self.group_tokens(group) < u64::from(self.config.min_tokens)
    }

    /// Affinity inside the group over affinity inside plus leaving it.
    pub fn cohesion(&self, group: &[usize]) -> f64 {
        let members: BTreeSet<usize> = group.iter().copied().collect();
        let (mut internal, mut boundary) = (0.0, 0.0);
        for &i in group {
            for &(j, w) in &self.adj[i] {
                if members.contains(&j) {
                    if i < j {
                        internal += w;
                    }
                } else {
                    boundary += w;
                }
            }
        }
        let total = internal + boundary;
        if total <= 0.0 { 0.0 } else { internal / total }
    }

    fn between(&self, a: &[usize], b: &[usize]) -> f64 {
        let other: BTreeSet<usize> = b.iter().copied().collect();
        a.iter()
            .flat_map(|&i| self.adj[i].iter())
            .filter(|(j, _)| other.contains(j))
            .map(|&(_, w)| w)
            .sum()
    }

    /// Split an oversized group: Louvain on its induced subgraph, or
    /// BFS-ordered chunks when Louvain keeps it whole.
    fn split(&self, group: &[usize]) -> Vec<Vec<usize>> {
        let local: HashMap<usize, usize> = group.iter().enumerate().map(|(k, &i)| (i, k)).collect();
        let mut edges = Vec::new();
        for (k, &i) in group.iter().enumerate() {
            for &(j, w) in &self.adj[i] {
                if let Some(&l) = local.get(&j) {
                    if k < l {
                        edges.push((k, l, w));
                    }
                }
            }
        }
        let communities = louvain(group.len(), &edges, self.config.seed);
        let count = communities.iter().max().map_or(0, |m| m + 1);
        if count <= 1 {
            return self.chunk(group, &local);
        }
        let mut parts = vec![Vec::new(); count];
        for (k, &c) in communities.iter().enumerate() {
            parts[c].push(group[k]);
        }
        parts
    }

    fn chunk(&self, group: &[usize], local: &HashMap<usize, usize>) -> Vec<Vec<usize>> {
        let mut seen = vec![false; group.len()];
        let mut order = Vec::with_capacity(group.len());
        for start in 0..group.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut queue = VecDeque::from([start]);
            while let Some(k) = queue.pop_front() {
                order.push(group[k]);
                let mut next: Vec<usize> = self.adj[group[k]]
                    .iter()
                    .filter_map(|(j, _)| local.get(j).copied())
                    .collect();
                next.sort_unstable();
                for l in next {
                    if !seen[l] {
                        seen[l] = true;
                        queue.push_back(l);
                    }
                }
            }
        }

        let mut chunks: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut current_tokens = 0u64;
        for i in order {
            let t = u64::from(self.tokens[i]);
            let full = current.len() >= self.config.max_size
                || current_tokens + t > u64::from(self.config.max_tokens);
            if !current.is_empty() && full {
                chunks.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            current.push(i);
            current_tokens += t;
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    /// Re-split oversized groups, merge or reject undersized ones, then
    /// reject groups below the cohesion floor. A single entity over
    /// `max_tokens` cannot be split and is rejected.
    pub fn enforce(&self, groups: Vec<Vec<usize>>) -> Bounded {
        let mut out = Bounded::default();

        let mut queue: VecDeque<Vec<usize>> = groups.into();
        let mut sized = Vec::new();
        while let Some(mut group) = queue.pop_front() {
            group.sort_unstable();
            if group.len() > 1 && self.oversized(&group) {
                out.resplits += 1;
                queue.extend(self.split(&group));
            } else {
                sized.push(group);
            }
        }

        loop {
            sized.sort_by_key(|g| g.first().copied());
            let Some(pos) = sized.iter().position(|g| self.undersized(g)) else {
                break;
            };
            let group = sized.remove(pos);
            let mut best: Option<(usize, f64)> = None;
            for (k, other) in sized.iter().enumerate() {
                let w = self.between(&group, other);
                if w <= 0.0 {
                    continue;
                }
                let mut merged = other.clone();
                merged.extend_from_slice(&group);
                if self.oversized(&merged) {
                    continue;
                }
                if best.is_none_or(|(_, bw)| w > bw + EPS) {
                    best = Some((k, w));
                }
            }
            match best {
                Some((k, _)) => {
                    sized[k].extend(group);
                    sized[k].sort_unstable();
                    out.merges += 1;
                }
                None => out.rejected += 1,
            }
        }

        for group in sized {
            if self.oversized(&group) || self.cohesion(&group) < self.config.min_cohesion {
                out.rejected += 1;
            } else {
                out.groups.push(group);
            }
        }
        out.groups.sort_by_key(|g| g.first().copied());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjacency(n: usize, edges: &[(usize, usize, f64)]) -> Vec<Vec<(usize, f64)>> {
        let mut adj = vec![Vec::new(); n];
        for &(a, b, w) in edges {
            adj[a].push((b, w));
            adj[b].push((a, w));
        }
        adj
    }

    fn config() -> ClusterSection {
        ClusterSection {
            min_size: 2,
            max_size: 4,
            min_tokens: 0,
            max_tokens: 10_000,
            min_cohesion: 0.5,
            ..ClusterSection::default()
        }
    }

    #[test]
    fn refinement_moves_misplaced_node() {
        // Node 2 is tied to 0 and 1 but starts with 3.
        let adj = adjacency(4, &[(0, 1, 1.0), (0, 2, 1.0), (1, 2, 1.0), (2, 3, 0.2)]);
        let mut membership = vec![0, 0, 1, 1];
        let before = description_length(&adj, &membership, 0.02);
        let moves = refine_boundaries(&adj, &mut membership, 0.02);
        assert!(moves >= 1);
        assert_eq!(membership[2], 0);
        assert!(description_length(&adj, &membership, 0.02) < before);
    }

    #[test]
    fn oversized_group_is_split() {
        let mut edges = Vec::new();
        for (a, b) in [(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5)] {
            edges.push((a, b, 1.0));
        }
        edges.push((2, 3, 0.05));
        let adj = adjacency(6, &edges);
        let tokens = vec![10; 6];
        let cfg = ClusterSection {
            max_size: 3,
            min_cohesion: 0.0,
            ..config()
        };
        let input = BoundsInput {
            adj: &adj,
            tokens: &tokens,
            config: &cfg,
        };
        let out = input.enforce(vec![(0..6).collect()]);
        assert_eq!(out.resplits, 1);
        assert_eq!(out.groups, vec![vec![0, 1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn chain_without_structure_is_chunked() {
        let adj = adjacency(5, &[(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0), (3, 4, 1.0)]);
        let tokens = vec![10; 5];
        let cfg = ClusterSection {
            max_size: 2,
            min_size: 1,
            min_cohesion: 0.0,
            ..config()
        };
        let input = BoundsInput {
            adj: &adj,
            tokens: &tokens,
            config: &cfg,
        };
        let out = input.enforce(vec![(0..5).collect()]);
        assert!(out.resplits >= 1);
        assert!(out.groups.iter().all(|g| g.len() <= 2));
        let total: usize = out.groups.iter().map(Vec::len).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn undersized_merges_or_is_rejected() {
        let adj = adjacency(5, &[(0, 1, 1.0), (1, 2, 0.5), (3, 4, 0.0)]);
        let tokens = vec![10; 5];
        let cfg = config();
        let input = BoundsInput {
            adj: &adj,
            tokens: &tokens,
            config: &cfg,
        };
        let out = input.enforce(vec![vec![0, 1], vec![2], vec![3], vec![4]]);
        assert_eq!(out.merges, 1);
        assert_eq!(out.groups, vec![vec![0, 1, 2]]);
        assert_eq!(out.rejected, 2);
    }

    #[test]
    fn low_cohesion_is_rejected() {
        let adj = adjacency(4, &[(0, 1, 0.2), (0, 2, 1.0), (1, 3, 1.0)]);
        let tokens = vec![10; 4];
        let cfg = config();
        let input = BoundsInput {
            adj: &adj,
            tokens: &tokens,
            config: &cfg,
        };
        assert!(input.cohesion(&[0, 1]) < 0.5);
        let out = input.enforce(vec![vec![0, 1], vec![2, 3]]);
        assert!(out.groups.is_empty());
        assert_eq!(out.rejected, 2);
    }

    #[test]
    fn entity_over_token_cap_is_rejected() {
        let adj = adjacency(2, &[(0, 1, 1.0)]);
        let tokens = vec![20_000, 10];
        let cfg = ClusterSection {
            min_size: 1,
            min_cohesion: 0.0,
            ..config()
        };
        let input = BoundsInput {
            adj: &adj,
            tokens: &tokens,
            config: &cfg,
        };
        let out = input.enforce(vec![vec![0], vec![1]]);
        assert_eq!(out.groups, vec![vec![1]]);
        assert_eq!(out.rejected, 1);
    }
}
