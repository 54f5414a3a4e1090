// Multi-level Louvain modularity optimisation.
//
// Graph algorithms intentionally cast int↔float.
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

const EPS: f64 = 1e-12;
const MAX_PASSES: usize = 100;

/// One coarsening level: merged adjacency without self loops, plus self-loop weights.
#[derive(Debug, Clone)]
struct Level {
    adj: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
}

impl Level {
    fn from_edges(n: usize, edges: &[(usize, usize, f64)]) -> Self {
        let mut merged: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        let mut self_loops = vec![0.0; n];
        for &(a, b, w) in edges {
            if a == b {
                self_loops[a] += w;
            } else {
                *merged.entry((a.min(b), a.max(b))).or_default() += w;
            }
        }
        Self::from_merged(n, &merged, self_loops)
    }

    fn from_merged(n: usize, merged: &BTreeMap<(usize, usize), f64>, self_loops: Vec<f64>) -> Self {
        let mut adj = vec![Vec::new(); n];
        for (&(a, b), &w) in merged {
            adj[a].push((b, w));
            adj[b].push((a, w));
        }
        Self { adj, self_loops }
    }

    fn len(&self) -> usize {
        self.adj.len()
    }

    fn degree(&self, i: usize) -> f64 {
        self.adj[i].iter().map(|&(_, w)| w).sum::<f64>() + 2.0 * self.self_loops[i]
    }

    /// Collapse each community into one node; internal weight becomes a self loop.
    fn aggregate(&self, community: &[usize], count: usize) -> Self {
        let mut merged: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        let mut self_loops = vec![0.0; count];
        for i in 0..self.len() {
            let ci = community[i];
            self_loops[ci] += self.self_loops[i];
            for &(j, w) in &self.adj[i] {
                if i >= j {
                    continue;
                }
                let cj = community[j];
                if ci == cj {
                    self_loops[ci] += w;
                } else {
                    *merged.entry((ci.min(cj), ci.max(cj))).or_default() += w;
                }
            }
        }
        Self::from_merged(count, &merged, self_loops)
    }
}

/// Relabel communities `0..count` in order of first appearance.
fn renumber(community: &[usize]) -> (Vec<usize>, usize) {
    let mut remap: BTreeMap<usize, usize> = BTreeMap::new();
    let mut out = Vec::with_capacity(community.len());
    for &c in community {
        let next = remap.len();
        out.push(*remap.entry(c).or_insert(next));
    }
    let count = remap.len();
    (out, count)
}

/// Move nodes between communities until no move strictly improves modularity.
/// Returns the community of each node and whether anything moved.
fn local_moves(level: &Level, rng: &mut StdRng) -> (Vec<usize>, bool) {
    let n = level.len();
    let degree: Vec<f64> = (0..n).map(|i| level.degree(i)).collect();
    let m2: f64 = degree.iter().sum();
    let mut community: Vec<usize> = (0..n).collect();
    if m2 <= 0.0 {
        return (community, false);
    }

    let mut totals = degree.clone();
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);

    let mut moved_any = false;
    for _ in 0..MAX_PASSES {
        let mut moved = false;
        for &i in &order {
            let current = community[i];
            let ki = degree[i];
            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for &(j, w) in &level.adj[i] {
                *links.entry(community[j]).or_default() += w;
            }

            totals[current] -= ki;
            let gain = |c: usize, w: f64| w - totals[c] * ki / m2;
            let mut best = current;
            let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
            // Ascending order: equal gains keep the smaller community.
            for (&c, &w) in &links {
                if c == current {
                    continue;
                }
                let g = gain(c, w);
                if g > best_gain + EPS {
                    best = c;
                    best_gain = g;
                }
            }
            totals[best] += ki;

            if best != current {
                community[i] = best;
                moved = true;
                moved_any = true;
            }
        }
        if !moved {
            break;
        }
    }
    (community, moved_any)
}

/// Louvain community detection on an undirected weighted graph of `n` nodes.
///
/// The visit order of each level is shuffled with a `StdRng` seeded from
/// `seed`, so a fixed graph and seed always give the same partition.
/// Communities are numbered by their smallest node.
pub fn louvain(n: usize, edges: &[(usize, usize, f64)], seed: u64) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut level = Level::from_edges(n, edges);
    // Original node -> node of the current level.
    let mut membership: Vec<usize> = (0..n).collect();

    loop {
        let (community, moved) = local_moves(&level, &mut rng);
        if !moved {
            break;
        }
        let (community, count) = renumber(&community);
        for m in &mut membership {
            *m = community[*m];
        }
        if count == level.len() || count == 1 {
            break;
        }
        level = level.aggregate(&community, count);
    }

    renumber(&membership).0
}

/// Per-community modularity contribution `e_c/m - (a_c/2m)^2`.
pub fn modularity_terms(
    edges: &[(usize, usize, f64)],
    membership: &[usize],
    communities: usize,
) -> Vec<f64> {
    let m: f64 = edges.iter().map(|&(_, _, w)| w).sum();
    let mut terms = vec![0.0; communities];
    if m <= 0.0 {
        return terms;
    }
    let mut internal = vec![0.0; communities];
    let mut degree = vec![0.0; communities];
    for &(a, b, w) in edges {
        let (ca, cb) = (membership[a], membership[b]);
        if ca == cb {
            internal[ca] += w;
        }
        degree[ca] += w;
        degree[cb] += w;
    }
    for c in 0..communities {
        let share = degree[c] / (2.0 * m);
        terms[c] = internal[c] / m - share * share;
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_triangles() -> Vec<(usize, usize, f64)> {
        vec![
            (0, 1, 1.0),
            (1, 2, 1.0),
            (0, 2, 1.0),
            (3, 4, 1.0),
            (4, 5, 1.0),
            (3, 5, 1.0),
            (2, 3, 0.1),
        ]
    }

    #[test]
    fn separates_weakly_joined_groups() {
        let communities = louvain(6, &two_triangles(), 42);
        assert_eq!(communities, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn deterministic_for_seed() {
        let edges: Vec<(usize, usize, f64)> = (0..30)
            .flat_map(|i| [(i, (i + 1) % 30, 1.0), (i, (i * 7) % 30, 0.3)])
            .collect();
        let first = louvain(30, &edges, 7);
        let second = louvain(30, &edges, 7);
        assert_eq!(first, second);
    }

    #[test]
    fn isolated_nodes_stay_apart() {
        assert_eq!(louvain(3, &[], 1), vec![0, 1, 2]);
        assert!(louvain(0, &[], 1).is_empty());
    }

    #[test]
    fn modularity_of_good_split_is_positive() {
        let edges = two_triangles();
        let terms = modularity_terms(&edges, &[0, 0, 0, 1, 1, 1], 2);
        let q: f64 = terms.iter().sum();
        assert!(q > 0.4, "q = {q}");
        let single = modularity_terms(&edges, &[0; 6], 1);
        assert!(single[0].abs() < 1e-9);
    }
}
