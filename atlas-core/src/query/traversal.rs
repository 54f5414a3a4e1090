use std::collections::{HashMap, HashSet};

use crate::store::GraphStore;
use crate::types::{DependencyEdge, Direction};

/// Breadth-first discovery from `seed`, level by level through the store.
///
/// Returns `(entity_id, depth)` in discovery order, the seed first at depth 0.
/// Each entity keeps the hop count of its first discovery; the visited set
/// breaks cycles.
pub async fn breadth_first(
    store: &dyn GraphStore,
    generation: &str,
    seed: &str,
    direction: Direction,
    max_depth: u32,
    include_tests: bool,
) -> crate::error::Result<Vec<(String, u32)>> {
    let mut visited: HashSet<String> = HashSet::from([seed.to_string()]);
    let mut order = vec![(seed.to_string(), 0)];
    let mut frontier = vec![seed.to_string()];

    for depth in 1..=max_depth {
        if frontier.is_empty() {
            break;
        }
        let edges = store
            .neighbors(generation, &frontier, direction, include_tests)
            .await?;
        let mut next = Vec::new();
        for edge in edges {
            let far = match direction {
                Direction::Forward => edge.to_id,
                Direction::Reverse => edge.from_id,
            };
            if visited.insert(far.clone()) {
                order.push((far.clone(), depth));
                next.push(far);
            }
        }
        frontier = next;
    }
    Ok(order)
}

/// Every stored edge whose endpoints are both in `ids`.
pub async fn induced_edges(
    store: &dyn GraphStore,
    generation: &str,
    ids: &[String],
) -> crate::error::Result<Vec<DependencyEdge>> {
    let members: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let edges = store
        .neighbors(generation, ids, Direction::Forward, true)
        .await?;
    Ok(edges
        .into_iter()
        .filter(|e| members.contains(e.to_id.as_str()))
        .collect())
}

/// Depth lookup for a discovery list.
pub fn depth_map(order: &[(String, u32)]) -> HashMap<&str, u32> {
    order.iter().map(|(id, d)| (id.as_str(), *d)).collect()
}
