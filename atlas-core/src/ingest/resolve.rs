use std::collections::{HashMap, HashSet};

use crate::types::{DependencyEdge, EdgeKind, EntityKind, PendingEntity, RefKind};

#[derive(Debug, Default)]
pub struct Resolution {
    pub edges: Vec<DependencyEdge>,
    /// Raw references with no target in the generation.
    pub unresolved: u64,
}

fn directory(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

fn expected_kind(kind: RefKind) -> EntityKind {
    match kind {
        RefKind::Call => EntityKind::Function,
        RefKind::TypeRef => EntityKind::Type,
    }
}

/// Turn raw reference names into edges.
///
/// Candidates sharing the referenced name are searched in tiers: the same
/// file, then the same directory, then public entities anywhere. Within the
/// first non-empty tier an entity of the expected kind wins, then the
/// smallest entity id. Self references and repeated targets are dropped;
/// edge positions follow first occurrence.
pub fn resolve_references(entities: &[PendingEntity]) -> Resolution {
    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, p) in entities.iter().enumerate() {
        by_name.entry(p.entity.name.as_str()).or_default().push(idx);
    }

    let mut resolution = Resolution::default();
    for pending in entities {
        let source = &pending.entity;
        let mut seen: HashSet<&str> = HashSet::new();
        let mut position = 0_u32;

        for raw in &pending.raw_refs {
            let Some(candidates) = by_name.get(raw.name.as_str()) else {
                resolution.unresolved += 1;
                continue;
            };

            let same_file = |i: &&usize| entities[**i].entity.file_path == source.file_path;
            let same_dir = |i: &&usize| {
                directory(&entities[**i].entity.file_path) == directory(&source.file_path)
            };
            let public = |i: &&usize| entities[**i].entity.is_public;

            let tier: Vec<usize> = [
                candidates.iter().filter(same_file).copied().collect::<Vec<_>>(),
                candidates.iter().filter(same_dir).copied().collect(),
                candidates.iter().filter(public).copied().collect(),
            ]
            .into_iter()
            .find(|t| !t.is_empty())
            .unwrap_or_default();

            let wanted = expected_kind(raw.kind);
            let Some(target) = tier
                .iter()
                .map(|i| &entities[*i].entity)
                .min_by(|a, b| {
                    (a.entity_kind != wanted, &a.entity_id)
                        .cmp(&(b.entity_kind != wanted, &b.entity_id))
                })
            else {
                resolution.unresolved += 1;
                continue;
            };

            if target.entity_id == source.entity_id || !seen.insert(target.entity_id.as_str()) {
                continue;
            }
            resolution.edges.push(DependencyEdge {
                from_id: source.entity_id.clone(),
                to_id: target.entity_id.clone(),
                edge_kind: EdgeKind::from(raw.kind),
                position,
            });
            position += 1;
        }
    }
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CodeEntity, RawRef};

    fn pending(file: &str, name: &str, kind: EntityKind, public: bool, refs: &[(&str, RefKind)]) -> PendingEntity {
        PendingEntity {
            entity: CodeEntity {
                entity_id: CodeEntity::make_id("rust", kind, file, name, 1, 2),
                entity_kind: kind,
                language: "rust".into(),
                name: name.into(),
                qualified_name: name.into(),
                file_path: file.into(),
                line_start: 1,
                line_end: 2,
                signature: String::new(),
                body_text: None,
                is_public: public,
                is_test: false,
                complexity_score: None,
                token_count: 1,
            },
            raw_refs: refs
                .iter()
                .map(|(n, k)| RawRef {
                    name: (*n).into(),
                    kind: *k,
                })
                .collect(),
        }
    }

    #[test]
    fn prefers_same_file_then_directory_then_public() {
        let entities = vec![
            pending("src/a.rs", "caller", EntityKind::Function, true, &[
                ("local", RefKind::Call),
                ("sibling", RefKind::Call),
                ("remote", RefKind::Call),
                ("hidden", RefKind::Call),
            ]),
            pending("src/a.rs", "local", EntityKind::Function, false, &[]),
            pending("other/z.rs", "local", EntityKind::Function, true, &[]),
            pending("src/b.rs", "sibling", EntityKind::Function, false, &[]),
            pending("lib/c.rs", "remote", EntityKind::Function, true, &[]),
            pending("lib/d.rs", "hidden", EntityKind::Function, false, &[]),
        ];
        let res = resolve_references(&entities);
        let targets: Vec<&str> = res.edges.iter().map(|e| e.to_id.as_str()).collect();
        assert_eq!(
            targets,
            vec![
                entities[1].entity.entity_id.as_str(),
                entities[3].entity.entity_id.as_str(),
                entities[4].entity.entity_id.as_str(),
            ]
        );
        assert_eq!(res.unresolved, 1);
        let positions: Vec<u32> = res.edges.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn kind_match_then_smallest_id() {
        let entities = vec![
            pending("src/a.rs", "run", EntityKind::Function, true, &[("Config", RefKind::TypeRef)]),
            pending("x/b.rs", "Config", EntityKind::Function, true, &[]),
            pending("z/c.rs", "Config", EntityKind::Type, true, &[]),
            pending("y/c.rs", "Config", EntityKind::Type, true, &[]),
        ];
        let res = resolve_references(&entities);
        assert_eq!(res.edges.len(), 1);
        assert_eq!(res.edges[0].to_id, entities[3].entity.entity_id);
        assert_eq!(res.edges[0].edge_kind, EdgeKind::ReferencesType);
    }

    #[test]
    fn drops_self_and_duplicate_refs() {
        let entities = vec![
            pending("src/a.rs", "walk", EntityKind::Function, true, &[
                ("walk", RefKind::Call),
                ("step", RefKind::Call),
                ("step", RefKind::Call),
                ("nowhere", RefKind::Call),
            ]),
            pending("src/a.rs", "step", EntityKind::Function, false, &[]),
        ];
        let res = resolve_references(&entities);
        assert_eq!(res.edges.len(), 1);
        assert_eq!(res.edges[0].to_id, entities[1].entity.entity_id);
        assert_eq!(res.unresolved, 1);
    }
}
