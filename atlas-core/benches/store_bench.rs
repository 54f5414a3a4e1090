// Benchmark SQLite store operations: generation commit, lookup, predicate search.

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use atlas_core::store::{Field, FindOptions, GraphStore, Op, Predicate, SqliteStore};
use atlas_core::types::{
    CodeEntity, DependencyEdge, EdgeKind, EntityKind, Generation, GenerationCounts, IngestMode,
    PendingEntity, StagedGeneration,
};

fn staged(id: &str, n: usize) -> StagedGeneration {
    let entities: Vec<PendingEntity> = (0..n)
        .map(|i| PendingEntity {
            entity: CodeEntity {
                entity_id: format!("rust:function:src/mod_{}.rs:func_{i}:1-3", i / 10),
                entity_kind: EntityKind::Function,
                language: "rust".into(),
                name: format!("func_{i}"),
                qualified_name: format!("mod_{}::func_{i}", i / 10),
                file_path: format!("src/mod_{}.rs", i / 10),
                line_start: 1,
                line_end: 3,
                signature: format!("pub fn func_{i}(x: u64) -> Result<Item{}>", i % 7),
                body_text: Some(format!("{{ func_{}(x) }}", (i + 1) % n)),
                is_public: true,
                is_test: false,
                complexity_score: Some(1),
                token_count: 12,
            },
            raw_refs: Vec::new(),
        })
        .collect();
    let edges = (0..n)
        .map(|i| DependencyEdge {
            from_id: entities[i].entity.entity_id.clone(),
            to_id: entities[(i + 1) % n].entity.entity_id.clone(),
            edge_kind: EdgeKind::Calls,
            position: 0,
        })
        .collect();
    StagedGeneration {
        generation: Generation {
            generation_id: id.into(),
            created_at: Utc::now(),
            root_path: "/bench".into(),
            mode: IngestMode::Full,
            counts: GenerationCounts::default(),
        },
        files: Vec::new(),
        entities,
        edges,
        co_changes: Vec::new(),
        churn: Vec::new(),
    }
}

fn bench_commit_generation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("store_commit_generation");

    for count in [100, 1_000, 5_000] {
        let generation = staged("bench", count);
        group.bench_with_input(BenchmarkId::new("entities", count), &generation, |b, g| {
            b.iter(|| {
                rt.block_on(async {
                    let store = SqliteStore::in_memory().unwrap();
                    store.commit_generation(g, 2).await.unwrap();
                });
            });
        });
    }
    group.finish();
}

fn bench_lookup_and_search(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = rt.block_on(async {
        let store = SqliteStore::in_memory().unwrap();
        store.commit_generation(&staged("g", 2_000), 2).await.unwrap();
        store
    });

    c.bench_function("store_get_entity", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .get_entity("g", "rust:function:src/mod_50.rs:func_500:1-3", false)
                    .await
                    .unwrap();
            });
        });
    });

    let signature = Predicate::cmp(Field::Signature, Op::Contains, "Item3");
    c.bench_function("store_find_signature", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .find_entities("g", &signature, &FindOptions::default())
                    .await
                    .unwrap();
            });
        });
    });

    let regex = Predicate::cmp(Field::Name, Op::Regex, "^func_1[0-9]{2}$");
    c.bench_function("store_find_regex", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .find_entities("g", &regex, &FindOptions::default())
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_commit_generation, bench_lookup_and_search);
criterion_main!(benches);
