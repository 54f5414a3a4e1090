use std::collections::BTreeSet;

use atlas_core::cluster::ClusterRefresh;
use atlas_core::config::AtlasConfig;
use atlas_core::context::{Focus, ItemKind, TaskType};
use atlas_core::ingest::IngestionPipeline;
use atlas_core::query::{QueryOutput, QueryRequest, Strategy};
use atlas_core::store::{Field, FindOptions, GraphStore, Op, Predicate};
use atlas_core::types::{Direction, IngestMode, SemanticCluster};
use atlas_test::{Harness, TestRepo, ingest_fixture};
use tokio_util::sync::CancellationToken;

const SETTINGS_WITH_CURRENCY: &str = "pub struct Settings {\n    currency: String,\n}\n\npub fn load_settings() -> Settings {\n    Settings { currency: String::from(\"EUR\") }\n}\n\npub fn default_currency() -> String {\n    String::from(\"EUR\")\n}\n";

fn names(output: &QueryOutput) -> BTreeSet<String> {
    match output {
        QueryOutput::Entities { entities } | QueryOutput::Subgraph { entities, .. } => {
            entities.iter().map(|r| r.entity.name.clone()).collect()
        }
        QueryOutput::Clusters { clusters } => clusters.iter().map(|c| c.name.clone()).collect(),
    }
}

async fn edge_pairs(harness: &Harness, generation: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<_> = harness
        .store
        .load_edges(generation)
        .await
        .unwrap()
        .into_iter()
        .map(|e| (e.from_id, e.to_id))
        .collect();
    pairs.sort();
    pairs
}

// ── Ingestion ────────────────────────────────────────────────────

#[tokio::test]
async fn service_full_ingest() {
    let repo = TestRepo::service();
    let (report, harness) = ingest_fixture(repo.path()).await;

    assert_eq!(report.files_scanned, 10);
    assert_eq!(report.files_with_errors, 0, "{:?}", report.errors);
    assert!(report.entities_created > 20, "got {}", report.entities_created);
    assert_eq!(report.entities_excluded, 1, "only login_works is test code");
    assert!(report.edges_created > 0);
    assert!(report.co_change_pairs > 0);

    let active = harness.store.active_generation().await.unwrap().unwrap();
    assert_eq!(active.generation_id, report.generation_id);
    assert_eq!(active.counts.entities, report.entities_created);

    // login -> find_user, open_session, Session
    let login = harness
        .query(&QueryRequest::pattern("login"))
        .await
        .unwrap();
    let login = match login.output {
        QueryOutput::Entities { entities } => entities
            .into_iter()
            .find(|r| r.entity.name == "login")
            .unwrap(),
        other => panic!("unexpected output {other:?}"),
    };
    let forward = harness
        .store
        .forward_refs(&report.generation_id, &login.entity.entity_id)
        .await
        .unwrap();
    assert!(forward.iter().any(|id| id.contains(":find_user:")));
    assert!(forward.iter().any(|id| id.contains(":open_session:")));
}

#[tokio::test]
async fn co_change_mined_from_history() {
    let repo = TestRepo::service();
    let (report, harness) = ingest_fixture(repo.path()).await;

    let pairs = harness
        .store
        .load_co_change(&report.generation_id)
        .await
        .unwrap();
    let auth = pairs
        .iter()
        .find(|p| p.file_a == "src/auth/login.rs" && p.file_b == "src/auth/session.rs")
        .expect("auth files change together");
    let unrelated = pairs
        .iter()
        .find(|p| p.file_a == "src/auth/login.rs" && p.file_b == "src/billing/invoice.rs")
        .map_or(0, |p| p.count);
    assert!(auth.count >= 2, "auth pair count {}", auth.count);
    assert!(auth.count > unrelated);
    assert!(pairs.iter().all(|p| p.file_a < p.file_b));
}

#[tokio::test]
async fn co_change_paths_follow_a_subdirectory_root() {
    let repo = TestRepo::service();
    let harness = Harness::default();
    let report = harness
        .ingest(&repo.path().join("src"), IngestMode::Full)
        .await
        .unwrap();
    assert_eq!(report.files_scanned, 9);
    assert!(report.co_change_pairs > 0);

    let pairs = harness
        .store
        .load_co_change(&report.generation_id)
        .await
        .unwrap();
    let auth = pairs
        .iter()
        .find(|p| p.file_a == "auth/login.rs" && p.file_b == "auth/session.rs")
        .expect("auth files change together");
    assert!(auth.count >= 2);
    assert!(pairs.iter().all(|p| !p.file_a.starts_with("src/")));

    let churn = harness.store.load_churn(&report.generation_id).await.unwrap();
    assert!(churn.iter().any(|c| c.path == "auth/session.rs" && c.commits >= 3));
}

/// Scenario A: one unparseable file is reported; the rest of the tree lands.
#[tokio::test]
async fn syntax_error_is_reported_not_fatal() {
    let repo = TestRepo::service_with_broken_file();
    let (report, harness) = ingest_fixture(repo.path()).await;

    assert_eq!(report.files_scanned, 10);
    assert_eq!(report.files_with_errors, 1);
    assert_eq!(report.errors[0].path, "src/report/summary.rs");
    assert!(report.entities_created > 0);

    let settings = harness
        .query(&QueryRequest::pattern("load_settings"))
        .await
        .unwrap();
    assert_eq!(names(&settings.output), BTreeSet::from(["load_settings".to_string()]));
}

#[tokio::test]
async fn repeated_ingest_is_idempotent() {
    let repo = TestRepo::service();
    let harness = Harness::default();
    let first = harness.ingest(repo.path(), IngestMode::Full).await.unwrap();
    let first_ids: Vec<String> = harness
        .store
        .load_entities(&first.generation_id, false)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.entity_id)
        .collect();
    let first_edges = edge_pairs(&harness, &first.generation_id).await;

    let second = harness.ingest(repo.path(), IngestMode::Full).await.unwrap();
    assert_ne!(first.generation_id, second.generation_id);
    let second_ids: Vec<String> = harness
        .store
        .load_entities(&second.generation_id, false)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.entity_id)
        .collect();
    assert_eq!(first_ids, second_ids);
    assert_eq!(first_edges, edge_pairs(&harness, &second.generation_id).await);

    let generations = harness.store.list_generations().await.unwrap();
    assert_eq!(generations.len(), 2);
    assert_eq!(generations[0].generation_id, second.generation_id);
}

#[tokio::test]
async fn incremental_reuses_unchanged_files() {
    let repo = TestRepo::service();
    let harness = Harness::default();
    let full = harness.ingest(repo.path(), IngestMode::Full).await.unwrap();

    repo.write("src/settings.rs", SETTINGS_WITH_CURRENCY);
    let incremental = harness
        .ingest(repo.path(), IngestMode::Incremental)
        .await
        .unwrap();
    assert_eq!(incremental.mode, "incremental");
    assert_eq!(incremental.files_scanned, 10);
    assert_eq!(incremental.files_reused, 9);
    assert_eq!(incremental.entities_created, full.entities_created + 1);
    assert_eq!(incremental.edges_created, full.edges_created);

    let found = harness
        .query(&QueryRequest::pattern("default_currency"))
        .await
        .unwrap();
    assert_eq!(found.generation_id, incremental.generation_id);
    assert_eq!(found.output.len(), 1);
}

#[tokio::test]
async fn incremental_reextracts_when_test_exclusion_changes() {
    let repo = TestRepo::service();
    let (first, harness) = ingest_fixture(repo.path()).await;
    assert!(first.entities_excluded > 0);

    let mut keep_tests = harness.config.clone();
    keep_tests.ingest.exclude_tests = false;
    let report = IngestionPipeline::new(harness.store(), keep_tests)
        .ingest(repo.path(), IngestMode::Incremental, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.mode, "incremental");
    assert_eq!(report.files_reused, 0);
    assert_eq!(report.entities_excluded, 0);

    let shown = harness
        .query(&QueryRequest {
            include_tests: true,
            ..QueryRequest::pattern("login_works")
        })
        .await
        .unwrap();
    assert_eq!(shown.generation_id, report.generation_id);
    assert_eq!(names(&shown.output), BTreeSet::from(["login_works".to_string()]));

    // Same settings again: everything is reusable.
    let mut keep_tests = harness.config.clone();
    keep_tests.ingest.exclude_tests = false;
    let again = IngestionPipeline::new(harness.store(), keep_tests)
        .ingest(repo.path(), IngestMode::Incremental, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.files_reused, 10);
}

// ── Test exclusion ───────────────────────────────────────────────

#[tokio::test]
async fn excluded_tests_never_reach_the_store() {
    let repo = TestRepo::service();
    let (report, harness) = ingest_fixture(repo.path()).await;

    let all = harness
        .store
        .find_entities(&report.generation_id, &Predicate::all(), &FindOptions::default())
        .await
        .unwrap();
    assert!(all.iter().all(|e| !e.is_test));

    let request = QueryRequest {
        include_tests: true,
        ..QueryRequest::pattern("login_works")
    };
    assert!(harness.query(&request).await.unwrap().output.is_empty());
}

#[tokio::test]
async fn kept_tests_are_hidden_unless_requested() {
    let repo = TestRepo::service();
    let mut config = AtlasConfig::default();
    config.ingest.exclude_tests = false;
    let harness = Harness::new(config);
    let report = harness.ingest(repo.path(), IngestMode::Full).await.unwrap();
    assert_eq!(report.entities_excluded, 0);

    let hidden = harness
        .query(&QueryRequest::pattern("login_works"))
        .await
        .unwrap();
    assert!(hidden.output.is_empty());

    let shown = harness
        .query(&QueryRequest {
            include_tests: true,
            ..QueryRequest::pattern("login_works")
        })
        .await
        .unwrap();
    assert_eq!(names(&shown.output), BTreeSet::from(["login_works".to_string()]));

    // Reverse traversal from login does not walk into the test caller.
    let login_id = harness
        .store
        .find_entities(
            &report.generation_id,
            &Predicate::cmp(Field::Name, Op::Eq, "login"),
            &FindOptions::default(),
        )
        .await
        .unwrap()
        .remove(0)
        .entity_id;
    let callers = harness
        .query(&QueryRequest::traversal(&login_id, Direction::Reverse, 2))
        .await
        .unwrap();
    let callers = names(&callers.output);
    assert!(callers.contains("main"));
    assert!(!callers.contains("login_works"));
}

// ── Queries ──────────────────────────────────────────────────────

/// Scenario B: search by return type finds producers, not name matches.
#[tokio::test]
async fn signature_search_by_return_type() {
    let repo = TestRepo::service();
    let (_, harness) = ingest_fixture(repo.path()).await;

    let request = QueryRequest {
        predicate: Some(Predicate::cmp(Field::Signature, Op::Contains, "-> Session")),
        ..QueryRequest::default()
    };
    let response = harness.query(&request).await.unwrap();
    assert_eq!(response.strategy, Strategy::Signature);
    assert!(!response.truncated);
    assert_eq!(
        names(&response.output),
        BTreeSet::from(["login".to_string(), "open_session".to_string()])
    );
}

/// Scenario C: nothing matches, nothing fails, and the source tree is not needed.
#[tokio::test]
async fn zero_matches_is_empty_not_error() {
    let repo = TestRepo::service();
    let (report, harness) = ingest_fixture(repo.path()).await;
    drop(repo);

    let response = harness
        .query(&QueryRequest::pattern("no_such_entity_anywhere"))
        .await
        .unwrap();
    assert_eq!(response.generation_id, report.generation_id);
    assert!(response.output.is_empty());
    assert_eq!(response.estimated_tokens, 0);

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["entities"], serde_json::json!([]));
}

#[tokio::test]
async fn body_search_reads_bodies() {
    let repo = TestRepo::service();
    let (_, harness) = ingest_fixture(repo.path()).await;

    let request = QueryRequest {
        predicate: Some(Predicate::cmp(Field::Body, Op::Contains, "payment.invoice")),
        ..QueryRequest::default()
    };
    let response = harness.query(&request).await.unwrap();
    assert_eq!(response.strategy, Strategy::Body);
    assert_eq!(names(&response.output), BTreeSet::from(["refund".to_string()]));
}

#[tokio::test]
async fn query_before_ingest_is_empty() {
    let harness = Harness::default();
    let response = harness
        .query(&QueryRequest::pattern("anything"))
        .await
        .unwrap();
    assert!(response.generation_id.is_empty());
    assert!(response.output.is_empty());
}

// ── Clustering ───────────────────────────────────────────────────

fn loose_cluster_config() -> AtlasConfig {
    let mut config = AtlasConfig::default();
    config.cluster.min_size = 2;
    config.cluster.min_tokens = 1;
    config.cluster.min_cohesion = 0.0;
    config
}

/// Scenario D: clustering the same generation twice gives the same membership.
#[tokio::test]
async fn clustering_is_repeatable() {
    let repo = TestRepo::service();
    let harness = Harness::new(loose_cluster_config());
    let report = harness.ingest(repo.path(), IngestMode::Full).await.unwrap();

    let first_report = harness.cluster().await.unwrap();
    let first = harness.store.load_clusters(&report.generation_id).await.unwrap();
    let second_report = harness.cluster().await.unwrap();
    let second = harness.store.load_clusters(&report.generation_id).await.unwrap();

    assert!(!first.is_empty());
    assert_eq!(first_report.clusters, second_report.clusters);
    let membership = |clusters: &[SemanticCluster]| {
        clusters
            .iter()
            .map(|c| (c.cluster_id.clone(), c.member_ids.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(membership(&first), membership(&second));

    // No entity sits in two clusters.
    let mut seen = BTreeSet::new();
    for cluster in &first {
        assert!(cluster.member_ids.len() >= 2);
        assert!(cluster.token_count <= harness.config.cluster.max_tokens);
        for id in &cluster.member_ids {
            assert!(seen.insert(id.clone()), "{id} in two clusters");
        }
    }
}

#[tokio::test]
async fn cluster_strategy_finds_owner() {
    let repo = TestRepo::service();
    let harness = Harness::new(loose_cluster_config());
    let report = harness.ingest(repo.path(), IngestMode::Full).await.unwrap();
    harness.cluster().await.unwrap();

    let clusters = harness.store.load_clusters(&report.generation_id).await.unwrap();
    let owned = &clusters[0].member_ids[0];
    let response = harness
        .query(&QueryRequest {
            cluster: Some(atlas_core::query::ClusterSelector::Entity(owned.clone())),
            ..QueryRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(response.strategy, Strategy::Cluster);
    match response.output {
        QueryOutput::Clusters { clusters: found } => {
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].cluster_id, clusters[0].cluster_id);
        }
        other => panic!("unexpected output {other:?}"),
    }
}

fn membership(clusters: &[SemanticCluster]) -> Vec<Vec<String>> {
    clusters.iter().map(|c| c.member_ids.clone()).collect()
}

#[tokio::test]
async fn ingest_clusters_the_new_generation() {
    let repo = TestRepo::service();
    let harness = Harness::new(loose_cluster_config());
    let first = harness.ingest(repo.path(), IngestMode::Full).await.unwrap();
    let ClusterRefresh::Recomputed { clusters } = first.clustering else {
        panic!("unexpected refresh {:?}", first.clustering);
    };
    assert!(clusters > 0);

    repo.write("src/settings.rs", SETTINGS_WITH_CURRENCY);
    let second = harness
        .ingest(repo.path(), IngestMode::Incremental)
        .await
        .unwrap();
    assert!(matches!(second.clustering, ClusterRefresh::Recomputed { .. }));

    let clusters = harness.store.load_clusters(&second.generation_id).await.unwrap();
    assert!(!clusters.is_empty());

    // Context on the new generation still has clusters to pack.
    let focus = clusters[0].member_ids[0].clone();
    let pack = harness
        .context(&Focus::Entity(focus), TaskType::Understand, Some(20_000))
        .await
        .unwrap();
    assert_eq!(pack.generation_id, second.generation_id);
    assert_eq!(pack.items[0].kind, ItemKind::Cluster);
    assert_eq!(pack.items[0].id, clusters[0].cluster_id);
}

#[tokio::test]
async fn unchanged_reingest_carries_clusters_forward() {
    let repo = TestRepo::service();
    let harness = Harness::new(loose_cluster_config());
    let first = harness.ingest(repo.path(), IngestMode::Full).await.unwrap();
    let second = harness.ingest(repo.path(), IngestMode::Full).await.unwrap();

    let before = harness.store.load_clusters(&first.generation_id).await.unwrap();
    let after = harness.store.load_clusters(&second.generation_id).await.unwrap();
    assert_eq!(
        second.clustering,
        ClusterRefresh::CarriedForward {
            clusters: before.len() as u64
        }
    );
    assert_eq!(membership(&before), membership(&after));
}

#[tokio::test]
async fn ingest_clustering_can_be_disabled() {
    let repo = TestRepo::service();
    let mut config = loose_cluster_config();
    config.cluster.on_ingest = false;
    let harness = Harness::new(config);
    let report = harness.ingest(repo.path(), IngestMode::Full).await.unwrap();
    assert_eq!(report.clustering, ClusterRefresh::Skipped);
    assert!(harness
        .store
        .load_clusters(&report.generation_id)
        .await
        .unwrap()
        .is_empty());
}

// ── Context ──────────────────────────────────────────────────────

#[tokio::test]
async fn context_pack_centres_on_keywords() {
    let repo = TestRepo::service();
    let harness = Harness::new(loose_cluster_config());
    harness.ingest(repo.path(), IngestMode::Full).await.unwrap();
    harness.cluster().await.unwrap();

    let pack = harness
        .context(
            &Focus::Keywords("open session for a user".into()),
            TaskType::Modify,
            Some(600),
        )
        .await
        .unwrap();
    assert!(pack.focus_entity.as_deref().unwrap().contains(":open_session:"));
    assert!(pack.total_tokens <= 600);
    assert!(!pack.items.is_empty());
    assert!(pack.items[0].entity_ids.iter().any(|id| id.contains(":open_session:")));
    let running: Vec<u32> = pack.items.iter().map(|i| i.running_total).collect();
    assert!(running.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(running.last().copied(), Some(pack.total_tokens));
}

#[tokio::test]
async fn test_entity_is_not_a_focus() {
    let repo = TestRepo::service();
    let mut config = AtlasConfig::default();
    config.ingest.exclude_tests = false;
    let harness = Harness::new(config);
    let report = harness.ingest(repo.path(), IngestMode::Full).await.unwrap();

    let login_works = harness
        .store
        .find_entities(
            &report.generation_id,
            &Predicate::cmp(Field::Name, Op::Eq, "login_works"),
            &FindOptions {
                include_tests: true,
                ..FindOptions::default()
            },
        )
        .await
        .unwrap()
        .remove(0);
    assert!(login_works.is_test);

    let pack = harness
        .context(&Focus::Entity(login_works.entity_id), TaskType::Debug, None)
        .await
        .unwrap();
    assert!(pack.focus_entity.is_none());
    assert!(pack.items.is_empty());
}

#[tokio::test]
async fn context_for_unknown_focus_is_empty() {
    let repo = TestRepo::service();
    let (_, harness) = ingest_fixture(repo.path()).await;
    let pack = harness
        .context(&Focus::Keywords("zzz qqq".into()), TaskType::Debug, None)
        .await
        .unwrap();
    assert!(pack.focus_entity.is_none());
    assert!(pack.items.is_empty());
    assert_eq!(pack.budget, harness.config.context.default_budget);
}
