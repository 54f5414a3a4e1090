pub mod history;
pub mod resolve;
pub mod walk;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use atlas_graphs::{ComplexityModel, ExtractedEntity, LanguageRegistry, extract_source};
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cluster::{ClusterEngine, ClusterRefresh};
use crate::config::AtlasConfig;
use crate::error::{AtlasError, ExtractError};
use crate::progress::{NoopReporter, ProgressReporter, Stage};
use crate::store::GraphStore;
use crate::types::{
    CodeEntity, FileRecord, Generation, GenerationCounts, IngestMode, PendingEntity,
    SemanticCluster, StagedGeneration, estimate_tokens,
};

use self::walk::{PathMatcher, WalkedFile};

// ── Report ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    Read,
    Parse,
}

/// A per-file failure. The run continues; recovered entities are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub stage: FileStage,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub generation_id: String,
    pub mode: String,
    pub files_scanned: u64,
    pub files_reused: u64,
    /// Over `max_file_bytes` or in no supported language.
    pub files_skipped: u64,
    pub entities_created: u64,
    pub entities_excluded: u64,
    pub edges_created: u64,
    pub references_unresolved: u64,
    pub files_with_errors: u64,
    pub errors: Vec<FileError>,
    pub co_change_pairs: u64,
    pub generations_pruned: Vec<String>,
    pub clustering: ClusterRefresh,
    pub duration_ms: u64,
}

// ── Pipeline ───────────────────────────────────────────────────────

/// Walks a source tree and writes one new generation to the store.
pub struct IngestionPipeline {
    store: Arc<dyn GraphStore>,
    config: AtlasConfig,
    registry: Arc<LanguageRegistry>,
    reporter: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Result of reading and extracting one file on a worker thread.
enum FileOutcome {
    Extracted {
        record: FileRecord,
        entities: Vec<PendingEntity>,
    },
    Reused(FileRecord),
    Unsupported,
    Failed(FileError),
    Cancelled,
}

/// A committed generation awaiting its cluster refresh.
struct Committed {
    report: IngestionReport,
    carried: Option<Vec<SemanticCluster>>,
    start: Instant,
}

struct ExtractContext {
    registry: Arc<LanguageRegistry>,
    test_files: PathMatcher,
    complexity: ComplexityModel,
    exclude_tests: bool,
    fingerprint: String,
    previous: HashMap<String, FileRecord>,
    cancel: CancellationToken,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn GraphStore>, config: AtlasConfig) -> Self {
        Self {
            store,
            config,
            registry: Arc::new(LanguageRegistry::new()),
            reporter: Arc::new(NoopReporter),
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Run [`ingest`](Self::ingest) with a deadline on everything up to the
    /// commit. On expiry the token is cancelled and nothing is written. The
    /// cluster refresh after commit is not under the deadline.
    pub async fn ingest_with_timeout(
        &self,
        root: &Path,
        mode: IngestMode,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> crate::error::Result<IngestionReport> {
        let committed = match tokio::time::timeout(timeout, self.commit(root, mode, cancel)).await
        {
            Ok(result) => result?,
            Err(_) => {
                cancel.cancel();
                return Err(AtlasError::Timeout(timeout));
            }
        };
        Ok(self.finish(committed, cancel).await)
    }

    /// Ingest `root` into a new generation, make it active and refresh its
    /// clusters.
    ///
    /// Fails only on store errors or cancellation before the commit; per-file
    /// problems are reported in [`IngestionReport::errors`] and clustering
    /// problems in [`IngestionReport::clustering`].
    pub async fn ingest(
        &self,
        root: &Path,
        mode: IngestMode,
        cancel: &CancellationToken,
    ) -> crate::error::Result<IngestionReport> {
        let committed = self.commit(root, mode, cancel).await?;
        Ok(self.finish(committed, cancel).await)
    }

    async fn finish(&self, committed: Committed, cancel: &CancellationToken) -> IngestionReport {
        let Committed {
            mut report,
            carried,
            start,
        } = committed;
        if self.config.cluster.on_ingest {
            let engine = ClusterEngine::new(Arc::clone(&self.store), self.config.cluster.clone())
                .with_reporter(Arc::clone(&self.reporter));
            report.clustering = engine.refresh(&report.generation_id, carried, cancel).await;
        }

        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            generation = %report.generation_id,
            files = report.files_scanned,
            reused = report.files_reused,
            entities = report.entities_created,
            excluded = report.entities_excluded,
            edges = report.edges_created,
            unresolved = report.references_unresolved,
            errors = report.files_with_errors,
            clustering = ?report.clustering,
            duration_ms = report.duration_ms,
            "Ingestion complete"
        );
        report
    }

    #[instrument(skip_all, name = "ingest", fields(root = %root.display(), mode = mode.as_str()))]
    async fn commit(
        &self,
        root: &Path,
        mode: IngestMode,
        cancel: &CancellationToken,
    ) -> crate::error::Result<Committed> {
        let start = Instant::now();
        if !root.is_dir() {
            return Err(ExtractError::NotADirectory(root.display().to_string()).into());
        }
        let root = root.canonicalize().map_err(ExtractError::Io)?;

        // ── Previous generation ────────────────────────────────────
        let prior = self.store.active_generation().await?;
        let previous = match mode {
            IngestMode::Incremental => prior.clone(),
            IngestMode::Full => None,
        };
        let effective_mode = if previous.is_some() {
            IngestMode::Incremental
        } else {
            if mode == IngestMode::Incremental {
                info!("No active generation, falling back to full ingestion");
            }
            IngestMode::Full
        };
        let previous_records: HashMap<String, FileRecord> = match &previous {
            Some(g) => self
                .store
                .load_file_records(&g.generation_id)
                .await?
                .into_iter()
                .map(|r| (r.path.clone(), r))
                .collect(),
            None => HashMap::new(),
        };

        // ── Walk ───────────────────────────────────────────────────
        self.reporter.start(Stage::Walk, None);
        let ingest_config = self.config.ingest.clone();
        let walk_root = root.clone();
        let walked = run_blocking(move || walk::walk_source_tree(&walk_root, &ingest_config)).await?;
        self.reporter.finish();
        info!(files = walked.files.len(), "Source scan complete");
        if cancel.is_cancelled() {
            return Err(AtlasError::Cancelled);
        }

        // ── Extract ────────────────────────────────────────────────
        let ctx = Arc::new(ExtractContext {
            registry: Arc::clone(&self.registry),
            test_files: PathMatcher::new(&self.config.ingest.test_patterns),
            complexity: self.config.ingest.complexity,
            exclude_tests: self.config.ingest.exclude_tests,
            fingerprint: extract_fingerprint(&self.config),
            previous: previous_records,
            cancel: cancel.clone(),
        });
        self.reporter
            .start(Stage::Extract, Some(walked.files.len() as u64));
        let workers = self.config.ingest.workers;
        let files = walked.files;
        let reporter = Arc::clone(&self.reporter);
        let worker_ctx = Arc::clone(&ctx);
        let outcomes = run_blocking(move || {
            let work = || {
                files
                    .par_iter()
                    .map(|file| {
                        let outcome = extract_file(&worker_ctx, file);
                        reporter.advance(1);
                        outcome
                    })
                    .collect::<Vec<_>>()
            };
            if workers == 0 {
                Ok(work())
            } else {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .map(|pool| pool.install(work))
                    .map_err(|e| ExtractError::Io(std::io::Error::other(e.to_string())))
            }
        })
        .await??;
        self.reporter.finish();

        if cancel.is_cancelled() || outcomes.iter().any(|o| matches!(o, FileOutcome::Cancelled)) {
            info!("Ingestion cancelled during extraction");
            return Err(AtlasError::Cancelled);
        }

        let mut report = IngestionReport {
            files_skipped: walked.oversized.len() as u64,
            ..IngestionReport::default()
        };
        let mut records = Vec::new();
        let mut entities: Vec<PendingEntity> = Vec::new();
        let mut reused_paths = Vec::new();

        for outcome in outcomes {
            match outcome {
                FileOutcome::Extracted {
                    record,
                    entities: extracted,
                } => {
                    report.files_scanned += 1;
                    report.entities_excluded += u64::from(record.excluded_entities);
                    if let Some(message) = &record.parse_error {
                        report.errors.push(FileError {
                            path: record.path.clone(),
                            stage: FileStage::Parse,
                            message: message.clone(),
                        });
                    }
                    entities.extend(extracted);
                    records.push(record);
                }
                FileOutcome::Reused(record) => {
                    report.files_scanned += 1;
                    report.files_reused += 1;
                    report.entities_excluded += u64::from(record.excluded_entities);
                    if let Some(message) = &record.parse_error {
                        report.errors.push(FileError {
                            path: record.path.clone(),
                            stage: FileStage::Parse,
                            message: message.clone(),
                        });
                    }
                    reused_paths.push(record.path.clone());
                    records.push(record);
                }
                FileOutcome::Unsupported => report.files_skipped += 1,
                FileOutcome::Failed(error) => {
                    report.files_scanned += 1;
                    debug!(path = %error.path, message = %error.message, "File failed");
                    report.errors.push(error);
                }
                FileOutcome::Cancelled => {}
            }
        }

        // Carry unchanged files forward from the previous generation.
        if let Some(prev) = &previous {
            let mut carried = self
                .store
                .load_entities_for_files(&prev.generation_id, &reused_paths)
                .await?;
            for pending in &mut carried {
                if ctx.test_files.is_match(&pending.entity.file_path) {
                    pending.entity.is_test = true;
                }
            }
            entities.extend(carried);
        }
        report.files_with_errors = report
            .errors
            .iter()
            .map(|e| e.path.as_str())
            .collect::<HashSet<_>>()
            .len() as u64;

        // Stable order, first occurrence wins on id collisions.
        entities.sort_by(|a, b| {
            (&a.entity.file_path, a.entity.line_start, &a.entity.entity_id).cmp(&(
                &b.entity.file_path,
                b.entity.line_start,
                &b.entity.entity_id,
            ))
        });
        let mut seen = HashSet::new();
        entities.retain(|p| seen.insert(p.entity.entity_id.clone()));

        // Carried entities may newly match a changed test pattern.
        if self.config.ingest.exclude_tests {
            let before = entities.len();
            entities.retain(|p| !p.entity.is_test);
            report.entities_excluded += (before - entities.len()) as u64;
        }

        // ── Resolve ────────────────────────────────────────────────
        if cancel.is_cancelled() {
            return Err(AtlasError::Cancelled);
        }
        self.reporter.start(Stage::Resolve, None);
        let resolution = resolve::resolve_references(&entities);
        self.reporter.finish();
        report.references_unresolved = resolution.unresolved;

        // ── History ────────────────────────────────────────────────
        let history = if self.config.history.enabled {
            self.reporter.start(Stage::History, None);
            let known: HashSet<String> = records.iter().map(|r| r.path.clone()).collect();
            let history_config = self.config.history.clone();
            let history_root: PathBuf = root.clone();
            let mined = run_blocking(move || {
                history::mine_co_change(&history_root, &history_config, &known)
            })
            .await?;
            self.reporter.finish();
            match mined {
                Ok(h) => h.unwrap_or_default(),
                Err(e) => {
                    warn!(error = %e, "Co-change mining failed, continuing without history");
                    history::History::default()
                }
            }
        } else {
            history::History::default()
        };

        // ── Commit ─────────────────────────────────────────────────
        if cancel.is_cancelled() {
            return Err(AtlasError::Cancelled);
        }
        let created_at = Utc::now();
        let generation = Generation {
            generation_id: Generation::new_id(created_at),
            created_at,
            root_path: root.display().to_string(),
            mode: effective_mode,
            counts: GenerationCounts {
                files: records.len() as u64,
                entities: entities.len() as u64,
                edges: resolution.edges.len() as u64,
            },
        };
        report.generation_id.clone_from(&generation.generation_id);
        report.mode = effective_mode.as_str().to_string();
        report.entities_created = entities.len() as u64;
        report.edges_created = resolution.edges.len() as u64;
        report.co_change_pairs = history.co_changes.len() as u64;

        let staged = StagedGeneration {
            generation,
            files: records,
            entities,
            edges: resolution.edges,
            co_changes: history.co_changes,
            churn: history.churn,
        };
        // Read before commit, which may prune the prior generation.
        let carried = match (&prior, self.config.cluster.on_ingest) {
            (Some(g), true) => {
                ClusterEngine::new(Arc::clone(&self.store), self.config.cluster.clone())
                    .reusable_clusters(&g.generation_id, &staged)
                    .await?
            }
            _ => None,
        };

        self.reporter.start(Stage::Commit, None);
        report.generations_pruned = self
            .store
            .commit_generation(&staged, self.config.store.retain_generations)
            .await?;
        self.reporter.finish();
        debug!(generation = %report.generation_id, "Generation committed");

        Ok(Committed {
            report,
            carried,
            start,
        })
    }
}

async fn run_blocking<T, F>(f: F) -> crate::error::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExtractError::Io(std::io::Error::other(e.to_string())).into())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().fold(String::with_capacity(64), |mut s, b| {
        use std::fmt::Write as _;
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Identifies the settings that shape a file's extracted entities. Stored on
/// each [`FileRecord`]; a change invalidates incremental reuse.
fn extract_fingerprint(config: &AtlasConfig) -> String {
    let ingest = &config.ingest;
    let mut key = format!(
        "{}\n{:?}\n{}\n",
        env!("CARGO_PKG_VERSION"),
        ingest.complexity,
        ingest.exclude_tests
    );
    for pattern in &ingest.test_patterns {
        key.push_str(pattern);
        key.push('\n');
    }
    sha256_hex(key.as_bytes())
}

fn extract_file(ctx: &ExtractContext, file: &WalkedFile) -> FileOutcome {
    if ctx.cancel.is_cancelled() {
        return FileOutcome::Cancelled;
    }
    let bytes = match std::fs::read(&file.abs_path) {
        Ok(b) => b,
        Err(e) => {
            return FileOutcome::Failed(FileError {
                path: file.rel_path.clone(),
                stage: FileStage::Read,
                message: e.to_string(),
            });
        }
    };
    let content_hash = sha256_hex(&bytes);
    let source = String::from_utf8_lossy(&bytes);

    let Some(lang) = ctx.registry.detect(Path::new(&file.rel_path), &source) else {
        return FileOutcome::Unsupported;
    };

    if let Some(previous) = ctx
        .previous
        .get(&file.rel_path)
        .filter(|r| {
            r.content_hash == content_hash
                && r.language == lang.id()
                && r.extract_fingerprint == ctx.fingerprint
        })
    {
        return FileOutcome::Reused(previous.clone());
    }

    let extraction = match extract_source(
        lang.as_ref(),
        &source,
        Path::new(&file.rel_path),
        ctx.complexity,
    ) {
        Ok(x) => x,
        Err(e) => {
            return FileOutcome::Failed(FileError {
                path: file.rel_path.clone(),
                stage: FileStage::Parse,
                message: e.to_string(),
            });
        }
    };

    let test_file = ctx.test_files.is_match(&file.rel_path);
    let mut entities: Vec<PendingEntity> = extraction
        .entities
        .into_iter()
        .map(|e| to_pending(e, &extraction.language, &file.rel_path, test_file))
        .collect();
    let before = entities.len();
    if ctx.exclude_tests {
        entities.retain(|p| !p.entity.is_test);
    }
    let excluded_entities = u32::try_from(before - entities.len()).unwrap_or(u32::MAX);

    FileOutcome::Extracted {
        record: FileRecord {
            path: file.rel_path.clone(),
            language: extraction.language,
            content_hash,
            size_bytes: file.size_bytes,
            parse_error: extraction.parse_error.map(|p| p.to_string()),
            excluded_entities,
            extract_fingerprint: ctx.fingerprint.clone(),
        },
        entities,
    }
}

fn to_pending(e: ExtractedEntity, language: &str, rel_path: &str, test_file: bool) -> PendingEntity {
    let line_start = e.span.line_start();
    let line_end = e.span.line_end();
    let token_count = if e.body_text.is_empty() {
        estimate_tokens(&e.signature)
    } else {
        estimate_tokens(&e.body_text)
    };
    PendingEntity {
        entity: CodeEntity {
            entity_id: CodeEntity::make_id(
                language,
                e.kind,
                rel_path,
                &e.qualified_name,
                line_start,
                line_end,
            ),
            entity_kind: e.kind,
            language: language.to_string(),
            name: e.name,
            qualified_name: e.qualified_name,
            file_path: rel_path.to_string(),
            line_start,
            line_end,
            signature: e.signature,
            body_text: Some(e.body_text),
            is_public: e.is_public,
            is_test: test_file || e.test_marker,
            complexity_score: e.complexity,
            token_count,
        },
        raw_refs: e.raw_refs,
    }
}
