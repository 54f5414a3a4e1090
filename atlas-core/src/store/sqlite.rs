use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::StoreError;
use crate::types::{
    CoChange, CodeEntity, DependencyEdge, Direction, EdgeKind, EntityKind, FileChurn, FileRecord,
    Generation, GenerationCounts, IngestMode, PendingEntity, RawRef, SemanticCluster,
    StagedGeneration, StoreStats,
};

use super::predicate::Predicate;
use super::schema;
use super::traits::{FindOptions, GraphStore};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

const ACTIVE_KEY: &str = "active_generation";

/// SQLite-backed implementation of [`GraphStore`].
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path. Parent directories are created.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        let unavailable = |message: String| StoreError::Unavailable {
            path: path.display().to_string(),
            message,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| unavailable(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(StoreError::Sqlite)?;

        // Ignored for in-memory databases
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        Self::register_regexp(&conn).map_err(StoreError::Sqlite)?;

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(StoreError::Sqlite)?;
        Self::migrate(&conn).map_err(StoreError::Sqlite)?;

        conn.execute(
            "INSERT OR REPLACE INTO atlas_meta (key, value) VALUES ('schema_version', ?1)",
            params![schema::SCHEMA_VERSION],
        )
        .map_err(StoreError::Sqlite)?;

        Ok(())
    }

    /// Version 1 databases predate `files.extract_fingerprint`. Their rows get
    /// an empty fingerprint, so the next incremental run re-extracts them.
    fn migrate(conn: &Connection) -> rusqlite::Result<()> {
        let has_fingerprint = conn
            .prepare("SELECT 1 FROM pragma_table_info('files') WHERE name = 'extract_fingerprint'")?
            .exists([])?;
        if !has_fingerprint {
            conn.execute_batch(
                "ALTER TABLE files ADD COLUMN extract_fingerprint TEXT NOT NULL DEFAULT ''",
            )?;
        }
        Ok(())
    }

    /// Backs the `REGEXP` operator. The compiled pattern is cached per statement.
    fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
        conn.create_scalar_function(
            "regexp",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let re: Arc<Regex> = ctx.get_or_create_aux(0, |vr| -> Result<_, BoxError> {
                    Ok(Regex::new(vr.as_str()?)?)
                })?;
                let text = ctx
                    .get_raw(1)
                    .as_str()
                    .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
                Ok(re.is_match(text))
            },
        )
    }

    fn entity_columns(include_body: bool) -> &'static str {
        if include_body {
            "entity_id, entity_kind, language, name, qualified_name, file_path,
             line_start, line_end, signature, body_text, is_public, is_test,
             complexity_score, token_count"
        } else {
            "entity_id, entity_kind, language, name, qualified_name, file_path,
             line_start, line_end, signature, NULL AS body_text, is_public, is_test,
             complexity_score, token_count"
        }
    }

    fn row_to_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<CodeEntity> {
        let kind_str: String = row.get("entity_kind")?;
        Ok(CodeEntity {
            entity_id: row.get("entity_id")?,
            entity_kind: EntityKind::parse(&kind_str).unwrap_or(EntityKind::Other),
            language: row.get("language")?,
            name: row.get("name")?,
            qualified_name: row.get("qualified_name")?,
            file_path: row.get("file_path")?,
            line_start: row.get("line_start")?,
            line_end: row.get("line_end")?,
            signature: row.get("signature")?,
            body_text: row.get("body_text")?,
            is_public: row.get("is_public")?,
            is_test: row.get("is_test")?,
            complexity_score: row.get("complexity_score")?,
            token_count: row.get("token_count")?,
        })
    }

    fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<DependencyEdge> {
        let kind: String = row.get(2)?;
        Ok(DependencyEdge {
            from_id: row.get(0)?,
            to_id: row.get(1)?,
            edge_kind: EdgeKind::parse(&kind),
            position: row.get(3)?,
        })
    }

    fn row_to_generation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Generation> {
        let created_str: String = row.get("created_at")?;
        let mode_str: String = row.get("mode")?;
        Ok(Generation {
            generation_id: row.get("generation_id")?,
            created_at: DateTime::parse_from_rfc3339(&created_str)
                .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc)),
            root_path: row.get("root_path")?,
            mode: if mode_str == "incremental" {
                IngestMode::Incremental
            } else {
                IngestMode::Full
            },
            counts: GenerationCounts {
                files: row.get("file_count")?,
                entities: row.get("entity_count")?,
                edges: row.get("edge_count")?,
            },
        })
    }

    fn load_cluster_members(
        conn: &Connection,
        generation: &str,
        cluster_id: &str,
    ) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT entity_id FROM cluster_members
             WHERE generation_id = ?1 AND cluster_id = ?2 ORDER BY entity_id",
        )?;
        let rows = stmt.query_map(params![generation, cluster_id], |row| row.get(0))?;
        rows.collect()
    }

    /// Load clusters matching an optional extra condition on `clusters` (aliased `c`).
    fn query_clusters(
        conn: &Connection,
        generation: &str,
        condition: &str,
        extra: Option<&str>,
    ) -> rusqlite::Result<Vec<SemanticCluster>> {
        let sql = format!(
            "SELECT c.cluster_id, c.name, c.cohesion_score, c.coupling_score, c.modularity,
                    c.token_count
             FROM clusters c
             WHERE c.generation_id = ?1 {condition}
             ORDER BY c.cluster_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = match extra {
            Some(value) => stmt.query(params![generation, value])?,
            None => stmt.query(params![generation])?,
        };
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let cluster_id: String = row.get(0)?;
            out.push(SemanticCluster {
                member_ids: Self::load_cluster_members(conn, generation, &cluster_id)?,
                cluster_id,
                name: row.get(1)?,
                cohesion_score: row.get(2)?,
                coupling_score: row.get(3)?,
                modularity: row.get(4)?,
                token_count: row.get(5)?,
            });
        }
        Ok(out)
    }

    fn count(conn: &Connection, sql: &str, generation: &str) -> crate::error::Result<u64> {
        conn.query_row(sql, params![generation], |row| row.get(0))
            .map_err(|e| StoreError::Sqlite(e).into())
    }

    fn grouped_counts(
        conn: &Connection,
        sql: &str,
        generation: &str,
    ) -> crate::error::Result<Vec<(String, u64)>> {
        let mut stmt = conn.prepare(sql).map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![generation], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(StoreError::Sqlite)?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?)
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait::async_trait]
impl GraphStore for SqliteStore {
    // ── Generations ────────────────────────────────────────────────

    async fn active_generation(&self) -> crate::error::Result<Option<Generation>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let result = conn
            .query_row(
                "SELECT g.* FROM generations g
                 JOIN atlas_meta m ON m.key = ?1 AND m.value = g.generation_id",
                params![ACTIVE_KEY],
                Self::row_to_generation,
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        Ok(result)
    }

    async fn list_generations(&self) -> crate::error::Result<Vec<Generation>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT * FROM generations ORDER BY generation_id DESC")
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map([], Self::row_to_generation)
            .map_err(StoreError::Sqlite)?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?)
    }

    async fn commit_generation(
        &self,
        staged: &StagedGeneration,
        retain: usize,
    ) -> crate::error::Result<Vec<String>> {
        let raw_refs: Vec<String> = staged
            .entities
            .iter()
            .map(|p| serde_json::to_string(&p.raw_refs))
            .collect::<Result<_, _>>()
            .map_err(StoreError::Serialization)?;

        let mut conn = self.conn.lock().expect("atlas store mutex poisoned");
        let tx = conn.transaction().map_err(StoreError::Sqlite)?;
        let gen_id = staged.generation.generation_id.as_str();
        let counts = &staged.generation.counts;

        tx.execute(
            "INSERT INTO generations
                (generation_id, created_at, root_path, mode, file_count, entity_count, edge_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                gen_id,
                staged.generation.created_at.to_rfc3339(),
                staged.generation.root_path,
                staged.generation.mode.as_str(),
                to_i64(counts.files),
                to_i64(counts.entities),
                to_i64(counts.edges),
            ],
        )
        .map_err(StoreError::Sqlite)?;

        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO files
                        (generation_id, path, language, content_hash, size_bytes, parse_error,
                         excluded_entities, extract_fingerprint)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(StoreError::Sqlite)?;
            for f in &staged.files {
                stmt.execute(params![
                    gen_id,
                    f.path,
                    f.language,
                    f.content_hash,
                    to_i64(f.size_bytes),
                    f.parse_error,
                    f.excluded_entities,
                    f.extract_fingerprint,
                ])
                .map_err(StoreError::Sqlite)?;
            }
        }

        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO entities
                        (generation_id, entity_id, entity_kind, language, name, qualified_name,
                         file_path, line_start, line_end, signature, body_text, is_public,
                         is_test, complexity_score, token_count, raw_refs)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                )
                .map_err(StoreError::Sqlite)?;
            for (pending, refs) in staged.entities.iter().zip(&raw_refs) {
                let e = &pending.entity;
                stmt.execute(params![
                    gen_id,
                    e.entity_id,
                    e.entity_kind.as_str(),
                    e.language,
                    e.name,
                    e.qualified_name,
                    e.file_path,
                    e.line_start,
                    e.line_end,
                    e.signature,
                    e.body_text.as_deref().unwrap_or_default(),
                    e.is_public,
                    e.is_test,
                    e.complexity_score,
                    e.token_count,
                    refs,
                ])
                .map_err(StoreError::Sqlite)?;
            }
        }

        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO edges (generation_id, from_id, to_id, edge_kind, position)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(StoreError::Sqlite)?;
            for edge in &staged.edges {
                stmt.execute(params![
                    gen_id,
                    edge.from_id,
                    edge.to_id,
                    edge.edge_kind.as_str(),
                    edge.position,
                ])
                .map_err(StoreError::Sqlite)?;
            }
        }

        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO file_cochange (generation_id, file_a, file_b, commit_count)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(StoreError::Sqlite)?;
            for pair in &staged.co_changes {
                stmt.execute(params![gen_id, pair.file_a, pair.file_b, pair.count])
                    .map_err(StoreError::Sqlite)?;
            }
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO file_churn (generation_id, path, commit_count)
                     VALUES (?1, ?2, ?3)",
                )
                .map_err(StoreError::Sqlite)?;
            for churn in &staged.churn {
                stmt.execute(params![gen_id, churn.path, churn.commits])
                    .map_err(StoreError::Sqlite)?;
            }
        }

        tx.execute(
            "INSERT INTO atlas_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![ACTIVE_KEY, gen_id],
        )
        .map_err(StoreError::Sqlite)?;

        // The new generation always survives; older ones fill the remaining slots.
        let pruned: Vec<String> = {
            let mut stmt = tx
                .prepare(
                    "SELECT generation_id FROM generations
                     WHERE generation_id != ?1
                     ORDER BY generation_id DESC",
                )
                .map_err(StoreError::Sqlite)?;
            let rows = stmt
                .query_map(params![gen_id], |row| row.get::<_, String>(0))
                .map_err(StoreError::Sqlite)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::Sqlite)?
                .into_iter()
                .skip(retain.saturating_sub(1))
                .collect()
        };
        for old in &pruned {
            tx.execute(
                "DELETE FROM generations WHERE generation_id = ?1",
                params![old],
            )
            .map_err(StoreError::Sqlite)?;
        }

        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(pruned)
    }

    // ── Entities ───────────────────────────────────────────────────

    async fn get_entity(
        &self,
        generation: &str,
        entity_id: &str,
        include_body: bool,
    ) -> crate::error::Result<Option<CodeEntity>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let sql = format!(
            "SELECT {} FROM entities WHERE generation_id = ?1 AND entity_id = ?2",
            Self::entity_columns(include_body)
        );
        let result = conn
            .query_row(&sql, params![generation, entity_id], Self::row_to_entity)
            .optional()
            .map_err(StoreError::Sqlite)?;
        Ok(result)
    }

    async fn get_entities(
        &self,
        generation: &str,
        ids: &[String],
        include_body: bool,
    ) -> crate::error::Result<Vec<CodeEntity>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let sql = format!(
            "SELECT {} FROM entities WHERE generation_id = ?1 AND entity_id = ?2",
            Self::entity_columns(include_body)
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(StoreError::Sqlite)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = stmt
                .query_row(params![generation, id], Self::row_to_entity)
                .optional()
                .map_err(StoreError::Sqlite)?
            {
                out.push(entity);
            }
        }
        Ok(out)
    }

    async fn find_entities(
        &self,
        generation: &str,
        predicate: &Predicate,
        options: &FindOptions,
    ) -> crate::error::Result<Vec<CodeEntity>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let mut sql = format!(
            "SELECT {} FROM entities WHERE generation_id = ?1 AND ",
            Self::entity_columns(options.include_body)
        );
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(generation.to_string())];
        predicate.to_sql(&mut sql, &mut param_values);
        if !options.include_tests {
            sql.push_str(" AND is_test = 0");
        }
        sql.push_str(" ORDER BY entity_id");
        if let Some(limit) = options.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(AsRef::as_ref).collect();
        let mut stmt = conn.prepare(&sql).map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), Self::row_to_entity)
            .map_err(StoreError::Sqlite)?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?)
    }

    async fn load_entities(
        &self,
        generation: &str,
        include_body: bool,
    ) -> crate::error::Result<Vec<CodeEntity>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let sql = format!(
            "SELECT {} FROM entities WHERE generation_id = ?1 ORDER BY entity_id",
            Self::entity_columns(include_body)
        );
        let mut stmt = conn.prepare(&sql).map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![generation], Self::row_to_entity)
            .map_err(StoreError::Sqlite)?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?)
    }

    async fn load_entities_for_files(
        &self,
        generation: &str,
        paths: &[String],
    ) -> crate::error::Result<Vec<PendingEntity>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let sql = format!(
            "SELECT {}, raw_refs FROM entities
             WHERE generation_id = ?1 AND file_path = ?2 ORDER BY line_start, entity_id",
            Self::entity_columns(true)
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(StoreError::Sqlite)?;
        let mut out = Vec::new();
        for path in paths {
            let rows = stmt
                .query_map(params![generation, path], |row| {
                    Ok((Self::row_to_entity(row)?, row.get::<_, String>("raw_refs")?))
                })
                .map_err(StoreError::Sqlite)?;
            for row in rows {
                let (entity, refs_json) = row.map_err(StoreError::Sqlite)?;
                let raw_refs: Vec<RawRef> =
                    serde_json::from_str(&refs_json).map_err(StoreError::Serialization)?;
                out.push(PendingEntity { entity, raw_refs });
            }
        }
        Ok(out)
    }

    // ── Edges ──────────────────────────────────────────────────────

    async fn forward_refs(
        &self,
        generation: &str,
        entity_id: &str,
    ) -> crate::error::Result<Vec<String>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let mut stmt = conn
            .prepare_cached(
                "SELECT to_id FROM edges WHERE generation_id = ?1 AND from_id = ?2
                 ORDER BY position",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![generation, entity_id], |row| row.get(0))
            .map_err(StoreError::Sqlite)?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?)
    }

    async fn reverse_refs(
        &self,
        generation: &str,
        entity_id: &str,
    ) -> crate::error::Result<Vec<String>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let mut stmt = conn
            .prepare_cached(
                "SELECT from_id FROM edges WHERE generation_id = ?1 AND to_id = ?2
                 ORDER BY from_id",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![generation, entity_id], |row| row.get(0))
            .map_err(StoreError::Sqlite)?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?)
    }

    async fn neighbors(
        &self,
        generation: &str,
        ids: &[String],
        direction: Direction,
        include_tests: bool,
    ) -> crate::error::Result<Vec<DependencyEdge>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let (near, far, order) = match direction {
            Direction::Forward => ("from_id", "to_id", "e.position"),
            Direction::Reverse => ("to_id", "from_id", "e.from_id"),
        };
        let test_filter = if include_tests { "" } else { " AND t.is_test = 0" };
        let sql = format!(
            "SELECT e.from_id, e.to_id, e.edge_kind, e.position FROM edges e
             JOIN entities t ON t.generation_id = e.generation_id AND t.entity_id = e.{far}
             WHERE e.generation_id = ?1 AND e.{near} = ?2{test_filter}
             ORDER BY {order}"
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(StoreError::Sqlite)?;
        let mut out = Vec::new();
        for id in ids {
            let rows = stmt
                .query_map(params![generation, id], Self::row_to_edge)
                .map_err(StoreError::Sqlite)?;
            for row in rows {
                out.push(row.map_err(StoreError::Sqlite)?);
            }
        }
        Ok(out)
    }

    async fn load_edges(&self, generation: &str) -> crate::error::Result<Vec<DependencyEdge>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT from_id, to_id, edge_kind, position FROM edges
                 WHERE generation_id = ?1 ORDER BY from_id, position",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![generation], Self::row_to_edge)
            .map_err(StoreError::Sqlite)?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?)
    }

    // ── Files and history ──────────────────────────────────────────

    async fn load_file_records(&self, generation: &str) -> crate::error::Result<Vec<FileRecord>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT path, language, content_hash, size_bytes, parse_error, excluded_entities,
                        extract_fingerprint
                 FROM files
                 WHERE generation_id = ?1 ORDER BY path",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![generation], |row| {
                Ok(FileRecord {
                    path: row.get(0)?,
                    language: row.get(1)?,
                    content_hash: row.get(2)?,
                    size_bytes: row.get(3)?,
                    parse_error: row.get(4)?,
                    excluded_entities: row.get(5)?,
                    extract_fingerprint: row.get(6)?,
                })
            })
            .map_err(StoreError::Sqlite)?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?)
    }

    async fn load_co_change(&self, generation: &str) -> crate::error::Result<Vec<CoChange>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT file_a, file_b, commit_count FROM file_cochange
                 WHERE generation_id = ?1 ORDER BY file_a, file_b",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![generation], |row| {
                Ok(CoChange {
                    file_a: row.get(0)?,
                    file_b: row.get(1)?,
                    count: row.get(2)?,
                })
            })
            .map_err(StoreError::Sqlite)?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?)
    }

    async fn load_churn(&self, generation: &str) -> crate::error::Result<Vec<FileChurn>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT path, commit_count FROM file_churn
                 WHERE generation_id = ?1 ORDER BY path",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![generation], |row| {
                Ok(FileChurn {
                    path: row.get(0)?,
                    commits: row.get(1)?,
                })
            })
            .map_err(StoreError::Sqlite)?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?)
    }

    // ── Clusters ───────────────────────────────────────────────────

    async fn publish_clusters(
        &self,
        generation: &str,
        clusters: &[SemanticCluster],
    ) -> crate::error::Result<()> {
        let mut conn = self.conn.lock().expect("atlas store mutex poisoned");
        let tx = conn.transaction().map_err(StoreError::Sqlite)?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM generations WHERE generation_id = ?1)",
                params![generation],
                |row| row.get(0),
            )
            .map_err(StoreError::Sqlite)?;
        if !exists {
            return Err(StoreError::GenerationNotFound(generation.to_string()).into());
        }

        tx.execute(
            "DELETE FROM cluster_members WHERE generation_id = ?1",
            params![generation],
        )
        .map_err(StoreError::Sqlite)?;
        tx.execute(
            "DELETE FROM clusters WHERE generation_id = ?1",
            params![generation],
        )
        .map_err(StoreError::Sqlite)?;

        {
            let mut cluster_stmt = tx
                .prepare_cached(
                    "INSERT INTO clusters
                        (generation_id, cluster_id, name, cohesion_score, coupling_score,
                         modularity, token_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(StoreError::Sqlite)?;
            let mut member_stmt = tx
                .prepare_cached(
                    "INSERT INTO cluster_members (generation_id, cluster_id, entity_id)
                     VALUES (?1, ?2, ?3)",
                )
                .map_err(StoreError::Sqlite)?;
            for cluster in clusters {
                cluster_stmt
                    .execute(params![
                        generation,
                        cluster.cluster_id,
                        cluster.name,
                        cluster.cohesion_score,
                        cluster.coupling_score,
                        cluster.modularity,
                        cluster.token_count,
                    ])
                    .map_err(StoreError::Sqlite)?;
                for member in &cluster.member_ids {
                    member_stmt
                        .execute(params![generation, cluster.cluster_id, member])
                        .map_err(StoreError::Sqlite)?;
                }
            }
        }

        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn load_clusters(&self, generation: &str) -> crate::error::Result<Vec<SemanticCluster>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        Ok(Self::query_clusters(&conn, generation, "", None).map_err(StoreError::Sqlite)?)
    }

    async fn cluster_for_entity(
        &self,
        generation: &str,
        entity_id: &str,
    ) -> crate::error::Result<Option<SemanticCluster>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        let mut found = Self::query_clusters(
            &conn,
            generation,
            "AND c.cluster_id IN (SELECT cluster_id FROM cluster_members
                                  WHERE generation_id = ?1 AND entity_id = ?2)",
            Some(entity_id),
        )
        .map_err(StoreError::Sqlite)?;
        Ok(found.pop())
    }

    async fn find_clusters(
        &self,
        generation: &str,
        pattern: &str,
    ) -> crate::error::Result<Vec<SemanticCluster>> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");
        Ok(Self::query_clusters(
            &conn,
            generation,
            "AND instr(lower(c.name), lower(?2)) > 0",
            Some(pattern),
        )
        .map_err(StoreError::Sqlite)?)
    }

    // ── Stats ──────────────────────────────────────────────────────

    async fn stats(&self, generation: &str) -> crate::error::Result<StoreStats> {
        let conn = self.conn.lock().expect("atlas store mutex poisoned");

        let files = Self::count(
            &conn,
            "SELECT COUNT(*) FROM files WHERE generation_id = ?1",
            generation,
        )?;
        let files_with_errors = Self::count(
            &conn,
            "SELECT COUNT(*) FROM files WHERE generation_id = ?1 AND parse_error IS NOT NULL",
            generation,
        )?;
        let entities = Self::count(
            &conn,
            "SELECT COUNT(*) FROM entities WHERE generation_id = ?1",
            generation,
        )?;
        let test_entities = Self::count(
            &conn,
            "SELECT COUNT(*) FROM entities WHERE generation_id = ?1 AND is_test = 1",
            generation,
        )?;
        let edges = Self::count(
            &conn,
            "SELECT COUNT(*) FROM edges WHERE generation_id = ?1",
            generation,
        )?;
        let clusters = Self::count(
            &conn,
            "SELECT COUNT(*) FROM clusters WHERE generation_id = ?1",
            generation,
        )?;
        let clustered_entities = Self::count(
            &conn,
            "SELECT COUNT(*) FROM cluster_members WHERE generation_id = ?1",
            generation,
        )?;
        let co_change_pairs = Self::count(
            &conn,
            "SELECT COUNT(*) FROM file_cochange WHERE generation_id = ?1",
            generation,
        )?;
        let entities_by_language = Self::grouped_counts(
            &conn,
            "SELECT language, COUNT(*) FROM entities WHERE generation_id = ?1
             GROUP BY language ORDER BY language",
            generation,
        )?;
        let entities_by_kind = Self::grouped_counts(
            &conn,
            "SELECT entity_kind, COUNT(*) FROM entities WHERE generation_id = ?1
             GROUP BY entity_kind ORDER BY entity_kind",
            generation,
        )?;

        let db_size_bytes = self
            .db_path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map_or(0, |m| m.len());

        Ok(StoreStats {
            generation_id: generation.to_string(),
            files,
            files_with_errors,
            entities,
            test_entities,
            edges,
            clusters,
            clustered_entities,
            co_change_pairs,
            entities_by_language,
            entities_by_kind,
            db_size_bytes,
        })
    }
}
