/// Current schema version.
pub const SCHEMA_VERSION: &str = "2";

/// Full SQL schema for the Atlas `SQLite` database. Every data table is keyed
/// by generation so that a generation can be inserted or pruned as a unit.
pub const SCHEMA_SQL: &str = r"
-- Schema version and the active generation pointer
CREATE TABLE IF NOT EXISTS atlas_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS generations (
    generation_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    root_path TEXT NOT NULL,
    mode TEXT NOT NULL,
    file_count INTEGER NOT NULL DEFAULT 0,
    entity_count INTEGER NOT NULL DEFAULT 0,
    edge_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS files (
    generation_id TEXT NOT NULL REFERENCES generations(generation_id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    language TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    parse_error TEXT,
    excluded_entities INTEGER NOT NULL DEFAULT 0,
    extract_fingerprint TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (generation_id, path)
);

CREATE TABLE IF NOT EXISTS entities (
    generation_id TEXT NOT NULL REFERENCES generations(generation_id) ON DELETE CASCADE,
    entity_id TEXT NOT NULL,
    entity_kind TEXT NOT NULL,
    language TEXT NOT NULL,
    name TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    line_start INTEGER NOT NULL,
    line_end INTEGER NOT NULL,
    signature TEXT NOT NULL,
    body_text TEXT NOT NULL,
    is_public INTEGER NOT NULL,
    is_test INTEGER NOT NULL,
    complexity_score INTEGER,
    token_count INTEGER NOT NULL,
    raw_refs TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (generation_id, entity_id)
);
CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(generation_id, name);
CREATE INDEX IF NOT EXISTS idx_entities_qname ON entities(generation_id, qualified_name);
CREATE INDEX IF NOT EXISTS idx_entities_file ON entities(generation_id, file_path);
CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities(generation_id, entity_kind);

CREATE TABLE IF NOT EXISTS edges (
    generation_id TEXT NOT NULL REFERENCES generations(generation_id) ON DELETE CASCADE,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    edge_kind TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (generation_id, from_id, to_id)
);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(generation_id, to_id);

CREATE TABLE IF NOT EXISTS clusters (
    generation_id TEXT NOT NULL REFERENCES generations(generation_id) ON DELETE CASCADE,
    cluster_id TEXT NOT NULL,
    name TEXT NOT NULL,
    cohesion_score REAL NOT NULL,
    coupling_score REAL NOT NULL,
    modularity REAL NOT NULL,
    token_count INTEGER NOT NULL,
    PRIMARY KEY (generation_id, cluster_id)
);

CREATE TABLE IF NOT EXISTS cluster_members (
    generation_id TEXT NOT NULL REFERENCES generations(generation_id) ON DELETE CASCADE,
    cluster_id TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    PRIMARY KEY (generation_id, entity_id)
);
CREATE INDEX IF NOT EXISTS idx_cluster_members_cluster
    ON cluster_members(generation_id, cluster_id);

-- Co-change mined from git history
CREATE TABLE IF NOT EXISTS file_cochange (
    generation_id TEXT NOT NULL REFERENCES generations(generation_id) ON DELETE CASCADE,
    file_a TEXT NOT NULL,
    file_b TEXT NOT NULL,
    commit_count INTEGER NOT NULL,
    PRIMARY KEY (generation_id, file_a, file_b)
);

CREATE TABLE IF NOT EXISTS file_churn (
    generation_id TEXT NOT NULL REFERENCES generations(generation_id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    commit_count INTEGER NOT NULL,
    PRIMARY KEY (generation_id, path)
);
";
