//! Database Migrations
//!
//! Schema migration definitions for the fragment store.

use rusqlite::Connection;

use crate::error::Result;

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Fragments, links, versions and embeddings",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Feedback tables and maintenance watermarks",
        up: MIGRATION_V2_UP,
    },
];

/// V1: fragment graph
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS fragments (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    topic TEXT NOT NULL DEFAULT '',
    keywords TEXT NOT NULL DEFAULT '[]',
    fragment_type TEXT NOT NULL DEFAULT 'fact',
    importance REAL NOT NULL DEFAULT 0.5,
    content_hash TEXT NOT NULL,
    source TEXT,
    linked_to TEXT NOT NULL DEFAULT '[]',
    agent_id TEXT NOT NULL DEFAULT 'default',
    access_count INTEGER NOT NULL DEFAULT 0,
    accessed_at TEXT,
    created_at TEXT NOT NULL,
    ttl_tier TEXT NOT NULL DEFAULT 'warm',
    estimated_tokens INTEGER NOT NULL DEFAULT 0,
    utility_score REAL NOT NULL DEFAULT 1.0,
    verified_at TEXT NOT NULL,
    is_anchor INTEGER NOT NULL DEFAULT 0
);

-- Dedup identity: one hash per agent scope
CREATE UNIQUE INDEX IF NOT EXISTS idx_fragments_agent_hash ON fragments(agent_id, content_hash);

CREATE INDEX IF NOT EXISTS idx_fragments_topic ON fragments(topic);
CREATE INDEX IF NOT EXISTS idx_fragments_type ON fragments(fragment_type);
CREATE INDEX IF NOT EXISTS idx_fragments_importance ON fragments(importance DESC);
CREATE INDEX IF NOT EXISTS idx_fragments_created ON fragments(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_fragments_agent ON fragments(agent_id);
CREATE INDEX IF NOT EXISTS idx_fragments_tier_created ON fragments(ttl_tier, created_at);
CREATE INDEX IF NOT EXISTS idx_fragments_source ON fragments(source);
CREATE INDEX IF NOT EXISTS idx_fragments_verified ON fragments(verified_at);
CREATE INDEX IF NOT EXISTS idx_fragments_anchor ON fragments(is_anchor) WHERE is_anchor = 1;

-- Embeddings side table (binary blob); rows without one are simply
-- invisible to the semantic tier
CREATE TABLE IF NOT EXISTS fragment_embeddings (
    fragment_id TEXT PRIMARY KEY REFERENCES fragments(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

-- Typed directed edges, unique per ordered pair; both endpoints cascade
CREATE TABLE IF NOT EXISTS fragment_links (
    from_id TEXT NOT NULL REFERENCES fragments(id) ON DELETE CASCADE,
    to_id TEXT NOT NULL REFERENCES fragments(id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL DEFAULT 'related',
    created_at TEXT NOT NULL,
    PRIMARY KEY (from_id, to_id)
);

CREATE INDEX IF NOT EXISTS idx_links_to ON fragment_links(to_id);
CREATE INDEX IF NOT EXISTS idx_links_relation ON fragment_links(relation_type);

-- Pre-amendment snapshots, append-only
CREATE TABLE IF NOT EXISTS fragment_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fragment_id TEXT NOT NULL REFERENCES fragments(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    topic TEXT NOT NULL,
    keywords TEXT NOT NULL DEFAULT '[]',
    fragment_type TEXT NOT NULL,
    importance REAL NOT NULL,
    amended_at TEXT NOT NULL,
    amended_by TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_versions_fragment ON fragment_versions(fragment_id);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: feedback capture and consolidation watermarks
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS tool_feedback (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tool_name TEXT NOT NULL,
    relevant INTEGER NOT NULL,
    sufficient INTEGER NOT NULL,
    suggestion TEXT,
    context TEXT,
    session_id TEXT,
    trigger_type TEXT NOT NULL DEFAULT 'voluntary',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tool_feedback_created ON tool_feedback(created_at);

CREATE TABLE IF NOT EXISTS task_feedback (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    overall_success INTEGER NOT NULL,
    tool_highlights TEXT NOT NULL DEFAULT '[]',
    tool_pain_points TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_task_feedback_created ON task_feedback(created_at);

-- Watermarks for the consolidation pipeline (last contradiction check,
-- last feedback report)
CREATE TABLE IF NOT EXISTS maintenance_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// Apply any pending migrations to the connection
pub fn apply_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current {
            tracing::info!(
                version = migration.version,
                "Applying migration: {}",
                migration.description
            );
            conn.execute_batch(migration.up)?;
        }
    }

    Ok(())
}
