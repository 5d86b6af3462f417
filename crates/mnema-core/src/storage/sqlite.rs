//! SQLite Fragment Store
//!
//! Durable persistence for fragments, links, versions and feedback, with
//! embedding-aware upsert and the maintenance sweeps the Consolidator
//! runs. Keywords and the `linked_to` mirror are JSON array columns;
//! embeddings live in a side table and are mirrored into the in-process
//! vector index.
//!
//! Uses separate reader/writer connections behind mutexes so the store is
//! `Send + Sync` and the server can hold it in an `Arc`.

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::embeddings::{from_bytes, to_bytes, Embedder};
use crate::error::{MemoryError, Result};
use crate::memory::{
    content_hash, estimate_tokens, AgentScope, Fragment, FragmentLink, FragmentType,
    FragmentVersion, MemoryStats, RelationType, TaskFeedback, ToolFeedback, TtlTier,
};
use crate::search::VectorIndex;

/// Importance above which an embedding is generated at insert time
pub const EMBED_IMPORTANCE_THRESHOLD: f64 = 0.5;

/// Inactivity window for the expiry sweep
pub const EXPIRE_INACTIVE_DAYS: i64 = 90;

/// Importance decay multiplier
pub const DECAY_FACTOR: f64 = 0.995;

const FRAGMENT_SELECT: &str = "SELECT f.id, f.content, f.topic, f.keywords, f.fragment_type, \
     f.importance, f.content_hash, f.source, f.linked_to, f.agent_id, f.access_count, \
     f.accessed_at, f.created_at, f.ttl_tier, f.estimated_tokens, f.utility_score, \
     f.verified_at, f.is_anchor, \
     EXISTS(SELECT 1 FROM fragment_embeddings e WHERE e.fragment_id = f.id) \
     FROM fragments f";

const SCOPE_CLAUSE: &str = "(?1 = 1 OR f.agent_id = ?2 OR f.agent_id = 'default')";

const NOT_SUPERSEDED: &str =
    "f.id NOT IN (SELECT from_id FROM fragment_links WHERE relation_type = 'superseded_by')";

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Outcome of an insert: either a fresh row or a dedup hit
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    /// The surviving fragment id (existing id on a hash collision)
    pub id: String,
    /// `false` when the content hash matched an existing row
    pub created: bool,
}

/// Outcome of an update
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The row was archived and rewritten
    Updated(Box<Fragment>),
    /// The new content hash collides with another row; nothing changed
    Merged { existing_id: String },
}

/// Patch applied by `update`. Content must already be redacted and
/// truncated by the caller.
#[derive(Debug, Clone, Default)]
pub struct FragmentPatch {
    pub content: Option<String>,
    pub topic: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub fragment_type: Option<FragmentType>,
    pub importance: Option<f64>,
    pub is_anchor: Option<bool>,
}

impl FragmentPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.topic.is_none()
            && self.keywords.is_none()
            && self.fragment_type.is_none()
            && self.importance.is_none()
            && self.is_anchor.is_none()
    }
}

/// Optional predicates for the durable keyword tier
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    pub fragment_type: Option<FragmentType>,
    pub topic: Option<String>,
    pub min_importance: Option<f64>,
    pub limit: usize,
}

/// A node in a root-cause chain walk
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RcaNode {
    #[serde(flatten)]
    pub fragment: Fragment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationType>,
    pub depth: i32,
}

// ============================================================================
// STORE
// ============================================================================

/// Durable fragment store
pub struct FragmentStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    vectors: Mutex<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl FragmentStore {
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the store at `db_path`, defaulting to the platform
    /// data directory. Embeddings found on disk are loaded into the vector
    /// index.
    pub fn new(
        db_path: Option<PathBuf>,
        embedder: Arc<dyn Embedder>,
        dimensions: usize,
    ) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = directories::ProjectDirs::from("dev", "mnema", "core")
                    .ok_or_else(|| MemoryError::Init("Could not determine data directory".into()))?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("mnema.db")
            }
        };

        let writer = Connection::open(&path)?;
        Self::configure_connection(&writer)?;
        super::migrations::apply_migrations(&writer)?;

        let reader = Connection::open(&path)?;
        Self::configure_connection(&reader)?;

        let vectors = VectorIndex::new(dimensions)
            .map_err(|e| MemoryError::Init(format!("Failed to create vector index: {}", e)))?;

        let store = Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            vectors: Mutex::new(vectors),
            embedder,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(100).expect("100 is non-zero"),
            )),
        };
        store.load_embeddings_into_index()?;
        Ok(store)
    }

    fn write(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| MemoryError::Init("Writer lock poisoned".into()))
    }

    fn read(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| MemoryError::Init("Reader lock poisoned".into()))
    }

    fn vectors(&self) -> Result<MutexGuard<'_, VectorIndex>> {
        self.vectors
            .lock()
            .map_err(|_| MemoryError::Init("Vector index lock poisoned".into()))
    }

    fn load_embeddings_into_index(&self) -> Result<()> {
        let rows: Vec<(String, Vec<u8>)> = {
            let reader = self.read()?;
            let mut stmt =
                reader.prepare("SELECT fragment_id, embedding FROM fragment_embeddings")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut vectors = self.vectors()?;
        for (fragment_id, blob) in rows {
            if let Some(vector) = from_bytes(&blob) {
                if let Err(e) = vectors.add(&fragment_id, &vector) {
                    tracing::warn!("Failed to load embedding for {}: {}", fragment_id, e);
                }
            }
        }
        Ok(())
    }

    fn row_to_fragment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fragment> {
        let keywords: String = row.get(3)?;
        let linked_to: String = row.get(8)?;
        let fragment_type: String = row.get(4)?;
        let ttl_tier: String = row.get(13)?;
        Ok(Fragment {
            id: row.get(0)?,
            content: row.get(1)?,
            topic: row.get(2)?,
            keywords: serde_json::from_str(&keywords).unwrap_or_default(),
            fragment_type: FragmentType::parse_name(&fragment_type).unwrap_or_default(),
            importance: row.get(5)?,
            content_hash: row.get(6)?,
            source: row.get(7)?,
            linked_to: serde_json::from_str(&linked_to).unwrap_or_default(),
            agent_id: row.get(9)?,
            access_count: row.get(10)?,
            accessed_at: row.get(11)?,
            created_at: row.get(12)?,
            ttl_tier: TtlTier::parse_name(&ttl_tier),
            estimated_tokens: row.get(14)?,
            utility_score: row.get(15)?,
            verified_at: row.get(16)?,
            is_anchor: row.get::<_, i64>(17)? != 0,
            has_embedding: row.get::<_, i64>(18)? != 0,
        })
    }

    // ========================================================================
    // INSERT
    // ========================================================================

    /// Insert a fragment. A content-hash collision within the agent scope
    /// returns the existing id and raises its importance to the greater of
    /// the two values.
    pub fn insert(&self, fragment: &Fragment) -> Result<InsertOutcome> {
        let existing: Option<(String, f64)> = {
            let reader = self.read()?;
            reader
                .query_row(
                    "SELECT id, importance FROM fragments \
                     WHERE agent_id = ?1 AND content_hash = ?2",
                    params![fragment.agent_id, fragment.content_hash],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
        };

        if let Some((id, importance)) = existing {
            if fragment.importance > importance {
                let writer = self.write()?;
                writer.execute(
                    "UPDATE fragments SET importance = ?1 WHERE id = ?2",
                    params![fragment.importance, id],
                )?;
            }
            return Ok(InsertOutcome { id, created: false });
        }

        {
            let writer = self.write()?;
            writer.execute(
                "INSERT INTO fragments (
                    id, content, topic, keywords, fragment_type, importance,
                    content_hash, source, linked_to, agent_id, access_count,
                    accessed_at, created_at, ttl_tier, estimated_tokens,
                    utility_score, verified_at, is_anchor
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    fragment.id,
                    fragment.content,
                    fragment.topic,
                    serde_json::to_string(&fragment.keywords).unwrap_or_else(|_| "[]".into()),
                    fragment.fragment_type.as_str(),
                    fragment.importance,
                    fragment.content_hash,
                    fragment.source,
                    serde_json::to_string(&fragment.linked_to).unwrap_or_else(|_| "[]".into()),
                    fragment.agent_id,
                    fragment.access_count,
                    fragment.accessed_at,
                    fragment.created_at,
                    fragment.ttl_tier.as_str(),
                    fragment.estimated_tokens,
                    fragment.utility_score,
                    fragment.verified_at,
                    fragment.is_anchor as i64,
                ],
            )?;
        }

        if fragment.importance > EMBED_IMPORTANCE_THRESHOLD {
            self.maybe_embed(&fragment.id, &fragment.content);
        }

        Ok(InsertOutcome {
            id: fragment.id.clone(),
            created: true,
        })
    }

    /// Best-effort embedding generation; absence of an embedding is valid.
    fn maybe_embed(&self, fragment_id: &str, content: &str) {
        if !self.embedder.is_ready() {
            return;
        }
        let Some(vector) = self.embedder.embed(content) else {
            return;
        };
        if let Err(e) = self.store_embedding(fragment_id, &vector) {
            tracing::warn!("Failed to store embedding for {}: {}", fragment_id, e);
        }
    }

    fn store_embedding(&self, fragment_id: &str, vector: &[f32]) -> Result<()> {
        {
            let writer = self.write()?;
            writer.execute(
                "INSERT INTO fragment_embeddings (fragment_id, embedding, dimensions, created_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(fragment_id) DO UPDATE SET \
                   embedding = excluded.embedding, \
                   dimensions = excluded.dimensions, \
                   created_at = excluded.created_at",
                params![fragment_id, to_bytes(vector), vector.len() as i64, Utc::now()],
            )?;
        }
        let mut vectors = self.vectors()?;
        vectors
            .add(fragment_id, vector)
            .map_err(|e| MemoryError::Init(e.to_string()))?;
        Ok(())
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Fetch one fragment under the caller's scope
    pub fn get_by_id(&self, id: &str, scope: &AgentScope) -> Result<Option<Fragment>> {
        let reader = self.read()?;
        let sql = format!("{} WHERE {} AND f.id = ?3", FRAGMENT_SELECT, SCOPE_CLAUSE);
        let fragment = reader
            .query_row(
                &sql,
                params![scope.maintenance as i64, scope.agent_id, id],
                Self::row_to_fragment,
            )
            .optional()?;
        Ok(fragment)
    }

    /// Fetch a batch of fragments under the caller's scope
    pub fn get_by_ids(&self, ids: &[String], scope: &AgentScope) -> Result<Vec<Fragment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.read()?;
        let vars = repeat_vars(ids.len(), 3);
        let sql = format!(
            "{} WHERE {} AND f.id IN ({})",
            FRAGMENT_SELECT, SCOPE_CLAUSE, vars
        );
        let mut stmt = reader.prepare(&sql)?;

        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(ids.len() + 2);
        values.push(Box::new(scope.maintenance as i64));
        values.push(Box::new(scope.agent_id.clone()));
        for id in ids {
            values.push(Box::new(id.clone()));
        }

        let fragments = stmt
            .query_map(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())), Self::row_to_fragment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(fragments)
    }

    /// All visible fragments under a topic
    pub fn list_by_topic(&self, topic: &str, scope: &AgentScope) -> Result<Vec<Fragment>> {
        let reader = self.read()?;
        let sql = format!(
            "{} WHERE {} AND f.topic = ?3 ORDER BY f.importance DESC",
            FRAGMENT_SELECT, SCOPE_CLAUSE
        );
        let mut stmt = reader.prepare(&sql)?;
        let fragments = stmt
            .query_map(
                params![scope.maintenance as i64, scope.agent_id, topic],
                Self::row_to_fragment,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(fragments)
    }

    /// Durable keyword search: array-overlap match with optional type,
    /// topic and importance predicates. Rows that are the source of a
    /// `superseded_by` edge are excluded.
    pub fn search_by_keywords(
        &self,
        keywords: &[String],
        filter: &KeywordFilter,
        scope: &AgentScope,
    ) -> Result<Vec<Fragment>> {
        let reader = self.read()?;

        let mut sql = format!("{} WHERE {} AND {}", FRAGMENT_SELECT, SCOPE_CLAUSE, NOT_SUPERSEDED);
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(scope.maintenance as i64),
            Box::new(scope.agent_id.clone()),
        ];
        let mut next = 3;

        if !keywords.is_empty() {
            let lowered: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM json_each(f.keywords) jk \
                   WHERE jk.value IN (SELECT value FROM json_each(?{})))",
                next
            ));
            values.push(Box::new(
                serde_json::to_string(&lowered).unwrap_or_else(|_| "[]".into()),
            ));
            next += 1;
        }
        if let Some(ft) = filter.fragment_type {
            sql.push_str(&format!(" AND f.fragment_type = ?{}", next));
            values.push(Box::new(ft.as_str().to_string()));
            next += 1;
        }
        if let Some(ref topic) = filter.topic {
            sql.push_str(&format!(" AND f.topic = ?{}", next));
            values.push(Box::new(topic.clone()));
            next += 1;
        }
        if let Some(min) = filter.min_importance {
            sql.push_str(&format!(" AND f.importance >= ?{}", next));
            values.push(Box::new(min));
            next += 1;
        }
        let limit = if filter.limit == 0 { 30 } else { filter.limit };
        sql.push_str(&format!(" ORDER BY f.importance DESC LIMIT ?{}", next));
        values.push(Box::new(limit as i64));

        let mut stmt = reader.prepare(&sql)?;
        let fragments = stmt
            .query_map(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())), Self::row_to_fragment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(fragments)
    }

    // ========================================================================
    // SEMANTIC TIER
    // ========================================================================

    /// Embed a query text, memoised in a small LRU cache
    pub fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(hit) = cache.get(text) {
                return Some(hit.clone());
            }
        }
        let vector = self.embedder.embed(text)?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(text.to_string(), vector.clone());
        }
        Some(vector)
    }

    /// Cosine search over the vector index, scope-filtered, superseded
    /// sources excluded. Returns `(fragment, similarity)` best first.
    pub fn search_semantic(
        &self,
        query_text: &str,
        limit: usize,
        min_similarity: f32,
        scope: &AgentScope,
    ) -> Result<Vec<(Fragment, f32)>> {
        let Some(query) = self.embed_query(query_text) else {
            return Ok(Vec::new());
        };
        self.search_semantic_by_vector(&query, limit, min_similarity, scope)
    }

    fn search_semantic_by_vector(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
        scope: &AgentScope,
    ) -> Result<Vec<(Fragment, f32)>> {
        let hits = {
            let vectors = self.vectors()?;
            // Overfetch so scope filtering does not starve the caller
            vectors
                .search(query, limit * 3, min_similarity)
                .map_err(|e| MemoryError::Init(e.to_string()))?
        };
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
        let fragments = self.get_by_ids(&ids, scope)?;
        let superseded = self.superseded_source_ids()?;

        let mut out: Vec<(Fragment, f32)> = Vec::new();
        for (id, similarity) in hits {
            if superseded.contains(&id) {
                continue;
            }
            if let Some(fragment) = fragments.iter().find(|f| f.id == id) {
                out.push((fragment.clone(), similarity));
            }
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Neighbours of a stored fragment by embedding similarity, optionally
    /// restricted to the same topic. The fragment itself is excluded.
    pub fn similar_to_fragment(
        &self,
        fragment: &Fragment,
        min_similarity: f32,
        limit: usize,
        same_topic_only: bool,
        scope: &AgentScope,
    ) -> Result<Vec<(Fragment, f32)>> {
        let Some(vector) = self.embedding_of(&fragment.id)? else {
            return Ok(Vec::new());
        };
        let neighbours =
            self.search_semantic_by_vector(&vector, limit + 1, min_similarity, scope)?;
        Ok(neighbours
            .into_iter()
            .filter(|(f, _)| f.id != fragment.id)
            .filter(|(f, _)| !same_topic_only || f.topic == fragment.topic)
            .take(limit)
            .collect())
    }

    /// Raw embedding blob for a fragment, if present
    pub fn embedding_of(&self, fragment_id: &str) -> Result<Option<Vec<f32>>> {
        let reader = self.read()?;
        let blob: Option<Vec<u8>> = reader
            .query_row(
                "SELECT embedding FROM fragment_embeddings WHERE fragment_id = ?1",
                params![fragment_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.and_then(|b| from_bytes(&b)))
    }

    // ========================================================================
    // ACCESS TRACKING
    // ========================================================================

    /// Batched access bump. Non-transactional; callers log failures and
    /// move on (the bumps are idempotent from the ranking's perspective).
    pub fn increment_access(&self, ids: &[String], scope: &AgentScope) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let writer = self.write()?;
        let vars = repeat_vars(ids.len(), 4);
        let sql = format!(
            "UPDATE fragments SET access_count = access_count + 1, accessed_at = ?3 \
             WHERE (?1 = 1 OR agent_id = ?2 OR agent_id = 'default') AND id IN ({})",
            vars
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(scope.maintenance as i64),
            Box::new(scope.agent_id.clone()),
            Box::new(Utc::now()),
        ];
        for id in ids {
            values.push(Box::new(id.clone()));
        }
        writer.execute(&sql, rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))?;
        Ok(())
    }

    // ========================================================================
    // UPDATE
    // ========================================================================

    /// Archive-then-update. Content mutation recomputes the hash (a
    /// collision with another row returns `Merged` without touching either
    /// row or writing a version) and invalidates the embedding so the next
    /// consolidation regenerates it.
    pub fn update(
        &self,
        id: &str,
        patch: &FragmentPatch,
        scope: &AgentScope,
    ) -> Result<UpdateOutcome> {
        let current = self
            .get_by_id(id, scope)?
            .ok_or_else(|| MemoryError::NotFound(format!("fragment {}", id)))?;

        let new_hash = match patch.content.as_ref() {
            Some(content) if *content != current.content => {
                let hash = content_hash(content);
                let collision: Option<String> = {
                    let reader = self.read()?;
                    reader
                        .query_row(
                            "SELECT id FROM fragments \
                             WHERE agent_id = ?1 AND content_hash = ?2 AND id != ?3",
                            params![current.agent_id, hash, id],
                            |row| row.get(0),
                        )
                        .optional()?
                };
                if let Some(existing_id) = collision {
                    return Ok(UpdateOutcome::Merged { existing_id });
                }
                Some(hash)
            }
            _ => None,
        };
        let content_changed = new_hash.is_some();

        // Archive before mutating: no update is observable without its
        // predecessor version being persisted.
        self.archive_version(&current, &scope.agent_id)?;

        let now = Utc::now();
        let content = patch.content.clone().unwrap_or_else(|| current.content.clone());
        let topic = patch.topic.clone().unwrap_or_else(|| current.topic.clone());
        let keywords = patch.keywords.clone().unwrap_or_else(|| current.keywords.clone());
        let fragment_type = patch.fragment_type.unwrap_or(current.fragment_type);
        let importance = patch.importance.unwrap_or(current.importance).clamp(0.0, 1.0);
        let is_anchor = patch.is_anchor.unwrap_or(current.is_anchor);
        let hash = new_hash.clone().unwrap_or_else(|| current.content_hash.clone());
        let estimated_tokens = if content_changed {
            estimate_tokens(&content)
        } else {
            current.estimated_tokens
        };
        let ttl_tier = if patch.fragment_type.is_some() || patch.importance.is_some() {
            TtlTier::infer(fragment_type, importance)
        } else {
            current.ttl_tier
        };

        {
            let writer = self.write()?;
            writer.execute(
                "UPDATE fragments SET content = ?1, topic = ?2, keywords = ?3, \
                 fragment_type = ?4, importance = ?5, content_hash = ?6, \
                 estimated_tokens = ?7, ttl_tier = ?8, is_anchor = ?9, \
                 verified_at = ?10, accessed_at = ?10 WHERE id = ?11",
                params![
                    content,
                    topic,
                    serde_json::to_string(&keywords).unwrap_or_else(|_| "[]".into()),
                    fragment_type.as_str(),
                    importance,
                    hash,
                    estimated_tokens,
                    ttl_tier.as_str(),
                    is_anchor as i64,
                    now,
                    id,
                ],
            )?;
        }

        if content_changed {
            self.drop_embedding(id)?;
        }

        let updated = self
            .get_by_id(id, scope)?
            .ok_or_else(|| MemoryError::NotFound(format!("fragment {}", id)))?;
        Ok(UpdateOutcome::Updated(Box::new(updated)))
    }

    fn archive_version(&self, fragment: &Fragment, amended_by: &str) -> Result<()> {
        let writer = self.write()?;
        writer.execute(
            "INSERT INTO fragment_versions \
             (fragment_id, content, topic, keywords, fragment_type, importance, amended_at, amended_by) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                fragment.id,
                fragment.content,
                fragment.topic,
                serde_json::to_string(&fragment.keywords).unwrap_or_else(|_| "[]".into()),
                fragment.fragment_type.as_str(),
                fragment.importance,
                Utc::now(),
                amended_by,
            ],
        )?;
        Ok(())
    }

    /// Version history for a fragment, newest first
    pub fn versions_of(&self, fragment_id: &str) -> Result<Vec<FragmentVersion>> {
        let reader = self.read()?;
        let mut stmt = reader.prepare(
            "SELECT fragment_id, content, topic, keywords, fragment_type, importance, \
             amended_at, amended_by FROM fragment_versions \
             WHERE fragment_id = ?1 ORDER BY amended_at DESC, id DESC",
        )?;
        let versions = stmt
            .query_map(params![fragment_id], |row| {
                let keywords: String = row.get(3)?;
                let fragment_type: String = row.get(4)?;
                Ok(FragmentVersion {
                    fragment_id: row.get(0)?,
                    content: row.get(1)?,
                    topic: row.get(2)?,
                    keywords: serde_json::from_str(&keywords).unwrap_or_default(),
                    fragment_type: FragmentType::parse_name(&fragment_type).unwrap_or_default(),
                    importance: row.get(5)?,
                    amended_at: row.get(6)?,
                    amended_by: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    fn drop_embedding(&self, fragment_id: &str) -> Result<()> {
        {
            let writer = self.write()?;
            writer.execute(
                "DELETE FROM fragment_embeddings WHERE fragment_id = ?1",
                params![fragment_id],
            )?;
        }
        let mut vectors = self.vectors()?;
        let _ = vectors.remove(fragment_id);
        Ok(())
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    /// Delete a fragment: remove its edges, prune every `linked_to` array
    /// that references it, then drop the row. Returns `false` when the id
    /// is not visible under the scope.
    pub fn delete(&self, id: &str, scope: &AgentScope) -> Result<bool> {
        if self.get_by_id(id, scope)?.is_none() {
            return Ok(false);
        }
        self.delete_unchecked(id)?;
        Ok(true)
    }

    fn delete_unchecked(&self, id: &str) -> Result<()> {
        {
            let writer = self.write()?;
            writer.execute(
                "DELETE FROM fragment_links WHERE from_id = ?1 OR to_id = ?1",
                params![id],
            )?;
        }
        self.prune_linked_to_references(id)?;
        {
            let writer = self.write()?;
            writer.execute("DELETE FROM fragments WHERE id = ?1", params![id])?;
        }
        let mut vectors = self.vectors()?;
        let _ = vectors.remove(id);
        Ok(())
    }

    fn prune_linked_to_references(&self, id: &str) -> Result<()> {
        let referencing: Vec<(String, String)> = {
            let reader = self.read()?;
            let mut stmt = reader.prepare(
                "SELECT id, linked_to FROM fragments WHERE EXISTS \
                 (SELECT 1 FROM json_each(fragments.linked_to) WHERE json_each.value = ?1)",
            )?;
            stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect()
        };

        let writer = self.write()?;
        for (rid, linked_json) in referencing {
            let mut linked: Vec<String> = serde_json::from_str(&linked_json).unwrap_or_default();
            linked.retain(|l| l != id);
            writer.execute(
                "UPDATE fragments SET linked_to = ?1 WHERE id = ?2",
                params![serde_json::to_string(&linked).unwrap_or_else(|_| "[]".into()), rid],
            )?;
        }
        Ok(())
    }

    // ========================================================================
    // LINKS
    // ========================================================================

    /// Upsert a typed edge and maintain both `linked_to` mirrors
    /// idempotently (the mirror is undirected: each endpoint lists the
    /// other).
    pub fn create_link(
        &self,
        from_id: &str,
        to_id: &str,
        relation: RelationType,
        scope: &AgentScope,
    ) -> Result<()> {
        let from = self
            .get_by_id(from_id, scope)?
            .ok_or_else(|| MemoryError::NotFound(format!("fragment {}", from_id)))?;
        let to = self
            .get_by_id(to_id, scope)?
            .ok_or_else(|| MemoryError::NotFound(format!("fragment {}", to_id)))?;

        {
            let writer = self.write()?;
            writer.execute(
                "INSERT INTO fragment_links (from_id, to_id, relation_type, created_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(from_id, to_id) DO UPDATE SET relation_type = excluded.relation_type",
                params![from_id, to_id, relation.as_str(), Utc::now()],
            )?;
        }

        self.add_to_mirror(&from, to_id)?;
        self.add_to_mirror(&to, from_id)?;
        Ok(())
    }

    fn add_to_mirror(&self, fragment: &Fragment, other_id: &str) -> Result<()> {
        if fragment.linked_to.iter().any(|l| l == other_id) {
            return Ok(());
        }
        let mut linked = fragment.linked_to.clone();
        linked.push(other_id.to_string());
        let writer = self.write()?;
        writer.execute(
            "UPDATE fragments SET linked_to = ?1 WHERE id = ?2",
            params![serde_json::to_string(&linked).unwrap_or_else(|_| "[]".into()), fragment.id],
        )?;
        Ok(())
    }

    /// Outgoing edges of a fragment
    pub fn links_of(&self, fragment_id: &str) -> Result<Vec<FragmentLink>> {
        let reader = self.read()?;
        let mut stmt = reader.prepare(
            "SELECT from_id, to_id, relation_type, created_at FROM fragment_links \
             WHERE from_id = ?1 OR to_id = ?1",
        )?;
        let links = stmt
            .query_map(params![fragment_id], |row| {
                let relation: String = row.get(2)?;
                Ok(FragmentLink {
                    from_id: row.get(0)?,
                    to_id: row.get(1)?,
                    relation_type: RelationType::parse_name(&relation).unwrap_or_default(),
                    created_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    /// One-hop linked fragments for a result set, filtered to a relation
    /// whitelist, ordered resolution-first then importance, capped.
    pub fn get_linked(
        &self,
        from_ids: &[String],
        relations: &[RelationType],
        limit: usize,
        scope: &AgentScope,
    ) -> Result<Vec<(Fragment, RelationType)>> {
        if from_ids.is_empty() || relations.is_empty() {
            return Ok(Vec::new());
        }

        let edges: Vec<(String, RelationType)> = {
            let reader = self.read()?;
            let id_vars = repeat_vars(from_ids.len(), 1);
            let relation_list = relations
                .iter()
                .map(|r| format!("'{}'", r.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            // relation names come from the whitelist enum, never the caller
            let sql = format!(
                "SELECT to_id, relation_type FROM fragment_links \
                 WHERE from_id IN ({}) AND relation_type IN ({})",
                id_vars, relation_list
            );
            let mut stmt = reader.prepare(&sql)?;
            let values: Vec<Box<dyn rusqlite::ToSql>> = from_ids
                .iter()
                .map(|id| Box::new(id.clone()) as Box<dyn rusqlite::ToSql>)
                .collect();
            stmt.query_map(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())), |row| {
                let relation: String = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    RelationType::parse_name(&relation).unwrap_or_default(),
                ))
            })?
            .filter_map(|r| r.ok())
            .collect()
        };

        let target_ids: Vec<String> = edges.iter().map(|(id, _)| id.clone()).collect();
        let fragments = self.get_by_ids(&target_ids, scope)?;

        let mut out: Vec<(Fragment, RelationType)> = edges
            .into_iter()
            .filter_map(|(id, relation)| {
                fragments
                    .iter()
                    .find(|f| f.id == id)
                    .map(|f| (f.clone(), relation))
            })
            .collect();
        out.sort_by(|a, b| {
            a.1.priority()
                .cmp(&b.1.priority())
                .then(b.0.importance.partial_cmp(&a.0.importance).unwrap_or(std::cmp::Ordering::Equal))
        });
        out.truncate(limit);
        Ok(out)
    }

    /// One-hop root-cause walk: the start node plus its `caused_by` and
    /// `resolved_by` targets, annotated with relation and depth.
    pub fn rca_chain(&self, start_id: &str, scope: &AgentScope) -> Result<Vec<RcaNode>> {
        let start = self
            .get_by_id(start_id, scope)?
            .ok_or_else(|| MemoryError::NotFound(format!("fragment {}", start_id)))?;

        let mut chain = vec![RcaNode {
            fragment: start,
            relation: None,
            depth: 0,
        }];

        let linked = self.get_linked(
            &[start_id.to_string()],
            &[RelationType::CausedBy, RelationType::ResolvedBy],
            usize::MAX,
            scope,
        )?;
        for (fragment, relation) in linked {
            chain.push(RcaNode {
                fragment,
                relation: Some(relation),
                depth: 1,
            });
        }
        Ok(chain)
    }

    /// BFS over outgoing edges: would adding `from -> to` close a cycle?
    /// Bounded to `max_nodes` visited nodes.
    pub fn would_create_cycle(&self, from_id: &str, to_id: &str, max_nodes: usize) -> Result<bool> {
        if from_id == to_id {
            return Ok(true);
        }
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(to_id.to_string());

        while let Some(current) = queue.pop_front() {
            if current == from_id {
                return Ok(true);
            }
            if !visited.insert(current.clone()) || visited.len() > max_nodes {
                continue;
            }
            let targets: Vec<String> = {
                let reader = self.read()?;
                let mut stmt =
                    reader.prepare("SELECT to_id FROM fragment_links WHERE from_id = ?1")?;
                stmt.query_map(params![current], |row| row.get(0))?
                    .filter_map(|r| r.ok())
                    .collect()
            };
            for target in targets {
                if !visited.contains(&target) {
                    queue.push_back(target);
                }
            }
        }
        Ok(false)
    }

    fn superseded_source_ids(&self) -> Result<HashSet<String>> {
        let reader = self.read()?;
        let mut stmt = reader
            .prepare("SELECT from_id FROM fragment_links WHERE relation_type = 'superseded_by'")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    // ========================================================================
    // MAINTENANCE SWEEPS
    // ========================================================================

    /// Drop rows that decayed to irrelevance: importance under 0.1,
    /// non-permanent, not anchored, inactive beyond the window and with
    /// fewer than two links.
    pub fn delete_expired(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(EXPIRE_INACTIVE_DAYS);
        let expired: Vec<String> = {
            let reader = self.read()?;
            let mut stmt = reader.prepare(
                "SELECT id FROM fragments \
                 WHERE importance < 0.1 AND ttl_tier != 'permanent' AND is_anchor = 0 \
                 AND COALESCE(accessed_at, created_at) < ?1 \
                 AND json_array_length(linked_to) < 2",
            )?;
            stmt.query_map(params![cutoff], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };

        for id in &expired {
            self.delete_unchecked(id)?;
        }
        Ok(expired.len())
    }

    /// Multiply importance by the decay factor for eligible rows: not
    /// permanent, not a preference, not anchored, inactive for a day.
    pub fn decay_importance(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(1);
        let writer = self.write()?;
        let changed = writer.execute(
            "UPDATE fragments SET importance = importance * ?1 \
             WHERE ttl_tier != 'permanent' AND fragment_type != 'preference' \
             AND is_anchor = 0 AND COALESCE(accessed_at, created_at) < ?2",
            params![DECAY_FACTOR, cutoff],
        )?;
        Ok(changed)
    }

    /// Tier transitions: preferences, hubs (five or more links) and
    /// high-importance rows promote to permanent; stale low-importance warm
    /// rows demote to cold. Anchors never move. Returns distinct rows
    /// whose tier changed.
    pub fn transition_ttl(&self) -> Result<usize> {
        let writer = self.write()?;
        let mut changed = 0;

        changed += writer.execute(
            "UPDATE fragments SET ttl_tier = 'permanent' \
             WHERE ttl_tier != 'permanent' AND is_anchor = 0 AND fragment_type = 'preference'",
            [],
        )?;
        changed += writer.execute(
            "UPDATE fragments SET ttl_tier = 'permanent' \
             WHERE ttl_tier != 'permanent' AND is_anchor = 0 \
             AND json_array_length(linked_to) >= 5",
            [],
        )?;
        changed += writer.execute(
            "UPDATE fragments SET ttl_tier = 'permanent' \
             WHERE ttl_tier != 'permanent' AND is_anchor = 0 AND importance >= 0.8",
            [],
        )?;

        let cutoff = Utc::now() - Duration::days(30);
        changed += writer.execute(
            "UPDATE fragments SET ttl_tier = 'cold' \
             WHERE ttl_tier = 'warm' AND is_anchor = 0 \
             AND (importance < 0.3 OR COALESCE(accessed_at, created_at) < ?1)",
            params![cutoff],
        )?;

        Ok(changed)
    }

    /// Backfill embeddings for the top-n NULL-embedding rows by importance
    pub fn generate_missing_embeddings(&self, limit: usize) -> Result<usize> {
        if !self.embedder.is_ready() {
            return Ok(0);
        }
        let candidates: Vec<(String, String)> = {
            let reader = self.read()?;
            let mut stmt = reader.prepare(
                "SELECT id, content FROM fragments f \
                 WHERE NOT EXISTS (SELECT 1 FROM fragment_embeddings e WHERE e.fragment_id = f.id) \
                 ORDER BY importance DESC LIMIT ?1",
            )?;
            stmt.query_map(params![limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect()
        };

        let mut generated = 0;
        for (id, content) in candidates {
            if let Some(vector) = self.embedder.embed(&content) {
                self.store_embedding(&id, &vector)?;
                generated += 1;
            }
        }
        Ok(generated)
    }

    /// Rewrite utility scores with the log-access formula
    pub fn recompute_utility(&self) -> Result<usize> {
        let rows: Vec<(String, f64, i64)> = {
            let reader = self.read()?;
            let mut stmt =
                reader.prepare("SELECT id, importance, access_count FROM fragments")?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .filter_map(|r| r.ok())
                .collect()
        };

        let writer = self.write()?;
        let mut updated = 0;
        for (id, importance, access_count) in rows {
            let utility = importance * (1.0 + (access_count.max(1) as f64).ln());
            updated += writer.execute(
                "UPDATE fragments SET utility_score = ?1 WHERE id = ?2",
                params![utility, id],
            )?;
        }
        Ok(updated)
    }

    /// Promote heavily used, high-importance rows to anchors
    pub fn promote_anchors(&self) -> Result<usize> {
        let writer = self.write()?;
        let changed = writer.execute(
            "UPDATE fragments SET is_anchor = 1 \
             WHERE is_anchor = 0 AND access_count >= 10 AND importance >= 0.8",
            [],
        )?;
        Ok(changed)
    }

    // ========================================================================
    // DEDUP
    // ========================================================================

    /// Duplicate content-hash groups within each agent scope, members
    /// ordered earliest first
    pub fn duplicate_groups(&self) -> Result<Vec<Vec<Fragment>>> {
        let keys: Vec<(String, String)> = {
            let reader = self.read()?;
            let mut stmt = reader.prepare(
                "SELECT agent_id, content_hash FROM fragments \
                 GROUP BY agent_id, content_hash HAVING COUNT(*) > 1",
            )?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect()
        };

        let mut groups = Vec::with_capacity(keys.len());
        for (agent_id, hash) in keys {
            let reader = self.read()?;
            let sql = format!(
                "{} WHERE f.agent_id = ?1 AND f.content_hash = ?2 ORDER BY f.created_at ASC",
                FRAGMENT_SELECT
            );
            let mut stmt = reader.prepare(&sql)?;
            let members: Vec<Fragment> = stmt
                .query_map(params![agent_id, hash], Self::row_to_fragment)?
                .filter_map(|r| r.ok())
                .collect();
            if members.len() > 1 {
                groups.push(members);
            }
        }
        Ok(groups)
    }

    /// Merge each duplicate group into its earliest-created survivor:
    /// edges and `linked_to` references rewrite to the survivor, access
    /// counts accrue, losers are deleted. Returns rows removed.
    pub fn merge_duplicates(&self) -> Result<usize> {
        let groups = self.duplicate_groups()?;
        let mut merged = 0;

        for group in groups {
            let survivor = &group[0];
            let losers = &group[1..];
            let accrued: i64 = losers.iter().map(|l| l.access_count).sum();

            for loser in losers {
                {
                    let writer = self.write()?;
                    // Rewrite edges; drop any that would now self-reference
                    // or collide with an existing pair
                    writer.execute(
                        "UPDATE OR IGNORE fragment_links SET from_id = ?1 WHERE from_id = ?2",
                        params![survivor.id, loser.id],
                    )?;
                    writer.execute(
                        "UPDATE OR IGNORE fragment_links SET to_id = ?1 WHERE to_id = ?2",
                        params![survivor.id, loser.id],
                    )?;
                    writer.execute(
                        "DELETE FROM fragment_links WHERE from_id = ?1 OR to_id = ?1",
                        params![loser.id],
                    )?;
                    writer.execute(
                        "DELETE FROM fragment_links WHERE from_id = to_id",
                        [],
                    )?;
                }
                self.rewrite_linked_to_references(&loser.id, &survivor.id)?;
                self.delete_unchecked(&loser.id)?;
                merged += 1;
            }

            let writer = self.write()?;
            writer.execute(
                "UPDATE fragments SET access_count = access_count + ?1 WHERE id = ?2",
                params![accrued, survivor.id],
            )?;
        }
        Ok(merged)
    }

    fn rewrite_linked_to_references(&self, old_id: &str, new_id: &str) -> Result<()> {
        let referencing: Vec<(String, String)> = {
            let reader = self.read()?;
            let mut stmt = reader.prepare(
                "SELECT id, linked_to FROM fragments WHERE EXISTS \
                 (SELECT 1 FROM json_each(fragments.linked_to) WHERE json_each.value = ?1)",
            )?;
            stmt.query_map(params![old_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect()
        };

        let writer = self.write()?;
        for (rid, linked_json) in referencing {
            let mut linked: Vec<String> = serde_json::from_str(&linked_json).unwrap_or_default();
            linked.retain(|l| l != old_id);
            if rid != new_id && !linked.iter().any(|l| l == new_id) {
                linked.push(new_id.to_string());
            }
            writer.execute(
                "UPDATE fragments SET linked_to = ?1 WHERE id = ?2",
                params![serde_json::to_string(&linked).unwrap_or_else(|_| "[]".into()), rid],
            )?;
        }
        Ok(())
    }

    // ========================================================================
    // STALE AND CANDIDATE SCANS
    // ========================================================================

    /// Top fragments by days since verification, over their per-type
    /// staleness window
    pub fn stale_fragments(&self, limit: usize) -> Result<Vec<(Fragment, i64)>> {
        let reader = self.read()?;
        let sql = format!("{} ORDER BY f.verified_at ASC LIMIT ?1", FRAGMENT_SELECT);
        let mut stmt = reader.prepare(&sql)?;
        let candidates: Vec<Fragment> = stmt
            .query_map(params![(limit * 4) as i64], Self::row_to_fragment)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(reader);

        let now = Utc::now();
        let mut stale: Vec<(Fragment, i64)> = candidates
            .into_iter()
            .filter_map(|f| {
                let days = (now - f.verified_at).num_days();
                if days > f.fragment_type.stale_after_days() {
                    Some((f, days))
                } else {
                    None
                }
            })
            .collect();
        stale.sort_by(|a, b| b.1.cmp(&a.1));
        stale.truncate(limit);
        Ok(stale)
    }

    /// Fragments created since the watermark (contradiction candidates)
    pub fn created_since(&self, watermark: DateTime<Utc>) -> Result<Vec<Fragment>> {
        let reader = self.read()?;
        let sql = format!(
            "{} WHERE f.created_at > ?1 ORDER BY f.created_at ASC",
            FRAGMENT_SELECT
        );
        let mut stmt = reader.prepare(&sql)?;
        let fragments = stmt
            .query_map(params![watermark], Self::row_to_fragment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(fragments)
    }

    // ========================================================================
    // SMALL MUTATIONS
    // ========================================================================

    /// Set a fragment's importance directly (evaluator write-back,
    /// contradiction resolution)
    pub fn set_importance(&self, id: &str, importance: f64) -> Result<()> {
        let writer = self.write()?;
        writer.execute(
            "UPDATE fragments SET importance = ?1 WHERE id = ?2",
            params![importance.clamp(0.0, 1.0), id],
        )?;
        Ok(())
    }

    /// Append a keyword to a fragment's keyword array if absent
    pub fn append_keyword(&self, id: &str, keyword: &str) -> Result<()> {
        let current: Option<String> = {
            let reader = self.read()?;
            reader
                .query_row(
                    "SELECT keywords FROM fragments WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?
        };
        let Some(keywords_json) = current else {
            return Err(MemoryError::NotFound(format!("fragment {}", id)));
        };
        let mut keywords: Vec<String> = serde_json::from_str(&keywords_json).unwrap_or_default();
        if !keywords.iter().any(|k| k == keyword) {
            keywords.push(keyword.to_string());
            let writer = self.write()?;
            writer.execute(
                "UPDATE fragments SET keywords = ?1 WHERE id = ?2",
                params![serde_json::to_string(&keywords).unwrap_or_else(|_| "[]".into()), id],
            )?;
        }
        Ok(())
    }

    // ========================================================================
    // FEEDBACK
    // ========================================================================

    /// Record per-call tool feedback
    pub fn insert_tool_feedback(&self, feedback: &ToolFeedback) -> Result<()> {
        let writer = self.write()?;
        writer.execute(
            "INSERT INTO tool_feedback \
             (tool_name, relevant, sufficient, suggestion, context, session_id, trigger_type, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                feedback.tool_name,
                feedback.relevant as i64,
                feedback.sufficient as i64,
                feedback.suggestion,
                feedback.context,
                feedback.session_id,
                feedback.trigger_type.as_str(),
                feedback.created_at,
            ],
        )?;
        Ok(())
    }

    /// Record session-level task feedback
    pub fn insert_task_feedback(&self, feedback: &TaskFeedback) -> Result<()> {
        let writer = self.write()?;
        writer.execute(
            "INSERT INTO task_feedback \
             (session_id, overall_success, tool_highlights, tool_pain_points, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                feedback.session_id,
                feedback.overall_success as i64,
                serde_json::to_string(&feedback.tool_highlights).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&feedback.tool_pain_points).unwrap_or_else(|_| "[]".into()),
                feedback.created_at,
            ],
        )?;
        Ok(())
    }

    /// Feedback recorded since the watermark, for the report stage
    pub fn feedback_since(
        &self,
        watermark: DateTime<Utc>,
    ) -> Result<(Vec<ToolFeedback>, Vec<TaskFeedback>)> {
        let reader = self.read()?;

        let mut stmt = reader.prepare(
            "SELECT tool_name, relevant, sufficient, suggestion, context, session_id, \
             trigger_type, created_at FROM tool_feedback WHERE created_at > ?1",
        )?;
        let tool: Vec<ToolFeedback> = stmt
            .query_map(params![watermark], |row| {
                let trigger: String = row.get(6)?;
                Ok(ToolFeedback {
                    tool_name: row.get(0)?,
                    relevant: row.get::<_, i64>(1)? != 0,
                    sufficient: row.get::<_, i64>(2)? != 0,
                    suggestion: row.get(3)?,
                    context: row.get(4)?,
                    session_id: row.get(5)?,
                    trigger_type: crate::memory::FeedbackTrigger::parse_name(&trigger),
                    created_at: row.get(7)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = reader.prepare(
            "SELECT session_id, overall_success, tool_highlights, tool_pain_points, created_at \
             FROM task_feedback WHERE created_at > ?1",
        )?;
        let task: Vec<TaskFeedback> = stmt
            .query_map(params![watermark], |row| {
                let highlights: String = row.get(2)?;
                let pain_points: String = row.get(3)?;
                Ok(TaskFeedback {
                    session_id: row.get(0)?,
                    overall_success: row.get::<_, i64>(1)? != 0,
                    tool_highlights: serde_json::from_str(&highlights).unwrap_or_default(),
                    tool_pain_points: serde_json::from_str(&pain_points).unwrap_or_default(),
                    created_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok((tool, task))
    }

    // ========================================================================
    // MAINTENANCE STATE
    // ========================================================================

    /// Read a maintenance watermark
    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let reader = self.read()?;
        let value = reader
            .query_row(
                "SELECT value FROM maintenance_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write a maintenance watermark
    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let writer = self.write()?;
        writer.execute(
            "INSERT INTO maintenance_state (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // ========================================================================
    // STATS
    // ========================================================================

    /// Total fragment count (used for the ranking activation threshold)
    pub fn count(&self) -> Result<i64> {
        let reader = self.read()?;
        let count = reader.query_row("SELECT COUNT(*) FROM fragments", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Aggregate store statistics (queue depths are filled by the facade)
    pub fn stats(&self) -> Result<MemoryStats> {
        let reader = self.read()?;
        let mut stats = MemoryStats {
            total_fragments: reader.query_row("SELECT COUNT(*) FROM fragments", [], |r| r.get(0))?,
            anchors: reader.query_row(
                "SELECT COUNT(*) FROM fragments WHERE is_anchor = 1",
                [],
                |r| r.get(0),
            )?,
            with_embedding: reader.query_row("SELECT COUNT(*) FROM fragment_embeddings", [], |r| {
                r.get(0)
            })?,
            total_links: reader.query_row("SELECT COUNT(*) FROM fragment_links", [], |r| r.get(0))?,
            ..Default::default()
        };

        let mut stmt =
            reader.prepare("SELECT fragment_type, COUNT(*) FROM fragments GROUP BY fragment_type")?;
        for row in stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))? {
            if let Ok((t, n)) = row {
                stats.by_type.insert(t, n);
            }
        }

        let mut stmt =
            reader.prepare("SELECT ttl_tier, COUNT(*) FROM fragments GROUP BY ttl_tier")?;
        for row in stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))? {
            if let Ok((t, n)) = row {
                stats.by_tier.insert(t, n);
            }
        }

        Ok(stats)
    }

    // ========================================================================
    // TEST SUPPORT
    // ========================================================================

    /// Insert bypassing the dedup check. Only used by tests exercising the
    /// consolidation reconciler.
    #[doc(hidden)]
    pub fn insert_raw(&self, fragment: &Fragment) -> Result<()> {
        let writer = self.write()?;
        writer.execute(
            "INSERT INTO fragments (
                id, content, topic, keywords, fragment_type, importance,
                content_hash, source, linked_to, agent_id, access_count,
                accessed_at, created_at, ttl_tier, estimated_tokens,
                utility_score, verified_at, is_anchor
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                fragment.id,
                fragment.content,
                fragment.topic,
                serde_json::to_string(&fragment.keywords).unwrap_or_else(|_| "[]".into()),
                fragment.fragment_type.as_str(),
                fragment.importance,
                fragment.content_hash,
                fragment.source,
                serde_json::to_string(&fragment.linked_to).unwrap_or_else(|_| "[]".into()),
                fragment.agent_id,
                fragment.access_count,
                fragment.accessed_at,
                fragment.created_at,
                fragment.ttl_tier.as_str(),
                fragment.estimated_tokens,
                fragment.utility_score,
                fragment.verified_at,
                fragment.is_anchor as i64,
            ],
        )?;
        Ok(())
    }

    /// Overwrite lifecycle timestamps. Only used by tests building aged
    /// fixtures.
    #[doc(hidden)]
    pub fn set_timestamps(
        &self,
        id: &str,
        created_at: DateTime<Utc>,
        accessed_at: Option<DateTime<Utc>>,
        verified_at: DateTime<Utc>,
    ) -> Result<()> {
        let writer = self.write()?;
        writer.execute(
            "UPDATE fragments SET created_at = ?1, accessed_at = ?2, verified_at = ?3 WHERE id = ?4",
            params![created_at, accessed_at, verified_at, id],
        )?;
        Ok(())
    }
}

fn repeat_vars(count: usize, start: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", start + i))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::DisabledEmbedder;
    use crate::memory::{CreateFragment, FragmentFactory};
    use tempfile::TempDir;

    fn test_store() -> (FragmentStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FragmentStore::new(
            Some(dir.path().join("test.db")),
            Arc::new(DisabledEmbedder),
            8,
        )
        .unwrap();
        (store, dir)
    }

    fn fragment(content: &str, topic: &str, fragment_type: FragmentType) -> Fragment {
        FragmentFactory::create(CreateFragment {
            content: content.to_string(),
            topic: topic.to_string(),
            fragment_type,
            agent_id: "default".to_string(),
            ..Default::default()
        })
    }

    fn scope() -> AgentScope {
        AgentScope::agent("default")
    }

    #[test]
    fn test_insert_and_get() {
        let (store, _dir) = test_store();
        let f = fragment("Redis NOAUTH indicates missing REDIS_PASSWORD.", "redis", FragmentType::Error);
        let outcome = store.insert(&f).unwrap();
        assert!(outcome.created);

        let fetched = store.get_by_id(&f.id, &scope()).unwrap().unwrap();
        assert_eq!(fetched.content, f.content);
        assert_eq!(fetched.fragment_type, FragmentType::Error);
        assert_eq!(fetched.ttl_tier, TtlTier::Hot);
        assert!(!fetched.has_embedding);
    }

    #[test]
    fn test_insert_dedup_returns_existing_and_bumps_importance() {
        let (store, _dir) = test_store();
        let mut a = fragment("Node 20 is required.", "stack", FragmentType::Fact);
        a.importance = 0.4;
        let first = store.insert(&a).unwrap();

        let mut b = fragment("Node 20 is required.", "stack", FragmentType::Fact);
        b.importance = 0.7;
        let second = store.insert(&b).unwrap();

        assert!(!second.created);
        assert_eq!(second.id, first.id);
        assert_eq!(store.count().unwrap(), 1);

        let survivor = store.get_by_id(&first.id, &scope()).unwrap().unwrap();
        assert_eq!(survivor.importance, 0.7);
    }

    #[test]
    fn test_scope_hides_other_agents() {
        let (store, _dir) = test_store();
        let mut f = fragment("private knowledge", "t", FragmentType::Fact);
        f.agent_id = "agent-a".to_string();
        store.insert(&f).unwrap();

        assert!(store.get_by_id(&f.id, &AgentScope::agent("agent-b")).unwrap().is_none());
        assert!(store.get_by_id(&f.id, &AgentScope::agent("agent-a")).unwrap().is_some());
        assert!(store.get_by_id(&f.id, &AgentScope::maintenance()).unwrap().is_some());
    }

    #[test]
    fn test_shared_pool_visible_to_all() {
        let (store, _dir) = test_store();
        let f = fragment("shared knowledge", "t", FragmentType::Fact);
        store.insert(&f).unwrap();
        assert!(store.get_by_id(&f.id, &AgentScope::agent("anyone")).unwrap().is_some());
    }

    #[test]
    fn test_keyword_search_overlap() {
        let (store, _dir) = test_store();
        let f1 = fragment("Redis NOAUTH indicates missing REDIS_PASSWORD.", "redis", FragmentType::Error);
        let f2 = fragment("pgvector HNSW tuning notes", "pgvector", FragmentType::Fact);
        store.insert(&f1).unwrap();
        store.insert(&f2).unwrap();

        let hits = store
            .search_by_keywords(
                &["redis".to_string()],
                &KeywordFilter { limit: 10, ..Default::default() },
                &scope(),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, f1.id);
    }

    #[test]
    fn test_keyword_search_filters() {
        let (store, _dir) = test_store();
        let f1 = fragment("pool size decision one", "db", FragmentType::Decision);
        let f2 = fragment("pool size fact two", "db", FragmentType::Fact);
        store.insert(&f1).unwrap();
        store.insert(&f2).unwrap();

        let hits = store
            .search_by_keywords(
                &["pool".to_string()],
                &KeywordFilter {
                    fragment_type: Some(FragmentType::Decision),
                    limit: 10,
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fragment_type, FragmentType::Decision);

        let hits = store
            .search_by_keywords(
                &["pool".to_string()],
                &KeywordFilter {
                    min_importance: Some(0.75),
                    limit: 10,
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, f1.id); // decision default importance 0.8
    }

    #[test]
    fn test_superseded_sources_excluded_from_search() {
        let (store, _dir) = test_store();
        let old = fragment("Max pool size is 10 for the api.", "db", FragmentType::Decision);
        let new = fragment("Max pool size is 20 for the api.", "db", FragmentType::Decision);
        store.insert(&old).unwrap();
        store.insert(&new).unwrap();
        store
            .create_link(&old.id, &new.id, RelationType::SupersededBy, &scope())
            .unwrap();

        let hits = store
            .search_by_keywords(
                &["pool".to_string()],
                &KeywordFilter { limit: 10, ..Default::default() },
                &scope(),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, new.id);
    }

    #[test]
    fn test_increment_access() {
        let (store, _dir) = test_store();
        let f = fragment("counted", "t", FragmentType::Fact);
        store.insert(&f).unwrap();
        store.increment_access(&[f.id.clone()], &scope()).unwrap();
        store.increment_access(&[f.id.clone()], &scope()).unwrap();

        let fetched = store.get_by_id(&f.id, &scope()).unwrap().unwrap();
        assert_eq!(fetched.access_count, 2);
        assert!(fetched.accessed_at.is_some());
    }

    #[test]
    fn test_update_archives_version_first() {
        let (store, _dir) = test_store();
        let f = fragment("Node 20 is required.", "stack", FragmentType::Fact);
        store.insert(&f).unwrap();

        let outcome = store
            .update(
                &f.id,
                &FragmentPatch {
                    content: Some("Node 22 is required.".to_string()),
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();

        let updated = match outcome {
            UpdateOutcome::Updated(f) => *f,
            other => panic!("expected update, got {:?}", other),
        };
        assert_eq!(updated.content, "Node 22 is required.");
        assert_ne!(updated.content_hash, f.content_hash);

        let versions = store.versions_of(&f.id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].content, "Node 20 is required.");
    }

    #[test]
    fn test_update_collision_merges_without_mutation() {
        let (store, _dir) = test_store();
        let a = fragment("Node 20 is required.", "stack", FragmentType::Fact);
        let b = fragment("Use Node 22 instead.", "stack", FragmentType::Fact);
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();

        let outcome = store
            .update(
                &a.id,
                &FragmentPatch {
                    content: Some("Use Node 22 instead.".to_string()),
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();

        match outcome {
            UpdateOutcome::Merged { existing_id } => assert_eq!(existing_id, b.id),
            other => panic!("expected merge, got {:?}", other),
        }

        // Row A unchanged, no version row written
        let unchanged = store.get_by_id(&a.id, &scope()).unwrap().unwrap();
        assert_eq!(unchanged.content, "Node 20 is required.");
        assert!(store.versions_of(&a.id).unwrap().is_empty());
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let (store, _dir) = test_store();
        let result = store.update(
            "frag-0000000000000000",
            &FragmentPatch::default(),
            &scope(),
        );
        assert!(matches!(result, Err(MemoryError::NotFound(_))));
    }

    #[test]
    fn test_link_mirrors_both_sides() {
        let (store, _dir) = test_store();
        let a = fragment("error fragment here", "t", FragmentType::Error);
        let b = fragment("decision fragment here", "t", FragmentType::Decision);
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();

        store.create_link(&a.id, &b.id, RelationType::CausedBy, &scope()).unwrap();
        // Idempotent re-link
        store.create_link(&a.id, &b.id, RelationType::CausedBy, &scope()).unwrap();

        let a2 = store.get_by_id(&a.id, &scope()).unwrap().unwrap();
        let b2 = store.get_by_id(&b.id, &scope()).unwrap().unwrap();
        assert_eq!(a2.linked_to, vec![b.id.clone()]);
        assert_eq!(b2.linked_to, vec![a.id.clone()]);
    }

    #[test]
    fn test_delete_cascades_edges_and_mirrors() {
        let (store, _dir) = test_store();
        let a = fragment("first node text", "t", FragmentType::Fact);
        let b = fragment("second node text", "t", FragmentType::Fact);
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();
        store.create_link(&a.id, &b.id, RelationType::Related, &scope()).unwrap();

        assert!(store.delete(&b.id, &scope()).unwrap());

        let a2 = store.get_by_id(&a.id, &scope()).unwrap().unwrap();
        assert!(a2.linked_to.is_empty());
        assert!(store.links_of(&a.id).unwrap().is_empty());
        assert!(store.get_by_id(&b.id, &scope()).unwrap().is_none());
    }

    #[test]
    fn test_get_linked_ordering_and_cap() {
        let (store, _dir) = test_store();
        let root = fragment("root fragment text", "t", FragmentType::Error);
        let resolved = fragment("the fix that worked", "t", FragmentType::Procedure);
        let cause = fragment("the underlying cause", "t", FragmentType::Fact);
        let related = fragment("merely related note", "t", FragmentType::Fact);
        for f in [&root, &resolved, &cause, &related] {
            store.insert(f).unwrap();
        }
        store.create_link(&root.id, &related.id, RelationType::Related, &scope()).unwrap();
        store.create_link(&root.id, &cause.id, RelationType::CausedBy, &scope()).unwrap();
        store.create_link(&root.id, &resolved.id, RelationType::ResolvedBy, &scope()).unwrap();

        let linked = store
            .get_linked(
                &[root.id.clone()],
                &RelationType::DEFAULT_EXPANSION,
                10,
                &scope(),
            )
            .unwrap();
        assert_eq!(linked.len(), 3);
        assert_eq!(linked[0].1, RelationType::ResolvedBy);
        assert_eq!(linked[1].1, RelationType::CausedBy);

        let capped = store
            .get_linked(&[root.id.clone()], &RelationType::DEFAULT_EXPANSION, 1, &scope())
            .unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_rca_chain() {
        let (store, _dir) = test_store();
        let error = fragment("service crashed on boot", "ops", FragmentType::Error);
        let cause = fragment("missing env var", "ops", FragmentType::Fact);
        store.insert(&error).unwrap();
        store.insert(&cause).unwrap();
        store.create_link(&error.id, &cause.id, RelationType::CausedBy, &scope()).unwrap();

        let chain = store.rca_chain(&error.id, &scope()).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].depth, 0);
        assert!(chain[0].relation.is_none());
        assert_eq!(chain[1].depth, 1);
        assert_eq!(chain[1].relation, Some(RelationType::CausedBy));
    }

    #[test]
    fn test_cycle_detection() {
        let (store, _dir) = test_store();
        let a = fragment("node a text", "t", FragmentType::Fact);
        let b = fragment("node b text", "t", FragmentType::Fact);
        let c = fragment("node c text", "t", FragmentType::Fact);
        for f in [&a, &b, &c] {
            store.insert(f).unwrap();
        }
        store.create_link(&a.id, &b.id, RelationType::Related, &scope()).unwrap();
        store.create_link(&b.id, &c.id, RelationType::Related, &scope()).unwrap();

        // c -> a would close the loop a -> b -> c -> a
        assert!(store.would_create_cycle(&c.id, &a.id, 20).unwrap());
        // a -> c is fine (already reachable, but no cycle through c back to a...
        // adding a->c keeps the graph acyclic)
        assert!(!store.would_create_cycle(&a.id, &c.id, 20).unwrap());
        assert!(store.would_create_cycle(&a.id, &a.id, 20).unwrap());
    }

    #[test]
    fn test_decay_skips_protected_rows() {
        let (store, _dir) = test_store();
        let mut plain = fragment("plain old fact", "t", FragmentType::Fact);
        plain.importance = 0.5;
        let mut anchored = fragment("anchored fact here", "t", FragmentType::Fact);
        anchored.importance = 0.5;
        anchored.is_anchor = true;
        let pref = fragment("prefers tabs over spaces", "t", FragmentType::Preference);
        store.insert(&plain).unwrap();
        store.insert(&anchored).unwrap();
        store.insert(&pref).unwrap();

        // Age everything past the inactivity window
        let old = Utc::now() - Duration::days(3);
        for id in [&plain.id, &anchored.id, &pref.id] {
            store.set_timestamps(id, old, None, old).unwrap();
        }

        let decayed = store.decay_importance().unwrap();
        assert_eq!(decayed, 1);

        let plain2 = store.get_by_id(&plain.id, &scope()).unwrap().unwrap();
        assert!((plain2.importance - 0.5 * DECAY_FACTOR).abs() < 1e-9);
        let anchored2 = store.get_by_id(&anchored.id, &scope()).unwrap().unwrap();
        assert_eq!(anchored2.importance, 0.5);
    }

    #[test]
    fn test_delete_expired_predicate() {
        let (store, _dir) = test_store();
        let mut doomed = fragment("fading memory text", "t", FragmentType::Fact);
        doomed.importance = 0.05;
        doomed.ttl_tier = TtlTier::Cold;
        let mut fresh = fragment("fresh low importance", "t", FragmentType::Fact);
        fresh.importance = 0.05;
        fresh.ttl_tier = TtlTier::Cold;
        store.insert(&doomed).unwrap();
        store.insert(&fresh).unwrap();

        let ancient = Utc::now() - Duration::days(120);
        store.set_timestamps(&doomed.id, ancient, None, ancient).unwrap();

        let removed = store.delete_expired().unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_by_id(&doomed.id, &scope()).unwrap().is_none());
        assert!(store.get_by_id(&fresh.id, &scope()).unwrap().is_some());
    }

    #[test]
    fn test_transition_ttl_promotes_and_demotes() {
        let (store, _dir) = test_store();
        let mut warm_low = fragment("low importance warm row", "t", FragmentType::Fact);
        warm_low.importance = 0.2;
        warm_low.ttl_tier = TtlTier::Warm;
        let mut high = fragment("high importance cold row", "t", FragmentType::Fact);
        high.importance = 0.85;
        high.ttl_tier = TtlTier::Cold;
        store.insert(&warm_low).unwrap();
        store.insert(&high).unwrap();

        let changed = store.transition_ttl().unwrap();
        assert_eq!(changed, 2);

        let demoted = store.get_by_id(&warm_low.id, &scope()).unwrap().unwrap();
        assert_eq!(demoted.ttl_tier, TtlTier::Cold);
        let promoted = store.get_by_id(&high.id, &scope()).unwrap().unwrap();
        assert_eq!(promoted.ttl_tier, TtlTier::Permanent);
    }

    #[test]
    fn test_transition_ttl_skips_anchors() {
        let (store, _dir) = test_store();
        let mut anchored = fragment("anchored warm row", "t", FragmentType::Fact);
        anchored.importance = 0.9;
        anchored.ttl_tier = TtlTier::Warm;
        anchored.is_anchor = true;
        store.insert(&anchored).unwrap();

        store.transition_ttl().unwrap();
        let after = store.get_by_id(&anchored.id, &scope()).unwrap().unwrap();
        assert_eq!(after.ttl_tier, TtlTier::Warm);
    }

    #[test]
    fn test_promote_anchors() {
        let (store, _dir) = test_store();
        let mut hot = fragment("heavily used knowledge", "t", FragmentType::Decision);
        hot.importance = 0.85;
        hot.access_count = 12;
        store.insert(&hot).unwrap();

        let promoted = store.promote_anchors().unwrap();
        assert_eq!(promoted, 1);
        let after = store.get_by_id(&hot.id, &scope()).unwrap().unwrap();
        assert!(after.is_anchor);
    }

    #[test]
    fn test_recompute_utility() {
        let (store, _dir) = test_store();
        let mut f = fragment("utility test row", "t", FragmentType::Fact);
        f.importance = 0.5;
        f.access_count = 10;
        store.insert(&f).unwrap();

        store.recompute_utility().unwrap();
        let after = store.get_by_id(&f.id, &scope()).unwrap().unwrap();
        let expected = 0.5 * (1.0 + 10f64.ln());
        assert!((after.utility_score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_merge_duplicates_accrues_access() {
        let (store, _dir) = test_store();
        let survivor = fragment("duplicated content here", "t", FragmentType::Fact);
        store.insert(&survivor).unwrap();

        // Seed duplicates through the raw path, as if written concurrently
        let mut dup1 = fragment("duplicated content here", "t", FragmentType::Fact);
        dup1.id = Fragment::new_id();
        dup1.access_count = 3;
        dup1.created_at = survivor.created_at + Duration::seconds(5);
        let mut dup2 = fragment("duplicated content here", "t", FragmentType::Fact);
        dup2.id = Fragment::new_id();
        dup2.access_count = 2;
        dup2.created_at = survivor.created_at + Duration::seconds(10);
        store.insert_raw(&dup1).unwrap();
        store.insert_raw(&dup2).unwrap();

        let other = fragment("a linked neighbour", "t", FragmentType::Fact);
        store.insert(&other).unwrap();
        store.create_link(&dup1.id, &other.id, RelationType::Related, &scope()).unwrap();

        let merged = store.merge_duplicates().unwrap();
        assert_eq!(merged, 2);
        assert_eq!(store.count().unwrap(), 2);

        let kept = store.get_by_id(&survivor.id, &scope()).unwrap().unwrap();
        assert_eq!(kept.access_count, 5);
        // The loser's edge now points from the survivor
        let links = store.links_of(&survivor.id).unwrap();
        assert!(links.iter().any(|l| l.to_id == other.id));
        // And the neighbour's mirror follows
        let other2 = store.get_by_id(&other.id, &scope()).unwrap().unwrap();
        assert!(other2.linked_to.contains(&survivor.id));
    }

    #[test]
    fn test_stale_fragments() {
        let (store, _dir) = test_store();
        let f = fragment("old procedure steps", "t", FragmentType::Procedure);
        store.insert(&f).unwrap();
        let old = Utc::now() - Duration::days(45);
        store.set_timestamps(&f.id, old, None, old).unwrap();

        let stale = store.stale_fragments(20).unwrap();
        assert_eq!(stale.len(), 1);
        assert!(stale[0].1 >= 45);
    }

    #[test]
    fn test_maintenance_state_roundtrip() {
        let (store, _dir) = test_store();
        assert!(store.get_state("last_feedback_report").unwrap().is_none());
        store.set_state("last_feedback_report", "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(
            store.get_state("last_feedback_report").unwrap().unwrap(),
            "2026-01-01T00:00:00Z"
        );
        store.set_state("last_feedback_report", "2026-02-01T00:00:00Z").unwrap();
        assert_eq!(
            store.get_state("last_feedback_report").unwrap().unwrap(),
            "2026-02-01T00:00:00Z"
        );
    }

    #[test]
    fn test_feedback_roundtrip_and_watermark() {
        let (store, _dir) = test_store();
        let feedback = ToolFeedback {
            tool_name: "recall".to_string(),
            relevant: true,
            sufficient: false,
            suggestion: Some("return more context".to_string()),
            context: Some("debugging".to_string()),
            session_id: Some("sess-1".to_string()),
            trigger_type: crate::memory::FeedbackTrigger::Voluntary,
            created_at: Utc::now(),
        };
        store.insert_tool_feedback(&feedback).unwrap();

        let (tool, task) = store.feedback_since(Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(tool.len(), 1);
        assert!(task.is_empty());
        assert_eq!(tool[0].tool_name, "recall");

        let (tool, _) = store.feedback_since(Utc::now() + Duration::hours(1)).unwrap();
        assert!(tool.is_empty());
    }

    #[test]
    fn test_stats() {
        let (store, _dir) = test_store();
        store.insert(&fragment("one fact here", "t", FragmentType::Fact)).unwrap();
        store.insert(&fragment("one error there", "t", FragmentType::Error)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_fragments, 2);
        assert_eq!(stats.by_type.get("fact"), Some(&1));
        assert_eq!(stats.by_type.get("error"), Some(&1));
        assert_eq!(stats.by_tier.get("hot"), Some(&1));
    }

    #[test]
    fn test_append_keyword() {
        let (store, _dir) = test_store();
        let f = fragment("keyword target row", "t", FragmentType::Decision);
        store.insert(&f).unwrap();
        store.append_keyword(&f.id, "Rationale: scored well").unwrap();
        store.append_keyword(&f.id, "Rationale: scored well").unwrap();

        let after = store.get_by_id(&f.id, &scope()).unwrap().unwrap();
        let count = after
            .keywords
            .iter()
            .filter(|k| k.starts_with("Rationale:"))
            .count();
        assert_eq!(count, 1);
    }
}
