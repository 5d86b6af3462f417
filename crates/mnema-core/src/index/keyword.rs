//! Keyword Index - the in-memory retrieval tier
//!
//! Keyed sets (keyword/topic/type -> fragment ids), recency ordering, a
//! TTL'd hot cache of materialised fragments, per-session working-memory
//! queues and session sets, plus the FIFO queues the background workers
//! poll.
//!
//! Everything here is best-effort: when the layer is disabled all writes
//! are no-ops and all reads come back empty. Callers must never assume
//! success at this tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::memory::{Fragment, FragmentType};

/// Hot-cache entry lifetime
pub const HOT_CACHE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Session set lifetime
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cap on any single keyword set; the pruning pass trims beyond this
pub const MAX_SET_SIZE: usize = 1000;

/// Working-memory entries above this importance survive eviction
pub const WM_RETAIN_IMPORTANCE: f64 = 0.8;

// ============================================================================
// ENTRY TYPES
// ============================================================================

/// A session-scoped working-memory entry (never persisted)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingEntry {
    pub content: String,
    pub importance: f64,
    pub tokens: i64,
    pub created_at: DateTime<Utc>,
}

/// A queued quality-evaluation job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalJob {
    pub fragment_id: String,
    pub agent_id: String,
    pub fragment_type: FragmentType,
    pub content: String,
}

/// A contradiction pair deferred for later adjudication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingContradiction {
    pub older_id: String,
    pub newer_id: String,
    pub agent_id: String,
    pub similarity: f32,
    pub attempts: u32,
}

// ============================================================================
// INDEX
// ============================================================================

#[derive(Default)]
struct IndexInner {
    by_keyword: HashMap<String, HashSet<String>>,
    by_topic: HashMap<String, HashSet<String>>,
    by_type: HashMap<String, HashSet<String>>,
    /// (insertion epoch millis, fragment id), monotonically appended
    recent: Vec<(i64, String)>,
    hot: HashMap<String, (Fragment, Instant)>,
    working: HashMap<String, VecDeque<WorkingEntry>>,
    sessions: HashMap<String, (HashSet<String>, Instant)>,
    eval_queue: VecDeque<EvalJob>,
    pending_contradictions: VecDeque<PendingContradiction>,
}

/// The shared in-memory index. All mutation goes through a single
/// `RwLock`; every operation tolerates the layer being disabled.
pub struct MemoryIndex {
    inner: RwLock<IndexInner>,
    enabled: AtomicBool,
    wm_max_tokens: i64,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new(500)
    }
}

impl MemoryIndex {
    /// Create an index with the given working-memory token ceiling
    pub fn new(wm_max_tokens: i64) -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
            enabled: AtomicBool::new(true),
            wm_max_tokens,
        }
    }

    /// Disable the layer (used to exercise outage semantics)
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn on(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    // ========================================================================
    // INDEXING
    // ========================================================================

    /// Index a fragment into the keyword/topic/type sets, the recency list
    /// and the hot cache; optionally records it against a session set.
    pub fn index(&self, fragment: &Fragment, session_id: Option<&str>) {
        if !self.on() {
            return;
        }
        let Ok(mut inner) = self.inner.write() else { return };

        for kw in &fragment.keywords {
            inner
                .by_keyword
                .entry(kw.clone())
                .or_default()
                .insert(fragment.id.clone());
        }
        inner
            .by_topic
            .entry(fragment.topic.clone())
            .or_default()
            .insert(fragment.id.clone());
        inner
            .by_type
            .entry(fragment.fragment_type.as_str().to_string())
            .or_default()
            .insert(fragment.id.clone());

        let epoch = Utc::now().timestamp_millis();
        inner.recent.push((epoch, fragment.id.clone()));
        inner
            .hot
            .insert(fragment.id.clone(), (fragment.clone(), Instant::now() + HOT_CACHE_TTL));

        if let Some(session) = session_id {
            let entry = inner
                .sessions
                .entry(session.to_string())
                .or_insert_with(|| (HashSet::new(), Instant::now() + SESSION_TTL));
            entry.0.insert(fragment.id.clone());
            entry.1 = Instant::now() + SESSION_TTL;
        }
    }

    /// Remove a fragment from every keyspace
    pub fn deindex(&self, id: &str, keywords: &[String], topic: &str, fragment_type: FragmentType) {
        if !self.on() {
            return;
        }
        let Ok(mut inner) = self.inner.write() else { return };

        for kw in keywords {
            if let Some(set) = inner.by_keyword.get_mut(kw) {
                set.remove(id);
                if set.is_empty() {
                    inner.by_keyword.remove(kw);
                }
            }
        }
        if let Some(set) = inner.by_topic.get_mut(topic) {
            set.remove(id);
        }
        if let Some(set) = inner.by_type.get_mut(fragment_type.as_str()) {
            set.remove(id);
        }
        inner.recent.retain(|(_, rid)| rid != id);
        inner.hot.remove(id);
    }

    // ========================================================================
    // LOOKUPS
    // ========================================================================

    /// Candidate ids for a keyword query. Set intersection first; when the
    /// intersection is smaller than `min_results` and two or more keywords
    /// were given, falls back to the union.
    pub fn search_by_keywords(&self, keywords: &[String], min_results: usize) -> Vec<String> {
        if !self.on() || keywords.is_empty() {
            return Vec::new();
        }
        let Ok(inner) = self.inner.read() else { return Vec::new() };

        let sets: Vec<&HashSet<String>> = keywords
            .iter()
            .filter_map(|kw| inner.by_keyword.get(kw.to_lowercase().as_str()))
            .collect();
        if sets.is_empty() {
            return Vec::new();
        }

        let mut intersection: HashSet<String> = sets[0].clone();
        for set in &sets[1..] {
            intersection.retain(|id| set.contains(id));
        }

        if intersection.len() >= min_results || keywords.len() < 2 {
            return intersection.into_iter().collect();
        }

        let mut union: HashSet<String> = HashSet::new();
        for set in sets {
            union.extend(set.iter().cloned());
        }
        union.into_iter().collect()
    }

    /// All ids filed under a topic
    pub fn by_topic(&self, topic: &str) -> Vec<String> {
        if !self.on() {
            return Vec::new();
        }
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.by_topic.get(topic).map(|s| s.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// All ids filed under a type
    pub fn by_type(&self, fragment_type: FragmentType) -> Vec<String> {
        if !self.on() {
            return Vec::new();
        }
        self.inner
            .read()
            .ok()
            .and_then(|inner| {
                inner
                    .by_type
                    .get(fragment_type.as_str())
                    .map(|s| s.iter().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Most recently indexed ids, newest first
    pub fn recent_ids(&self, limit: usize) -> Vec<String> {
        if !self.on() {
            return Vec::new();
        }
        self.inner
            .read()
            .map(|inner| {
                inner
                    .recent
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|(_, id)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fetch a fragment body from the hot cache if present and fresh
    pub fn hot_get(&self, id: &str) -> Option<Fragment> {
        if !self.on() {
            return None;
        }
        let inner = self.inner.read().ok()?;
        let (fragment, expires) = inner.hot.get(id)?;
        if *expires > Instant::now() {
            Some(fragment.clone())
        } else {
            None
        }
    }

    /// Re-materialise fragments into the hot cache after a recall
    pub fn hot_put(&self, fragments: &[Fragment]) {
        if !self.on() {
            return;
        }
        let Ok(mut inner) = self.inner.write() else { return };
        let expires = Instant::now() + HOT_CACHE_TTL;
        for f in fragments {
            inner.hot.insert(f.id.clone(), (f.clone(), expires));
        }
    }

    /// Ids recorded against a session
    pub fn session_ids(&self, session_id: &str) -> Vec<String> {
        if !self.on() {
            return Vec::new();
        }
        let Ok(inner) = self.inner.read() else { return Vec::new() };
        match inner.sessions.get(session_id) {
            Some((ids, expires)) if *expires > Instant::now() => ids.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    // ========================================================================
    // WORKING MEMORY
    // ========================================================================

    /// Append a working-memory entry, evicting the oldest low-importance
    /// entries once the token ceiling is exceeded. Entries above the
    /// retention threshold outlive the eviction window.
    pub fn wm_push(&self, session_id: &str, entry: WorkingEntry) {
        if !self.on() {
            return;
        }
        let Ok(mut inner) = self.inner.write() else { return };
        let queue = inner.working.entry(session_id.to_string()).or_default();
        queue.push_back(entry);

        let mut total: i64 = queue.iter().map(|e| e.tokens).sum();
        while total > self.wm_max_tokens {
            let evict_pos = queue
                .iter()
                .position(|e| e.importance <= WM_RETAIN_IMPORTANCE);
            match evict_pos {
                Some(pos) => {
                    if let Some(evicted) = queue.remove(pos) {
                        total -= evicted.tokens;
                    }
                }
                None => break,
            }
        }
    }

    /// Working-memory entries for a session, oldest first
    pub fn wm_entries(&self, session_id: &str) -> Vec<WorkingEntry> {
        if !self.on() {
            return Vec::new();
        }
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.working.get(session_id).map(|q| q.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Rotate out a session's working memory (called by reflect)
    pub fn wm_clear(&self, session_id: &str) {
        if !self.on() {
            return;
        }
        if let Ok(mut inner) = self.inner.write() {
            inner.working.remove(session_id);
        }
    }

    // ========================================================================
    // WORKER QUEUES
    // ========================================================================

    /// Enqueue a fragment for background quality evaluation
    pub fn enqueue_evaluation(&self, job: EvalJob) {
        if !self.on() {
            return;
        }
        if let Ok(mut inner) = self.inner.write() {
            inner.eval_queue.push_back(job);
        }
    }

    /// Dequeue the next evaluation job, FIFO
    pub fn pop_evaluation(&self) -> Option<EvalJob> {
        if !self.on() {
            return None;
        }
        self.inner.write().ok()?.eval_queue.pop_front()
    }

    /// Depth of the evaluation queue
    pub fn evaluation_len(&self) -> usize {
        self.inner.read().map(|i| i.eval_queue.len()).unwrap_or(0)
    }

    /// Defer a contradiction pair for the next consolidation
    pub fn enqueue_pending_contradiction(&self, pending: PendingContradiction) {
        if !self.on() {
            return;
        }
        if let Ok(mut inner) = self.inner.write() {
            inner.pending_contradictions.push_back(pending);
        }
    }

    /// Dequeue the next pending contradiction, FIFO
    pub fn pop_pending_contradiction(&self) -> Option<PendingContradiction> {
        if !self.on() {
            return None;
        }
        self.inner.write().ok()?.pending_contradictions.pop_front()
    }

    /// Depth of the pending-contradiction queue
    pub fn pending_contradiction_len(&self) -> usize {
        self.inner
            .read()
            .map(|i| i.pending_contradictions.len())
            .unwrap_or(0)
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Trim keyword sets beyond [`MAX_SET_SIZE`], sampling members to drop.
    /// Also sweeps expired hot-cache and session entries. Returns the
    /// number of set members removed.
    pub fn prune_oversized(&self, max_set_size: usize) -> usize {
        if !self.on() {
            return 0;
        }
        let Ok(mut inner) = self.inner.write() else { return 0 };
        let mut removed = 0;

        for set in inner.by_keyword.values_mut() {
            if set.len() > max_set_size {
                let excess = set.len() - max_set_size;
                // Hash-order iteration gives an effectively random sample
                let victims: Vec<String> = set.iter().take(excess).cloned().collect();
                for v in victims {
                    set.remove(&v);
                    removed += 1;
                }
            }
        }

        let now = Instant::now();
        inner.hot.retain(|_, (_, expires)| *expires > now);
        inner.sessions.retain(|_, (_, expires)| *expires > now);

        removed
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{CreateFragment, FragmentFactory};

    fn fragment(content: &str, topic: &str, fragment_type: FragmentType) -> Fragment {
        FragmentFactory::create(CreateFragment {
            content: content.to_string(),
            topic: topic.to_string(),
            fragment_type,
            agent_id: "default".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_index_and_keyword_intersection() {
        let index = MemoryIndex::default();
        let f1 = fragment("Redis NOAUTH indicates missing REDIS_PASSWORD", "redis", FragmentType::Error);
        let f2 = fragment("Redis sentinel handles failover", "redis", FragmentType::Fact);
        index.index(&f1, None);
        index.index(&f2, None);

        let hits = index.search_by_keywords(
            &["redis".to_string(), "noauth".to_string()],
            1,
        );
        assert_eq!(hits, vec![f1.id.clone()]);
    }

    #[test]
    fn test_union_fallback_when_intersection_thin() {
        let index = MemoryIndex::default();
        let f1 = fragment("alpha only text", "t", FragmentType::Fact);
        let f2 = fragment("beta only text", "t", FragmentType::Fact);
        index.index(&f1, None);
        index.index(&f2, None);

        // Intersection of alpha+beta is empty; union kicks in at min_results 2
        let hits = index.search_by_keywords(&["alpha".to_string(), "beta".to_string()], 2);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_single_keyword_never_unions() {
        let index = MemoryIndex::default();
        let f1 = fragment("gamma text here", "t", FragmentType::Fact);
        index.index(&f1, None);
        let hits = index.search_by_keywords(&["missing".to_string()], 5);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_topic_and_type_lookup() {
        let index = MemoryIndex::default();
        let f = fragment("pgvector HNSW settings", "pgvector", FragmentType::Fact);
        index.index(&f, None);
        assert_eq!(index.by_topic("pgvector"), vec![f.id.clone()]);
        assert_eq!(index.by_type(FragmentType::Fact), vec![f.id.clone()]);
        assert!(index.by_type(FragmentType::Error).is_empty());
    }

    #[test]
    fn test_deindex_removes_everywhere() {
        let index = MemoryIndex::default();
        let f = fragment("delete me please", "gone", FragmentType::Fact);
        index.index(&f, None);
        index.deindex(&f.id, &f.keywords, &f.topic, f.fragment_type);

        assert!(index.by_topic("gone").is_empty());
        assert!(index.hot_get(&f.id).is_none());
        assert!(index.recent_ids(10).is_empty());
    }

    #[test]
    fn test_recent_ordering_newest_first() {
        let index = MemoryIndex::default();
        let f1 = fragment("first thing", "t", FragmentType::Fact);
        let f2 = fragment("second thing", "t", FragmentType::Fact);
        index.index(&f1, None);
        index.index(&f2, None);
        let recent = index.recent_ids(10);
        assert_eq!(recent[0], f2.id);
        assert_eq!(recent[1], f1.id);
    }

    #[test]
    fn test_hot_cache_roundtrip() {
        let index = MemoryIndex::default();
        let f = fragment("cached body", "t", FragmentType::Fact);
        index.index(&f, None);
        let cached = index.hot_get(&f.id).unwrap();
        assert_eq!(cached.content, f.content);
    }

    #[test]
    fn test_session_set_recording() {
        let index = MemoryIndex::default();
        let f = fragment("session scoped", "t", FragmentType::Fact);
        index.index(&f, Some("sess-1"));
        assert_eq!(index.session_ids("sess-1"), vec![f.id.clone()]);
        assert!(index.session_ids("sess-2").is_empty());
    }

    #[test]
    fn test_wm_eviction_respects_importance() {
        let index = MemoryIndex::new(100);
        // Important entry first, then flood with low-importance entries
        index.wm_push(
            "s",
            WorkingEntry {
                content: "keep".into(),
                importance: 0.95,
                tokens: 40,
                created_at: Utc::now(),
            },
        );
        for i in 0..5 {
            index.wm_push(
                "s",
                WorkingEntry {
                    content: format!("filler {}", i),
                    importance: 0.3,
                    tokens: 40,
                    created_at: Utc::now(),
                },
            );
        }

        let entries = index.wm_entries("s");
        let total: i64 = entries.iter().map(|e| e.tokens).sum();
        assert!(total <= 100);
        // The high-importance entry survived even though it is the oldest
        assert!(entries.iter().any(|e| e.content == "keep"));
    }

    #[test]
    fn test_wm_clear() {
        let index = MemoryIndex::default();
        index.wm_push(
            "s",
            WorkingEntry {
                content: "x".into(),
                importance: 0.5,
                tokens: 1,
                created_at: Utc::now(),
            },
        );
        index.wm_clear("s");
        assert!(index.wm_entries("s").is_empty());
    }

    #[test]
    fn test_queues_fifo() {
        let index = MemoryIndex::default();
        for i in 0..3 {
            index.enqueue_evaluation(EvalJob {
                fragment_id: format!("frag-{:016x}", i),
                agent_id: "default".into(),
                fragment_type: FragmentType::Decision,
                content: "c".into(),
            });
        }
        assert_eq!(index.evaluation_len(), 3);
        assert_eq!(index.pop_evaluation().unwrap().fragment_id, "frag-0000000000000000");
        assert_eq!(index.evaluation_len(), 2);
    }

    #[test]
    fn test_prune_oversized_sets() {
        let index = MemoryIndex::default();
        for i in 0..20 {
            let f = fragment(&format!("shared keyword filler {}", i), "t", FragmentType::Fact);
            index.index(&f, None);
        }
        let removed = index.prune_oversized(10);
        assert!(removed > 0);
        let hits = index.search_by_keywords(&["filler".to_string()], 1);
        assert!(hits.len() <= 10);
    }

    #[test]
    fn test_disabled_layer_is_noop() {
        let index = MemoryIndex::default();
        index.set_enabled(false);
        let f = fragment("invisible", "t", FragmentType::Fact);
        index.index(&f, None);
        assert!(index.search_by_keywords(&["invisible".to_string()], 1).is_empty());
        assert!(index.hot_get(&f.id).is_none());
        assert!(index.pop_evaluation().is_none());

        index.set_enabled(true);
        assert!(index.recent_ids(10).is_empty());
    }
}
