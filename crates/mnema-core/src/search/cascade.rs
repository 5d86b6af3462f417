//! Three-tier retrieval cascade
//!
//! L1 (in-memory keyword index) -> L2 (durable array overlap) -> L3
//! (semantic cosine), expressed as stage functions over a shared
//! candidate accumulator. Each stage decides whether the next one runs.
//! Merged candidates are ranked with the composite score, trimmed to the
//! caller's token budget, expanded one hop along the link graph,
//! re-ranked on the same scale, stale-annotated and threshold-filtered.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::index::MemoryIndex;
use crate::memory::{
    AgentScope, Fragment, FragmentType, RecallResult, RelationType, ScoredFragment, StaleInfo,
};
use crate::storage::{FragmentStore, KeywordFilter};

use super::query::prepare_query_text;

/// Fewer hits than this at any tier lets the next tier run
const TIER_MIN_RESULTS: usize = 3;

/// Recent-ordering fallback size when no filter is given
const RECENT_FALLBACK: usize = 20;

// ============================================================================
// QUERY
// ============================================================================

/// A recall request
#[derive(Debug, Clone, Default)]
pub struct RecallQuery {
    pub keywords: Vec<String>,
    pub topic: Option<String>,
    pub fragment_type: Option<FragmentType>,
    /// Free text for the semantic tier
    pub text: Option<String>,
    pub min_importance: Option<f64>,
    /// Token ceiling for the returned set; falls back to the configured
    /// default when `None`
    pub token_budget: Option<i64>,
    /// One-hop link expansion toggle (defaults on)
    pub include_links: Option<bool>,
    /// Relation whitelist for expansion; defaults to
    /// caused_by/resolved_by/related
    pub link_relation_types: Option<Vec<RelationType>>,
    /// Similarity floor applied to semantically-scored results
    pub threshold: Option<f32>,
}

impl RecallQuery {
    fn has_l1_filter(&self) -> bool {
        !self.keywords.is_empty() || self.topic.is_some() || self.fragment_type.is_some()
    }
}

// ============================================================================
// CANDIDATE ACCUMULATOR
// ============================================================================

/// Shared accumulator the cascade stages write into
struct Candidates {
    map: HashMap<String, ScoredFragment>,
    path: Vec<String>,
}

impl Candidates {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            path: Vec::new(),
        }
    }

    /// Deduplicate by id, keeping the variant with the higher similarity
    fn add(&mut self, fragment: Fragment, similarity: Option<f32>) {
        match self.map.get_mut(&fragment.id) {
            Some(existing) => {
                if similarity.unwrap_or(f32::MIN) > existing.similarity.unwrap_or(f32::MIN) {
                    existing.similarity = similarity;
                }
            }
            None => {
                self.map.insert(
                    fragment.id.clone(),
                    ScoredFragment {
                        fragment,
                        similarity,
                        score: 0.0,
                        stale: None,
                    },
                );
            }
        }
    }

    fn trace(&mut self, tier: &str, count: usize) {
        self.path.push(format!("{}:{}", tier, count));
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

// ============================================================================
// SEARCH
// ============================================================================

/// The cascade orchestrator
pub struct FragmentSearch {
    store: Arc<FragmentStore>,
    index: Arc<MemoryIndex>,
    config: MemoryConfig,
}

impl FragmentSearch {
    pub fn new(store: Arc<FragmentStore>, index: Arc<MemoryIndex>, config: MemoryConfig) -> Self {
        Self { store, index, config }
    }

    /// Run the full cascade for a query under the caller's scope
    pub fn search(&self, query: &RecallQuery, scope: &AgentScope) -> Result<RecallResult> {
        let mut candidates = Candidates::new();

        let pending_ids = self.stage_l1(query, &mut candidates)?;
        let run_l2 = candidates.len() + pending_ids.len() < TIER_MIN_RESULTS
            || query.min_importance.is_some()
            || !pending_ids.is_empty();
        if run_l2 {
            self.stage_l2(query, &pending_ids, &mut candidates, scope)?;
        }
        if candidates.len() < TIER_MIN_RESULTS {
            self.stage_l3(query, &mut candidates, scope)?;
        }

        let composite = self.store.count()? >= self.config.activation_threshold;
        let budget = query.token_budget.unwrap_or(self.config.default_token_budget);

        let Candidates { map, mut path } = candidates;
        let mut results: Vec<ScoredFragment> = map.into_values().collect();
        // The in-memory tier cannot express the importance predicate, so
        // it is enforced here over the merged set
        if let Some(min_importance) = query.min_importance {
            results.retain(|r| r.fragment.importance >= min_importance);
        }
        self.rank(&mut results, composite);
        let mut results = trim_to_budget(results, budget);

        // One-hop expansion, then re-rank so primary and linked fragments
        // compete on the same score scale
        if query.include_links.unwrap_or(true) && !results.is_empty() {
            let linked = self.fetch_links(&results, query, scope)?;
            if !linked.is_empty() {
                path.push(format!("Links:{}", linked.len()));
                let seen: HashSet<String> =
                    results.iter().map(|r| r.fragment.id.clone()).collect();
                for fragment in linked {
                    if !seen.contains(&fragment.id) {
                        results.push(ScoredFragment::plain(fragment));
                    }
                }
                self.rank(&mut results, composite);
                results = trim_to_budget(results, budget);
            }
        }

        annotate_stale(&mut results, &self.config);

        if let Some(threshold) = query.threshold {
            results.retain(|r| r.similarity.map(|s| s >= threshold).unwrap_or(true));
        }

        let total_tokens: i64 = results.iter().map(|r| r.fragment.estimated_tokens).sum();
        let count = results.len();
        Ok(RecallResult {
            fragments: results,
            total_tokens,
            search_path: path.join(" -> "),
            count,
        })
    }

    /// L1: intersect the in-memory sets the query names; with no filter at
    /// all, fall back to the recent ordering. Returns the ids that still
    /// need materialising from the durable store.
    fn stage_l1(&self, query: &RecallQuery, candidates: &mut Candidates) -> Result<Vec<String>> {
        let ids: Vec<String> = if query.has_l1_filter() {
            let mut sets: Vec<Vec<String>> = Vec::new();
            if !query.keywords.is_empty() {
                sets.push(self.index.search_by_keywords(&query.keywords, TIER_MIN_RESULTS));
            }
            if let Some(ref topic) = query.topic {
                sets.push(self.index.by_topic(topic));
            }
            if let Some(fragment_type) = query.fragment_type {
                sets.push(self.index.by_type(fragment_type));
            }
            intersect(sets)
        } else if query.text.is_none() {
            self.index.recent_ids(RECENT_FALLBACK)
        } else {
            Vec::new()
        };

        candidates.trace("L1", ids.len());

        let mut pending = Vec::new();
        let mut hot_hits = 0;
        for id in ids {
            match self.index.hot_get(&id) {
                Some(fragment) => {
                    candidates.add(fragment, None);
                    hot_hits += 1;
                }
                None => pending.push(id),
            }
        }
        if hot_hits > 0 {
            candidates.trace("HotCache", hot_hits);
        }
        Ok(pending)
    }

    /// L2: durable array-overlap search plus materialisation of L1 ids the
    /// hot cache missed
    fn stage_l2(
        &self,
        query: &RecallQuery,
        pending_ids: &[String],
        candidates: &mut Candidates,
        scope: &AgentScope,
    ) -> Result<()> {
        let mut fetched = 0;

        for fragment in self.store.get_by_ids(pending_ids, scope)? {
            candidates.add(fragment, None);
            fetched += 1;
        }

        if query.has_l1_filter() || query.min_importance.is_some() {
            let filter = KeywordFilter {
                fragment_type: query.fragment_type,
                topic: query.topic.clone(),
                min_importance: query.min_importance,
                limit: self.config.l2_limit,
            };
            for fragment in self.store.search_by_keywords(&query.keywords, &filter, scope)? {
                candidates.add(fragment, None);
                fetched += 1;
            }
        }

        candidates.trace("L2", fetched);
        Ok(())
    }

    /// L3: semantic cosine search over the prepared query text
    fn stage_l3(
        &self,
        query: &RecallQuery,
        candidates: &mut Candidates,
        scope: &AgentScope,
    ) -> Result<()> {
        let Some(ref text) = query.text else {
            return Ok(());
        };
        let prepared = prepare_query_text(text);
        if prepared.is_empty() {
            return Ok(());
        }

        let hits = self.store.search_semantic(
            &prepared,
            self.config.l3_limit,
            self.config.min_similarity,
            scope,
        )?;
        candidates.trace("L3", hits.len());
        for (fragment, similarity) in hits {
            candidates.add(fragment, Some(similarity));
        }
        Ok(())
    }

    /// Fetch one-hop linked fragments for the current results
    fn fetch_links(
        &self,
        results: &[ScoredFragment],
        query: &RecallQuery,
        scope: &AgentScope,
    ) -> Result<Vec<Fragment>> {
        let relations = query
            .link_relation_types
            .clone()
            .unwrap_or_else(|| RelationType::DEFAULT_EXPANSION.to_vec());
        let from_ids: Vec<String> = results.iter().map(|r| r.fragment.id.clone()).collect();
        let linked = self.store.get_linked(
            &from_ids,
            &relations,
            self.config.linked_fragment_limit,
            scope,
        )?;
        Ok(linked.into_iter().map(|(fragment, _)| fragment).collect())
    }

    fn rank(&self, results: &mut [ScoredFragment], composite: bool) {
        let now = Utc::now();
        for result in results.iter_mut() {
            result.score = if composite {
                self.config.importance_weight * result.fragment.importance
                    + self.config.recency_weight * result.fragment.recency(now)
            } else {
                result.fragment.importance
            };
        }
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    }
}

fn intersect(sets: Vec<Vec<String>>) -> Vec<String> {
    let mut iter = sets.into_iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    let mut result = first;
    for set in iter {
        let keep: HashSet<&String> = set.iter().collect();
        result.retain(|id| keep.contains(id));
    }
    result
}

fn trim_to_budget(results: Vec<ScoredFragment>, budget: i64) -> Vec<ScoredFragment> {
    let mut out = Vec::with_capacity(results.len());
    let mut total = 0i64;
    for result in results {
        if total + result.fragment.estimated_tokens > budget {
            break;
        }
        total += result.fragment.estimated_tokens;
        out.push(result);
    }
    out
}

fn annotate_stale(results: &mut [ScoredFragment], config: &MemoryConfig) {
    let now = Utc::now();
    for result in results.iter_mut() {
        let days = (now - result.fragment.verified_at).num_days();
        let window = config.stale_days(result.fragment.fragment_type);
        if days > window {
            result.stale = Some(StaleInfo {
                stale: true,
                warning: format!(
                    "last verified {} days ago (window for {} is {} days)",
                    days,
                    result.fragment.fragment_type.as_str(),
                    window
                ),
                days_since_verification: days,
            });
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{DisabledEmbedder, Embedder};
    use crate::memory::{CreateFragment, FragmentFactory};
    use tempfile::TempDir;

    /// Deterministic embedder: texts mentioning redis cluster near one
    /// axis, everything else near another
    struct MockEmbedder;

    impl Embedder for MockEmbedder {
        fn embed(&self, text: &str) -> Option<Vec<f32>> {
            let mut v = vec![0.0f32; 8];
            if text.to_lowercase().contains("redis") {
                v[0] = 1.0;
            } else {
                v[1] = 1.0;
            }
            Some(v)
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn is_ready(&self) -> bool {
            true
        }
    }

    fn setup(embedder: Arc<dyn Embedder>) -> (FragmentSearch, Arc<FragmentStore>, Arc<MemoryIndex>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            FragmentStore::new(Some(dir.path().join("test.db")), embedder, 8).unwrap(),
        );
        let index = Arc::new(MemoryIndex::default());
        let search = FragmentSearch::new(store.clone(), index.clone(), MemoryConfig::default());
        (search, store, index, dir)
    }

    fn seed(
        store: &FragmentStore,
        index: &MemoryIndex,
        content: &str,
        topic: &str,
        fragment_type: FragmentType,
    ) -> Fragment {
        let fragment = FragmentFactory::create(CreateFragment {
            content: content.to_string(),
            topic: topic.to_string(),
            fragment_type,
            agent_id: "default".to_string(),
            ..Default::default()
        });
        store.insert(&fragment).unwrap();
        index.index(&fragment, None);
        fragment
    }

    fn scope() -> AgentScope {
        AgentScope::agent("default")
    }

    #[test]
    fn test_l1_keyword_hit_with_hot_cache() {
        let (search, store, index, _dir) = setup(Arc::new(DisabledEmbedder));
        let redis = seed(&store, &index, "Redis NOAUTH indicates missing REDIS_PASSWORD.", "redis", FragmentType::Error);
        seed(&store, &index, "pgvector HNSW uses m 16 and ef_construction 64.", "pgvector", FragmentType::Fact);

        let result = search
            .search(
                &RecallQuery {
                    keywords: vec!["redis".into(), "noauth".into()],
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();

        assert_eq!(result.count, 1);
        assert_eq!(result.fragments[0].fragment.id, redis.id);
        assert!(result.search_path.starts_with("L1:"), "path was {}", result.search_path);
        assert!(result.search_path.contains("HotCache:1"));
    }

    #[test]
    fn test_l2_runs_when_l1_misses() {
        let (search, store, index, _dir) = setup(Arc::new(DisabledEmbedder));
        let f = seed(&store, &index, "Sentinel quorum must be odd.", "redis", FragmentType::Fact);
        // Simulate a cold in-memory layer: the durable tier must answer
        index.set_enabled(false);

        let result = search
            .search(
                &RecallQuery {
                    keywords: vec!["sentinel".into(), "quorum".into()],
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();

        assert_eq!(result.count, 1);
        assert_eq!(result.fragments[0].fragment.id, f.id);
        assert!(result.search_path.contains("L2:"));
    }

    #[test]
    fn test_min_importance_forces_l2() {
        let (search, store, index, _dir) = setup(Arc::new(DisabledEmbedder));
        seed(&store, &index, "low importance pool note", "db", FragmentType::Fact);
        let decision = seed(&store, &index, "pool ceiling decision made", "db", FragmentType::Decision);

        let result = search
            .search(
                &RecallQuery {
                    keywords: vec!["pool".into()],
                    min_importance: Some(0.7),
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();

        assert!(result.search_path.contains("L2:"));
        assert!(result.fragments.iter().any(|f| f.fragment.id == decision.id));
        assert!(result.fragments.iter().all(|f| f.fragment.importance >= 0.7));
    }

    #[test]
    fn test_l3_semantic_with_text_query() {
        let (search, store, index, _dir) = setup(Arc::new(MockEmbedder));
        let mut redis = FragmentFactory::create(CreateFragment {
            content: "Redis NOAUTH indicates missing REDIS_PASSWORD.".to_string(),
            topic: "redis".to_string(),
            fragment_type: FragmentType::Error,
            agent_id: "default".to_string(),
            ..Default::default()
        });
        redis.importance = 0.9;
        store.insert(&redis).unwrap();
        index.index(&redis, None);

        let result = search
            .search(
                &RecallQuery {
                    text: Some("how do I fix an authentication failure on Redis?".to_string()),
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();

        assert!(result.search_path.contains("L3:"), "path was {}", result.search_path);
        assert_eq!(result.count, 1);
        let hit = &result.fragments[0];
        assert_eq!(hit.fragment.id, redis.id);
        let sim = hit.similarity.expect("semantic hit carries similarity");
        assert!(sim > 0.3 && sim <= 1.0 + 1e-3);
    }

    #[test]
    fn test_no_filter_falls_back_to_recent() {
        let (search, store, index, _dir) = setup(Arc::new(DisabledEmbedder));
        seed(&store, &index, "older entry body", "t", FragmentType::Fact);
        seed(&store, &index, "newer entry body", "t", FragmentType::Fact);

        let result = search.search(&RecallQuery::default(), &scope()).unwrap();
        assert_eq!(result.count, 2);
        assert!(result.search_path.starts_with("L1:2"));
    }

    #[test]
    fn test_token_budget_respected() {
        let (search, store, index, _dir) = setup(Arc::new(DisabledEmbedder));
        for i in 0..10 {
            seed(
                &store,
                &index,
                &format!("budget filler fragment number {} with some extra words", i),
                "budget",
                FragmentType::Fact,
            );
        }

        let result = search
            .search(
                &RecallQuery {
                    topic: Some("budget".into()),
                    token_budget: Some(30),
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();

        assert!(result.total_tokens <= 30);
        assert!(result.count < 10);
    }

    #[test]
    fn test_link_expansion_pulls_neighbours() {
        let (search, store, index, _dir) = setup(Arc::new(DisabledEmbedder));
        let error = seed(&store, &index, "Deploy failed with exit code three.", "deploy", FragmentType::Error);
        let fix = seed(&store, &index, "Rollback procedure for bad deploys.", "deploy", FragmentType::Procedure);
        store
            .create_link(&error.id, &fix.id, RelationType::ResolvedBy, &scope())
            .unwrap();

        let result = search
            .search(
                &RecallQuery {
                    keywords: vec!["deploy".into(), "failed".into()],
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();

        assert!(result.fragments.iter().any(|f| f.fragment.id == fix.id));
        assert!(result.search_path.contains("Links:"));
    }

    #[test]
    fn test_link_expansion_can_be_disabled() {
        let (search, store, index, _dir) = setup(Arc::new(DisabledEmbedder));
        let error = seed(&store, &index, "Deploy failed with exit code three.", "deploy", FragmentType::Error);
        let fix = seed(&store, &index, "Rollback procedure for bad deploys.", "deploy", FragmentType::Procedure);
        store
            .create_link(&error.id, &fix.id, RelationType::ResolvedBy, &scope())
            .unwrap();

        let result = search
            .search(
                &RecallQuery {
                    keywords: vec!["deploy".into(), "failed".into()],
                    include_links: Some(false),
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();

        assert!(!result.fragments.iter().any(|f| f.fragment.id == fix.id));
    }

    #[test]
    fn test_threshold_keeps_unscored_fragments() {
        let (search, store, index, _dir) = setup(Arc::new(DisabledEmbedder));
        seed(&store, &index, "keyword only fragment", "t", FragmentType::Fact);

        let result = search
            .search(
                &RecallQuery {
                    keywords: vec!["keyword".into(), "fragment".into()],
                    threshold: Some(0.9),
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();

        // L1/L2 results carry no similarity and survive the threshold
        assert_eq!(result.count, 1);
    }

    #[test]
    fn test_stale_annotation() {
        let (search, store, index, _dir) = setup(Arc::new(DisabledEmbedder));
        let f = seed(&store, &index, "ancient procedure steps", "ops", FragmentType::Procedure);
        let old = Utc::now() - chrono::Duration::days(45);
        store.set_timestamps(&f.id, old, None, old).unwrap();
        // Hot cache still holds the fresh copy; force the durable read
        index.set_enabled(false);

        let result = search
            .search(
                &RecallQuery {
                    keywords: vec!["ancient".into(), "procedure".into()],
                    ..Default::default()
                },
                &scope(),
            )
            .unwrap();

        assert_eq!(result.count, 1);
        let stale = result.fragments[0].stale.as_ref().expect("stale annotation");
        assert!(stale.stale);
        assert!(stale.days_since_verification >= 45);
    }
}
