//! Consolidation pipeline
//!
//! A single entry point runs eleven stages in order and returns
//! per-stage counters. Stages run sequentially; a stage failure is
//! logged into the report and never aborts the pipeline.
//!
//! Contradiction detection is the three-stage hybrid: embedding
//! similarity gates the candidate pairs, the NLI classifier resolves the
//! confident band, and the LLM adjudicates the middle band. With no LLM,
//! very-high-similarity pairs are deferred to the pending queue.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::index::{MemoryIndex, PendingContradiction};
use crate::llm::LlmClient;
use crate::memory::{AgentScope, Fragment, RelationType, TaskFeedback, ToolFeedback};
use crate::nli::{detect_contradiction, NliModel};
use crate::storage::FragmentStore;

/// Embedding similarity gate for contradiction candidates
const CONTRADICTION_SIM: f32 = 0.85;

/// Above this similarity an unadjudicated pair is worth deferring
const PENDING_SIM: f32 = 0.92;

/// Pending-queue entries drained per run
pub const PENDING_DRAIN_LIMIT: usize = 10;

/// Embeddings backfilled per run
const BACKFILL_LIMIT: usize = 5;

/// Requeue ceiling for transient pending failures
const MAX_PENDING_ATTEMPTS: u32 = 3;

const STATE_LAST_CONTRADICTION_CHECK: &str = "last_contradiction_check";
const STATE_LAST_FEEDBACK_REPORT: &str = "last_feedback_report";

// ============================================================================
// REPORT
// ============================================================================

/// One stale fragment in the report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleSummary {
    pub id: String,
    pub content_preview: String,
    pub days_since_verification: i64,
}

/// Per-stage counters for one consolidation run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub tier_transitions: usize,
    pub decayed: usize,
    pub expired: usize,
    pub duplicates_merged: usize,
    pub embeddings_backfilled: usize,
    pub utility_recomputed: usize,
    pub anchors_promoted: usize,
    pub contradictions_found: usize,
    pub contradictions_deferred: usize,
    pub pending_resolved: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_report: Option<String>,
    pub keywords_pruned: usize,
    pub stale_fragments: Vec<StaleSummary>,
    pub duration_ms: i64,
    /// Stage failures, logged and carried in the report
    pub errors: Vec<String>,
}

// ============================================================================
// CONSOLIDATOR
// ============================================================================

/// The consolidation pipeline
pub struct Consolidator {
    store: Arc<FragmentStore>,
    index: Arc<MemoryIndex>,
    nli: Arc<dyn NliModel>,
    llm: Arc<dyn LlmClient>,
    config: MemoryConfig,
}

impl Consolidator {
    pub fn new(
        store: Arc<FragmentStore>,
        index: Arc<MemoryIndex>,
        nli: Arc<dyn NliModel>,
        llm: Arc<dyn LlmClient>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            index,
            nli,
            llm,
            config,
        }
    }

    /// Run the full pipeline. Never fails as a whole; stage errors land
    /// in `report.errors`.
    pub async fn run(&self) -> ConsolidationReport {
        let started = Instant::now();
        let mut report = ConsolidationReport::default();

        macro_rules! stage {
            ($name:literal, $expr:expr, $slot:ident) => {
                match $expr {
                    Ok(count) => report.$slot = count,
                    Err(e) => {
                        tracing::warn!("Consolidation stage {} failed: {}", $name, e);
                        report.errors.push(format!("{}: {}", $name, e));
                    }
                }
            };
        }

        stage!("ttl_transitions", self.store.transition_ttl(), tier_transitions);
        stage!("decay", self.store.decay_importance(), decayed);
        stage!("expiry", self.store.delete_expired(), expired);
        stage!("dedup", self.store.merge_duplicates(), duplicates_merged);
        stage!(
            "embedding_backfill",
            self.store.generate_missing_embeddings(BACKFILL_LIMIT),
            embeddings_backfilled
        );
        stage!("utility", self.store.recompute_utility(), utility_recomputed);
        stage!("anchors", self.store.promote_anchors(), anchors_promoted);

        match self.detect_contradictions().await {
            Ok((found, deferred)) => {
                report.contradictions_found = found;
                report.contradictions_deferred = deferred;
            }
            Err(e) => {
                tracing::warn!("Consolidation stage contradictions failed: {}", e);
                report.errors.push(format!("contradictions: {}", e));
            }
        }

        match self.drain_pending().await {
            Ok(resolved) => report.pending_resolved = resolved,
            Err(e) => {
                tracing::warn!("Consolidation stage pending failed: {}", e);
                report.errors.push(format!("pending: {}", e));
            }
        }

        match self.feedback_report() {
            Ok(text) => report.feedback_report = text,
            Err(e) => {
                tracing::warn!("Consolidation stage feedback failed: {}", e);
                report.errors.push(format!("feedback: {}", e));
            }
        }

        report.keywords_pruned = self.index.prune_oversized(self.config.max_keyword_set);
        match self.store.stale_fragments(20) {
            Ok(stale) => {
                report.stale_fragments = stale
                    .into_iter()
                    .map(|(fragment, days)| StaleSummary {
                        id: fragment.id,
                        content_preview: fragment.content.chars().take(80).collect(),
                        days_since_verification: days,
                    })
                    .collect();
            }
            Err(e) => report.errors.push(format!("stale: {}", e)),
        }

        report.duration_ms = started.elapsed().as_millis() as i64;
        tracing::info!(
            tier_transitions = report.tier_transitions,
            decayed = report.decayed,
            expired = report.expired,
            duplicates_merged = report.duplicates_merged,
            contradictions = report.contradictions_found,
            duration_ms = report.duration_ms,
            "Consolidation complete"
        );
        report
    }

    // ========================================================================
    // STAGE 8: CONTRADICTION DETECTION
    // ========================================================================

    async fn detect_contradictions(&self) -> Result<(usize, usize)> {
        let scope = AgentScope::maintenance();
        let watermark = self
            .store
            .get_state(STATE_LAST_CONTRADICTION_CHECK)?
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|v| v.with_timezone(&Utc))
            .unwrap_or(DateTime::UNIX_EPOCH);
        let run_started = Utc::now();

        let candidates = self.store.created_since(watermark)?;
        let mut found = 0;
        let mut deferred = 0;
        let mut seen_pairs: HashSet<(String, String)> = HashSet::new();

        for fragment in &candidates {
            let peers = self.store.similar_to_fragment(
                fragment,
                CONTRADICTION_SIM,
                5,
                true,
                &scope,
            )?;
            for (peer, similarity) in peers {
                let (older, newer) = if peer.created_at <= fragment.created_at {
                    (peer, fragment.clone())
                } else {
                    (fragment.clone(), peer)
                };
                let key = (older.id.clone(), newer.id.clone());
                if !seen_pairs.insert(key) {
                    continue;
                }

                match self.adjudicate_pair(&older, &newer, similarity, &scope).await? {
                    PairOutcome::Contradiction => found += 1,
                    PairOutcome::Deferred => deferred += 1,
                    PairOutcome::Clean => {}
                }
            }
        }

        self.store
            .set_state(STATE_LAST_CONTRADICTION_CHECK, &run_started.to_rfc3339())?;
        Ok((found, deferred))
    }

    async fn adjudicate_pair(
        &self,
        older: &Fragment,
        newer: &Fragment,
        similarity: f32,
        scope: &AgentScope,
    ) -> Result<PairOutcome> {
        // (b) NLI first: the confident bands resolve without the LLM
        if let Some(contradicts) = self.try_nli(older, newer).await {
            if contradicts {
                self.resolve_contradiction(older, newer, scope)?;
                return Ok(PairOutcome::Contradiction);
            }
            return Ok(PairOutcome::Clean);
        }

        // (c) the middle band goes to the LLM
        if let Some(contradicts) = self.try_llm(older, newer).await {
            if contradicts {
                self.resolve_contradiction(older, newer, scope)?;
                return Ok(PairOutcome::Contradiction);
            }
            return Ok(PairOutcome::Clean);
        }

        // No adjudicator reachable: defer only near-duplicates
        if similarity > PENDING_SIM {
            self.index.enqueue_pending_contradiction(PendingContradiction {
                older_id: older.id.clone(),
                newer_id: newer.id.clone(),
                agent_id: older.agent_id.clone(),
                similarity,
                attempts: 0,
            });
            return Ok(PairOutcome::Deferred);
        }
        Ok(PairOutcome::Clean)
    }

    /// NLI verdict when it resolves without escalation; `None` sends the
    /// pair onwards
    async fn try_nli(&self, older: &Fragment, newer: &Fragment) -> Option<bool> {
        let scores = self.nli.classify(&older.content, &newer.content).await?;
        let verdict = detect_contradiction(scores);
        if verdict.needs_escalation {
            None
        } else {
            Some(verdict.contradicts)
        }
    }

    /// LLM verdict, `None` when no completion was obtainable
    async fn try_llm(&self, older: &Fragment, newer: &Fragment) -> Option<bool> {
        if !self.llm.is_available() {
            return None;
        }
        let prompt = format!(
            "Two stored memory fragments may disagree.\n\
             A (older): {}\nB (newer): {}\n\n\
             Do they state contradictory facts? Reply with JSON: \
             {{\"contradicts\": true|false, \"reasoning\": \"<one sentence>\"}}",
            older.content, newer.content
        );
        let value = self.llm.complete_json(&prompt, self.config.llm_timeout).await?;
        Some(value["contradicts"].as_bool().unwrap_or(false))
    }

    /// Record the contradiction and apply the time-ordering heuristic:
    /// the newer fragment supersedes the older, which loses half its
    /// importance (anchors keep theirs). Neither row is deleted. Edges
    /// are unique per ordered pair, so the contradiction points
    /// newer -> older and the supersession older -> newer.
    fn resolve_contradiction(
        &self,
        older: &Fragment,
        newer: &Fragment,
        scope: &AgentScope,
    ) -> Result<()> {
        self.store
            .create_link(&newer.id, &older.id, RelationType::Contradicts, scope)?;
        if !older.is_anchor {
            self.store.set_importance(&older.id, older.importance / 2.0)?;
            self.store
                .create_link(&older.id, &newer.id, RelationType::SupersededBy, scope)?;
        }
        tracing::info!(older = %older.id, newer = %newer.id, "Contradiction recorded");
        Ok(())
    }

    // ========================================================================
    // STAGE 9: PENDING QUEUE
    // ========================================================================

    async fn drain_pending(&self) -> Result<usize> {
        let scope = AgentScope::maintenance();
        let mut resolved = 0;

        for _ in 0..PENDING_DRAIN_LIMIT {
            let Some(pending) = self.index.pop_pending_contradiction() else {
                break;
            };

            let older = self.store.get_by_id(&pending.older_id, &scope)?;
            let newer = self.store.get_by_id(&pending.newer_id, &scope)?;
            let (Some(older), Some(newer)) = (older, newer) else {
                continue; // an endpoint was deleted since deferral
            };

            let verdict = match self.try_nli(&older, &newer).await {
                Some(v) => Some(v),
                None => self.try_llm(&older, &newer).await,
            };

            match verdict {
                Some(contradicts) => {
                    if contradicts {
                        self.resolve_contradiction(&older, &newer, &scope)?;
                    }
                    resolved += 1;
                }
                None => {
                    // Transient: neither classifier answered. Requeue up
                    // to the attempt ceiling and stop draining; nothing
                    // else will resolve this run either.
                    if pending.attempts + 1 < MAX_PENDING_ATTEMPTS {
                        self.index.enqueue_pending_contradiction(PendingContradiction {
                            attempts: pending.attempts + 1,
                            ..pending
                        });
                    } else {
                        tracing::warn!(
                            "Dropping pending contradiction {} / {} after {} attempts",
                            pending.older_id,
                            pending.newer_id,
                            MAX_PENDING_ATTEMPTS
                        );
                    }
                    break;
                }
            }
        }
        Ok(resolved)
    }

    // ========================================================================
    // STAGE 10: FEEDBACK REPORT
    // ========================================================================

    fn feedback_report(&self) -> Result<Option<String>> {
        let watermark = self
            .store
            .get_state(STATE_LAST_FEEDBACK_REPORT)?
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|v| v.with_timezone(&Utc))
            .unwrap_or(DateTime::UNIX_EPOCH);
        let run_started = Utc::now();

        let (tool, task) = self.store.feedback_since(watermark)?;
        if tool.is_empty() && task.is_empty() {
            return Ok(None);
        }

        let report = render_feedback_report(&tool, &task, watermark);
        tracing::info!("Feedback report generated:\n{}", report);
        self.store
            .set_state(STATE_LAST_FEEDBACK_REPORT, &run_started.to_rfc3339())?;
        Ok(Some(report))
    }
}

enum PairOutcome {
    Contradiction,
    Clean,
    Deferred,
}

/// Render the aggregated feedback into a markdown artefact
fn render_feedback_report(
    tool: &[ToolFeedback],
    task: &[TaskFeedback],
    since: DateTime<Utc>,
) -> String {
    use std::collections::BTreeMap;
    let mut out = String::new();
    out.push_str("# Tool feedback report\n\n");
    out.push_str(&format!("Since: {}\n\n", since.to_rfc3339()));

    if !tool.is_empty() {
        out.push_str("## Per-tool signals\n\n");
        let mut by_tool: BTreeMap<&str, (usize, usize, usize)> = BTreeMap::new();
        for f in tool {
            let entry = by_tool.entry(f.tool_name.as_str()).or_insert((0, 0, 0));
            entry.0 += 1;
            if f.relevant {
                entry.1 += 1;
            }
            if f.sufficient {
                entry.2 += 1;
            }
        }
        for (name, (total, relevant, sufficient)) in by_tool {
            out.push_str(&format!(
                "- **{}**: {} reports, {} relevant, {} sufficient\n",
                name, total, relevant, sufficient
            ));
        }

        let suggestions: Vec<&str> = tool
            .iter()
            .filter_map(|f| f.suggestion.as_deref())
            .collect();
        if !suggestions.is_empty() {
            out.push_str("\n## Suggestions\n\n");
            for s in suggestions {
                out.push_str(&format!("- {}\n", s));
            }
        }
    }

    if !task.is_empty() {
        let successes = task.iter().filter(|t| t.overall_success).count();
        out.push_str(&format!(
            "\n## Task outcomes\n\n{} of {} sessions succeeded\n",
            successes,
            task.len()
        ));
        for t in task {
            for highlight in &t.tool_highlights {
                out.push_str(&format!("- + {}\n", highlight));
            }
            for pain in &t.tool_pain_points {
                out.push_str(&format!("- - {}\n", pain));
            }
        }
    }

    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Embedder;
    use crate::llm::DisabledLlm;
    use crate::memory::{CreateFragment, FragmentFactory, FragmentType, TtlTier};
    use crate::nli::{DisabledNli, NliScores};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Embedder mapping same-ish pool statements onto one axis
    struct TopicEmbedder;

    impl Embedder for TopicEmbedder {
        fn embed(&self, text: &str) -> Option<Vec<f32>> {
            let mut v = vec![0.0f32; 8];
            if text.contains("pool size") {
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

    /// NLI asserting high contradiction for every pair
    struct ContradictingNli;

    #[async_trait]
    impl NliModel for ContradictingNli {
        async fn classify(&self, _p: &str, _h: &str) -> Option<NliScores> {
            Some(NliScores {
                entailment: 0.05,
                neutral: 0.05,
                contradiction: 0.9,
            })
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    /// LLM that counts calls and always refuses contradiction
    struct CountingLlm(AtomicUsize);

    #[async_trait]
    impl LlmClient for CountingLlm {
        async fn complete_json(&self, _p: &str, _t: Duration) -> Option<serde_json::Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Some(serde_json::json!({"contradicts": false, "reasoning": "same fact"}))
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn setup(
        embedder: Arc<dyn Embedder>,
        nli: Arc<dyn NliModel>,
        llm: Arc<dyn LlmClient>,
    ) -> (Consolidator, Arc<FragmentStore>, Arc<MemoryIndex>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            FragmentStore::new(Some(dir.path().join("test.db")), embedder, 8).unwrap(),
        );
        let index = Arc::new(MemoryIndex::default());
        let consolidator = Consolidator::new(
            store.clone(),
            index.clone(),
            nli,
            llm,
            MemoryConfig::default(),
        );
        (consolidator, store, index, dir)
    }

    fn decision(content: &str) -> crate::memory::Fragment {
        FragmentFactory::create(CreateFragment {
            content: content.to_string(),
            topic: "db".to_string(),
            fragment_type: FragmentType::Decision,
            agent_id: "default".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_contradiction_resolved_by_nli_without_llm() {
        let llm = Arc::new(CountingLlm(AtomicUsize::new(0)));
        let (consolidator, store, _index, _dir) = setup(
            Arc::new(TopicEmbedder),
            Arc::new(ContradictingNli),
            llm.clone(),
        );
        let scope = AgentScope::maintenance();

        let older = decision("Max connection pool size is 10.");
        store.insert(&older).unwrap();
        let newer = decision("Max connection pool size is 20.");
        store.insert(&newer).unwrap();
        // Make the ordering unambiguous
        store
            .set_timestamps(
                &older.id,
                newer.created_at - chrono::Duration::minutes(5),
                None,
                newer.created_at - chrono::Duration::minutes(5),
            )
            .unwrap();

        let report = consolidator.run().await;
        assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
        assert_eq!(report.contradictions_found, 1);
        // NLI was confident; the LLM never fired
        assert_eq!(llm.0.load(Ordering::SeqCst), 0);

        let older_after = store.get_by_id(&older.id, &scope).unwrap().unwrap();
        let newer_after = store.get_by_id(&newer.id, &scope).unwrap().unwrap();
        assert!((older_after.importance - older.importance / 2.0).abs() < 1e-9);
        assert_eq!(newer_after.importance, newer.importance);

        let links = store.links_of(&older.id).unwrap();
        assert!(links
            .iter()
            .any(|l| l.relation_type == RelationType::Contradicts && l.from_id == newer.id));
        // The older row gained the superseding edge; both survive
        assert!(links
            .iter()
            .any(|l| l.relation_type == RelationType::SupersededBy
                && l.from_id == older.id
                && l.to_id == newer.id));
    }

    #[tokio::test]
    async fn test_anchor_survives_consolidations_unchanged() {
        let (consolidator, store, _index, _dir) = setup(
            Arc::new(TopicEmbedder),
            Arc::new(DisabledNli),
            Arc::new(DisabledLlm),
        );
        let scope = AgentScope::maintenance();

        let mut anchor = decision("pool size anchored fact");
        anchor.is_anchor = true;
        anchor.importance = 0.55;
        anchor.ttl_tier = TtlTier::Warm;
        store.insert(&anchor).unwrap();
        let old = Utc::now() - chrono::Duration::days(200);
        store.set_timestamps(&anchor.id, old, None, old).unwrap();

        for _ in 0..3 {
            consolidator.run().await;
        }

        let after = store.get_by_id(&anchor.id, &scope).unwrap().unwrap();
        assert_eq!(after.importance, 0.55);
        assert_eq!(after.ttl_tier, TtlTier::Warm);
    }

    #[tokio::test]
    async fn test_dedup_stage_reduces_rows_and_sums_access() {
        let (consolidator, store, _index, _dir) = setup(
            Arc::new(TopicEmbedder),
            Arc::new(DisabledNli),
            Arc::new(DisabledLlm),
        );
        let scope = AgentScope::maintenance();

        let survivor = decision("duplicate body for dedup");
        store.insert(&survivor).unwrap();
        let mut total_access = 0i64;
        for i in 0..2 {
            let mut dup = decision("duplicate body for dedup");
            dup.id = crate::memory::Fragment::new_id();
            dup.access_count = 4 + i;
            dup.created_at = survivor.created_at + chrono::Duration::seconds(i + 1);
            total_access += dup.access_count;
            store.insert_raw(&dup).unwrap();
        }

        let report = consolidator.run().await;
        assert_eq!(report.duplicates_merged, 2);
        assert_eq!(store.count().unwrap(), 1);

        let kept = store.get_by_id(&survivor.id, &scope).unwrap().unwrap();
        assert_eq!(kept.access_count, total_access);
    }

    #[tokio::test]
    async fn test_no_adjudicator_defers_near_duplicates() {
        let (consolidator, store, index, _dir) = setup(
            Arc::new(TopicEmbedder),
            Arc::new(DisabledNli),
            Arc::new(DisabledLlm),
        );

        let older = decision("Max connection pool size is 10.");
        store.insert(&older).unwrap();
        let newer = decision("Max connection pool size is 20.");
        store.insert(&newer).unwrap();
        store
            .set_timestamps(
                &older.id,
                newer.created_at - chrono::Duration::minutes(5),
                None,
                newer.created_at - chrono::Duration::minutes(5),
            )
            .unwrap();

        let report = consolidator.run().await;
        // The identical mock vectors sit above the pending threshold
        assert_eq!(report.contradictions_found, 0);
        assert_eq!(report.contradictions_deferred, 1);
        assert_eq!(index.pending_contradiction_len(), 1);
    }

    #[tokio::test]
    async fn test_watermark_prevents_rescan() {
        let llm = Arc::new(CountingLlm(AtomicUsize::new(0)));
        let (consolidator, store, _index, _dir) = setup(
            Arc::new(TopicEmbedder),
            Arc::new(ContradictingNli),
            llm,
        );

        let older = decision("Max connection pool size is 10.");
        store.insert(&older).unwrap();
        let newer = decision("Max connection pool size is 20.");
        store.insert(&newer).unwrap();
        store
            .set_timestamps(
                &older.id,
                newer.created_at - chrono::Duration::minutes(5),
                None,
                newer.created_at - chrono::Duration::minutes(5),
            )
            .unwrap();

        let first = consolidator.run().await;
        assert_eq!(first.contradictions_found, 1);
        let second = consolidator.run().await;
        assert_eq!(second.contradictions_found, 0);
    }

    #[tokio::test]
    async fn test_feedback_report_and_watermark() {
        let (consolidator, store, _index, _dir) = setup(
            Arc::new(TopicEmbedder),
            Arc::new(DisabledNli),
            Arc::new(DisabledLlm),
        );

        store
            .insert_tool_feedback(&ToolFeedback {
                tool_name: "recall".to_string(),
                relevant: true,
                sufficient: false,
                suggestion: Some("widen the budget".to_string()),
                context: None,
                session_id: None,
                trigger_type: crate::memory::FeedbackTrigger::Voluntary,
                created_at: Utc::now(),
            })
            .unwrap();

        let report = consolidator.run().await;
        let text = report.feedback_report.expect("feedback report emitted");
        assert!(text.contains("recall"));
        assert!(text.contains("widen the budget"));

        // Nothing new since the watermark: the next run stays quiet
        let report = consolidator.run().await;
        assert!(report.feedback_report.is_none());
    }

    #[test]
    fn test_render_feedback_report_shape() {
        let tool = vec![ToolFeedback {
            tool_name: "remember".to_string(),
            relevant: true,
            sufficient: true,
            suggestion: None,
            context: None,
            session_id: None,
            trigger_type: crate::memory::FeedbackTrigger::Sampled,
            created_at: Utc::now(),
        }];
        let task = vec![TaskFeedback {
            session_id: "s1".to_string(),
            overall_success: true,
            tool_highlights: vec!["recall found the fix".to_string()],
            tool_pain_points: vec![],
            created_at: Utc::now(),
        }];
        let report = render_feedback_report(&tool, &task, DateTime::UNIX_EPOCH);
        assert!(report.starts_with("# Tool feedback report"));
        assert!(report.contains("**remember**"));
        assert!(report.contains("1 of 1 sessions succeeded"));
    }
}
