//! Memory Manager - the facade over the memory subsystem
//!
//! Exposes the eleven agent operations (remember, recall, forget, link,
//! amend, reflect, context, tool_feedback, memory_stats,
//! memory_consolidate, graph_explore) and enforces the cross-component
//! invariants: write-path ordering, scope checks, auto-linking, conflict
//! scanning and working-memory bookkeeping.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::MemoryConfig;
use crate::consolidation::{ConsolidationReport, Consolidator};
use crate::error::{MemoryError, Result};
use crate::evaluator::should_evaluate;
use crate::index::{EvalJob, MemoryIndex, WorkingEntry};
use crate::llm::LlmClient;
use crate::memory::{
    approximate_tokens, normalize_keywords, redact, truncate_content, AgentScope, CreateFragment,
    FeedbackTrigger, Fragment, FragmentFactory, FragmentType, MemoryStats, RecallResult,
    RelationType, TaskFeedback, ToolFeedback, TtlTier,
};
use crate::nli::NliModel;
use crate::search::{FragmentSearch, RecallQuery};
use crate::session::ActivityTracker;
use crate::storage::{FragmentPatch, FragmentStore, RcaNode, UpdateOutcome};

/// Cosine similarity above which a same-topic peer is reported as a
/// conflict at remember time
const CONFLICT_SIM: f32 = 0.8;

/// Cosine similarity gate for insert-time auto-linking
const AUTO_LINK_SIM: f32 = 0.7;

/// Auto-link peers considered per insert
const AUTO_LINK_CANDIDATES: usize = 3;

/// Same-type peers above this similarity are treated as superseded
const SUPERSEDE_SIM: f32 = 0.85;

/// Node ceiling for the reflect-time cycle check
const CYCLE_CHECK_NODES: usize = 20;

/// Share of the context budget given to core memory
const CORE_BUDGET_SHARE: f64 = 0.65;

// ============================================================================
// PARAMETER AND OUTCOME TYPES
// ============================================================================

/// Storage scope for `remember`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    /// Durable fragment in the store
    #[default]
    Permanent,
    /// Session working memory only; gone when the session rotates
    Session,
}

/// Parameters for `remember`
#[derive(Debug, Clone, Default)]
pub struct RememberParams {
    pub content: String,
    pub topic: String,
    pub keywords: Vec<String>,
    pub fragment_type: FragmentType,
    pub importance: Option<f64>,
    pub source: Option<String>,
    pub linked_to: Vec<String>,
    pub scope: MemoryScope,
    pub is_anchor: bool,
    pub session_id: Option<String>,
}

/// A same-topic peer flagged at remember time
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictNote {
    pub id: String,
    pub content: String,
    pub similarity: f32,
}

/// Outcome of `remember`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RememberOutcome {
    pub id: String,
    pub created: bool,
    pub keywords: Vec<String>,
    pub ttl_tier: TtlTier,
    pub scope: MemoryScope,
    pub conflicts: Vec<ConflictNote>,
}

/// Parameters for `forget`
#[derive(Debug, Clone, Default)]
pub struct ForgetParams {
    pub id: Option<String>,
    pub topic: Option<String>,
    pub force: bool,
}

/// Outcome of `forget`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgetOutcome {
    pub deleted: usize,
    pub protected: usize,
}

/// Parameters for `amend`
#[derive(Debug, Clone, Default)]
pub struct AmendParams {
    pub id: String,
    pub content: Option<String>,
    pub topic: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub fragment_type: Option<FragmentType>,
    pub importance: Option<f64>,
    pub is_anchor: Option<bool>,
    /// Id of an older fragment this amendment supersedes
    pub supersedes: Option<String>,
}

/// Outcome of `amend`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmendOutcome {
    pub updated: bool,
    pub merged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<String>,
}

/// Session effectiveness payload accepted by `reflect`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEffectiveness {
    pub overall_success: bool,
    #[serde(default)]
    pub tool_highlights: Vec<String>,
    #[serde(default)]
    pub tool_pain_points: Vec<String>,
}

/// Parameters for `reflect`
#[derive(Debug, Clone, Default)]
pub struct ReflectParams {
    pub summary: String,
    pub session_id: Option<String>,
    pub decisions: Vec<String>,
    pub errors_resolved: Vec<String>,
    pub new_procedures: Vec<String>,
    pub open_questions: Vec<String>,
    pub task_effectiveness: Option<TaskEffectiveness>,
}

/// Outcome of `reflect`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectOutcome {
    pub created: Vec<String>,
    pub links_created: usize,
}

/// Parameters for `context`
#[derive(Debug, Clone)]
pub struct ContextParams {
    pub token_budget: i64,
    pub types: Vec<FragmentType>,
    pub session_id: Option<String>,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            token_budget: 2000,
            types: vec![
                FragmentType::Preference,
                FragmentType::Error,
                FragmentType::Procedure,
            ],
            session_id: None,
        }
    }
}

/// Outcome of `context`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextOutcome {
    pub injection_text: String,
    pub core_count: usize,
    pub working_count: usize,
    pub estimated_tokens: i64,
    pub unreflected_sessions: Vec<String>,
}

/// Parameters for `tool_feedback`
#[derive(Debug, Clone, Default)]
pub struct ToolFeedbackParams {
    pub tool_name: String,
    pub relevant: bool,
    pub sufficient: bool,
    pub suggestion: Option<String>,
    pub context: Option<String>,
    pub session_id: Option<String>,
    pub trigger_type: FeedbackTrigger,
}

// ============================================================================
// MANAGER
// ============================================================================

/// The memory facade. Constructed once per process with its
/// collaborators injected; everything it owns is shareable.
pub struct MemoryManager {
    store: Arc<FragmentStore>,
    index: Arc<MemoryIndex>,
    activity: Arc<ActivityTracker>,
    search: FragmentSearch,
    nli: Arc<dyn NliModel>,
    llm: Arc<dyn LlmClient>,
    config: MemoryConfig,
}

impl MemoryManager {
    pub fn new(
        store: Arc<FragmentStore>,
        index: Arc<MemoryIndex>,
        activity: Arc<ActivityTracker>,
        nli: Arc<dyn NliModel>,
        llm: Arc<dyn LlmClient>,
        config: MemoryConfig,
    ) -> Self {
        let search = FragmentSearch::new(store.clone(), index.clone(), config.clone());
        Self {
            store,
            index,
            activity,
            search,
            nli,
            llm,
            config,
        }
    }

    pub fn store(&self) -> &Arc<FragmentStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<MemoryIndex> {
        &self.index
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    // ========================================================================
    // REMEMBER
    // ========================================================================

    /// Store a fragment (or push a session working-memory entry). The
    /// write-path order is validate, redact/hash, insert, index,
    /// auto-link, enqueue; everything after the insert is best-effort.
    pub fn remember(&self, params: RememberParams, scope: &AgentScope) -> Result<RememberOutcome> {
        if params.content.trim().is_empty() {
            return Err(MemoryError::Validation("content is required".into()));
        }
        if params.topic.trim().is_empty() {
            return Err(MemoryError::Validation("topic is required".into()));
        }
        if let Some(importance) = params.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(MemoryError::Validation(
                    "importance must be in [0, 1]".into(),
                ));
            }
        }

        if params.scope == MemoryScope::Session {
            return self.remember_session(params, scope);
        }

        let fragment = FragmentFactory::create(CreateFragment {
            content: params.content,
            topic: params.topic,
            keywords: params.keywords,
            fragment_type: params.fragment_type,
            importance: params.importance,
            source: params.source,
            agent_id: scope.agent_id.clone(),
            is_anchor: params.is_anchor,
        });

        let outcome = self.store.insert(&fragment)?;
        if !outcome.created {
            return Ok(RememberOutcome {
                id: outcome.id,
                created: false,
                keywords: fragment.keywords,
                ttl_tier: fragment.ttl_tier,
                scope: MemoryScope::Permanent,
                conflicts: Vec::new(),
            });
        }

        // Past the insert everything is best-effort
        self.index.index(&fragment, params.session_id.as_deref());

        for target in &params.linked_to {
            if let Err(e) =
                self.store
                    .create_link(&fragment.id, target, RelationType::Related, scope)
            {
                tracing::warn!("remember: link to {} skipped: {}", target, e);
            }
        }

        let conflicts = self.scan_conflicts(&fragment, scope);
        self.auto_link(&fragment, scope);

        if should_evaluate(fragment.fragment_type) {
            self.index.enqueue_evaluation(EvalJob {
                fragment_id: fragment.id.clone(),
                agent_id: fragment.agent_id.clone(),
                fragment_type: fragment.fragment_type,
                content: fragment.content.clone(),
            });
        }

        if let Some(ref session) = params.session_id {
            self.activity.record_fragments(session, &[fragment.id.clone()]);
            self.activity.record_keywords(session, &fragment.keywords);
        }

        Ok(RememberOutcome {
            id: fragment.id,
            created: true,
            keywords: fragment.keywords,
            ttl_tier: fragment.ttl_tier,
            scope: MemoryScope::Permanent,
            conflicts,
        })
    }

    fn remember_session(
        &self,
        params: RememberParams,
        _scope: &AgentScope,
    ) -> Result<RememberOutcome> {
        let Some(session_id) = params.session_id else {
            return Err(MemoryError::Validation(
                "scope=session requires a sessionId".into(),
            ));
        };
        let content = truncate_content(&redact(&params.content));
        let importance = params
            .importance
            .unwrap_or_else(|| params.fragment_type.default_importance());
        self.index.wm_push(
            &session_id,
            WorkingEntry {
                tokens: approximate_tokens(&content),
                content,
                importance,
                created_at: Utc::now(),
            },
        );

        Ok(RememberOutcome {
            id: format!("wm-{}", &uuid::Uuid::new_v4().simple().to_string()[..16]),
            created: true,
            keywords: Vec::new(),
            ttl_tier: TtlTier::Hot,
            scope: MemoryScope::Session,
            conflicts: Vec::new(),
        })
    }

    /// Same-topic semantic neighbours above the conflict threshold.
    /// Cosine similarity from the semantic tier only; keyword hits never
    /// count as conflicts.
    fn scan_conflicts(&self, fragment: &Fragment, scope: &AgentScope) -> Vec<ConflictNote> {
        match self
            .store
            .similar_to_fragment(fragment, CONFLICT_SIM, AUTO_LINK_CANDIDATES, true, scope)
        {
            Ok(peers) => peers
                .into_iter()
                .map(|(peer, similarity)| ConflictNote {
                    id: peer.id,
                    content: peer.content,
                    similarity,
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Conflict scan skipped: {}", e);
                Vec::new()
            }
        }
    }

    /// Insert-time auto-linking over same-topic semantic neighbours
    fn auto_link(&self, fragment: &Fragment, scope: &AgentScope) {
        let peers = match self.store.similar_to_fragment(
            fragment,
            AUTO_LINK_SIM,
            AUTO_LINK_CANDIDATES,
            true,
            scope,
        ) {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!("Auto-link scan skipped: {}", e);
                return;
            }
        };

        for (peer, similarity) in peers {
            let resolution_marker = fragment.content.contains("[해결됨]")
                || fragment.content.to_lowercase().contains("resolved")
                || fragment.content.to_lowercase().contains("fixed");

            let link = if fragment.fragment_type == FragmentType::Error
                && peer.fragment_type == FragmentType::Error
                && resolution_marker
            {
                (fragment.id.clone(), peer.id.clone(), RelationType::ResolvedBy)
            } else if fragment.fragment_type == peer.fragment_type
                && similarity > SUPERSEDE_SIM
                && fragment.created_at > peer.created_at
            {
                (peer.id.clone(), fragment.id.clone(), RelationType::SupersededBy)
            } else {
                (fragment.id.clone(), peer.id.clone(), RelationType::Related)
            };

            if let Err(e) = self.store.create_link(&link.0, &link.1, link.2, scope) {
                tracing::warn!("Auto-link {} -> {} skipped: {}", link.0, link.1, e);
            }
        }
    }

    // ========================================================================
    // RECALL
    // ========================================================================

    /// Run the retrieval cascade, then bump access counters and
    /// re-materialise the hot cache off the caller's path.
    pub fn recall(
        &self,
        query: RecallQuery,
        session_id: Option<&str>,
        scope: &AgentScope,
    ) -> Result<RecallResult> {
        let result = self.search.search(&query, scope)?;

        let ids: Vec<String> = result
            .fragments
            .iter()
            .map(|f| f.fragment.id.clone())
            .collect();
        let fragments: Vec<Fragment> =
            result.fragments.iter().map(|f| f.fragment.clone()).collect();

        if let Some(session) = session_id {
            self.activity.record_fragments(session, &ids);
            self.activity.record_keywords(session, &query.keywords);
        }

        let store = self.store.clone();
        let index = self.index.clone();
        let scope = scope.clone();
        let bump = move || {
            if let Err(e) = store.increment_access(&ids, &scope) {
                tracing::warn!("Access bump failed: {}", e);
            }
            index.hot_put(&fragments);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(bump);
            }
            Err(_) => bump(),
        }

        Ok(result)
    }

    // ========================================================================
    // FORGET
    // ========================================================================

    /// Delete by id or topic. Permanent rows survive unless forced.
    pub fn forget(&self, params: ForgetParams, scope: &AgentScope) -> Result<ForgetOutcome> {
        let targets: Vec<Fragment> = if let Some(ref id) = params.id {
            if !Fragment::is_valid_id(id) {
                return Err(MemoryError::Validation(format!("malformed id: {}", id)));
            }
            let fragment = self
                .store
                .get_by_id(id, scope)?
                .ok_or_else(|| MemoryError::NotFound(format!("fragment {}", id)))?;
            vec![fragment]
        } else if let Some(ref topic) = params.topic {
            self.store.list_by_topic(topic, scope)?
        } else {
            return Err(MemoryError::Validation("id or topic is required".into()));
        };

        let mut deleted = 0;
        let mut protected = 0;
        for fragment in targets {
            if fragment.ttl_tier == TtlTier::Permanent && !params.force {
                protected += 1;
                continue;
            }
            if self.store.delete(&fragment.id, scope)? {
                self.index.deindex(
                    &fragment.id,
                    &fragment.keywords,
                    &fragment.topic,
                    fragment.fragment_type,
                );
                deleted += 1;
            }
        }
        Ok(ForgetOutcome { deleted, protected })
    }

    // ========================================================================
    // LINK
    // ========================================================================

    /// Create a typed edge. A `resolved_by` pointing at a live error
    /// halves that error's importance: the resolution is now the thing
    /// worth surfacing.
    pub fn link(
        &self,
        from_id: &str,
        to_id: &str,
        relation: RelationType,
        scope: &AgentScope,
    ) -> Result<()> {
        if !Fragment::is_valid_id(from_id) || !Fragment::is_valid_id(to_id) {
            return Err(MemoryError::Validation("malformed fragment id".into()));
        }
        self.store.create_link(from_id, to_id, relation, scope)?;

        if relation == RelationType::ResolvedBy {
            if let Some(target) = self.store.get_by_id(to_id, scope)? {
                if target.fragment_type == FragmentType::Error && target.importance > 0.5 {
                    self.store.set_importance(to_id, target.importance / 2.0)?;
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // AMEND
    // ========================================================================

    /// Archive-and-update a fragment, reindexing it afterwards
    pub fn amend(&self, params: AmendParams, scope: &AgentScope) -> Result<AmendOutcome> {
        if !Fragment::is_valid_id(&params.id) {
            return Err(MemoryError::Validation(format!("malformed id: {}", params.id)));
        }
        let before = self
            .store
            .get_by_id(&params.id, scope)?
            .ok_or_else(|| MemoryError::NotFound(format!("fragment {}", params.id)))?;

        let patch = FragmentPatch {
            content: params
                .content
                .as_deref()
                .map(|c| truncate_content(&redact(c))),
            topic: params.topic,
            keywords: params.keywords.as_deref().map(normalize_keywords),
            fragment_type: params.fragment_type,
            importance: params.importance,
            is_anchor: params.is_anchor,
        };

        match self.store.update(&params.id, &patch, scope)? {
            UpdateOutcome::Merged { existing_id } => Ok(AmendOutcome {
                updated: false,
                merged: true,
                existing_id: Some(existing_id),
            }),
            UpdateOutcome::Updated(after) => {
                self.index.deindex(
                    &before.id,
                    &before.keywords,
                    &before.topic,
                    before.fragment_type,
                );
                self.index.index(&after, None);

                if let Some(ref superseded) = params.supersedes {
                    if let Err(e) =
                        self.store
                            .create_link(superseded, &params.id, RelationType::Related, scope)
                    {
                        tracing::warn!("amend: supersedes link skipped: {}", e);
                    } else {
                        self.store.set_importance(superseded, 0.3)?;
                    }
                }

                Ok(AmendOutcome {
                    updated: true,
                    merged: false,
                    existing_id: None,
                })
            }
        }
    }

    // ========================================================================
    // REFLECT
    // ========================================================================

    /// Project a session recap into typed fragments, then run the
    /// rule-based auto-linker over the new error/decision/procedure sets.
    pub fn reflect(&self, params: ReflectParams, scope: &AgentScope) -> Result<ReflectOutcome> {
        if params.summary.trim().is_empty() {
            return Err(MemoryError::Validation("summary is required".into()));
        }

        let mut created: Vec<String> = Vec::new();
        let mut decisions: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut procedures: Vec<String> = Vec::new();
        let mut links_created = 0;

        // Summary splits into chained fact fragments
        let summary_fragments = FragmentFactory::split(
            &params.summary,
            CreateFragment {
                topic: "session-summary".to_string(),
                fragment_type: FragmentType::Fact,
                agent_id: scope.agent_id.clone(),
                ..Default::default()
            },
        );
        let mut previous: Option<String> = None;
        for fragment in summary_fragments {
            let outcome = self.store.insert(&fragment)?;
            if outcome.created {
                self.index.index(&fragment, params.session_id.as_deref());
            }
            if let Some(ref prev) = previous {
                if self
                    .store
                    .create_link(&outcome.id, prev, RelationType::Related, scope)
                    .is_ok()
                {
                    links_created += 1;
                }
            }
            previous = Some(outcome.id.clone());
            created.push(outcome.id);
        }

        let mut materialize = |text: &str,
                               fragment_type: FragmentType,
                               bucket: &mut Vec<String>|
         -> Result<()> {
            let fragment = FragmentFactory::create(CreateFragment {
                content: text.to_string(),
                topic: "session-summary".to_string(),
                fragment_type,
                agent_id: scope.agent_id.clone(),
                ..Default::default()
            });
            let outcome = self.store.insert(&fragment)?;
            if outcome.created {
                self.index.index(&fragment, params.session_id.as_deref());
                if should_evaluate(fragment_type) {
                    self.index.enqueue_evaluation(EvalJob {
                        fragment_id: outcome.id.clone(),
                        agent_id: scope.agent_id.clone(),
                        fragment_type,
                        content: fragment.content.clone(),
                    });
                }
            }
            bucket.push(outcome.id.clone());
            created.push(outcome.id);
            Ok(())
        };

        for text in &params.decisions {
            materialize(text, FragmentType::Decision, &mut decisions)?;
        }
        for text in &params.errors_resolved {
            materialize(&format!("[해결됨] {}", text), FragmentType::Error, &mut errors)?;
        }
        for text in &params.new_procedures {
            materialize(text, FragmentType::Procedure, &mut procedures)?;
        }
        let mut open_questions: Vec<String> = Vec::new();
        for text in &params.open_questions {
            materialize(&format!("[미해결] {}", text), FragmentType::Fact, &mut open_questions)?;
        }

        // Rule-based auto-linking, each edge guarded by the cycle check
        for error in &errors {
            for decision in &decisions {
                if !self.store.would_create_cycle(error, decision, CYCLE_CHECK_NODES)? {
                    self.store
                        .create_link(error, decision, RelationType::CausedBy, scope)?;
                    links_created += 1;
                }
            }
        }
        for procedure in &procedures {
            for error in &errors {
                if !self.store.would_create_cycle(procedure, error, CYCLE_CHECK_NODES)? {
                    self.store
                        .create_link(procedure, error, RelationType::ResolvedBy, scope)?;
                    links_created += 1;
                }
            }
        }

        if let Some(effectiveness) = params.task_effectiveness {
            let feedback = TaskFeedback {
                session_id: params
                    .session_id
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                overall_success: effectiveness.overall_success,
                tool_highlights: effectiveness.tool_highlights,
                tool_pain_points: effectiveness.tool_pain_points,
                created_at: Utc::now(),
            };
            if let Err(e) = self.store.insert_task_feedback(&feedback) {
                tracing::warn!("reflect: task feedback skipped: {}", e);
            }
        }

        if let Some(ref session) = params.session_id {
            self.index.wm_clear(session);
            self.activity.mark_reflected(session);
        }

        Ok(ReflectOutcome {
            created,
            links_created,
        })
    }

    // ========================================================================
    // CONTEXT
    // ========================================================================

    /// Assemble the session-bootstrap injection: Core Memory (one bucket
    /// per requested type, top-1 of each guaranteed) under 65% of the
    /// budget, Working Memory under the remaining 35%, plus a hint when
    /// unreflected sessions exist.
    pub fn context(&self, params: ContextParams, scope: &AgentScope) -> Result<ContextOutcome> {
        let core_char_budget =
            (params.token_budget as f64 * CORE_BUDGET_SHARE) as i64 * 4;
        let wm_token_budget =
            (params.token_budget as f64 * (1.0 - CORE_BUDGET_SHARE)) as i64;

        // One bucket per type
        let mut buckets: Vec<Vec<(FragmentType, Fragment, f64)>> = Vec::new();
        for fragment_type in &params.types {
            let result = self.search.search(
                &RecallQuery {
                    fragment_type: Some(*fragment_type),
                    min_importance: Some(0.3),
                    include_links: Some(false),
                    token_budget: Some(params.token_budget),
                    ..Default::default()
                },
                scope,
            )?;
            buckets.push(
                result
                    .fragments
                    .into_iter()
                    .map(|f| (*fragment_type, f.fragment, f.score))
                    .collect(),
            );
        }

        // Guarantee the top-1 of each type, then fill by rank
        let mut core: Vec<(FragmentType, Fragment)> = Vec::new();
        let mut core_chars = 0i64;
        let mut rest: Vec<(FragmentType, Fragment, f64)> = Vec::new();
        for mut bucket in buckets {
            if !bucket.is_empty() {
                let (fragment_type, fragment, _) = bucket.remove(0);
                core_chars += fragment.content.chars().count() as i64;
                core.push((fragment_type, fragment));
            }
            rest.extend(bucket);
        }
        rest.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        for (fragment_type, fragment, _) in rest {
            let chars = fragment.content.chars().count() as i64;
            if core_chars + chars > core_char_budget {
                break;
            }
            core_chars += chars;
            core.push((fragment_type, fragment));
        }

        // Working memory under the remaining share
        let mut working: Vec<WorkingEntry> = Vec::new();
        let mut wm_tokens = 0i64;
        if let Some(ref session) = params.session_id {
            for entry in self.index.wm_entries(session) {
                if wm_tokens + entry.tokens > wm_token_budget {
                    break;
                }
                wm_tokens += entry.tokens;
                working.push(entry);
            }
        }

        let unreflected = self.activity.unreflected_sessions(5);

        let mut text = String::new();
        if !core.is_empty() {
            text.push_str("[CORE MEMORY]\n");
            for (fragment_type, fragment) in &core {
                text.push_str(&format!("- ({}) {}\n", fragment_type.as_str(), fragment.content));
            }
        }
        if !working.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("[WORKING MEMORY]\n");
            for entry in &working {
                text.push_str(&format!("- {}\n", entry.content));
            }
        }
        if !unreflected.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!(
                "[SYSTEM HINT] {} session(s) ended without a reflection: {}\n",
                unreflected.len(),
                unreflected.join(", ")
            ));
        }

        let estimated_tokens = core
            .iter()
            .map(|(_, f)| f.estimated_tokens)
            .sum::<i64>()
            + wm_tokens;

        Ok(ContextOutcome {
            injection_text: text,
            core_count: core.len(),
            working_count: working.len(),
            estimated_tokens,
            unreflected_sessions: unreflected,
        })
    }

    // ========================================================================
    // FEEDBACK / STATS / CONSOLIDATE / GRAPH
    // ========================================================================

    /// Record tool feedback (suggestion capped at 100 chars, context at 50)
    pub fn tool_feedback(&self, params: ToolFeedbackParams) -> Result<()> {
        if params.tool_name.trim().is_empty() {
            return Err(MemoryError::Validation("tool_name is required".into()));
        }
        let cap = |value: Option<String>, max: usize| {
            value.map(|v| {
                if v.chars().count() > max {
                    v.chars().take(max).collect()
                } else {
                    v
                }
            })
        };
        self.store.insert_tool_feedback(&ToolFeedback {
            tool_name: params.tool_name,
            relevant: params.relevant,
            sufficient: params.sufficient,
            suggestion: cap(params.suggestion, 100),
            context: cap(params.context, 50),
            session_id: params.session_id,
            trigger_type: params.trigger_type,
            created_at: Utc::now(),
        })
    }

    /// Aggregate statistics including worker queue depths
    pub fn stats(&self) -> Result<MemoryStats> {
        let mut stats = self.store.stats()?;
        stats.pending_evaluations = self.index.evaluation_len();
        stats.pending_contradictions = self.index.pending_contradiction_len();
        Ok(stats)
    }

    /// Run the consolidation pipeline once
    pub async fn consolidate(&self) -> ConsolidationReport {
        let consolidator = Consolidator::new(
            self.store.clone(),
            self.index.clone(),
            self.nli.clone(),
            self.llm.clone(),
            self.config.clone(),
        );
        consolidator.run().await
    }

    /// One-hop root-cause walk from a fragment
    pub fn graph_explore(&self, start_id: &str, scope: &AgentScope) -> Result<Vec<RcaNode>> {
        if !Fragment::is_valid_id(start_id) {
            return Err(MemoryError::Validation(format!("malformed id: {}", start_id)));
        }
        self.store.rca_chain(start_id, scope)
    }

    /// The LLM seam, used by the auto-reflect orchestrator
    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }
}
