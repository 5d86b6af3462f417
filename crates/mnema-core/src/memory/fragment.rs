//! Fragment - The atomic unit of memory
//!
//! Each fragment is a short, redacted, typed knowledge record with:
//! - Lifecycle state (importance, TTL tier, anchor flag)
//! - Dedup identity (content hash over the redacted form)
//! - Graph edges (typed links with a mirrored `linked_to` array)
//! - Optional semantic embedding metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// FRAGMENT TYPES
// ============================================================================

/// Types of memory fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FragmentType {
    /// A discrete fact or piece of information
    #[default]
    Fact,
    /// A decision that was made, with its context
    Decision,
    /// An error that was encountered (and possibly resolved)
    Error,
    /// A durable user or project preference
    Preference,
    /// A procedure or how-to knowledge
    Procedure,
    /// A relationship between entities
    Relation,
}

impl FragmentType {
    /// All valid type names, for validation messages
    pub const ALL: [FragmentType; 6] = [
        FragmentType::Fact,
        FragmentType::Decision,
        FragmentType::Error,
        FragmentType::Preference,
        FragmentType::Procedure,
        FragmentType::Relation,
    ];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentType::Fact => "fact",
            FragmentType::Decision => "decision",
            FragmentType::Error => "error",
            FragmentType::Preference => "preference",
            FragmentType::Procedure => "procedure",
            FragmentType::Relation => "relation",
        }
    }

    /// Parse from a string name. Returns `None` for unknown names so the
    /// caller can raise a validation error instead of silently defaulting.
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fact" => Some(FragmentType::Fact),
            "decision" => Some(FragmentType::Decision),
            "error" => Some(FragmentType::Error),
            "preference" => Some(FragmentType::Preference),
            "procedure" => Some(FragmentType::Procedure),
            "relation" => Some(FragmentType::Relation),
            _ => None,
        }
    }

    /// Default importance assigned when the caller omits it
    pub fn default_importance(&self) -> f64 {
        match self {
            FragmentType::Preference => 0.95,
            FragmentType::Error => 0.9,
            FragmentType::Decision => 0.8,
            FragmentType::Procedure => 0.7,
            FragmentType::Relation => 0.6,
            FragmentType::Fact => 0.5,
        }
    }

    /// Days since last verification before a fragment of this type is
    /// annotated stale on recall
    pub fn stale_after_days(&self) -> i64 {
        match self {
            FragmentType::Procedure => 30,
            FragmentType::Fact => 60,
            FragmentType::Decision => 90,
            _ => 60,
        }
    }

    /// Types that carry their own provenance discipline and are never
    /// enqueued for LLM quality evaluation
    pub fn excluded_from_evaluation(&self) -> bool {
        matches!(
            self,
            FragmentType::Fact | FragmentType::Procedure | FragmentType::Error
        )
    }
}

impl std::fmt::Display for FragmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// TTL TIERS
// ============================================================================

/// Lifecycle bucket governing decay and eviction eligibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TtlTier {
    /// Frequently touched, short-lived working knowledge
    Hot,
    /// Medium-importance knowledge, decays over time
    #[default]
    Warm,
    /// Low-importance knowledge, first in line for expiry
    Cold,
    /// Never expires; exempt from the eviction sweep
    Permanent,
}

impl TtlTier {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TtlTier::Hot => "hot",
            TtlTier::Warm => "warm",
            TtlTier::Cold => "cold",
            TtlTier::Permanent => "permanent",
        }
    }

    /// Parse from string name, defaulting unknown values to `Warm`
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "hot" => TtlTier::Hot,
            "warm" => TtlTier::Warm,
            "cold" => TtlTier::Cold,
            "permanent" => TtlTier::Permanent,
            _ => TtlTier::Warm,
        }
    }

    /// Infer the tier from type and importance at creation time.
    /// First match wins.
    pub fn infer(fragment_type: FragmentType, importance: f64) -> Self {
        if fragment_type == FragmentType::Preference {
            TtlTier::Permanent
        } else if importance >= 0.8 {
            TtlTier::Permanent
        } else if matches!(fragment_type, FragmentType::Error | FragmentType::Procedure) {
            TtlTier::Hot
        } else if importance >= 0.5 {
            TtlTier::Warm
        } else {
            TtlTier::Cold
        }
    }
}

impl std::fmt::Display for TtlTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RELATION TYPES
// ============================================================================

/// Typed, directed edge kinds between fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// Generic association
    #[default]
    Related,
    /// The source was caused by the target
    CausedBy,
    /// The source was resolved by the target
    ResolvedBy,
    /// The source is a part of the target
    PartOf,
    /// The source contradicts the target
    Contradicts,
    /// The source has been replaced by the target (source stays queryable)
    SupersededBy,
}

impl RelationType {
    /// Convert to string representation (matches the stored edge values)
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Related => "related",
            RelationType::CausedBy => "caused_by",
            RelationType::ResolvedBy => "resolved_by",
            RelationType::PartOf => "part_of",
            RelationType::Contradicts => "contradicts",
            RelationType::SupersededBy => "superseded_by",
        }
    }

    /// Parse from string name. The whitelist doubles as injection
    /// protection for relation filters coming off the wire.
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "related" => Some(RelationType::Related),
            "caused_by" => Some(RelationType::CausedBy),
            "resolved_by" => Some(RelationType::ResolvedBy),
            "part_of" => Some(RelationType::PartOf),
            "contradicts" => Some(RelationType::Contradicts),
            "superseded_by" => Some(RelationType::SupersededBy),
            _ => None,
        }
    }

    /// Ordering priority when expanding linked fragments:
    /// resolutions first, then causes, then everything else.
    pub fn priority(&self) -> i32 {
        match self {
            RelationType::ResolvedBy => 0,
            RelationType::CausedBy => 1,
            _ => 2,
        }
    }

    /// Relations admitted by link expansion when the caller does not
    /// narrow the filter
    pub const DEFAULT_EXPANSION: [RelationType; 3] = [
        RelationType::CausedBy,
        RelationType::ResolvedBy,
        RelationType::Related,
    ];
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// AGENT SCOPE
// ============================================================================

/// The shared pool tag: fragments owned by `default` are visible to everyone
pub const SHARED_POOL: &str = "default";

/// Caller identity used for row visibility.
///
/// A fragment is visible iff its owner equals the caller's agent id, equals
/// the shared pool tag, or the caller holds a maintenance scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentScope {
    /// The calling agent's id (owner tag for writes)
    pub agent_id: String,
    /// Maintenance principals (`system`, `admin`) see every row
    pub maintenance: bool,
}

impl AgentScope {
    /// Scope for a normal agent caller
    pub fn agent(agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        let maintenance = agent_id == "system" || agent_id == "admin";
        Self { agent_id, maintenance }
    }

    /// Scope for maintenance sweeps (Consolidator, Evaluator)
    pub fn maintenance() -> Self {
        Self {
            agent_id: "system".to_string(),
            maintenance: true,
        }
    }

    /// Check whether a row owned by `owner` is visible under this scope
    pub fn can_see(&self, owner: &str) -> bool {
        self.maintenance || owner == self.agent_id || owner == SHARED_POOL
    }
}

impl Default for AgentScope {
    fn default() -> Self {
        Self::agent(SHARED_POOL)
    }
}

// ============================================================================
// FRAGMENT
// ============================================================================

/// A memory fragment: the unit of storage and retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    /// Opaque identifier, `frag-<16 hex>`; stable across amendments
    pub id: String,
    /// Redacted, truncated text (at most 300 chars plus ellipsis marker)
    pub content: String,
    /// Free-form categorical label, scoped per agent
    pub topic: String,
    /// Unique lowercase terms; auto-extracted when the caller omits them
    pub keywords: Vec<String>,
    /// Fragment type driving defaults and lifecycle policy
    #[serde(rename = "type")]
    pub fragment_type: FragmentType,
    /// Importance in [0, 1]
    pub importance: f64,
    /// 16-hex prefix of SHA-256 over the redacted, truncated content
    pub content_hash: String,
    /// Optional provenance string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Mirror of outgoing edges for fast one-hop fetch. Materialised from
    /// the edge table; never authoritative.
    pub linked_to: Vec<String>,
    /// Owner tag; `default` is the shared pool
    pub agent_id: String,
    /// Monotonically non-decreasing retrieval counter
    pub access_count: i64,
    /// Wall-clock of last retrieval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessed_at: Option<DateTime<Utc>>,
    /// Wall-clock of first insert
    pub created_at: DateTime<Utc>,
    /// Lifecycle bucket
    pub ttl_tier: TtlTier,
    /// Token estimate (cl100k tokenizer, char/4 fallback)
    pub estimated_tokens: i64,
    /// `importance * (1 + ln(max(access_count, 1)))`, default 1.0
    pub utility_score: f64,
    /// Wall-clock of last quality check
    pub verified_at: DateTime<Utc>,
    /// Whether a semantic embedding is stored for this fragment
    pub has_embedding: bool,
    /// Anchored fragments are exempt from decay, demotion and expiry
    pub is_anchor: bool,
}

impl Fragment {
    /// Mint a new fragment id: `frag-` followed by 16 hex chars
    pub fn new_id() -> String {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        format!("frag-{}", &hex[..16])
    }

    /// Validate the id shape (`frag-` plus 16 lowercase hex chars)
    pub fn is_valid_id(id: &str) -> bool {
        id.strip_prefix("frag-")
            .map(|rest| rest.len() == 16 && rest.chars().all(|c| c.is_ascii_hexdigit()))
            .unwrap_or(false)
    }

    /// Age in fractional days as of `now`
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds().max(0) as f64 / 86_400.0
    }

    /// Recency component of the composite score: `max(0, 1 - age/90)`
    pub fn recency(&self, now: DateTime<Utc>) -> f64 {
        (1.0 - self.age_days(now) / 90.0).max(0.0)
    }

    /// Recompute the utility score from importance and access count
    pub fn computed_utility(&self) -> f64 {
        self.importance * (1.0 + (self.access_count.max(1) as f64).ln())
    }
}

// ============================================================================
// LINKS AND VERSIONS
// ============================================================================

/// Directed typed edge between two fragments, unique per ordered pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentLink {
    pub from_id: String,
    pub to_id: String,
    pub relation_type: RelationType,
    pub created_at: DateTime<Utc>,
}

/// Pre-amendment snapshot, append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentVersion {
    pub fragment_id: String,
    pub content: String,
    pub topic: String,
    pub keywords: Vec<String>,
    #[serde(rename = "type")]
    pub fragment_type: FragmentType,
    pub importance: f64,
    pub amended_at: DateTime<Utc>,
    pub amended_by: String,
}

// ============================================================================
// FEEDBACK RECORDS
// ============================================================================

/// How a piece of tool feedback was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackTrigger {
    /// The agent was asked to rate a sampled call
    Sampled,
    /// The agent volunteered the feedback
    #[default]
    Voluntary,
}

impl FeedbackTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackTrigger::Sampled => "sampled",
            FeedbackTrigger::Voluntary => "voluntary",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "sampled" => FeedbackTrigger::Sampled,
            _ => FeedbackTrigger::Voluntary,
        }
    }
}

/// Per-call tool feedback from the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolFeedback {
    pub tool_name: String,
    pub relevant: bool,
    pub sufficient: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub trigger_type: FeedbackTrigger,
    pub created_at: DateTime<Utc>,
}

/// Session-level task feedback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFeedback {
    pub session_id: String,
    pub overall_success: bool,
    pub tool_highlights: Vec<String>,
    pub tool_pain_points: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// RETRIEVAL TYPES
// ============================================================================

/// Staleness annotation attached on recall when a fragment has not been
/// verified within its type's window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleInfo {
    pub stale: bool,
    pub warning: String,
    pub days_since_verification: i64,
}

/// A fragment as returned from the retrieval cascade
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredFragment {
    #[serde(flatten)]
    pub fragment: Fragment,
    /// Cosine similarity when the fragment came through the semantic tier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    /// Composite (or importance) ranking score
    pub score: f64,
    /// Stale annotation, present only when the verification window lapsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale: Option<StaleInfo>,
}

impl ScoredFragment {
    /// Wrap a bare fragment with no similarity and a zero score
    pub fn plain(fragment: Fragment) -> Self {
        Self {
            fragment,
            similarity: None,
            score: 0.0,
            stale: None,
        }
    }
}

/// Result of a recall: ranked fragments, their token total and the
/// human-readable tier trace (e.g. `"L1:3 -> HotCache:1 -> L2:2"`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallResult {
    pub fragments: Vec<ScoredFragment>,
    pub total_tokens: i64,
    pub search_path: String,
    pub count: usize,
}

impl RecallResult {
    /// An empty result with the given trace
    pub fn empty(search_path: String) -> Self {
        Self {
            fragments: Vec::new(),
            total_tokens: 0,
            search_path,
            count: 0,
        }
    }
}

// ============================================================================
// MEMORY STATS
// ============================================================================

/// Aggregate statistics over the fragment store and queues
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_fragments: i64,
    pub by_type: std::collections::HashMap<String, i64>,
    pub by_tier: std::collections::HashMap<String, i64>,
    pub anchors: i64,
    pub with_embedding: i64,
    pub total_links: i64,
    pub pending_evaluations: usize,
    pub pending_contradictions: usize,
}

// ============================================================================
// TESTS
// ============================================================================
