//! # Mnema Core
//!
//! Fragment memory engine for stateless language-model agents:
//!
//! - **Fragments**: short, typed, PII-redacted knowledge records with a
//!   content-hash dedup identity and a typed link graph
//! - **Cascaded retrieval**: in-memory keyword sets, durable array
//!   overlap, then HNSW cosine similarity, merged under one composite
//!   ranking and a caller token budget
//! - **Lifecycle**: importance decay, TTL tier transitions, expiry,
//!   anchors, background LLM quality evaluation
//! - **Consolidation**: an eleven-stage maintenance pipeline with hybrid
//!   NLI + LLM contradiction detection
//! - **Sessions**: per-session activity tracking, working memory and
//!   auto-reflection into durable fragments
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use mnema_core::prelude::*;
//! use std::sync::Arc;
//!
//! let config = MemoryConfig::default();
//! let embedder: Arc<dyn Embedder> = Arc::new(LocalEmbedder::new());
//! let store = Arc::new(FragmentStore::new(None, embedder, config.embedding_dims)?);
//! let manager = MemoryManager::new(
//!     store,
//!     Arc::new(MemoryIndex::new(config.wm_max_tokens)),
//!     Arc::new(ActivityTracker::new()),
//!     Arc::new(DisabledNli),
//!     Arc::new(DisabledLlm),
//!     config,
//! );
//!
//! let outcome = manager.remember(
//!     RememberParams {
//!         content: "Redis NOAUTH indicates missing REDIS_PASSWORD.".into(),
//!         topic: "redis".into(),
//!         fragment_type: FragmentType::Error,
//!         ..Default::default()
//!     },
//!     &AgentScope::agent("default"),
//! )?;
//! ```
//!
//! ## Feature flags
//!
//! - `embeddings` (default): local embedding generation with fastembed
//! - `vector-search` (default): HNSW vector index with USearch
//! - `local-nli`: in-process NLI inference via ONNX Runtime

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod consolidation;
pub mod embeddings;
pub mod error;
pub mod evaluator;
pub mod index;
pub mod llm;
pub mod manager;
pub mod memory;
pub mod nli;
pub mod search;
pub mod session;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::MemoryConfig;
pub use error::{MemoryError, Result};

pub use memory::{
    AgentScope, CreateFragment, FeedbackTrigger, Fragment, FragmentFactory, FragmentLink,
    FragmentType, FragmentVersion, MemoryStats, RecallResult, RelationType, ScoredFragment,
    StaleInfo, TaskFeedback, ToolFeedback, TtlTier, SHARED_POOL,
};

pub use index::{EvalJob, MemoryIndex, PendingContradiction, WorkingEntry};

pub use storage::{
    FragmentPatch, FragmentStore, InsertOutcome, KeywordFilter, RcaNode, UpdateOutcome,
};

pub use search::{FragmentSearch, RecallQuery, VectorIndex};

pub use embeddings::{cosine_similarity, DisabledEmbedder, Embedder};

#[cfg(feature = "embeddings")]
pub use embeddings::LocalEmbedder;

pub use nli::{
    detect_contradiction, ContradictionVerdict, DisabledNli, HttpNli, NliLabel, NliModel,
    NliScores,
};

pub use llm::{DisabledLlm, HttpLlm, LlmClient};

pub use evaluator::Evaluator;

pub use consolidation::{ConsolidationReport, Consolidator, StaleSummary};

pub use session::{ActivityTracker, AutoReflector, SessionActivity};

pub use manager::{
    AmendOutcome, AmendParams, ConflictNote, ContextOutcome, ContextParams, ForgetOutcome,
    ForgetParams, MemoryManager, MemoryScope, ReflectOutcome, ReflectParams, RememberOutcome,
    RememberParams, TaskEffectiveness, ToolFeedbackParams,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        ActivityTracker, AgentScope, AutoReflector, ConsolidationReport, Consolidator,
        DisabledEmbedder, DisabledLlm, DisabledNli, Embedder, Evaluator, Fragment,
        FragmentFactory, FragmentStore, FragmentType, LlmClient, MemoryConfig, MemoryError,
        MemoryIndex, MemoryManager, MemoryScope, NliModel, RecallQuery, RecallResult,
        ReflectParams, RelationType, RememberParams, Result, TtlTier,
    };

    #[cfg(feature = "embeddings")]
    pub use crate::LocalEmbedder;
}
