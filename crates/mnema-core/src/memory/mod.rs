//! Memory data model and fragment construction

mod factory;
mod fragment;
mod keywords;
mod redaction;
mod tokens;

pub use factory::{content_hash, truncate_content, CreateFragment, FragmentFactory, MAX_CONTENT_CHARS};
pub use fragment::{
    AgentScope, FeedbackTrigger, Fragment, FragmentLink, FragmentType, FragmentVersion,
    MemoryStats, RecallResult, RelationType, ScoredFragment, StaleInfo, TaskFeedback,
    ToolFeedback, TtlTier, SHARED_POOL,
};
pub use keywords::{extract_keywords, normalize_keywords, MAX_KEYWORDS};
pub use redaction::redact;
pub use tokens::{approximate_tokens, estimate_tokens};
