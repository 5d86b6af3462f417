//! Tool handlers for the eleven memory operations
//!
//! Each module exposes `schema()` for tools/list and `execute()` for
//! tools/call. Handlers return `Result<Value, String>`; the server wraps
//! either side into the tool-result envelope.

pub mod amend;
pub mod context;
pub mod feedback;
pub mod forget;
pub mod graph;
pub mod link;
pub mod maintenance;
pub mod recall;
pub mod reflect;
pub mod remember;

use mnema_core::{AgentScope, FragmentType, SHARED_POOL};

/// Resolve the caller's scope from an optional `agentId`
pub(crate) fn scope_from(agent_id: Option<&str>) -> AgentScope {
    AgentScope::agent(agent_id.unwrap_or(SHARED_POOL))
}

/// Parse a fragment type name, with a caller-friendly error
pub(crate) fn parse_type(name: &str) -> Result<FragmentType, String> {
    FragmentType::parse_name(name).ok_or_else(|| {
        format!(
            "invalid type '{}' (expected one of fact|decision|error|preference|procedure|relation)",
            name
        )
    })
}

// ============================================================================
// TEST SUPPORT
// ============================================================================
