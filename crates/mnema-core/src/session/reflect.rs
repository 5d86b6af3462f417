//! Auto-Reflect orchestrator
//!
//! Triggered on session close, expiry and server shutdown. Reads the
//! session's activity log and either asks the LLM for a structured
//! summary (projected through `MemoryManager::reflect`) or, with no LLM
//! reachable, stores a single minimal metadata fact. Either way the
//! session ends up marked reflected.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::manager::{MemoryManager, MemoryScope, ReflectParams, RememberParams};
use crate::memory::{AgentScope, FragmentType};
use crate::session::SessionActivity;

#[derive(Debug, Deserialize)]
struct StructuredReflection {
    summary: String,
    #[serde(default)]
    decisions: Vec<String>,
    #[serde(default)]
    errors_resolved: Vec<String>,
    #[serde(default)]
    new_procedures: Vec<String>,
    #[serde(default)]
    open_questions: Vec<String>,
}

/// Session-end summariser
pub struct AutoReflector {
    manager: Arc<MemoryManager>,
}

impl AutoReflector {
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }

    /// Reflect one session. Returns whether any fragments were written.
    pub async fn reflect_session(&self, session_id: &str, scope: &AgentScope) -> bool {
        let Some(activity) = self.manager.activity().get(session_id) else {
            return false;
        };
        if activity.reflected || activity.tool_calls.is_empty() {
            self.manager.activity().mark_reflected(session_id);
            return false;
        }

        let wrote = if self.manager.llm().is_available() {
            match self.structured_reflect(session_id, &activity, scope).await {
                Some(wrote) => wrote,
                None => self.minimal_reflect(session_id, &activity, scope),
            }
        } else {
            self.minimal_reflect(session_id, &activity, scope)
        };

        self.manager.activity().mark_reflected(session_id);
        wrote
    }

    /// Reflect every idle, unreflected session (shutdown and the
    /// periodic maintenance tick)
    pub async fn reflect_idle_sessions(&self, limit: usize, scope: &AgentScope) -> usize {
        let sessions = self.manager.activity().unreflected_sessions(limit);
        let mut reflected = 0;
        for session_id in sessions {
            if self.reflect_session(&session_id, scope).await {
                reflected += 1;
            }
        }
        reflected
    }

    async fn structured_reflect(
        &self,
        session_id: &str,
        activity: &SessionActivity,
        scope: &AgentScope,
    ) -> Option<bool> {
        let prompt = format!(
            "An agent session is ending. Summarise what should be remembered.\n\n\
             Tool calls: {}\nRecent keywords: {}\nFragments touched: {}\n\n\
             Reply with JSON: {{\"summary\": \"<2-3 sentences>\", \
             \"decisions\": [..], \"errors_resolved\": [..], \
             \"new_procedures\": [..], \"open_questions\": [..]}}",
            activity.tool_summary(),
            activity.keywords.join(", "),
            activity.fragments.len()
        );

        let value = self
            .manager
            .llm()
            .complete_json(&prompt, self.manager.config().llm_timeout)
            .await?;
        let reflection: StructuredReflection = serde_json::from_value(value).ok()?;
        if reflection.summary.trim().is_empty() {
            return Some(false);
        }

        match self.manager.reflect(
            ReflectParams {
                summary: reflection.summary,
                session_id: Some(session_id.to_string()),
                decisions: reflection.decisions,
                errors_resolved: reflection.errors_resolved,
                new_procedures: reflection.new_procedures,
                open_questions: reflection.open_questions,
                task_effectiveness: None,
            },
            scope,
        ) {
            Ok(outcome) => Some(!outcome.created.is_empty()),
            Err(e) => {
                tracing::warn!("Structured reflect failed for {}: {}", session_id, e);
                Some(false)
            }
        }
    }

    /// No LLM: store one metadata fact so the session leaves a trace
    fn minimal_reflect(
        &self,
        session_id: &str,
        activity: &SessionActivity,
        scope: &AgentScope,
    ) -> bool {
        let duration = Utc::now() - activity.started_at;
        let minutes = duration.num_minutes().max(0);
        let duration_text = if minutes >= 60 {
            format!("{}h {}m", minutes / 60, minutes % 60)
        } else {
            format!("{}m", minutes)
        };

        let content = format!(
            "session {}: {}, tools={}, fragments={}",
            session_id,
            duration_text,
            activity.tool_summary(),
            activity.fragments.len()
        );

        match self.manager.remember(
            RememberParams {
                content,
                topic: "session-summary".to_string(),
                fragment_type: FragmentType::Fact,
                scope: MemoryScope::Permanent,
                session_id: Some(session_id.to_string()),
                ..Default::default()
            },
            scope,
        ) {
            Ok(outcome) => outcome.created,
            Err(e) => {
                tracing::warn!("Minimal reflect failed for {}: {}", session_id, e);
                false
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
