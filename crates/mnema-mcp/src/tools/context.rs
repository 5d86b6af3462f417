//! context - session-bootstrap injection

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use mnema_core::{ContextParams, FragmentType, MemoryManager};

/// Input schema for the context tool
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tokenBudget": {
                "type": "integer",
                "description": "Overall injection budget (default 2000; 65% core, 35% working memory)"
            },
            "types": {
                "type": "array",
                "items": {
                    "type": "string",
                    "enum": ["fact", "decision", "error", "preference", "procedure", "relation"]
                },
                "description": "Core-memory buckets (default preference, error, procedure)"
            },
            "sessionId": { "type": "string" },
            "agentId": { "type": "string" }
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextArgs {
    token_budget: Option<i64>,
    types: Option<Vec<String>>,
    session_id: Option<String>,
    agent_id: Option<String>,
}

pub async fn execute(manager: &Arc<MemoryManager>, args: Option<Value>) -> Result<Value, String> {
    let args: ContextArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => ContextArgs::default(),
    };

    let types: Vec<FragmentType> = match args.types {
        Some(names) => {
            let mut types = Vec::with_capacity(names.len());
            for name in &names {
                types.push(super::parse_type(name)?);
            }
            types
        }
        None => ContextParams::default().types,
    };
    let caller = super::scope_from(args.agent_id.as_deref());

    let outcome = manager
        .context(
            ContextParams {
                token_budget: args.token_budget.unwrap_or(2000),
                types,
                session_id: args.session_id,
            },
            &caller,
        )
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "injectionText": outcome.injection_text,
        "coreCount": outcome.core_count,
        "workingCount": outcome.working_count,
        "estimatedTokens": outcome.estimated_tokens,
        "unreflectedSessions": outcome.unreflected_sessions,
    }))
}
