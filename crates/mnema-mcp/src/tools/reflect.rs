//! reflect - project a session recap into typed fragments

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use mnema_core::{MemoryManager, ReflectParams, TaskEffectiveness};

/// Input schema for the reflect tool
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {
                "type": "string",
                "description": "Free-form session recap; split into chained fact fragments"
            },
            "decisions": { "type": "array", "items": { "type": "string" } },
            "errors_resolved": { "type": "array", "items": { "type": "string" } },
            "new_procedures": { "type": "array", "items": { "type": "string" } },
            "open_questions": { "type": "array", "items": { "type": "string" } },
            "task_effectiveness": {
                "type": "object",
                "properties": {
                    "overall_success": { "type": "boolean" },
                    "tool_highlights": { "type": "array", "items": { "type": "string" } },
                    "tool_pain_points": { "type": "array", "items": { "type": "string" } }
                }
            },
            "sessionId": { "type": "string" },
            "agentId": { "type": "string" }
        },
        "required": ["summary"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReflectArgs {
    summary: String,
    #[serde(default, alias = "decisions")]
    decisions: Vec<String>,
    #[serde(default, alias = "errors_resolved")]
    errors_resolved: Vec<String>,
    #[serde(default, alias = "new_procedures")]
    new_procedures: Vec<String>,
    #[serde(default, alias = "open_questions")]
    open_questions: Vec<String>,
    #[serde(alias = "task_effectiveness")]
    task_effectiveness: Option<TaskEffectiveness>,
    session_id: Option<String>,
    agent_id: Option<String>,
}

pub async fn execute(manager: &Arc<MemoryManager>, args: Option<Value>) -> Result<Value, String> {
    let args: ReflectArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };
    let caller = super::scope_from(args.agent_id.as_deref());

    let outcome = manager
        .reflect(
            ReflectParams {
                summary: args.summary,
                session_id: args.session_id,
                decisions: args.decisions,
                errors_resolved: args.errors_resolved,
                new_procedures: args.new_procedures,
                open_questions: args.open_questions,
                task_effectiveness: args.task_effectiveness,
            },
            &caller,
        )
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "created": outcome.created,
        "linksCreated": outcome.links_created,
    }))
}
