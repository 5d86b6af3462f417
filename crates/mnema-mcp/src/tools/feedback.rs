//! tool_feedback - capture agent feedback about the memory tools

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use mnema_core::{FeedbackTrigger, MemoryManager, ToolFeedbackParams};

/// Input schema for the tool_feedback tool
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tool_name": { "type": "string" },
            "relevant": { "type": "boolean" },
            "sufficient": { "type": "boolean" },
            "suggestion": {
                "type": "string",
                "description": "How the tool could serve better (max 100 chars)"
            },
            "context": {
                "type": "string",
                "description": "What the call was for (max 50 chars)"
            },
            "session_id": { "type": "string" },
            "trigger_type": { "type": "string", "enum": ["sampled", "voluntary"] }
        },
        "required": ["tool_name", "relevant", "sufficient"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct FeedbackArgs {
    tool_name: String,
    relevant: bool,
    sufficient: bool,
    suggestion: Option<String>,
    context: Option<String>,
    session_id: Option<String>,
    trigger_type: Option<String>,
    #[serde(alias = "agentId")]
    agent_id: Option<String>,
}

pub async fn execute(manager: &Arc<MemoryManager>, args: Option<Value>) -> Result<Value, String> {
    let args: FeedbackArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };
    let _ = args.agent_id; // feedback is not row-scoped

    manager
        .tool_feedback(ToolFeedbackParams {
            tool_name: args.tool_name,
            relevant: args.relevant,
            sufficient: args.sufficient,
            suggestion: args.suggestion,
            context: args.context,
            session_id: args.session_id,
            trigger_type: args
                .trigger_type
                .as_deref()
                .map(FeedbackTrigger::parse_name)
                .unwrap_or_default(),
        })
        .map_err(|e| e.to_string())?;

    Ok(json!({ "recorded": true }))
}
