//! forget - delete fragments by id or topic

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use mnema_core::{ForgetParams, MemoryManager};

/// Input schema for the forget tool
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "description": "Fragment id to delete" },
            "topic": { "type": "string", "description": "Delete every visible fragment under this topic" },
            "force": {
                "type": "boolean",
                "description": "Required to delete permanent-tier fragments"
            },
            "agentId": { "type": "string" }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForgetArgs {
    id: Option<String>,
    topic: Option<String>,
    #[serde(default)]
    force: bool,
    agent_id: Option<String>,
}

pub async fn execute(manager: &Arc<MemoryManager>, args: Option<Value>) -> Result<Value, String> {
    let args: ForgetArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments: id or topic is required".to_string()),
    };
    let caller = super::scope_from(args.agent_id.as_deref());

    let outcome = manager
        .forget(
            ForgetParams {
                id: args.id,
                topic: args.topic,
                force: args.force,
            },
            &caller,
        )
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "deleted": outcome.deleted,
        "protected": outcome.protected,
    }))
}
