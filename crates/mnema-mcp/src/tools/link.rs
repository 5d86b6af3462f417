//! link - create a typed edge between fragments

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use mnema_core::{MemoryManager, RelationType};

/// Input schema for the link tool
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "fromId": { "type": "string" },
            "toId": { "type": "string" },
            "relationType": {
                "type": "string",
                "enum": ["related", "caused_by", "resolved_by", "part_of", "contradicts", "superseded_by"],
                "description": "Edge type (default 'related')"
            },
            "agentId": { "type": "string" }
        },
        "required": ["fromId", "toId"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkArgs {
    from_id: String,
    to_id: String,
    relation_type: Option<String>,
    agent_id: Option<String>,
}

pub async fn execute(manager: &Arc<MemoryManager>, args: Option<Value>) -> Result<Value, String> {
    let args: LinkArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };

    let relation = match args.relation_type.as_deref() {
        Some(name) => RelationType::parse_name(name)
            .ok_or_else(|| format!("invalid relationType '{}'", name))?,
        None => RelationType::Related,
    };
    let caller = super::scope_from(args.agent_id.as_deref());

    manager
        .link(&args.from_id, &args.to_id, relation, &caller)
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "linked": true,
        "fromId": args.from_id,
        "toId": args.to_id,
        "relationType": relation,
    }))
}
