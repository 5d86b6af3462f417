//! amend - archive-and-update a fragment

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use mnema_core::{AmendParams, MemoryManager};

/// Input schema for the amend tool
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string" },
            "content": { "type": "string" },
            "topic": { "type": "string" },
            "keywords": { "type": "array", "items": { "type": "string" } },
            "type": {
                "type": "string",
                "enum": ["fact", "decision", "error", "preference", "procedure", "relation"]
            },
            "importance": { "type": "number" },
            "isAnchor": { "type": "boolean" },
            "supersedes": {
                "type": "string",
                "description": "Id of an older fragment this amendment supersedes (its importance drops to 0.3)"
            },
            "agentId": { "type": "string" }
        },
        "required": ["id"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmendArgs {
    id: String,
    content: Option<String>,
    topic: Option<String>,
    keywords: Option<Vec<String>>,
    #[serde(rename = "type")]
    fragment_type: Option<String>,
    importance: Option<f64>,
    is_anchor: Option<bool>,
    supersedes: Option<String>,
    agent_id: Option<String>,
}

pub async fn execute(manager: &Arc<MemoryManager>, args: Option<Value>) -> Result<Value, String> {
    let args: AmendArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };

    let fragment_type = match args.fragment_type.as_deref() {
        Some(name) => Some(super::parse_type(name)?),
        None => None,
    };
    let caller = super::scope_from(args.agent_id.as_deref());

    let outcome = manager
        .amend(
            AmendParams {
                id: args.id,
                content: args.content,
                topic: args.topic,
                keywords: args.keywords,
                fragment_type,
                importance: args.importance,
                is_anchor: args.is_anchor,
                supersedes: args.supersedes,
            },
            &caller,
        )
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "updated": outcome.updated,
        "merged": outcome.merged,
        "existingId": outcome.existing_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::test_manager;

    #[tokio::test]
    async fn test_amend_updates_content() {
        let (manager, _dir) = test_manager();
        let created = crate::tools::remember::execute(
            &manager,
            Some(json!({ "content": "Node 20 is required.", "topic": "stack", "type": "fact" })),
        )
        .await
        .unwrap();
        let id = created["id"].as_str().unwrap();

        let result = execute(
            &manager,
            Some(json!({ "id": id, "content": "Node 22 is required." })),
        )
        .await
        .unwrap();
        assert_eq!(result["updated"], true);
        assert_eq!(result["merged"], false);
    }

    #[tokio::test]
    async fn test_amend_collision_reports_merge_target() {
        let (manager, _dir) = test_manager();
        let a = crate::tools::remember::execute(
            &manager,
            Some(json!({ "content": "Node 20 is required.", "topic": "stack", "type": "fact" })),
        )
        .await
        .unwrap();
        let b = crate::tools::remember::execute(
            &manager,
            Some(json!({ "content": "Use Node 22 instead.", "topic": "stack", "type": "fact" })),
        )
        .await
        .unwrap();

        let result = execute(
            &manager,
            Some(json!({
                "id": a["id"],
                "content": "Use Node 22 instead."
            })),
        )
        .await
        .unwrap();
        assert_eq!(result["updated"], false);
        assert_eq!(result["merged"], true);
        assert_eq!(result["existingId"], b["id"]);
    }

    #[tokio::test]
    async fn test_amend_unknown_id() {
        let (manager, _dir) = test_manager();
        let result = execute(
            &manager,
            Some(json!({ "id": "frag-00000000000000cc", "content": "x" })),
        )
        .await;
        assert!(result.unwrap_err().contains("Not found"));
    }
}
