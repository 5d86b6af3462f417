//! graph_explore - one-hop root-cause walk

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use mnema_core::MemoryManager;

/// Input schema for the graph_explore tool
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "startId": {
                "type": "string",
                "description": "Fragment to walk from (follows caused_by and resolved_by)"
            },
            "agentId": { "type": "string" }
        },
        "required": ["startId"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphArgs {
    start_id: String,
    agent_id: Option<String>,
}

pub async fn execute(manager: &Arc<MemoryManager>, args: Option<Value>) -> Result<Value, String> {
    let args: GraphArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };
    let caller = super::scope_from(args.agent_id.as_deref());

    let chain = manager
        .graph_explore(&args.start_id, &caller)
        .map_err(|e| e.to_string())?;
    let count = chain.len();

    Ok(json!({
        "chain": chain,
        "count": count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::test_manager;

    #[tokio::test]
    async fn test_graph_explore_walks_one_hop() {
        let (manager, _dir) = test_manager();
        let error = crate::tools::remember::execute(
            &manager,
            Some(json!({ "content": "Boot loop after deploy.", "topic": "ops", "type": "error" })),
        )
        .await
        .unwrap();
        let cause = crate::tools::remember::execute(
            &manager,
            Some(json!({ "content": "Missing migration step.", "topic": "ops", "type": "fact" })),
        )
        .await
        .unwrap();
        crate::tools::link::execute(
            &manager,
            Some(json!({
                "fromId": error["id"],
                "toId": cause["id"],
                "relationType": "caused_by"
            })),
        )
        .await
        .unwrap();

        let result = execute(&manager, Some(json!({ "startId": error["id"] })))
            .await
            .unwrap();
        assert_eq!(result["count"], 2);
        let chain = result["chain"].as_array().unwrap();
        assert_eq!(chain[0]["depth"], 0);
        assert_eq!(chain[1]["depth"], 1);
        assert_eq!(chain[1]["relation"], "caused_by");
    }

    #[tokio::test]
    async fn test_graph_explore_rejects_malformed_id() {
        let (manager, _dir) = test_manager();
        let result = execute(&manager, Some(json!({ "startId": "not-an-id" }))).await;
        assert!(result.unwrap_err().contains("malformed"));
    }
}
