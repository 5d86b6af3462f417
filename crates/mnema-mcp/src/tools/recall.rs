//! recall - run the retrieval cascade

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use mnema_core::{MemoryManager, RecallQuery, RelationType};

/// Input schema for the recall tool
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "keywords": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Exact lookup terms (fast path)"
            },
            "topic": { "type": "string" },
            "type": {
                "type": "string",
                "enum": ["fact", "decision", "error", "preference", "procedure", "relation"]
            },
            "text": {
                "type": "string",
                "description": "Free text; enables the semantic tier when keyword tiers come up short"
            },
            "minImportance": { "type": "number" },
            "tokenBudget": {
                "type": "integer",
                "description": "Ceiling on returned fragment tokens (default 1000)"
            },
            "includeLinks": {
                "type": "boolean",
                "description": "Expand one hop along the link graph (default true)"
            },
            "linkRelationType": {
                "type": "string",
                "enum": ["related", "caused_by", "resolved_by", "part_of", "contradicts", "superseded_by"]
            },
            "threshold": {
                "type": "number",
                "description": "Drop semantically-scored results below this similarity"
            },
            "sessionId": { "type": "string" },
            "agentId": { "type": "string" }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecallArgs {
    #[serde(default)]
    keywords: Vec<String>,
    topic: Option<String>,
    #[serde(rename = "type")]
    fragment_type: Option<String>,
    text: Option<String>,
    min_importance: Option<f64>,
    token_budget: Option<i64>,
    include_links: Option<bool>,
    link_relation_type: Option<String>,
    threshold: Option<f32>,
    session_id: Option<String>,
    agent_id: Option<String>,
}

pub async fn execute(manager: &Arc<MemoryManager>, args: Option<Value>) -> Result<Value, String> {
    let args: RecallArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => RecallArgs {
            keywords: Vec::new(),
            topic: None,
            fragment_type: None,
            text: None,
            min_importance: None,
            token_budget: None,
            include_links: None,
            link_relation_type: None,
            threshold: None,
            session_id: None,
            agent_id: None,
        },
    };

    let fragment_type = match args.fragment_type.as_deref() {
        Some(name) => Some(super::parse_type(name)?),
        None => None,
    };
    let link_relation_types = match args.link_relation_type.as_deref() {
        Some(name) => {
            let relation = RelationType::parse_name(name)
                .ok_or_else(|| format!("invalid linkRelationType '{}'", name))?;
            Some(vec![relation])
        }
        None => None,
    };
    let caller = super::scope_from(args.agent_id.as_deref());

    let result = manager
        .recall(
            RecallQuery {
                keywords: args.keywords,
                topic: args.topic,
                fragment_type,
                text: args.text,
                min_importance: args.min_importance,
                token_budget: args.token_budget,
                include_links: args.include_links,
                link_relation_types,
                threshold: args.threshold,
            },
            args.session_id.as_deref(),
            &caller,
        )
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "fragments": result.fragments,
        "totalTokens": result.total_tokens,
        "searchPath": result.search_path,
        "count": result.count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::test_manager;

    async fn seed(manager: &Arc<MemoryManager>) {
        crate::tools::remember::execute(
            manager,
            Some(json!({
                "content": "Redis NOAUTH indicates missing REDIS_PASSWORD.",
                "topic": "redis",
                "type": "error"
            })),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_recall_by_keywords() {
        let (manager, _dir) = test_manager();
        seed(&manager).await;

        let result = execute(
            &manager,
            Some(json!({ "keywords": ["redis", "noauth"] })),
        )
        .await
        .unwrap();

        assert_eq!(result["count"], 1);
        assert!(result["searchPath"].as_str().unwrap().starts_with("L1:"));
        assert!(result["totalTokens"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_recall_with_no_args_returns_recent() {
        let (manager, _dir) = test_manager();
        seed(&manager).await;
        let result = execute(&manager, None).await.unwrap();
        assert_eq!(result["count"], 1);
    }

    #[tokio::test]
    async fn test_recall_rejects_bad_relation() {
        let (manager, _dir) = test_manager();
        let result = execute(
            &manager,
            Some(json!({ "linkRelationType": "'; DROP TABLE" })),
        )
        .await;
        assert!(result.unwrap_err().contains("invalid linkRelationType"));
    }
}
