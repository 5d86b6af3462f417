//! remember - store a fragment

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use mnema_core::{MemoryManager, MemoryScope, RememberParams};

/// Input schema for the remember tool
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "The knowledge to store (PII is redacted, text is truncated to 300 chars)"
            },
            "topic": {
                "type": "string",
                "description": "Categorical label, e.g. 'redis' or 'deploy'"
            },
            "type": {
                "type": "string",
                "enum": ["fact", "decision", "error", "preference", "procedure", "relation"],
                "description": "Fragment type; drives default importance and lifecycle"
            },
            "keywords": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Lookup terms; auto-extracted when omitted"
            },
            "importance": {
                "type": "number",
                "description": "0.0-1.0; defaults per type"
            },
            "source": { "type": "string", "description": "Provenance" },
            "linkedTo": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Fragment ids to link as related"
            },
            "scope": {
                "type": "string",
                "enum": ["permanent", "session"],
                "description": "'session' keeps the note in working memory only"
            },
            "isAnchor": {
                "type": "boolean",
                "description": "Anchored fragments never decay, demote or expire"
            },
            "sessionId": { "type": "string" },
            "agentId": { "type": "string" }
        },
        "required": ["content", "topic", "type"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RememberArgs {
    content: String,
    topic: String,
    #[serde(rename = "type")]
    fragment_type: String,
    #[serde(default)]
    keywords: Vec<String>,
    importance: Option<f64>,
    source: Option<String>,
    #[serde(default)]
    linked_to: Vec<String>,
    scope: Option<String>,
    #[serde(default)]
    is_anchor: bool,
    session_id: Option<String>,
    agent_id: Option<String>,
}

pub async fn execute(manager: &Arc<MemoryManager>, args: Option<Value>) -> Result<Value, String> {
    let args: RememberArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };

    let fragment_type = super::parse_type(&args.fragment_type)?;
    let scope_kind = match args.scope.as_deref() {
        None | Some("permanent") => MemoryScope::Permanent,
        Some("session") => MemoryScope::Session,
        Some(other) => return Err(format!("invalid scope '{}'", other)),
    };
    let caller = super::scope_from(args.agent_id.as_deref());

    let outcome = manager
        .remember(
            RememberParams {
                content: args.content,
                topic: args.topic,
                keywords: args.keywords,
                fragment_type,
                importance: args.importance,
                source: args.source,
                linked_to: args.linked_to,
                scope: scope_kind,
                is_anchor: args.is_anchor,
                session_id: args.session_id,
            },
            &caller,
        )
        .map_err(|e| e.to_string())?;

    Ok(json!({
        "id": outcome.id,
        "created": outcome.created,
        "keywords": outcome.keywords,
        "ttlTier": outcome.ttl_tier,
        "scope": outcome.scope,
        "conflicts": outcome.conflicts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::test_manager;

    #[test]
    fn test_schema_requires_content_topic_type() {
        let schema = schema();
        let required = schema["required"].as_array().unwrap();
        for field in ["content", "topic", "type"] {
            assert!(required.contains(&json!(field)));
        }
    }

    #[tokio::test]
    async fn test_execute_stores_fragment() {
        let (manager, _dir) = test_manager();
        let result = execute(
            &manager,
            Some(json!({
                "content": "Redis NOAUTH indicates missing REDIS_PASSWORD.",
                "topic": "redis",
                "type": "error"
            })),
        )
        .await
        .unwrap();

        assert_eq!(result["created"], true);
        assert_eq!(result["ttlTier"], "hot");
        assert!(result["id"].as_str().unwrap().starts_with("frag-"));
    }

    #[tokio::test]
    async fn test_execute_rejects_bad_type() {
        let (manager, _dir) = test_manager();
        let result = execute(
            &manager,
            Some(json!({
                "content": "x",
                "topic": "t",
                "type": "opinion"
            })),
        )
        .await;
        assert!(result.unwrap_err().contains("invalid type"));
    }

    #[tokio::test]
    async fn test_execute_missing_args() {
        let (manager, _dir) = test_manager();
        assert!(execute(&manager, None).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_returns_created_false() {
        let (manager, _dir) = test_manager();
        let args = json!({
            "content": "Node 20 is required.",
            "topic": "stack",
            "type": "fact"
        });
        let first = execute(&manager, Some(args.clone())).await.unwrap();
        let second = execute(&manager, Some(args)).await.unwrap();
        assert_eq!(second["created"], false);
        assert_eq!(second["id"], first["id"]);
    }
}
