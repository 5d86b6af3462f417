//! memory_stats and memory_consolidate

use serde_json::{json, Value};
use std::sync::Arc;

use mnema_core::MemoryManager;

/// Input schema for memory_stats (no parameters)
pub fn stats_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Input schema for memory_consolidate (no parameters)
pub fn consolidate_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub async fn execute_stats(
    manager: &Arc<MemoryManager>,
    _args: Option<Value>,
) -> Result<Value, String> {
    let stats = manager.stats().map_err(|e| e.to_string())?;
    serde_json::to_value(stats).map_err(|e| e.to_string())
}

pub async fn execute_consolidate(
    manager: &Arc<MemoryManager>,
    _args: Option<Value>,
) -> Result<Value, String> {
    let report = manager.consolidate().await;
    serde_json::to_value(report).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::test_manager;

    #[tokio::test]
    async fn test_stats_counts_fragments() {
        let (manager, _dir) = test_manager();
        crate::tools::remember::execute(
            &manager,
            Some(json!({ "content": "one fact body", "topic": "t", "type": "fact" })),
        )
        .await
        .unwrap();

        let stats = execute_stats(&manager, None).await.unwrap();
        assert_eq!(stats["totalFragments"], 1);
        assert_eq!(stats["byType"]["fact"], 1);
    }

    #[tokio::test]
    async fn test_consolidate_returns_report() {
        let (manager, _dir) = test_manager();
        let report = execute_consolidate(&manager, None).await.unwrap();
        assert!(report["durationMs"].is_i64() || report["durationMs"].is_u64());
        assert_eq!(report["errors"].as_array().unwrap().len(), 0);
    }
}
