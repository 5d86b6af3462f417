//! Server core
//!
//! Routes JSON-RPC requests to the eleven tool handlers. The surface is
//! MCP-shaped: initialize, tools/list, tools/call. Unknown tools answer
//! with -32601.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
use crate::tools;
use mnema_core::MemoryManager;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InitializeRequest {
    protocol_version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    server_info: ServerInfo,
    capabilities: ServerCapabilities,
    instructions: String,
}

#[derive(Debug, Serialize)]
struct ServerInfo {
    name: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct ServerCapabilities {
    tools: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CallToolRequest {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDescription {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    content: Vec<ToolResultContent>,
    is_error: bool,
}

// ============================================================================
// SERVER
// ============================================================================

/// The JSON-RPC server over the memory facade
pub struct McpServer {
    manager: Arc<MemoryManager>,
    initialized: bool,
}

impl McpServer {
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self {
            manager,
            initialized: false,
        }
    }

    /// Handle one request; notifications return `None`
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("Handling request: {}", request.method);

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!("Rejecting '{}': server not initialized", request.method);
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            method => {
                warn!("Unknown method: {}", method);
                Err(JsonRpcError::method_not_found())
            }
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => InitializeRequest::default(),
        };

        // Use the client's version when it is older than ours
        let negotiated = if !request.protocol_version.is_empty()
            && request.protocol_version.as_str() < PROTOCOL_VERSION
        {
            request.protocol_version
        } else {
            PROTOCOL_VERSION.to_string()
        };

        self.initialized = true;
        info!("Session initialized with protocol version {}", negotiated);

        let result = InitializeResult {
            protocol_version: negotiated,
            server_info: ServerInfo {
                name: "mnema".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: {
                    let mut map = HashMap::new();
                    map.insert("listChanged".to_string(), serde_json::json!(false));
                    map
                },
            },
            instructions: "Mnema is the agent's persistent memory. Store knowledge with \
                'remember', fetch it with 'recall', and call 'reflect' with a short recap \
                before the session ends. 'context' returns the bootstrap injection for a \
                fresh session."
                .to_string(),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let tools = vec![
            ToolDescription {
                name: "remember".to_string(),
                description: "Store an atomic knowledge fragment. Content is PII-redacted, \
                    truncated and deduplicated by content hash; keywords are auto-extracted \
                    when omitted. scope='session' keeps the note in working memory only."
                    .to_string(),
                input_schema: tools::remember::schema(),
            },
            ToolDescription {
                name: "recall".to_string(),
                description: "Retrieve fragments through the tiered cascade (keyword sets, \
                    durable overlap, semantic similarity), ranked and trimmed to a token \
                    budget, with one-hop link expansion and staleness warnings."
                    .to_string(),
                input_schema: tools::recall::schema(),
            },
            ToolDescription {
                name: "forget".to_string(),
                description: "Delete a fragment by id, or every fragment under a topic. \
                    Permanent-tier fragments require force=true."
                    .to_string(),
                input_schema: tools::forget::schema(),
            },
            ToolDescription {
                name: "link".to_string(),
                description: "Create a typed edge between two fragments (related, caused_by, \
                    resolved_by, part_of, contradicts, superseded_by)."
                    .to_string(),
                input_schema: tools::link::schema(),
            },
            ToolDescription {
                name: "amend".to_string(),
                description: "Update a fragment in place. The prior state is archived as a \
                    version; a content collision with another fragment reports merged=true."
                    .to_string(),
                input_schema: tools::amend::schema(),
            },
            ToolDescription {
                name: "reflect".to_string(),
                description: "Project a session recap into typed fragments (facts, decisions, \
                    resolved errors, procedures, open questions) and auto-link them."
                    .to_string(),
                input_schema: tools::reflect::schema(),
            },
            ToolDescription {
                name: "context".to_string(),
                description: "Session bootstrap: core memory (preferences, errors, procedures) \
                    plus this session's working memory under one token budget."
                    .to_string(),
                input_schema: tools::context::schema(),
            },
            ToolDescription {
                name: "tool_feedback".to_string(),
                description: "Record whether a memory tool call was relevant and sufficient, \
                    with an optional suggestion."
                    .to_string(),
                input_schema: tools::feedback::schema(),
            },
            ToolDescription {
                name: "memory_stats".to_string(),
                description: "Aggregate statistics: counts by type and tier, anchors, \
                    embedding coverage, queue depths."
                    .to_string(),
                input_schema: tools::maintenance::stats_schema(),
            },
            ToolDescription {
                name: "memory_consolidate".to_string(),
                description: "Run the maintenance pipeline: tier transitions, decay, expiry, \
                    dedup, embedding backfill, contradiction detection, feedback report."
                    .to_string(),
                input_schema: tools::maintenance::consolidate_schema(),
            },
            ToolDescription {
                name: "graph_explore".to_string(),
                description: "Walk one hop from a fragment along caused_by and resolved_by \
                    edges, annotated with relation and depth."
                    .to_string(),
                input_schema: tools::graph::schema(),
            },
        ];

        serde_json::to_value(serde_json::json!({ "tools": tools }))
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("Missing tool call parameters")),
        };

        // Per-session activity log feeds auto-reflect and the context hint
        if let Some(session) = request
            .arguments
            .as_ref()
            .and_then(|a| a.get("sessionId").or_else(|| a.get("session_id")))
            .and_then(|v| v.as_str())
        {
            self.manager.activity().record_tool_call(session, &request.name);
        }

        let manager = &self.manager;
        let result = match request.name.as_str() {
            "remember" => tools::remember::execute(manager, request.arguments).await,
            "recall" => tools::recall::execute(manager, request.arguments).await,
            "forget" => tools::forget::execute(manager, request.arguments).await,
            "link" => tools::link::execute(manager, request.arguments).await,
            "amend" => tools::amend::execute(manager, request.arguments).await,
            "reflect" => tools::reflect::execute(manager, request.arguments).await,
            "context" => tools::context::execute(manager, request.arguments).await,
            "tool_feedback" => tools::feedback::execute(manager, request.arguments).await,
            "memory_stats" => tools::maintenance::execute_stats(manager, request.arguments).await,
            "memory_consolidate" => {
                tools::maintenance::execute_consolidate(manager, request.arguments).await
            }
            "graph_explore" => tools::graph::execute(manager, request.arguments).await,
            name => return Err(JsonRpcError::unknown_tool(name)),
        };

        let call_result = match result {
            Ok(content) => CallToolResult {
                content: vec![ToolResultContent {
                    content_type: "text".to_string(),
                    text: serde_json::to_string_pretty(&content)
                        .unwrap_or_else(|_| content.to_string()),
                }],
                is_error: false,
            },
            Err(message) => CallToolResult {
                content: vec![ToolResultContent {
                    content_type: "text".to_string(),
                    text: serde_json::json!({ "error": message }).to_string(),
                }],
                is_error: true,
            },
        };

        serde_json::to_value(call_result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
