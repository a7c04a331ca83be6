// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The §4.6 tool-bridge: an MCP [`ServerHandler`] that speaks stdio to the
//! child CLI and turns every `tools/call` into one [`IpcClient`] round trip
//! against the host's Unix socket. A fresh process runs this for each
//! built-in server name in the agent's manifest (`clade tool-bridge --server
//! <name>`); no state survives past one call.
use std::borrow::Cow;
use std::sync::Arc;

use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ErrorCode, JsonObject, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool as McpTool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ErrorData as McpError;
use rmcp::ServiceExt;
use serde_json::{json, Value};

use crate::client::IpcClient;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("MCP transport error: {0}")]
    Transport(String),
}

/// Runs `server` on stdio until the parent CLI process closes stdin. Called
/// once by the `clade tool-bridge --server <name>` subcommand; never
/// returns while the connection is live.
pub async fn serve_stdio(server: ToolBridgeServer) -> Result<(), BridgeError> {
    let running = server
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await
        .map_err(|e| BridgeError::Transport(e.to_string()))?;
    running
        .waiting()
        .await
        .map_err(|e| BridgeError::Transport(e.to_string()))?;
    Ok(())
}

/// MCP tools every built-in server exposes, regardless of name: thin wrappers
/// around `sessions.*` and `agents.list`.
const BASE_TOOLS: &[(&str, &str)] = &[
    ("spawn_session", "Start a new session for an agent and run one turn."),
    ("send_to_session", "Send a follow-up message to an existing session."),
    ("session_status", "Look up a session's current status."),
    ("list_sessions", "List active sessions."),
];

/// Extra tools only the `admin` built-in server exposes (§4.6: admin is the
/// only preset that carries agent-management and task-queue operations).
const ADMIN_TOOLS: &[(&str, &str)] = &[
    ("list_agents", "List every registered agent and its tool servers."),
    ("schedule_task", "Schedule a deferred task to run after a delay."),
    ("cancel_task", "Cancel a pending deferred task."),
    ("list_tasks", "List deferred tasks, optionally filtered by agent."),
];

pub struct ToolBridgeServer {
    client: IpcClient,
    server_name: String,
    agent_id: String,
}

impl ToolBridgeServer {
    pub fn new(socket_path: impl Into<std::path::PathBuf>, server_name: String, agent_id: String) -> Self {
        Self {
            client: IpcClient::new(socket_path),
            server_name,
            agent_id,
        }
    }

    fn tool_catalogue(&self) -> &'static [(&'static str, &'static str)] {
        if self.server_name == "admin" {
            ADMIN_TOOLS
        } else {
            &[]
        }
    }

    async fn dispatch(&self, name: &str, args: &Value) -> Result<Value, String> {
        let request = match name {
            "spawn_session" => json!({
                "type": "sessions.spawn",
                "agentId": require_str(args, "agent_id")?,
                "prompt": require_str(args, "prompt")?,
                "parentSessionId": args.get("parent_session_id").and_then(Value::as_str),
                "callingAgentId": Some(self.agent_id.as_str()),
            }),
            "send_to_session" => json!({
                "type": "sessions.send",
                "sessionId": require_str(args, "session_id")?,
                "message": require_str(args, "message")?,
            }),
            "session_status" => json!({
                "type": "sessions.status",
                "sessionId": require_str(args, "session_id")?,
            }),
            "list_sessions" => json!({"type": "sessions.list"}),
            "list_agents" if self.server_name == "admin" => json!({"type": "agents.list"}),
            "schedule_task" if self.server_name == "admin" => json!({
                "type": "taskqueue.schedule",
                "agentId": args.get("agent_id").and_then(Value::as_str).unwrap_or(&self.agent_id),
                "sessionId": args.get("session_id").and_then(Value::as_str),
                "prompt": require_str(args, "prompt")?,
                "description": require_str(args, "description")?,
                "delayMinutes": require_f64(args, "delay_minutes")?,
            }),
            "cancel_task" if self.server_name == "admin" => json!({
                "type": "taskqueue.cancel",
                "taskId": require_str(args, "task_id")?,
                "agentId": self.agent_id.as_str(),
            }),
            "list_tasks" if self.server_name == "admin" => json!({
                "type": "taskqueue.list",
                "agentId": args.get("agent_id").and_then(Value::as_str),
            }),
            other => return Err(format!("unknown tool {other:?} for server {:?}", self.server_name)),
        };

        self.client
            .call(&request)
            .await
            .map_err(|err| err.to_string())
    }
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing required argument {key:?}"))
}

fn require_f64(args: &Value, key: &str) -> Result<f64, String> {
    args.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("missing required argument {key:?}"))
}

fn internal_error(message: impl Into<String>) -> McpError {
    McpError {
        code: ErrorCode::INTERNAL_ERROR,
        message: message.into().into(),
        data: None,
    }
}

fn tool_descriptor(name: &str, description: &str) -> McpTool {
    let schema: JsonObject = serde_json::Map::new();
    McpTool::new(
        Cow::Owned(name.to_string()),
        Cow::Owned(description.to_string()),
        Arc::new(schema),
    )
}

impl ServerHandler for ToolBridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..ServerInfo::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            let tools = BASE_TOOLS
                .iter()
                .chain(self.tool_catalogue())
                .map(|(name, desc)| tool_descriptor(name, desc))
                .collect();
            Ok(ListToolsResult {
                tools,
                next_cursor: None,
                meta: None,
            })
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request
            .arguments
            .map(|m| Value::Object(m.into_iter().collect()))
            .unwrap_or(Value::Object(serde_json::Map::new()));

        let reply = match self.dispatch(&request.name, &args).await {
            Ok(reply) => reply,
            Err(err) => return Err(internal_error(err)),
        };

        let ok = reply.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if ok {
            let text = serde_json::to_string(&reply).unwrap_or_default();
            Ok(CallToolResult::success(vec![Content::text(text)]))
        } else {
            let message = reply
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            Ok(CallToolResult {
                content: vec![Content::text(message)],
                is_error: Some(true),
                structured_content: None,
                meta: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(name: &str) -> ToolBridgeServer {
        ToolBridgeServer::new("/tmp/does-not-matter.sock", name.to_string(), "jarvis".to_string())
    }

    #[test]
    fn non_admin_server_exposes_only_base_tools() {
        let s = server("sessions");
        assert!(s.tool_catalogue().is_empty());
    }

    #[test]
    fn admin_server_exposes_extra_tools() {
        let s = server("admin");
        assert_eq!(s.tool_catalogue().len(), ADMIN_TOOLS.len());
    }

    #[test]
    fn get_info_enables_tools_capability() {
        let s = server("sessions");
        assert!(s.get_info().capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn dispatch_rejects_admin_only_tool_on_non_admin_server() {
        let s = server("sessions");
        let err = s.dispatch("list_agents", &json!({})).await.unwrap_err();
        assert!(err.contains("unknown tool"));
    }

    #[tokio::test]
    async fn dispatch_rejects_missing_required_argument() {
        let s = server("sessions");
        let err = s
            .dispatch("send_to_session", &json!({"message": "hi"}))
            .await
            .unwrap_err();
        assert!(err.contains("session_id"));
    }
}
