//! Invocation bridge: model function calls in, MCP `tools/call` out.

use crate::error::McpError;
use crate::protocol::{
    CallToolResult, ContentItem, METHOD_TOOLS_CALL, NOTIFICATION_TOOLS_LIST_CHANGED, content_text,
};
use crate::registry::ToolRegistry;
use crate::session::Session;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// One requested tool call. Lives only for the duration of the call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub tool: String,
    pub arguments: Value,
    /// Conversation turn that asked for the call, for log correlation.
    pub turn_id: Option<String>,
}

impl Invocation {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            turn_id: None,
        }
    }

    pub fn with_turn(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = Some(turn_id.into());
        self
    }
}

/// Successful output of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Vec<ContentItem>,
    pub structured: Option<Value>,
}

impl ToolResult {
    pub fn text(&self) -> String {
        content_text(&self.content)
    }
}

/// Relays validated invocations to the server and keeps the registry in step
/// with the server's tool list.
pub struct InvocationBridge {
    session: Arc<Session>,
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    refresher: JoinHandle<()>,
}

impl InvocationBridge {
    /// Create a bridge using the session's default deadline for calls.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        let timeout = registry.session().default_timeout();
        Self::with_timeout(registry, timeout)
    }

    pub fn with_timeout(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        let session = Arc::clone(registry.session());
        let refresher = tokio::spawn(refresh_on_change(
            session.subscribe(NOTIFICATION_TOOLS_LIST_CHANGED),
            Arc::clone(&registry),
        ));
        Self {
            session,
            registry,
            timeout,
            refresher,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Validate locally, then call the tool on the server.
    ///
    /// Unknown names and schema violations fail before any round trip. A
    /// failure the server reports, either as a JSON-RPC error or as a result
    /// flagged `isError`, becomes [`McpError::RemoteInvocation`].
    pub async fn invoke(&self, invocation: Invocation) -> Result<ToolResult, McpError> {
        let Invocation {
            tool,
            arguments,
            turn_id,
        } = invocation;
        // Models send `null` for tools without parameters
        let arguments = if arguments.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            arguments
        };

        let descriptor = self.registry.validate(&tool, &arguments)?;
        tracing::debug!(
            server = %self.session.name(),
            tool = %descriptor.name,
            turn = turn_id.as_deref().unwrap_or("-"),
            "invoking tool"
        );

        let params = serde_json::json!({
            "name": descriptor.name,
            "arguments": arguments,
        });
        let value = match self
            .session
            .call(METHOD_TOOLS_CALL, Some(params), self.timeout)
            .await
        {
            Ok(value) => value,
            Err(McpError::Rpc { message, data, .. }) => {
                return Err(McpError::RemoteInvocation {
                    tool,
                    message,
                    data,
                });
            }
            Err(e) => return Err(e),
        };

        let result: CallToolResult = serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/call result: {e}")))?;

        if result.is_error {
            let text = content_text(&result.content);
            let message = if text.is_empty() {
                "tool reported an error".to_string()
            } else {
                text
            };
            return Err(McpError::RemoteInvocation {
                tool,
                message,
                data: serde_json::to_value(&result.content).ok(),
            });
        }

        Ok(ToolResult {
            content: result.content,
            structured: result.structured_content,
        })
    }

    /// Convenience for [`InvocationBridge::invoke`] without a turn id.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        self.invoke(Invocation::new(name, arguments)).await
    }
}

impl Drop for InvocationBridge {
    fn drop(&mut self) {
        self.refresher.abort();
    }
}

/// Re-enumerate tools whenever the server says the list changed. Bursts of
/// notifications collapse into one refresh.
async fn refresh_on_change(
    mut changes: tokio::sync::mpsc::Receiver<crate::jsonrpc::Notification>,
    registry: Arc<ToolRegistry>,
) {
    while changes.recv().await.is_some() {
        while changes.try_recv().is_ok() {}
        let server = registry.session().name().to_string();
        match registry.list_tools().await {
            Ok(set) => tracing::debug!(
                server = %server,
                generation = set.generation(),
                tools = set.len(),
                "tool list refreshed after change notification"
            ),
            Err(e) => tracing::warn!("Failed to refresh tools from MCP server '{}': {}", server, e),
        }
    }
}
