//! Error types for MCP operations.

use crate::session::SessionState;
use thiserror::Error;
use toolbridge_types::ToolError;

/// Errors from MCP server communication.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("Connection to MCP server '{server}' was lost")]
    ConnectionLost { server: String },

    #[error("Handshake with MCP server '{server}' failed: {message}")]
    ProtocolMismatch { server: String, message: String },

    #[error("MCP request '{method}' timed out after {timeout_ms}ms")]
    TimedOut { method: String, timeout_ms: u64 },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for tool '{tool}' at {path}: {message}")]
    SchemaViolation {
        tool: String,
        path: String,
        message: String,
    },

    #[error("Tool '{tool}' failed: {message}")]
    RemoteInvocation {
        tool: String,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("MCP session '{server}' is {state}")]
    InvalidState { server: String, state: SessionState },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether this error means the whole session is unusable, as opposed to
    /// a failure scoped to a single call.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            McpError::ConnectionLost { .. }
                | McpError::ProtocolMismatch { .. }
                | McpError::SpawnFailed { .. }
        )
    }
}

impl From<McpError> for ToolError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::UnknownTool { name } => ToolError::UnknownTool { name },
            McpError::SchemaViolation {
                tool,
                path,
                message,
            } => ToolError::InvalidInput {
                tool,
                message: format!("{path}: {message}"),
            },
            McpError::TimedOut { timeout_ms, .. } => ToolError::Timeout { timeout_ms },
            e if e.is_session_fatal() => ToolError::Unavailable(e.to_string()),
            e @ McpError::InvalidState { .. } => ToolError::Unavailable(e.to_string()),
            e => ToolError::ExecutionFailed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_fatal_classification() {
        assert!(
            McpError::ConnectionLost {
                server: "s".into()
            }
            .is_session_fatal()
        );
        assert!(
            !McpError::TimedOut {
                method: "tools/call".into(),
                timeout_ms: 10
            }
            .is_session_fatal()
        );
        assert!(!McpError::UnknownTool { name: "x".into() }.is_session_fatal());
    }

    #[test]
    fn schema_violation_maps_to_invalid_input() {
        let err: ToolError = McpError::SchemaViolation {
            tool: "echo".into(),
            path: "root.message".into(),
            message: "expected type string, got integer".into(),
        }
        .into();
        match err {
            ToolError::InvalidInput { tool, message } => {
                assert_eq!(tool, "echo");
                assert_eq!(message, "root.message: expected type string, got integer");
            }
            other => panic!("Expected InvalidInput, got: {other:?}"),
        }
    }

    #[test]
    fn connection_lost_maps_to_unavailable() {
        let err: ToolError = McpError::ConnectionLost {
            server: "everything".into(),
        }
        .into();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }

    #[test]
    fn invalid_state_display() {
        let err = McpError::InvalidState {
            server: "everything".into(),
            state: SessionState::Connecting,
        };
        assert_eq!(err.to_string(), "MCP session 'everything' is connecting");
    }
}
