//! Error types shared across toolbridge crates.

use thiserror::Error;

/// Errors surfaced to a model-facing caller when a tool cannot run.
///
/// A tool that ran and reported failure is not a `ToolError`; it produces a
/// [`crate::ToolOutput`] with `is_error` set so the model can see the details.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid input for tool '{tool}': {message}")]
    InvalidInput { tool: String, message: String },

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Tool server unavailable: {0}")]
    Unavailable(String),
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown server '{name}'")]
    UnknownServer { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_messages() {
        let err = ToolError::InvalidInput {
            tool: "echo".into(),
            message: "root.message: required property missing".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid input for tool 'echo': root.message: required property missing"
        );
        assert_eq!(
            ToolError::Timeout { timeout_ms: 250 }.to_string(),
            "Tool timed out after 250ms"
        );
    }

    #[test]
    fn config_error_names_the_server() {
        let err = ConfigError::UnknownServer {
            name: "github".into(),
        };
        assert_eq!(err.to_string(), "Unknown server 'github'");
    }
}
