//! Configuration types for MCP servers and sessions.

use crate::protocol::LATEST_PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

fn default_timeout() -> u64 {
    30000
}

fn default_protocol_version() -> String {
    LATEST_PROTOCOL_VERSION.to_string()
}

fn default_required_capabilities() -> Vec<String> {
    vec!["tools".to_string()]
}

fn default_client_name() -> String {
    "toolbridge".to_string()
}

fn default_listener_capacity() -> usize {
    64
}

/// Top-level MCP configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerConfig>,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Command to run (e.g., "npx", "python").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to set for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Timeout for requests in milliseconds. Unset means the session deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl McpServerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            timeout_ms: None,
        }
    }
}

/// Handshake and dispatch settings shared by every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Protocol version offered in `initialize`.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Server capabilities the handshake insists on.
    #[serde(default = "default_required_capabilities")]
    pub required_capabilities: Vec<String>,
    /// Name we report in `clientInfo`.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Default deadline for a request in milliseconds.
    #[serde(default = "default_timeout")]
    pub request_timeout_ms: u64,
    /// Queue depth for each notification listener.
    #[serde(default = "default_listener_capacity")]
    pub listener_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            required_capabilities: default_required_capabilities(),
            client_name: default_client_name(),
            request_timeout_ms: default_timeout(),
            listener_capacity: default_listener_capacity(),
        }
    }
}

impl SessionConfig {
    /// This config with the request deadline of a particular server, if it sets one.
    pub fn for_server(&self, server: &McpServerConfig) -> Self {
        Self {
            request_timeout_ms: server.timeout_ms.unwrap_or(self.request_timeout_ms),
            ..self.clone()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_server() {
        let toml_str = r#"
[servers.everything]
command = "npx"
args = ["-y", "@modelcontextprotocol/server-everything"]
"#;
        let config: McpConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.servers.len(), 1);
        let server = &config.servers["everything"];
        assert_eq!(server.command, "npx");
        assert_eq!(server.args.len(), 2);
        assert_eq!(server.timeout_ms, None);
        assert_eq!(config.session.required_capabilities, vec!["tools"]);
    }

    #[test]
    fn parse_env_and_timeout() {
        let toml_str = r#"
[servers.github]
command = "npx"
args = ["-y", "@modelcontextprotocol/server-github"]
env = { GITHUB_TOKEN = "ghp_xxxx" }
timeout_ms = 60000
"#;
        let config: McpConfig = toml::from_str(toml_str).unwrap();
        let gh = &config.servers["github"];
        assert_eq!(gh.env["GITHUB_TOKEN"], "ghp_xxxx");
        assert_eq!(gh.timeout_ms, Some(60000));
    }

    #[test]
    fn parse_session_section() {
        let toml_str = r#"
[session]
protocol_version = "2024-11-05"
required_capabilities = []
listener_capacity = 8
"#;
        let config: McpConfig = toml::from_str(toml_str).unwrap();
        assert!(config.servers.is_empty());
        assert_eq!(config.session.protocol_version, "2024-11-05");
        assert!(config.session.required_capabilities.is_empty());
        assert_eq!(config.session.listener_capacity, 8);
        assert_eq!(config.session.client_name, "toolbridge");
    }

    #[test]
    fn server_timeout_overrides_session_default() {
        let session = SessionConfig::default();
        let mut server = McpServerConfig::new("npx", vec![]);
        server.timeout_ms = Some(1500);
        let merged = session.for_server(&server);
        assert_eq!(merged.request_timeout(), Duration::from_millis(1500));
        assert_eq!(merged.protocol_version, session.protocol_version);
    }

    #[test]
    fn unset_server_timeout_keeps_session_deadline() {
        let toml_str = r#"
[session]
request_timeout_ms = 1500

[servers.everything]
command = "npx"
"#;
        let config: McpConfig = toml::from_str(toml_str).unwrap();
        let merged = config.session.for_server(&config.servers["everything"]);
        assert_eq!(merged.request_timeout_ms, 1500);
    }

    #[test]
    fn default_config_is_empty() {
        let config = McpConfig::default();
        assert!(config.servers.is_empty());
        assert_eq!(config.session.protocol_version, LATEST_PROTOCOL_VERSION);
    }
}
