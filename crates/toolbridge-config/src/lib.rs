//! TOML configuration for toolbridge.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

use std::path::{Path, PathBuf};
use toolbridge_mcp::{McpConfig, McpServerConfig};
use toolbridge_types::ConfigError;

/// Name of the config file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Overrides the config directory (default `~/.toolbridge`).
pub const ENV_CONFIG_DIR: &str = "TOOLBRIDGE_CONFIG_DIR";
/// Overrides the request deadline for every server, in milliseconds.
pub const ENV_TIMEOUT_MS: &str = "TOOLBRIDGE_TIMEOUT_MS";
/// Overrides the protocol version offered during the handshake.
pub const ENV_PROTOCOL_VERSION: &str = "TOOLBRIDGE_PROTOCOL_VERSION";

/// Name given to a server passed on the command line rather than configured.
pub const AD_HOC_SERVER: &str = "adhoc";

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct ToolbridgeConfig {
    pub config_dir: PathBuf,
    /// The file that was read, if any.
    pub config_file: Option<PathBuf>,
    pub mcp: McpConfig,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Read this file instead of `<config_dir>/config.toml`. Unlike the
    /// default file, it must exist and parse.
    pub config_file: Option<PathBuf>,
    pub request_timeout_ms: Option<u64>,
    pub protocol_version: Option<String>,
}

impl ToolbridgeConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Config file (`$TOOLBRIDGE_CONFIG_DIR/config.toml` or `~/.toolbridge/config.toml`)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::resolve(overrides, config_dir(), |key| std::env::var(key).ok())
    }

    /// [`ToolbridgeConfig::load`] with the config directory and environment
    /// supplied by the caller.
    pub fn resolve(
        overrides: CliOverrides,
        config_dir: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let (mut mcp, config_file) = match &overrides.config_file {
            Some(path) => match read_config_file(path)? {
                Some(mcp) => (mcp, Some(path.clone())),
                None => {
                    return Err(ConfigError::Parse {
                        path: path.display().to_string(),
                        message: "file not found".into(),
                    });
                }
            },
            None => {
                let path = config_dir.join(CONFIG_FILE_NAME);
                match read_config_file(&path) {
                    Ok(Some(mcp)) => (mcp, Some(path)),
                    Ok(None) => (McpConfig::default(), None),
                    Err(e) => {
                        tracing::warn!("{}; using defaults", e);
                        (McpConfig::default(), None)
                    }
                }
            }
        };

        // Resolve request timeout: CLI > env > config file
        let timeout_ms = match overrides.request_timeout_ms {
            Some(ms) => Some(ms),
            None => env(ENV_TIMEOUT_MS)
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                        key: ENV_TIMEOUT_MS.into(),
                        message: format!("'{raw}' is not a number of milliseconds: {e}"),
                    })
                })
                .transpose()?,
        };
        if let Some(ms) = timeout_ms {
            mcp.session.request_timeout_ms = ms;
            for server in mcp.servers.values_mut() {
                server.timeout_ms = Some(ms);
            }
        }

        // Resolve protocol version: CLI > env > config file
        if let Some(version) = overrides
            .protocol_version
            .or_else(|| env(ENV_PROTOCOL_VERSION))
        {
            mcp.session.protocol_version = version;
        }

        validate(&mcp)?;

        Ok(ToolbridgeConfig {
            config_dir,
            config_file,
            mcp,
        })
    }

    /// The configured servers, or only `name` if given.
    pub fn select_servers(&self, name: Option<&str>) -> Result<McpConfig, ConfigError> {
        let Some(name) = name else {
            return Ok(self.mcp.clone());
        };
        let server = self
            .mcp
            .servers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownServer { name: name.into() })?;
        Ok(McpConfig {
            servers: [(name.to_string(), server.clone())].into(),
            session: self.mcp.session.clone(),
        })
    }

    /// A single server given on the command line, with the configured
    /// session settings.
    pub fn ad_hoc(&self, command: &str, args: Vec<String>) -> Result<McpConfig, ConfigError> {
        let server = McpServerConfig::new(command, args);
        let mcp = McpConfig {
            servers: [(AD_HOC_SERVER.to_string(), server)].into(),
            session: self.mcp.session.clone(),
        };
        validate(&mcp)?;
        Ok(mcp)
    }
}

/// Get the toolbridge config directory path (~/.toolbridge/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolbridge")
}

/// Read and parse a TOML config file. `None` if there is no such file.
fn read_config_file(path: &Path) -> Result<Option<McpConfig>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            });
        }
    };
    toml::from_str(&content)
        .map(Some)
        .map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.message().to_string(),
        })
}

fn validate(mcp: &McpConfig) -> Result<(), ConfigError> {
    let session = &mcp.session;
    if session.request_timeout_ms == 0 {
        return Err(invalid("session.request_timeout_ms", "must be greater than zero"));
    }
    if session.listener_capacity == 0 {
        return Err(invalid("session.listener_capacity", "must be greater than zero"));
    }
    if session.protocol_version.trim().is_empty() {
        return Err(invalid("session.protocol_version", "must not be empty"));
    }
    for (name, server) in &mcp.servers {
        if server.command.trim().is_empty() {
            return Err(invalid(&format!("servers.{name}.command"), "must not be empty"));
        }
        if server.timeout_ms == Some(0) {
            return Err(invalid(
                &format!("servers.{name}.timeout_ms"),
                "must be greater than zero",
            ));
        }
    }
    Ok(())
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[session]
protocol_version = "2024-11-05"
required_capabilities = ["tools"]

[servers.everything]
command = "npx"
args = ["-y", "@modelcontextprotocol/server-everything"]

[servers.files]
command = "mcp-server-filesystem"
args = ["/tmp"]
timeout_ms = 5000
env = { LOG_LEVEL = "debug" }
"#;

    fn write_config(dir: &Path, content: &str) {
        std::fs::write(dir.join(CONFIG_FILE_NAME), content).unwrap();
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            ToolbridgeConfig::resolve(CliOverrides::default(), dir.path().to_path_buf(), no_env)
                .unwrap();
        assert!(config.config_file.is_none());
        assert!(config.mcp.servers.is_empty());
        assert_eq!(config.mcp.session.protocol_version, "2025-03-26");
        assert_eq!(config.mcp.session.request_timeout_ms, 30000);
    }

    #[test]
    fn reads_servers_from_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), SAMPLE);
        let config =
            ToolbridgeConfig::resolve(CliOverrides::default(), dir.path().to_path_buf(), no_env)
                .unwrap();

        assert_eq!(
            config.config_file.as_deref(),
            Some(dir.path().join(CONFIG_FILE_NAME).as_path())
        );
        assert_eq!(config.mcp.servers.len(), 2);
        let files = &config.mcp.servers["files"];
        assert_eq!(files.timeout_ms, Some(5000));
        assert_eq!(files.env["LOG_LEVEL"], "debug");
        let everything = &config.mcp.servers["everything"];
        assert_eq!(everything.timeout_ms, None);
        assert_eq!(config.mcp.session.for_server(everything).request_timeout_ms, 30000);
        assert_eq!(config.mcp.session.protocol_version, "2024-11-05");
    }

    #[test]
    fn env_overrides_file_and_cli_overrides_env() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), SAMPLE);
        let env: HashMap<&str, &str> = [
            (ENV_TIMEOUT_MS, "1500"),
            (ENV_PROTOCOL_VERSION, "2025-03-26"),
        ]
        .into();
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());

        let config =
            ToolbridgeConfig::resolve(CliOverrides::default(), dir.path().to_path_buf(), lookup)
                .unwrap();
        assert_eq!(config.mcp.session.request_timeout_ms, 1500);
        assert_eq!(config.mcp.servers["files"].timeout_ms, Some(1500));
        assert_eq!(config.mcp.session.protocol_version, "2025-03-26");

        let overrides = CliOverrides {
            request_timeout_ms: Some(250),
            protocol_version: Some("2024-11-05".into()),
            ..CliOverrides::default()
        };
        let config =
            ToolbridgeConfig::resolve(overrides, dir.path().to_path_buf(), lookup).unwrap();
        assert_eq!(config.mcp.session.request_timeout_ms, 250);
        assert_eq!(config.mcp.servers["everything"].timeout_ms, Some(250));
        assert_eq!(config.mcp.session.protocol_version, "2024-11-05");
    }

    #[test]
    fn bad_env_timeout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let lookup = |key: &str| (key == ENV_TIMEOUT_MS).then(|| "soon".to_string());
        let err =
            ToolbridgeConfig::resolve(CliOverrides::default(), dir.path().to_path_buf(), lookup)
                .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, ENV_TIMEOUT_MS),
            other => panic!("Expected InvalidValue, got: {other:?}"),
        }
    }

    #[test]
    fn broken_default_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "[servers.x\ncommand = ");
        let config =
            ToolbridgeConfig::resolve(CliOverrides::default(), dir.path().to_path_buf(), no_env)
                .unwrap();
        assert!(config.config_file.is_none());
        assert!(config.mcp.servers.is_empty());
    }

    #[test]
    fn explicit_file_must_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[servers.x\ncommand = ").unwrap();
        let overrides = CliOverrides {
            config_file: Some(path.clone()),
            ..CliOverrides::default()
        };
        match ToolbridgeConfig::resolve(overrides, dir.path().to_path_buf(), no_env) {
            Err(ConfigError::Parse { path: reported, .. }) => {
                assert_eq!(reported, path.display().to_string());
            }
            other => panic!("Expected Parse error, got: {other:?}"),
        }
    }

    #[test]
    fn explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = CliOverrides {
            config_file: Some(dir.path().join("nope.toml")),
            ..CliOverrides::default()
        };
        match ToolbridgeConfig::resolve(overrides, dir.path().to_path_buf(), no_env) {
            Err(ConfigError::Parse { message, .. }) => assert_eq!(message, "file not found"),
            other => panic!("Expected Parse error, got: {other:?}"),
        }
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "[servers.blank]\ncommand = \"  \"\n");
        match ToolbridgeConfig::resolve(CliOverrides::default(), dir.path().to_path_buf(), no_env) {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "servers.blank.command"),
            other => panic!("Expected InvalidValue, got: {other:?}"),
        }

        write_config(dir.path(), "[servers.slow]\ncommand = \"x\"\ntimeout_ms = 0\n");
        match ToolbridgeConfig::resolve(CliOverrides::default(), dir.path().to_path_buf(), no_env) {
            Err(ConfigError::InvalidValue { key, .. }) => {
                assert_eq!(key, "servers.slow.timeout_ms");
            }
            other => panic!("Expected InvalidValue, got: {other:?}"),
        }
    }

    #[test]
    fn session_timeout_applies_to_servers_without_their_own() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "[session]\nrequest_timeout_ms = 1500\n\n[servers.x]\ncommand = \"npx\"\n",
        );
        let config =
            ToolbridgeConfig::resolve(CliOverrides::default(), dir.path().to_path_buf(), no_env)
                .unwrap();
        let server = &config.mcp.servers["x"];
        assert_eq!(server.timeout_ms, None);
        let session = config.mcp.session.for_server(server);
        assert_eq!(session.request_timeout(), std::time::Duration::from_millis(1500));
    }

    #[test]
    fn select_servers_filters_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), SAMPLE);
        let config =
            ToolbridgeConfig::resolve(CliOverrides::default(), dir.path().to_path_buf(), no_env)
                .unwrap();

        assert_eq!(config.select_servers(None).unwrap().servers.len(), 2);
        let only = config.select_servers(Some("files")).unwrap();
        assert_eq!(only.servers.keys().collect::<Vec<_>>(), vec!["files"]);
        assert_eq!(only.session.protocol_version, "2024-11-05");
        assert!(matches!(
            config.select_servers(Some("github")),
            Err(ConfigError::UnknownServer { .. })
        ));
    }

    #[test]
    fn ad_hoc_server_inherits_session_settings() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = CliOverrides {
            request_timeout_ms: Some(4000),
            ..CliOverrides::default()
        };
        let config =
            ToolbridgeConfig::resolve(overrides, dir.path().to_path_buf(), no_env).unwrap();
        let mcp = config
            .ad_hoc("uvx", vec!["mcp-server-time".into()])
            .unwrap();
        let server = &mcp.servers[AD_HOC_SERVER];
        assert_eq!(server.command, "uvx");
        assert_eq!(server.timeout_ms, None);
        assert_eq!(mcp.session.for_server(server).request_timeout_ms, 4000);
        assert!(config.ad_hoc("", vec![]).is_err());
    }
}
