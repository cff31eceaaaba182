//! toolbridge CLI: list and call the tools of MCP servers.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use toolbridge_config::{CliOverrides, ToolbridgeConfig};
use toolbridge_mcp::{McpClient, McpConfig, McpError, McpManager, ToolResult};

#[derive(Parser)]
#[command(
    name = "toolbridge",
    version,
    about = "Connect to MCP tool servers and call their tools"
)]
struct Cli {
    /// Config file to read instead of ~/.toolbridge/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Request deadline in milliseconds (overrides TOOLBRIDGE_TIMEOUT_MS)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Protocol version to offer during the handshake
    #[arg(long, global = true)]
    protocol_version: Option<String>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// List the tools each server provides
    Tools {
        #[command(flatten)]
        target: Target,
    },
    /// Call one tool and print its output
    Call {
        /// Tool name, either as the server knows it or as mcp__<server>__<tool>
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long = "args", value_name = "JSON")]
        arguments: Option<String>,

        #[command(flatten)]
        target: Target,
    },
}

/// Which servers to talk to.
#[derive(Args)]
struct Target {
    /// Only use this configured server
    #[arg(long, conflicts_with = "command")]
    server: Option<String>,

    /// Run this MCP server command instead of the configured servers
    #[arg(long)]
    command: Option<String>,

    /// Arguments for --command
    #[arg(last = true, value_name = "ARGS", requires = "command")]
    command_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = ToolbridgeConfig::load(CliOverrides {
        config_file: cli.config,
        request_timeout_ms: cli.timeout_ms,
        protocol_version: cli.protocol_version,
    })
    .context("Failed to load configuration")?;

    match cli.action {
        Action::Tools { target } => {
            let manager = start(&config, &target).await?;
            print_tools(&manager);
            manager.shutdown().await;
            Ok(())
        }
        Action::Call {
            tool,
            arguments,
            target,
        } => {
            let arguments = parse_arguments(arguments.as_deref())?;
            let manager = start(&config, &target).await?;
            let result = call(&manager, &tool, arguments).await;
            manager.shutdown().await;
            print_result(&result?);
            Ok(())
        }
    }
}

/// Connect to the servers `target` selects. Fails if none came up.
async fn start(config: &ToolbridgeConfig, target: &Target) -> Result<McpManager> {
    let mcp: McpConfig = match &target.command {
        Some(command) => config.ad_hoc(command, target.command_args.clone())?,
        None => config.select_servers(target.server.as_deref())?,
    };
    if mcp.servers.is_empty() {
        let file = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.config_dir.join(toolbridge_config::CONFIG_FILE_NAME));
        bail!(
            "No MCP servers configured. Add a [servers.<name>] section to {} or pass --command",
            file.display()
        );
    }

    let manager = McpManager::start(&mcp).await;
    if manager.client_count() == 0 {
        bail!(
            "None of the {} configured MCP server(s) could be started",
            mcp.servers.len()
        );
    }
    Ok(manager)
}

fn parse_arguments(raw: Option<&str>) -> Result<serde_json::Value> {
    let Some(raw) = raw else {
        return Ok(serde_json::json!({}));
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(value)
}

/// Find the one server that provides `tool`.
fn resolve<'a>(
    manager: &'a McpManager,
    tool: &'a str,
) -> Result<(&'a Arc<McpClient>, &'a str)> {
    if let Some(rest) = tool.strip_prefix("mcp__") {
        if let Some((server, name)) = rest.split_once("__") {
            if let Some(client) = manager.client(server) {
                return Ok((client, name));
            }
        }
    }

    let providers: Vec<&Arc<McpClient>> = manager
        .clients()
        .iter()
        .filter(|c| c.tool_set().get(tool).is_some())
        .collect();
    match providers.as_slice() {
        [client] => Ok((*client, tool)),
        [] => bail!("No connected server provides a tool named '{tool}'"),
        many => {
            let names: Vec<&str> = many.iter().map(|c| c.server_name()).collect();
            bail!(
                "Tool '{tool}' is provided by several servers ({}); pick one with --server",
                names.join(", ")
            )
        }
    }
}

async fn call(
    manager: &McpManager,
    tool: &str,
    arguments: serde_json::Value,
) -> Result<ToolResult> {
    let (client, name) = resolve(manager, tool)?;
    match client.call_tool(name, arguments).await {
        Ok(result) => Ok(result),
        Err(McpError::RemoteInvocation { message, .. }) => {
            bail!("Tool '{name}' on server '{}' failed: {message}", client.server_name())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_tools(manager: &McpManager) {
    for client in manager.clients() {
        let set = client.tool_set();
        match client.server_details() {
            Some(details) => println!(
                "{} ({} {}, protocol {}): {} tools",
                client.server_name(),
                details.server_info.name,
                details.server_info.version,
                details.protocol_version,
                set.len()
            ),
            None => println!("{}: {} tools", client.server_name(), set.len()),
        }
        for tool in set.iter() {
            let marker = if tool.is_read_only() { " [read-only]" } else { "" };
            println!("  {}{}", tool.name, marker);
            if !tool.description.is_empty() {
                println!("      {}", tool.description.lines().next().unwrap_or_default());
            }
        }
    }
}

fn print_result(result: &ToolResult) {
    let text = result.text();
    if !text.is_empty() {
        println!("{text}");
    }
    if let Some(structured) = &result.structured {
        match serde_json::to_string_pretty(structured) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!("Failed to render structured content: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_call_with_ad_hoc_server() {
        let cli = Cli::try_parse_from([
            "toolbridge",
            "--verbose",
            "call",
            "echo",
            "--args",
            r#"{"message":"hi"}"#,
            "--command",
            "npx",
            "--",
            "-y",
            "@modelcontextprotocol/server-everything",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.action {
            Action::Call {
                tool,
                arguments,
                target,
            } => {
                assert_eq!(tool, "echo");
                assert_eq!(arguments.as_deref(), Some(r#"{"message":"hi"}"#));
                assert_eq!(target.command.as_deref(), Some("npx"));
                assert_eq!(
                    target.command_args,
                    vec!["-y", "@modelcontextprotocol/server-everything"]
                );
            }
            Action::Tools { .. } => panic!("Expected call"),
        }
    }

    #[test]
    fn server_and_command_conflict() {
        let result = Cli::try_parse_from([
            "toolbridge", "tools", "--server", "a", "--command", "b",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn arguments_must_be_an_object() {
        assert_eq!(parse_arguments(None).unwrap(), serde_json::json!({}));
        assert_eq!(
            parse_arguments(Some(r#"{"a":1}"#)).unwrap()["a"],
            1
        );
        assert!(parse_arguments(Some("[1,2]")).is_err());
        assert!(parse_arguments(Some("{nope")).is_err());
    }
}
