//! Aggregates several MCP servers behind one model-facing tool list.

use crate::client::McpClient;
use crate::config::McpConfig;
use std::sync::Arc;
use tokio::task::JoinSet;
use toolbridge_types::{Tool, ToolContext, ToolDefinition, ToolError, ToolOutput};

/// Connected MCP servers, in configuration order.
pub struct McpManager {
    clients: Vec<Arc<McpClient>>,
}

impl McpManager {
    /// Connect to every configured server concurrently.
    ///
    /// A server that fails to spawn, negotiate or list its tools is logged
    /// and left out; the rest are still usable.
    pub async fn start(config: &McpConfig) -> Self {
        let mut startups = JoinSet::new();
        for (index, (name, server)) in config.servers.iter().enumerate() {
            let name = name.clone();
            let server = server.clone();
            let session = config.session.clone();
            startups.spawn(async move {
                let result = McpClient::connect(name.clone(), &server, &session).await;
                (index, name, result)
            });
        }

        let mut connected = Vec::with_capacity(config.servers.len());
        while let Some(joined) = startups.join_next().await {
            let (index, name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!("MCP server startup task failed: {}", e);
                    continue;
                }
            };
            match result {
                Ok(client) => {
                    tracing::info!(
                        "MCP server '{}' started ({} tools)",
                        name,
                        client.tool_set().len()
                    );
                    connected.push((index, Arc::new(client)));
                }
                Err(e) => tracing::warn!("Failed to start MCP server '{}': {}", name, e),
            }
        }
        connected.sort_by_key(|(index, _)| *index);

        Self {
            clients: connected.into_iter().map(|(_, client)| client).collect(),
        }
    }

    /// Build a manager over clients that are already connected.
    pub fn from_clients(clients: Vec<McpClient>) -> Self {
        Self {
            clients: clients.into_iter().map(Arc::new).collect(),
        }
    }

    /// Every tool from every server, namespaced by server.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.clients.iter().flat_map(|c| c.tools()).collect()
    }

    /// Function descriptors to hand to a model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools().iter().map(|t| t.definition()).collect()
    }

    pub fn find_tool(&self, namespaced_name: &str) -> Option<Arc<dyn Tool>> {
        self.tools().into_iter().find(|t| t.name() == namespaced_name)
    }

    /// Run a model's function call against whichever server owns the tool.
    pub async fn execute(
        &self,
        namespaced_name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .find_tool(namespaced_name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: namespaced_name.to_string(),
            })?;
        tool.execute(input, ctx).await
    }

    pub fn clients(&self) -> &[Arc<McpClient>] {
        &self.clients
    }

    pub fn client(&self, server: &str) -> Option<&Arc<McpClient>> {
        self.clients.iter().find(|c| c.server_name() == server)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Server names with their current tool counts.
    pub fn server_summary(&self) -> Vec<(&str, usize)> {
        self.clients
            .iter()
            .map(|c| (c.server_name(), c.tool_set().len()))
            .collect()
    }

    /// Close every session. Tools handed out earlier fail from now on.
    pub async fn shutdown(&self) {
        for client in &self.clients {
            client.shutdown().await;
        }
    }
}
