//! MCP client: manages one server connection.
//!
//! Wires a transport into a [`Session`], runs the handshake, enumerates tools
//! into a [`ToolRegistry`], and exposes invocation through an
//! [`InvocationBridge`]. If anything fails before the client is handed back,
//! the session and its transport are torn down.

use crate::bridge::{Invocation, InvocationBridge, ToolResult};
use crate::config::{McpServerConfig, SessionConfig};
use crate::error::McpError;
use crate::registry::{ToolRegistry, ToolSet};
use crate::session::{ServerDetails, Session};
use crate::tool::McpTool;
use crate::transport::{StdioTransport, Transport};
use std::sync::Arc;
use toolbridge_types::Tool;

/// Client for a single MCP server.
pub struct McpClient {
    bridge: Arc<InvocationBridge>,
}

impl McpClient {
    /// Connect to an MCP server: spawn, handshake, discover tools.
    pub async fn connect(
        name: String,
        server: &McpServerConfig,
        session: &SessionConfig,
    ) -> Result<Self, McpError> {
        let transport = StdioTransport::spawn(&server.command, &server.args, &server.env)?;
        Self::with_transport(name, Arc::new(transport), session.for_server(server)).await
    }

    /// Run the handshake and first enumeration over an already connected
    /// transport.
    pub async fn with_transport(
        name: String,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Result<Self, McpError> {
        let session = Arc::new(Session::new(name, transport, config));

        let registry = match Self::initialize(&session).await {
            Ok(registry) => registry,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        Ok(Self {
            bridge: Arc::new(InvocationBridge::new(registry)),
        })
    }

    async fn initialize(session: &Arc<Session>) -> Result<Arc<ToolRegistry>, McpError> {
        session.negotiate().await?;
        let registry = Arc::new(ToolRegistry::new(Arc::clone(session)));
        registry.list_tools().await?;
        Ok(registry)
    }

    /// Call a tool on this server by its remote name.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, McpError> {
        self.bridge.invoke(Invocation::new(tool_name, arguments)).await
    }

    /// Re-enumerate the server's tools.
    pub async fn refresh_tools(&self) -> Result<Arc<ToolSet>, McpError> {
        self.bridge.registry().list_tools().await
    }

    /// The tools from the most recent enumeration.
    pub fn tool_set(&self) -> Arc<ToolSet> {
        self.bridge.registry().snapshot()
    }

    /// Current tools wrapped for a model-facing caller.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tool_set()
            .iter()
            .map(|descriptor| {
                Arc::new(McpTool::new(
                    self.server_name(),
                    Arc::clone(descriptor),
                    Arc::clone(&self.bridge),
                )) as Arc<dyn Tool>
            })
            .collect()
    }

    pub fn server_name(&self) -> &str {
        self.session().name()
    }

    pub fn server_details(&self) -> Option<&ServerDetails> {
        self.session().server_details()
    }

    pub fn session(&self) -> &Arc<Session> {
        self.bridge.session()
    }

    pub fn bridge(&self) -> &Arc<InvocationBridge> {
        &self.bridge
    }

    /// Shut down the server connection.
    pub async fn shutdown(&self) {
        self.session().close().await;
    }
}
