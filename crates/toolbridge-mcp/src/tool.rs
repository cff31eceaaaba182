//! Wraps an MCP server tool as a `toolbridge_types::Tool`.

use crate::bridge::{Invocation, InvocationBridge, ToolResult};
use crate::error::McpError;
use crate::protocol::ContentItem;
use crate::registry::ToolDescriptor;
use std::sync::Arc;
use toolbridge_types::{
    ImageSource, ImageSourceType, ToolContext, ToolDefinition, ToolFuture, ToolOutput,
    ToolOutputContent,
};

/// A tool backed by an MCP server.
///
/// The namespaced name follows the pattern `mcp__servername__toolname` so
/// tools from different servers never collide. Definitions are read from the
/// registry on every call, so they track the latest enumeration.
pub struct McpTool {
    namespaced_name: String,
    server_name: String,
    fallback: Arc<ToolDescriptor>,
    bridge: Arc<InvocationBridge>,
}

impl McpTool {
    pub fn new(
        server_name: &str,
        descriptor: Arc<ToolDescriptor>,
        bridge: Arc<InvocationBridge>,
    ) -> Self {
        Self {
            namespaced_name: namespaced_name(server_name, &descriptor.name),
            server_name: server_name.to_string(),
            fallback: descriptor,
            bridge,
        }
    }

    /// The tool's name on its server.
    pub fn remote_name(&self) -> &str {
        &self.fallback.name
    }

    /// Whether the server still lists this tool. A tool dropped by a
    /// refresh keeps its last definition but every call fails.
    pub fn is_available(&self) -> bool {
        self.bridge.registry().get(&self.fallback.name).is_some()
    }

    fn descriptor(&self) -> Arc<ToolDescriptor> {
        self.bridge
            .registry()
            .get(&self.fallback.name)
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

pub fn namespaced_name(server: &str, tool: &str) -> String {
    format!("mcp__{server}__{tool}")
}

impl toolbridge_types::Tool for McpTool {
    fn name(&self) -> &str {
        &self.namespaced_name
    }

    fn definition(&self) -> ToolDefinition {
        let descriptor = self.descriptor();
        ToolDefinition {
            name: self.namespaced_name.clone(),
            description: format!("[MCP: {}] {}", self.server_name, descriptor.description),
            input_schema: descriptor.input_schema.clone(),
        }
    }

    fn is_read_only(&self) -> bool {
        self.descriptor().is_read_only()
    }

    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> ToolFuture<'_> {
        Box::pin(async move {
            let mut invocation = Invocation::new(self.remote_name(), input);
            invocation.turn_id = ctx.turn_id;

            match self.bridge.invoke(invocation).await {
                Ok(result) => Ok(into_output(result)),
                // The model should see what went wrong on the server
                Err(McpError::RemoteInvocation { message, .. }) => Ok(ToolOutput::error(message)),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// Convert a tool result into the model-facing output representation.
pub fn into_output(result: ToolResult) -> ToolOutput {
    let content = result
        .content
        .into_iter()
        .filter_map(|c| match c {
            ContentItem::Text { text } => Some(ToolOutputContent::Text { text }),
            ContentItem::Image { data, mime_type } => Some(ToolOutputContent::Image {
                source: ImageSource {
                    source_type: ImageSourceType::Base64,
                    media_type: mime_type,
                    data,
                },
            }),
            ContentItem::Audio { data, mime_type } => Some(ToolOutputContent::Audio {
                data,
                media_type: mime_type,
            }),
            ContentItem::Resource { resource } => Some(ToolOutputContent::Resource {
                uri: resource.uri,
                mime_type: resource.mime_type,
                text: resource.text,
            }),
            ContentItem::ResourceLink { uri, mime_type, .. } => Some(ToolOutputContent::Resource {
                uri,
                mime_type,
                text: None,
            }),
            ContentItem::Unsupported => None,
        })
        .collect();

    ToolOutput {
        content,
        structured: result.structured,
        is_error: false,
    }
}
