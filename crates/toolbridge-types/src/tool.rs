//! Tool trait and related types.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// A function descriptor handed to the model: name, description, and a
/// JSON schema describing its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Context provided to tools during execution.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Identifier of the conversation turn that asked for this call, if any.
    pub turn_id: Option<String>,
}

impl ToolContext {
    /// Context for a fresh conversation turn with a random id.
    pub fn new_turn() -> Self {
        Self {
            turn_id: Some(uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Context tagged with an existing turn id.
    pub fn for_turn(turn_id: impl Into<String>) -> Self {
        Self {
            turn_id: Some(turn_id.into()),
        }
    }
}

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The output content blocks.
    pub content: Vec<ToolOutputContent>,
    /// Structured result, when the tool declares an output schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
    /// Whether the tool execution resulted in an error.
    pub is_error: bool,
}

/// A single piece of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutputContent {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    Audio {
        data: String,
        media_type: String,
    },
    Resource {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

/// Source of an image in tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: ImageSourceType,
    pub media_type: String,
    pub data: String,
}

/// How an image is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSourceType {
    Base64,
    Url,
}

impl ToolOutput {
    /// Create a successful text output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutputContent::Text { text: text.into() }],
            structured: None,
            is_error: false,
        }
    }

    /// Create an error text output.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutputContent::Text { text: text.into() }],
            structured: None,
            is_error: true,
        }
    }

    /// Concatenate every text block, one per line.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolOutputContent::Text { text } => Some(text.as_str()),
                ToolOutputContent::Resource { text, .. } => text.as_deref(),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ToolOutput, crate::error::ToolError>> + Send + 'a>>;

/// A callable function the model may request.
///
/// Dyn-compatible so a chat client can hold `Arc<dyn Tool>` for every tool
/// regardless of where it is implemented.
pub trait Tool: Send + Sync {
    /// The unique name of this tool (used in model requests).
    fn name(&self) -> &str;

    /// The definition to send to the model (name, description, input schema).
    fn definition(&self) -> ToolDefinition;

    /// Whether this tool only reads data without modifying anything.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Execute the tool with the given JSON input and context.
    ///
    /// The context is passed by value to avoid lifetime issues with dyn dispatch.
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> ToolFuture<'_>;
}
