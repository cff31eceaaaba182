//! MCP (Model Context Protocol) client implementation for toolbridge.
//!
//! Supports MCP servers that communicate via newline-delimited JSON-RPC 2.0
//! messages, usually over a child process's stdio. Each server gets a
//! [`Session`] that negotiates capabilities and correlates requests, a
//! [`ToolRegistry`] caching the advertised tools, and an [`InvocationBridge`]
//! that turns model function calls into `tools/call` requests.

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod session;
pub mod tool;
pub mod transport;

pub use bridge::{Invocation, InvocationBridge, ToolResult};
pub use client::McpClient;
pub use config::{McpConfig, McpServerConfig, SessionConfig};
pub use error::McpError;
pub use jsonrpc::Notification;
pub use manager::McpManager;
pub use registry::{ToolDescriptor, ToolRegistry, ToolSet};
pub use schema::Schema;
pub use session::{ServerDetails, Session, SessionState};
pub use tool::McpTool;
pub use transport::{ChannelTransport, StdioTransport, Transport};
