//! Model-facing tool contract and shared error types for toolbridge.
//!
//! A chat client consumes tools through the [`Tool`] trait: it sends each
//! tool's [`ToolDefinition`] to the model and calls [`Tool::execute`] when the
//! model asks for a function call.

pub mod error;
pub mod tool;

pub use error::{ConfigError, ToolError};
pub use tool::*;
