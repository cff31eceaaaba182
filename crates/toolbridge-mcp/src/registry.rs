//! Cached tool list for one session, with local argument validation.

use crate::error::McpError;
use crate::protocol::{ListToolsResult, METHOD_TOOLS_LIST, ToolAnnotations, ToolEntry};
use crate::schema::{Schema, SchemaError};
use crate::session::Session;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use toolbridge_types::ToolDefinition;

/// A tool advertised by the server. Immutable once built.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub title: Option<String>,
    pub description: String,
    /// Input schema exactly as the server sent it, for handing to a model.
    pub input_schema: Value,
    /// The same schema, parsed for validation.
    pub schema: Schema,
    pub output_schema: Option<Value>,
    pub annotations: Option<ToolAnnotations>,
}

impl ToolDescriptor {
    pub fn from_entry(entry: ToolEntry) -> Result<Self, SchemaError> {
        let schema = Schema::parse(&entry.input_schema)?;
        Ok(Self {
            name: entry.name,
            title: entry.title,
            description: entry.description.unwrap_or_default(),
            input_schema: entry.input_schema,
            schema,
            output_schema: entry.output_schema,
            annotations: entry.annotations,
        })
    }

    /// Whether the server marked this tool as free of side effects.
    pub fn is_read_only(&self) -> bool {
        self.annotations
            .as_ref()
            .and_then(|a| a.read_only_hint)
            .unwrap_or(false)
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// One complete enumeration of a server's tools.
#[derive(Debug, Default)]
pub struct ToolSet {
    generation: u64,
    tools: Vec<Arc<ToolDescriptor>>,
    by_name: HashMap<String, usize>,
}

impl ToolSet {
    fn build(generation: u64, server: &str, entries: Vec<ToolEntry>) -> Self {
        let mut set = ToolSet {
            generation,
            ..ToolSet::default()
        };
        for entry in entries {
            if set.by_name.contains_key(&entry.name) {
                tracing::warn!(
                    "MCP server '{}' listed tool '{}' twice, keeping the first",
                    server,
                    entry.name
                );
                continue;
            }
            let name = entry.name.clone();
            match ToolDescriptor::from_entry(entry) {
                Ok(descriptor) => {
                    set.by_name.insert(name, set.tools.len());
                    set.tools.push(Arc::new(descriptor));
                }
                Err(e) => {
                    tracing::warn!(
                        "Skipping tool '{}' from MCP server '{}': bad input schema at {}",
                        name,
                        server,
                        e
                    );
                }
            }
        }
        set
    }

    /// Which enumeration produced this set. Zero means none has completed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ToolDescriptor>> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    /// Tools in the order the server listed them.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ToolDescriptor>> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Tools advertised by one server, replaced wholesale on every enumeration.
///
/// Readers take an `Arc<ToolSet>` snapshot, so a refresh running concurrently
/// is seen either entirely or not at all.
pub struct ToolRegistry {
    session: Arc<Session>,
    current: RwLock<Arc<ToolSet>>,
    started: AtomicU64,
}

impl ToolRegistry {
    /// An empty registry; call [`ToolRegistry::list_tools`] to populate it.
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            current: RwLock::new(Arc::new(ToolSet::default())),
            started: AtomicU64::new(0),
        }
    }

    /// Enumerate the server's tools and install them as the current set.
    ///
    /// If refreshes overlap, the one started last wins; an older listing
    /// finishing late never replaces a newer one.
    pub async fn list_tools(&self) -> Result<Arc<ToolSet>, McpError> {
        let generation = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let entries = self.fetch_all().await?;
        let fresh = Arc::new(ToolSet::build(generation, self.session.name(), entries));

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.generation > generation {
            tracing::debug!(
                server = %self.session.name(),
                generation,
                "discarding stale tool listing"
            );
            return Ok(Arc::clone(&current));
        }
        *current = Arc::clone(&fresh);
        drop(current);

        tracing::info!(
            "MCP server '{}' provides {} tools",
            self.session.name(),
            fresh.len()
        );
        Ok(fresh)
    }

    /// Follow `nextCursor` until the server has listed everything.
    async fn fetch_all(&self) -> Result<Vec<ToolEntry>, McpError> {
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen: HashSet<String> = HashSet::new();
        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let value = self
                .session
                .call(METHOD_TOOLS_LIST, params, self.session.default_timeout())
                .await?;
            let page: ListToolsResult = serde_json::from_value(value).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
            })?;
            entries.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    // A cursor seen before means the listing would never end
                    if !seen.insert(next.clone()) {
                        return Err(McpError::Protocol(format!(
                            "tools/list repeated cursor '{next}'"
                        )));
                    }
                    cursor = Some(next);
                }
                _ => return Ok(entries),
            }
        }
    }

    /// The current tool set.
    pub fn snapshot(&self) -> Arc<ToolSet> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.snapshot().get(name).cloned()
    }

    /// Model-facing definitions for every current tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.snapshot().iter().map(|t| t.definition()).collect()
    }

    /// Check `args` against the cached schema for `name` without touching
    /// the network. Returns the descriptor that was validated against.
    pub fn validate(&self, name: &str, args: &Value) -> Result<Arc<ToolDescriptor>, McpError> {
        let descriptor = self.get(name).ok_or_else(|| McpError::UnknownTool {
            name: name.to_string(),
        })?;
        descriptor
            .schema
            .validate(args)
            .map_err(|v| McpError::SchemaViolation {
                tool: name.to_string(),
                path: v.path,
                message: v.message,
            })?;
        Ok(descriptor)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}
