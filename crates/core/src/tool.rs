//! Server-side tools the upstream model may call.
//!
//! The relay never knows how a tool computes its answer. A tool is a declared
//! schema (sent upstream verbatim) plus a [`ToolHandler`] that turns parsed
//! arguments into a [`ToolResult`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Where a tool's output is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultDirection {
    /// Injected into the upstream conversation as the function output.
    ToServer,
    /// Withheld from upstream and sent to the client as an extension event.
    ToClient,
}

/// The outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub text: Value,
    pub destination: ToolResultDirection,
}

impl ToolResult {
    pub fn new(text: impl Into<Value>, destination: ToolResultDirection) -> Self {
        Self {
            text: text.into(),
            destination,
        }
    }

    pub fn to_server(text: impl Into<Value>) -> Self {
        Self::new(text, ToolResultDirection::ToServer)
    }

    pub fn to_client(text: impl Into<Value>) -> Self {
        Self::new(text, ToolResultDirection::ToClient)
    }

    /// Textual form of the result: null becomes `""`, strings are used as-is
    /// and any other value is rendered as compact JSON.
    pub fn to_text(&self) -> String {
        match &self.text {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// The executable half of a tool.
///
/// Implementations must be safe to await from many sessions at once; each
/// call is independent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, arguments: Value) -> anyhow::Result<ToolResult>;
}

/// A registered tool: its name, declared schema and handler.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Name → tool mapping, filled once during startup and read-only afterwards.
///
/// Schemas are reported in first-registration order.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any previous tool with the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) {
        let name = name.into();
        let tool = Tool {
            name: name.clone(),
            schema,
            handler,
        };
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Tool> {
        self.index.get(name).map(|&slot| &self.tools[slot])
    }

    /// All declared schemas, as sent upstream in `session.tools`.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools.iter().map(|tool| tool.schema.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
