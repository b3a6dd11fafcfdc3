//! Registration of out-of-process tools.
//!
//! The relay does not implement retrieval itself. Tools are declared in a JSON
//! catalog and executed by POSTing their arguments to an HTTP endpoint.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;
use voicerag_core::{ToolHandler, ToolRegistry, ToolResult, ToolResultDirection};

/// One entry of the tool catalog file.
#[derive(Debug, Deserialize)]
pub struct ToolSpec {
    /// Declared schema, sent upstream as-is. Must carry a `name`.
    pub schema: Value,
    pub endpoint: Url,
    #[serde(default = "default_destination")]
    pub destination: ToolResultDirection,
}

fn default_destination() -> ToolResultDirection {
    ToolResultDirection::ToServer
}

/// A tool executed by an HTTP service.
pub struct HttpTool {
    client: reqwest::Client,
    endpoint: Url,
    destination: ToolResultDirection,
}

impl HttpTool {
    pub fn new(client: reqwest::Client, endpoint: Url, destination: ToolResultDirection) -> Self {
        Self {
            client,
            endpoint,
            destination,
        }
    }
}

#[async_trait]
impl ToolHandler for HttpTool {
    async fn execute(&self, arguments: Value) -> Result<ToolResult> {
        debug!(endpoint = %self.endpoint, "Calling tool endpoint");
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&arguments)
            .send()
            .await
            .with_context(|| format!("Tool endpoint {} is unreachable", self.endpoint))?
            .error_for_status()
            .with_context(|| format!("Tool endpoint {} rejected the call", self.endpoint))?;
        let body = response
            .text()
            .await
            .context("Failed to read tool response body")?;

        // JSON bodies keep their structure; anything else is plain text.
        let text = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));
        Ok(ToolResult::new(text, self.destination))
    }
}

/// Builds the registry from a catalog file.
pub fn load_tools(path: &Path, client: &reqwest::Client) -> Result<ToolRegistry> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tool catalog {}", path.display()))?;
    let specs: Vec<ToolSpec> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid tool catalog {}", path.display()))?;

    let mut registry = ToolRegistry::new();
    for entry in specs {
        let name = entry
            .schema
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Tool schema without a 'name' in {}", path.display()))?
            .to_string();
        info!(tool = %name, endpoint = %entry.endpoint, destination = ?entry.destination, "Registering tool");
        let handler: Arc<dyn ToolHandler> = Arc::new(HttpTool::new(
            client.clone(),
            entry.endpoint,
            entry.destination,
        ));
        registry.register(name, entry.schema, handler);
    }
    Ok(registry)
}
