//! Tools the agent may invoke, and the registry that dispatches them.
//!
//! Tools are text-in/text-out. The registry bounds every invocation with a
//! timeout and maps failures onto [`ToolError`].

mod web;

pub use web::WebSearch;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;

/// A request from the policy to run a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub tool_input: String,
    /// Free-text rationale that accompanied the call.
    pub log: String,
}

/// Output of a tool, paired with the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub output: String,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool requested: {0}")]
    NotFound(String),

    #[error("tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },

    #[error("tool '{tool}' timed out after {}s", .after.as_secs())]
    Timeout { tool: String, after: Duration },
}

impl ToolError {
    pub fn user_message(&self) -> String {
        match self {
            ToolError::NotFound(name) => {
                format!("The assistant tried to use an unavailable tool \"{name}\".")
            }
            ToolError::Execution { tool, .. } => {
                format!("The {tool} tool failed while answering. Please try again.")
            }
            ToolError::Timeout { tool, .. } => {
                format!("The {tool} tool took too long to respond. Please try again.")
            }
        }
    }
}

/// A named capability the agent can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool.
    fn name(&self) -> &str;

    /// Shown to the model when it chooses tools.
    fn description(&self) -> &str;

    async fn execute(&self, input: &str) -> anyhow::Result<String>;
}

/// Name and description of a registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
}

/// Registry of available tools, keyed case-insensitively by name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            timeout,
        }
    }

    /// Registry with the built-in web search tool.
    pub fn with_defaults(config: &Config) -> Self {
        let mut registry = Self::new(config.search_timeout);
        registry.register(Arc::new(WebSearch::new(
            config.search_base_url.clone(),
            config.search_max_results,
            config.search_timeout,
        )));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let key = tool.name().to_lowercase();
        if self.tools.insert(key.clone(), tool).is_none() {
            self.order.push(key);
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(&name.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Run a tool by name. Every call is live; nothing is cached.
    pub async fn invoke(&self, name: &str, input: &str) -> Result<ToolResult, ToolError> {
        let tool = self.resolve(name)?;
        let tool_name = tool.name().to_string();

        tracing::info!(tool = %tool_name, input_len = input.len(), "Invoking tool");
        match tokio::time::timeout(self.timeout, tool.execute(input)).await {
            Ok(Ok(output)) => {
                tracing::debug!(tool = %tool_name, output_len = output.len(), "Tool finished");
                Ok(ToolResult { tool_name, output })
            }
            Ok(Err(e)) if is_timeout(&e) => {
                tracing::warn!(tool = %tool_name, error = %e, "Tool transport timed out");
                Err(ToolError::Timeout {
                    tool: tool_name,
                    after: self.timeout,
                })
            }
            Ok(Err(e)) => {
                tracing::warn!(tool = %tool_name, error = %e, "Tool execution failed");
                Err(ToolError::Execution {
                    tool: tool_name,
                    message: format!("{e:#}"),
                })
            }
            Err(_) => {
                tracing::warn!(tool = %tool_name, timeout_secs = self.timeout.as_secs(), "Tool timed out");
                Err(ToolError::Timeout {
                    tool: tool_name,
                    after: self.timeout,
                })
            }
        }
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|key| self.tools.get(key))
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }
}

fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|e| e.is_timeout())
            .unwrap_or(false)
    })
}
