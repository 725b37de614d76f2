//! Tool System
//!
//! Tool descriptors discovered at runtime, the per-request catalog that holds
//! them, and the dispatcher that executes one assistant turn's tool calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::message::Message;

/// Untyped tool arguments
pub type Arguments = Map<String, Value>;

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier, unique within the owning assistant message
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: Arguments,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Tool definition as published by a registry server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    #[serde(default)]
    pub description: String,

    /// JSON schema of the arguments
    #[serde(default = "empty_schema")]
    pub parameters: Value,

    /// Registry endpoint that executes this tool
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
}

fn empty_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            endpoint: String::new(),
        }
    }

    /// Bind the descriptor to the registry that serves it
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// `(name, type, required)` for every declared parameter
    fn parameter_summary(&self) -> Vec<(String, String, bool)> {
        let required: Vec<&str> = self
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        self.parameters
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, schema)| {
                        let ty = schema
                            .get("type")
                            .and_then(Value::as_str)
                            .unwrap_or("any")
                            .to_string();
                        (name.clone(), ty, required.contains(&name.as_str()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Result from tool execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Call this result answers
    pub call_id: String,

    /// Tool that was called
    pub name: String,

    /// Raw output returned by the tool
    pub output: Value,
}

impl ToolResult {
    /// Output as text. JSON strings are used verbatim.
    pub fn render_output(&self) -> String {
        match &self.output {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    pub fn into_message(self) -> Message {
        let content = self.render_output();
        Message::tool(self.call_id, self.name, content)
    }
}

/// Tool trait - implement to expose an executable capability
#[async_trait]
pub trait Tool: Send + Sync {
    /// Descriptor shown to the model
    fn descriptor(&self) -> &ToolDescriptor;

    /// Execute the tool with given arguments
    async fn execute(&self, arguments: &Arguments) -> Result<Value>;
}

/// Heading of the manual tool-calling instruction block
pub const MANUAL_TOOLS_HEADING: &str = "## Available Tools";

/// Request-scoped tool catalog
///
/// Registration order is kept for prompt rendering. Registering a name that
/// already exists replaces the earlier tool.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name.clone();
        if let Some(&slot) = self.index.get(&name) {
            tracing::debug!(tool = %name, "Replacing tool registered by an earlier registry");
            self.tools[slot] = tool;
        } else {
            self.index.insert(name, self.tools.len());
            self.tools.push(tool);
        }
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| self.tools[slot].clone())
    }

    /// Descriptors in registration order
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor().clone()).collect()
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.descriptor().name.as_str()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute every call of one assistant turn.
    ///
    /// Names are resolved before anything runs, so an unknown tool fails the
    /// turn without side effects. Resolved calls run concurrently, each under
    /// `timeout`; results come back in call order. Any failure fails the turn.
    pub async fn dispatch(&self, calls: &[ToolCall], timeout: Duration) -> Result<Vec<ToolResult>> {
        let resolved = calls
            .iter()
            .map(|call| {
                self.get(&call.name)
                    .map(|tool| (call, tool))
                    .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let runs = resolved.into_iter().map(|(call, tool)| async move {
            tracing::debug!(tool = %call.name, id = %call.id, "Executing tool");

            let output = tokio::time::timeout(timeout, tool.execute(&call.arguments))
                .await
                .map_err(|_| AgentError::ToolTimeout {
                    name: call.name.clone(),
                    timeout,
                })??;

            Ok::<_, AgentError>(ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                output,
            })
        });

        futures::future::join_all(runs).await.into_iter().collect()
    }

    /// Instruction block for backends without native function calling
    pub fn generate_prompt_section(&self) -> String {
        let mut prompt = format!("{MANUAL_TOOLS_HEADING}\n\n");
        prompt.push_str(
            "When you need a tool, respond with ONLY one line of JSON in this exact format and nothing else:\n",
        );
        prompt.push_str("{\"tool_name\": \"<tool name>\", \"tool_args\": {\"<argument>\": <value>}}\n\n");
        prompt.push_str(
            "After you receive the tool result, answer the user in plain text. \
             If you can answer without a tool, do so directly.\n\n",
        );

        for descriptor in self.descriptors() {
            let _ = writeln!(prompt, "### {}", descriptor.name);
            if !descriptor.description.is_empty() {
                let _ = writeln!(prompt, "{}", descriptor.description);
            }

            let params = descriptor.parameter_summary();
            if !params.is_empty() {
                prompt.push_str("**Parameters:**\n");
                for (name, ty, required) in params {
                    let required = if required { " (required)" } else { "" };
                    let _ = writeln!(prompt, "- `{name}` ({ty}){required}");
                }
            }
            prompt.push('\n');
        }

        prompt
    }
}
