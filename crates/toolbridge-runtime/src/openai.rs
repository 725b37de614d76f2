//! OpenAI-compatible chat completions provider
//!
//! Every supported backend (hosted or self-hosted) speaks the
//! `POST <base>/chat/completions` dialect, so one client covers them all.
//! The backend's tool-calling mode decides how the conversation is rendered:
//! native backends get `tools` and OpenAI tool messages, manual backends get
//! plain role/content pairs with tool results replayed as user context.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value, json};
use toolbridge_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{
        Completion, FinishReason, LlmProvider, ProviderProfile, TokenUsage, ToolCallingMode,
    },
    tool::{Arguments, ToolCall, ToolDescriptor},
};

const DEFAULT_MAX_RETRIES: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Provider for any OpenAI-compatible chat completions endpoint
pub struct OpenAiCompatibleProvider {
    client: Client,
    profile: ProviderProfile,
}

impl OpenAiCompatibleProvider {
    /// Create a provider sharing an existing HTTP client
    pub const fn new(profile: ProviderProfile, client: Client) -> Self {
        Self { client, profile }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.profile.base_url().trim_end_matches('/')
        )
    }

    /// Build the request body for one model turn
    fn build_payload(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Value {
        let mode = self.profile.mode();
        let options = self.profile.options();

        let mut payload = Map::new();
        payload.insert("model".into(), json!(self.profile.model()));
        payload.insert(
            "messages".into(),
            Value::Array(messages.iter().map(|m| message_to_wire(m, mode)).collect()),
        );
        payload.insert("temperature".into(), json!(options.temperature));

        if mode == ToolCallingMode::Native && !tools.is_empty() {
            payload.insert("tools".into(), Value::Array(tools.iter().map(tool_to_wire).collect()));
        }

        let optional = [
            ("max_tokens", options.max_tokens.map(|v| json!(v))),
            ("top_p", options.top_p.map(|v| json!(v))),
            ("frequency_penalty", options.frequency_penalty.map(|v| json!(v))),
            ("presence_penalty", options.presence_penalty.map(|v| json!(v))),
            ("stop", options.stop.as_ref().map(|v| json!(v))),
            ("seed", options.seed.map(|v| json!(v))),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                payload.insert(key.into(), value);
            }
        }

        Value::Object(payload)
    }

    /// Send one request, mapping HTTP failures onto agent errors
    async fn post(&self, payload: &Value) -> Result<Value> {
        let mut request = self.client.post(self.endpoint()).json(payload);
        if let Some(key) = self.profile.api_key() {
            request = request.bearer_auth(key);
        }
        if let Some(ms) = self.profile.options().timeout {
            request = request.timeout(Duration::from_millis(ms));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                AgentError::ProviderUnavailable(e.to_string())
            } else {
                AgentError::Provider(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| AgentError::Parse(format!("Invalid completion body: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Auth(body),
            StatusCode::TOO_MANY_REQUESTS => AgentError::RateLimited(body),
            s if s.is_server_error() => AgentError::ProviderUnavailable(format!("{s}: {body}")),
            s => AgentError::Provider(format!("{s}: {body}")),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Result<Completion> {
        let payload = self.build_payload(messages, tools);
        let max_retries = self
            .profile
            .options()
            .max_retries
            .unwrap_or(DEFAULT_MAX_RETRIES);

        let mut attempt = 0;
        let response = loop {
            match self.post(&payload).await {
                Ok(response) => break response,
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    tracing::warn!(
                        provider = %self.profile.kind(),
                        attempt = attempt + 1,
                        error = %e,
                        "Model request failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        if let Some(error) = response.get("error") {
            return Err(AgentError::Provider(format!("Backend error: {error}")));
        }

        parse_completion(&response, self.profile.model())
    }
}

fn message_to_wire(message: &Message, mode: ToolCallingMode) -> Value {
    match (mode, message.role) {
        (ToolCallingMode::Native, Role::Assistant) if message.has_tool_calls() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": Value::Object(call.arguments.clone()).to_string(),
                        }
                    })
                })
                .collect();
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                json!(message.content)
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        (ToolCallingMode::Native, Role::Tool) => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.as_deref().unwrap_or_default(),
            "content": message.content,
        }),
        // Manual backends reject the tool role
        (ToolCallingMode::Manual, Role::Tool) => json!({
            "role": "user",
            "content": format!(
                "Result of tool `{}`:\n{}",
                message.name.as_deref().unwrap_or("tool"),
                message.content
            ),
        }),
        (_, role) => json!({"role": role.to_string(), "content": message.content}),
    }
}

fn tool_to_wire(tool: &ToolDescriptor) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

/// Convert a chat completions response body into a [`Completion`]
pub fn parse_completion(response: &Value, requested_model: &str) -> Result<Completion> {
    let choice = response
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| AgentError::Parse("Completion has no choices".into()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| AgentError::Parse("Completion choice has no message".into()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    let usage = response.get("usage").map(|u| {
        let field = |name: &str| {
            u.get(name)
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0)
        };
        let prompt_tokens = field("prompt_tokens");
        let completion_tokens = field("completion_tokens");
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: match field("total_tokens") {
                0 => prompt_tokens.saturating_add(completion_tokens),
                total => total,
            },
        }
    });

    Ok(Completion {
        content,
        tool_calls,
        model: response
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(requested_model)
            .to_string(),
        usage,
        finish_reason: choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(FinishReason::from_openai),
    })
}

fn parse_tool_call(call: &Value) -> Option<ToolCall> {
    let function = call.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?;

    let arguments: Arguments = match function.get("arguments") {
        Some(Value::String(raw)) if raw.trim().is_empty() => Map::new(),
        Some(Value::String(raw)) => match serde_json::from_str(raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                tracing::warn!(tool = name, "Dropping tool call with malformed arguments");
                return None;
            }
        },
        Some(Value::Object(map)) => map.clone(),
        _ => {
            tracing::warn!(tool = name, "Dropping tool call without object arguments");
            return None;
        }
    };

    let id = call
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()), ToString::to_string);

    Some(ToolCall::new(id, name, arguments))
}
