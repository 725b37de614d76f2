//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for all model backends plus the small
//! per-backend table (default model, base URL, credential requirements) and
//! the capability classifier that decides whether a backend calls tools
//! natively or through the manual text protocol.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use toolbridge_core::provider::{Credential, ProviderProfile};
//!
//! let profile = ProviderProfile::from_credential(&credential)?;
//! let provider = OpenAiCompatibleProvider::new(profile, http)?;
//!
//! // Use through the trait
//! let completion = provider.complete(&messages, &tools).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::tool::{ToolCall, ToolDescriptor};

/// How a backend surfaces tool invocations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallingMode {
    /// Structured function calling on the wire
    Native,
    /// Prompted JSON in free text, recovered by the extractor
    Manual,
}

/// Provider ids with native function calling. Anything else is manual.
const NATIVE_PROVIDERS: &[&str] = &["openai", "claude", "openrouter"];

/// Decide the tool-calling mode for a provider id
pub fn classify(provider: &str) -> ToolCallingMode {
    if NATIVE_PROVIDERS.contains(&provider) {
        ToolCallingMode::Native
    } else {
        ToolCallingMode::Manual
    }
}

/// Known model backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Claude,
    OpenRouter,
    Ollama,
    LlamaCpp,
    Vllm,
}

impl ProviderKind {
    pub const ALL: [Self; 6] = [
        Self::OpenAi,
        Self::Claude,
        Self::OpenRouter,
        Self::Ollama,
        Self::LlamaCpp,
        Self::Vllm,
    ];

    /// Wire identifier used in requests
    pub const fn id(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Claude => "claude",
            Self::OpenRouter => "openrouter",
            Self::Ollama => "ollama",
            Self::LlamaCpp => "llama_cpp",
            Self::Vllm => "vllm",
        }
    }

    /// Human-readable name for error messages
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Claude => "Claude",
            Self::OpenRouter => "OpenRouter",
            Self::Ollama => "Ollama",
            Self::LlamaCpp => "Llama.cpp",
            Self::Vllm => "vLLM",
        }
    }

    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Claude => "claude-3-5-sonnet-20241022",
            Self::OpenRouter => "anthropic/claude-3.5-sonnet",
            Self::Ollama => "llama3.2",
            Self::LlamaCpp => "gpt-oss-20b.gguf",
            Self::Vllm => "meta-llama/Llama-3.2-3B-Instruct",
        }
    }

    /// Hosted endpoint, `None` for self-hosted backends that need a `url`
    pub const fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Claude => Some("https://api.anthropic.com/v1"),
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::Ollama | Self::LlamaCpp | Self::Vllm => None,
        }
    }

    pub const fn requires_api_key(self) -> bool {
        matches!(self, Self::OpenAi | Self::Claude | Self::OpenRouter)
    }

    pub const fn requires_url(self) -> bool {
        self.default_base_url().is_none()
    }

    pub fn mode(self) -> ToolCallingMode {
        classify(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == s)
            .ok_or_else(|| AgentError::UnsupportedProvider(s.to_string()))
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Configuration for LLM generation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Temperature for sampling (0.0 = deterministic)
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Top-p nucleus sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    /// Request timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Retries on rate limiting or backend unavailability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Backend credential as sent by the caller
#[derive(Clone, Default, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    /// Generation overrides
    #[serde(default, rename = "set")]
    pub settings: Option<GenerationOptions>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Resolved, immutable description of the backend used for one request
#[derive(Clone)]
pub struct ProviderProfile {
    kind: ProviderKind,
    mode: ToolCallingMode,
    model: String,
    base_url: String,
    api_key: Option<String>,
    options: GenerationOptions,
}

impl ProviderProfile {
    /// Profile with the backend's defaults
    pub fn new(kind: ProviderKind, base_url: impl Into<String>) -> Self {
        Self {
            kind,
            mode: kind.mode(),
            model: kind.default_model().to_string(),
            base_url: base_url.into(),
            api_key: None,
            options: GenerationOptions::default(),
        }
    }

    /// Validate a caller credential and resolve it against the backend table
    pub fn from_credential(credential: &Credential) -> Result<Self> {
        let provider = credential
            .provider
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AgentError::Validation("Missing credential provider".into()))?;

        let kind: ProviderKind = provider.parse()?;
        let api_key = non_empty(credential.api_key.as_deref());
        let url = non_empty(credential.url.as_deref());

        if kind.requires_api_key() && api_key.is_none() {
            return Err(AgentError::MissingCredential(kind.display_name().into()));
        }

        let base_url = match (url, kind.default_base_url()) {
            (Some(url), _) => url,
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                return Err(AgentError::Validation(format!(
                    "{} URL is required",
                    kind.display_name()
                )));
            }
        };

        let mut profile = Self::new(kind, base_url);
        profile.api_key = api_key;
        if let Some(model) = non_empty(credential.model.as_deref()) {
            profile.model = model;
        }
        if let Some(options) = &credential.settings {
            profile.options = options.clone();
        }

        Ok(profile)
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub const fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub const fn mode(&self) -> ToolCallingMode {
        self.mode
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub const fn options(&self) -> &GenerationOptions {
        &self.options
    }
}

impl std::fmt::Debug for ProviderProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderProfile")
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("options", &self.options)
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Response from an LLM completion
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Structured tool calls (native backends only)
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

/// Token usage statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

impl FinishReason {
    /// Map an OpenAI-style `finish_reason` string
    pub fn from_openai(reason: &str) -> Self {
        match reason {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "tool_calls" | "function_call" => Self::ToolUse,
            "content_filter" => Self::ContentFilter,
            _ => Self::Error,
        }
    }
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The agent works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend this provider talks to
    fn profile(&self) -> &ProviderProfile;

    /// Tool-calling mode of the backend
    fn mode(&self) -> ToolCallingMode {
        self.profile().mode()
    }

    /// Generate a completion from messages.
    ///
    /// `tools` is empty unless the backend calls tools natively.
    async fn complete(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Result<Completion>;
}
