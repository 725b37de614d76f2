//! HTTP Handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use toolbridge_core::{
    AgentBuilder, AgentError, CancellationToken, Credential, Message, ProviderProfile,
};
use toolbridge_runtime::OpenAiCompatibleProvider;

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub messages: Vec<Message>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// A chat request that passed validation
struct ValidChat {
    profile: ProviderProfile,
    input: String,
    servers: Vec<String>,
    system_prompt: Option<String>,
}

impl ChatRequest {
    fn validate(self) -> Result<ValidChat, AgentError> {
        let input = self
            .input
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| AgentError::Validation("Missing input".into()))?;

        let servers: Vec<String> = self
            .servers
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if servers.is_empty() {
            return Err(AgentError::Validation("No tool servers provided".into()));
        }

        let credential = self
            .credential
            .ok_or_else(|| AgentError::Validation("Missing credential".into()))?;

        Ok(ValidChat {
            profile: ProviderProfile::from_credential(&credential)?,
            input,
            servers,
            system_prompt: self.system_prompt.filter(|p| !p.trim().is_empty()),
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Agent error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(AgentError);

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(AgentError::Validation(rejection.body_text()))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            AgentError::Validation(_) => StatusCode::BAD_REQUEST,
            AgentError::MissingCredential(_) | AgentError::Auth(_) => StatusCode::UNAUTHORIZED,
            AgentError::UnsupportedProvider(_) | AgentError::ToolNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            AgentError::Validation(_) => "INVALID_REQUEST",
            AgentError::MissingCredential(_) => "MISSING_CREDENTIAL",
            AgentError::Auth(_) => "UNAUTHORIZED",
            AgentError::UnsupportedProvider(_) => "UNSUPPORTED_PROVIDER",
            AgentError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            AgentError::MaxTurns(_) => "MAX_TURNS",
            _ => "AGENT_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Chat request failed");
        } else {
            tracing::warn!(error = %self.0, "Chat request rejected");
        }

        let body = ErrorResponse {
            error: self.0.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run one orchestration request
///
/// Dropping the request future (client disconnect) abandons the run.
pub async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;
    let chat = request.validate()?;

    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!(
        "chat",
        %request_id,
        provider = %chat.profile.kind(),
        mode = ?chat.profile.mode(),
    );

    // Cancelled when this future is dropped, e.g. on client disconnect
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    run_chat(state, chat, &cancel).instrument(span).await.map(Json)
}

async fn run_chat(
    state: AppState,
    chat: ValidChat,
    cancel: &CancellationToken,
) -> Result<ChatResponse, ApiError> {
    let catalog = state.registries.load_catalog(&chat.servers).await;
    if catalog.reachable == 0 {
        tracing::warn!(
            servers = chat.servers.len(),
            "No tool server reachable, continuing without tools"
        );
    }
    tracing::info!(tools = catalog.registry.len(), "Tool catalog loaded");

    let provider = OpenAiCompatibleProvider::new(chat.profile, state.http.clone());
    let agent = AgentBuilder::new()
        .provider(Arc::new(provider))
        .tools(catalog.registry)
        .system_prompt(
            chat.system_prompt
                .or_else(|| state.config.default_system_prompt.clone()),
        )
        .max_turns(state.config.max_turns)
        .tool_timeout(state.config.tool_timeout)
        .build()?;

    let outcome = agent.run(&chat.input, cancel).await?;

    Ok(ChatResponse {
        messages: outcome.messages,
        message: outcome.answer,
    })
}
