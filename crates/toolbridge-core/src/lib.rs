//! # toolbridge-core
//!
//! Provider-agnostic tool-calling orchestration.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Agent                              │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │ Orchestrate │  │    Tools     │  │    LlmProvider      │  │
//! │  │    Loop     │──│   Registry   │──│ (native | manual)   │  │
//! │  └─────────────┘  └──────────────┘  └─────────────────────┘  │
//! │         │                                                    │
//! │         └── extract: tool calls embedded in plain text       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Backends that support function calling get tool descriptors attached to
//! every request. The rest receive a tool block in the system prompt and
//! their replies are scanned for calls by [`extract::extract_tool_calls`].

pub mod error;
pub mod extract;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod tool;

pub use error::{AgentError, Result};
pub use extract::{clean_response, extract_tool_calls};
pub use message::{Conversation, Message, Role};
pub use provider::{
    Completion, Credential, GenerationOptions, LlmProvider, ProviderKind, ProviderProfile,
    ToolCallingMode, classify,
};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, AgentOutcome};
pub use tool::{Arguments, Tool, ToolCall, ToolDescriptor, ToolRegistry, ToolResult};

pub use tokio_util::sync::CancellationToken;
