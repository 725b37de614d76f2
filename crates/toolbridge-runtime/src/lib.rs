//! # toolbridge-runtime
//!
//! HTTP collaborators of the orchestration loop.
//!
//! ## Components
//!
//! - **OpenAI-compatible provider**: one client for every supported backend,
//!   hosted or self-hosted
//! - **Registry client**: loads tool catalogs and executes remote tools
//!
//! ## Usage
//!
//! ```rust,ignore
//! use toolbridge_runtime::{OpenAiCompatibleProvider, RegistryClient, RegistryConfig};
//!
//! let registries = RegistryClient::new(http.clone(), RegistryConfig::default());
//! let catalog = registries.load_catalog(&servers).await;
//!
//! let provider = OpenAiCompatibleProvider::new(profile, http);
//! let agent = AgentBuilder::new()
//!     .provider(Arc::new(provider))
//!     .tools(catalog.registry)
//!     .build()?;
//! ```

pub mod openai;
pub mod registry;

pub use openai::OpenAiCompatibleProvider;
pub use registry::{CatalogLoad, RegistryClient, RegistryConfig, RemoteTool};

// Re-export core types for convenience
pub use toolbridge_core::{
    Agent, AgentBuilder, AgentError, CancellationToken, LlmProvider, Message, ProviderProfile,
    Result, Role, Tool, ToolRegistry,
};
