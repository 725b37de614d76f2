//! Application State

use std::sync::Arc;

use reqwest::Client;
use toolbridge_runtime::RegistryClient;

use crate::config::ServerConfig;

/// Shared application state
///
/// Read-only after startup; every request builds its own catalog and agent.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide settings
    pub config: Arc<ServerConfig>,

    /// Connection pool shared by model and registry calls
    pub http: Client,

    /// Client for tool registry servers
    pub registries: RegistryClient,
}

impl AppState {
    pub fn new(config: ServerConfig) -> reqwest::Result<Self> {
        let http = Client::builder().timeout(config.model_timeout).build()?;
        let registries = RegistryClient::new(http.clone(), config.registry);

        Ok(Self {
            config: Arc::new(config),
            http,
            registries,
        })
    }
}
