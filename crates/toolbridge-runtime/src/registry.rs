//! Remote tool registries
//!
//! A registry server publishes its catalog at `GET /tools` and executes
//! calls at `POST /invoke`. Catalogs from several servers are merged into one
//! request-scoped [`ToolRegistry`]; a server that cannot be reached is skipped.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use toolbridge_core::{
    error::{AgentError, Result},
    tool::{Arguments, Tool, ToolDescriptor, ToolRegistry},
};

/// Registry client configuration
#[derive(Clone, Copy, Debug)]
pub struct RegistryConfig {
    /// Probe `GET /health` before listing tools
    pub health_check: bool,

    /// Timeout for the health probe
    pub health_timeout: Duration,

    /// Timeout for listing and invoking tools
    pub request_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check: true,
            health_timeout: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Catalog entry as published by a registry server
#[derive(Deserialize)]
struct WireTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "inputSchema", alias = "input_schema")]
    parameters: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Listing {
    Bare(Vec<WireTool>),
    Wrapped { tools: Vec<WireTool> },
}

impl Listing {
    fn into_tools(self) -> Vec<WireTool> {
        match self {
            Self::Bare(tools) | Self::Wrapped { tools } => tools,
        }
    }
}

/// Outcome of loading tools from a set of endpoints
pub struct CatalogLoad {
    /// Merged catalog, later endpoints overriding earlier ones
    pub registry: ToolRegistry,

    /// One `AgentError::Registry` per skipped endpoint
    pub failed: Vec<AgentError>,

    /// Number of endpoints that contributed a listing
    pub reachable: usize,
}

/// HTTP client for registry servers
#[derive(Clone)]
pub struct RegistryClient {
    http: Client,
    config: RegistryConfig,
}

impl RegistryClient {
    pub const fn new(http: Client, config: RegistryConfig) -> Self {
        Self { http, config }
    }

    /// Probe an endpoint's health route
    pub async fn health(&self, endpoint: &str) -> Result<()> {
        self.http
            .get(url(endpoint, "health"))
            .timeout(self.config.health_timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map(|_| ())
            .map_err(|e| registry_error(endpoint, &e))
    }

    /// Fetch the tool listing of one endpoint
    pub async fn list_tools(&self, endpoint: &str) -> Result<Vec<ToolDescriptor>> {
        let listing: Listing = self
            .http
            .get(url(endpoint, "tools"))
            .timeout(self.config.request_timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| registry_error(endpoint, &e))?
            .json()
            .await
            .map_err(|e| registry_error(endpoint, &e))?;

        Ok(listing
            .into_tools()
            .into_iter()
            .map(|tool| {
                let descriptor = match tool.parameters {
                    Some(parameters) if parameters.is_object() => {
                        ToolDescriptor::new(tool.name, tool.description, parameters)
                    }
                    _ => ToolDescriptor::new(
                        tool.name,
                        tool.description,
                        json!({"type": "object", "properties": {}}),
                    ),
                };
                descriptor.with_endpoint(endpoint)
            })
            .collect())
    }

    /// Execute a tool on the endpoint that published it
    pub async fn invoke(&self, endpoint: &str, name: &str, arguments: &Arguments) -> Result<Value> {
        let execution_error = |reason: String| AgentError::ToolExecution {
            name: name.to_string(),
            reason,
        };

        let response = self
            .http
            .post(url(endpoint, "invoke"))
            .timeout(self.config.request_timeout)
            .json(&json!({"name": name, "arguments": arguments}))
            .send()
            .await
            .map_err(|e| execution_error(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| execution_error(e.to_string()))?;

        if !status.is_success() {
            return Err(execution_error(format!("{status}: {body}")));
        }

        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    async fn load_endpoint(&self, endpoint: &str) -> Result<Vec<ToolDescriptor>> {
        if self.config.health_check {
            self.health(endpoint).await?;
        }
        self.list_tools(endpoint).await
    }

    /// Load and merge the catalogs of `endpoints`
    pub async fn load_catalog(&self, endpoints: &[String]) -> CatalogLoad {
        let endpoints: Vec<&str> = endpoints
            .iter()
            .map(|e| e.trim().trim_end_matches('/'))
            .filter(|e| !e.is_empty())
            .collect();

        let listings = join_all(endpoints.iter().map(|e| self.load_endpoint(e))).await;

        let mut load = CatalogLoad {
            registry: ToolRegistry::new(),
            failed: Vec::new(),
            reachable: 0,
        };

        for (endpoint, listing) in endpoints.iter().zip(listings) {
            match listing {
                Ok(descriptors) => {
                    tracing::debug!(endpoint, tools = descriptors.len(), "Loaded registry");
                    load.reachable += 1;
                    for descriptor in descriptors {
                        load.registry.register(RemoteTool::new(descriptor, self.clone()));
                    }
                }
                Err(e) => {
                    tracing::warn!(endpoint, error = %e, "Skipping registry");
                    load.failed.push(e);
                }
            }
        }

        load
    }
}

fn url(endpoint: &str, route: &str) -> String {
    format!("{}/{route}", endpoint.trim_end_matches('/'))
}

fn registry_error(endpoint: &str, error: &reqwest::Error) -> AgentError {
    AgentError::Registry {
        endpoint: endpoint.to_string(),
        reason: error.to_string(),
    }
}

/// Tool executed by a remote registry
pub struct RemoteTool {
    descriptor: ToolDescriptor,
    client: RegistryClient,
}

impl RemoteTool {
    pub const fn new(descriptor: ToolDescriptor, client: RegistryClient) -> Self {
        Self { descriptor, client }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: &Arguments) -> Result<Value> {
        self.client
            .invoke(&self.descriptor.endpoint, &self.descriptor.name, arguments)
            .await
    }
}
