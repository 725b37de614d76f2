//! Server configuration from environment variables

use std::str::FromStr;
use std::time::Duration;

use toolbridge_runtime::RegistryConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Process-wide settings, read once at startup
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_turns: usize,
    pub tool_timeout: Duration,
    pub model_timeout: Duration,
    pub registry: RegistryConfig,

    /// Used when a request carries no `system_prompt`
    pub default_system_prompt: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:6000".into(),
            max_turns: 10,
            tool_timeout: Duration::from_secs(30),
            model_timeout: Duration::from_secs(600),
            registry: RegistryConfig::default(),
            default_system_prompt: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_turns: parse(&get, "AGENT_MAX_TURNS")?.unwrap_or(defaults.max_turns),
            tool_timeout: parse(&get, "TOOL_TIMEOUT_SECS")?
                .map_or(defaults.tool_timeout, Duration::from_secs),
            model_timeout: parse(&get, "MODEL_TIMEOUT_SECS")?
                .map_or(defaults.model_timeout, Duration::from_secs),
            registry: RegistryConfig {
                health_check: parse(&get, "REGISTRY_HEALTH_CHECK")?
                    .unwrap_or(defaults.registry.health_check),
                health_timeout: parse(&get, "REGISTRY_HEALTH_TIMEOUT_MS")?
                    .map_or(defaults.registry.health_timeout, Duration::from_millis),
                request_timeout: parse(&get, "REGISTRY_TIMEOUT_SECS")?
                    .map_or(defaults.registry.request_timeout, Duration::from_secs),
            },
            default_system_prompt: get("DEFAULT_SYSTEM_PROMPT"),
        })
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    get(var)
        .map(|value| value.parse().map_err(|_| ConfigError::Invalid { var, value }))
        .transpose()
}
