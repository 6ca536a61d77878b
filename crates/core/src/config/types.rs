use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::orchestrator::OrchestratorConfig;
use crate::simulator::SimulatorConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Task store configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Database file (required when backend = "sqlite")
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Available task store backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Sqlite => "sqlite",
        }
    }
}

/// Fleet registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FleetConfig {
    /// Seconds without a heartbeat before a worker counts as stale
    #[serde(default = "default_heartbeat_freshness")]
    pub heartbeat_freshness_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            heartbeat_freshness_secs: default_heartbeat_freshness(),
        }
    }
}

fn default_heartbeat_freshness() -> u64 {
    30
}

/// Sanitized config for API responses
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub store: SanitizedStoreConfig,
    pub orchestrator: OrchestratorConfig,
    pub fleet: FleetConfig,
    pub simulator: SanitizedSimulatorConfig,
}

/// Sanitized store config (path reduced to a flag)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStoreConfig {
    pub backend: String,
    pub path_configured: bool,
}

/// Sanitized simulator config (workers reduced to ids)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSimulatorConfig {
    pub enabled: bool,
    pub heartbeat_interval_ms: u64,
    pub response_delay_ms: u64,
    pub fail_actions: Vec<String>,
    pub workers: Vec<String>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            store: SanitizedStoreConfig {
                backend: config.store.backend.as_str().to_string(),
                path_configured: config.store.path.is_some(),
            },
            orchestrator: config.orchestrator.clone(),
            fleet: config.fleet.clone(),
            simulator: SanitizedSimulatorConfig {
                enabled: config.simulator.enabled,
                heartbeat_interval_ms: config.simulator.heartbeat_interval_ms,
                response_delay_ms: config.simulator.response_delay_ms,
                fail_actions: config
                    .simulator
                    .fail_actions
                    .iter()
                    .map(|a| a.as_str().to_string())
                    .collect(),
                workers: config
                    .simulator
                    .workers
                    .iter()
                    .map(|w| w.id.clone())
                    .collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.fleet.heartbeat_freshness_secs, 30);
        assert!(!config.simulator.enabled);
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[store]
backend = "sqlite"
path = "/tmp/tasks.db"

[orchestrator]
step_timeout_ms = 20000

[fleet]
heartbeat_freshness_secs = 10

[simulator]
enabled = true
response_delay_ms = 50

[[simulator.workers]]
id = "vm-001"
location = "us-east"
capabilities = ["browser"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.path, Some(PathBuf::from("/tmp/tasks.db")));
        assert_eq!(config.orchestrator.step_timeout_ms, Some(20000));
        assert_eq!(config.fleet.heartbeat_freshness_secs, 10);
        assert!(config.simulator.enabled);
        assert_eq!(config.simulator.workers.len(), 1);
        assert_eq!(config.simulator.workers[0].location, "us-east");
    }

    #[test]
    fn test_unknown_backend_fails() {
        let toml = r#"
[store]
backend = "postgres"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_sanitized_config_hides_path() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Sqlite;
        config.store.path = Some(PathBuf::from("/srv/private/tasks.db"));

        let sanitized = SanitizedConfig::from(&config);
        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("/srv/private"));
        assert!(sanitized.store.path_configured);
        assert_eq!(sanitized.store.backend, "sqlite");
        assert_eq!(sanitized.simulator.workers, vec!["vm-001", "vm-002", "vm-003"]);
    }
}
