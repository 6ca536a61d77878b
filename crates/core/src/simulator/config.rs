//! Fleet simulator configuration.

use serde::{Deserialize, Serialize};

use crate::task::StepAction;

/// Configuration for the fleet simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Run the simulator alongside the orchestrator.
    #[serde(default)]
    pub enabled: bool,

    /// Interval between heartbeat rounds, in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Delay before answering a scrape request, in milliseconds.
    #[serde(default = "default_response_delay_ms")]
    pub response_delay_ms: u64,

    /// Actions the simulated workers always fail.
    #[serde(default)]
    pub fail_actions: Vec<StepAction>,

    /// Simulated workers.
    #[serde(default = "default_workers")]
    pub workers: Vec<SimulatedWorker>,
}

/// One simulated scraper VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedWorker {
    pub id: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl SimulatedWorker {
    pub fn new(id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

fn default_response_delay_ms() -> u64 {
    1000
}

fn default_location() -> String {
    "unknown".to_string()
}

fn default_workers() -> Vec<SimulatedWorker> {
    vec![
        SimulatedWorker::new("vm-001", "us-east").with_capability("browser"),
        SimulatedWorker::new("vm-002", "us-west").with_capability("browser"),
        SimulatedWorker::new("vm-003", "eu-central")
            .with_capability("browser")
            .with_capability("proxy"),
    ]
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            response_delay_ms: default_response_delay_ms(),
            fail_actions: Vec::new(),
            workers: default_workers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimulatorConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.heartbeat_interval_ms, 5000);
        assert_eq!(config.response_delay_ms, 1000);
        assert_eq!(config.workers.len(), 3);
    }

    #[test]
    fn test_deserialize_workers() {
        let toml = r#"
            enabled = true
            response_delay_ms = 10
            fail_actions = ["analyze"]

            [[workers]]
            id = "vm-100"
            capabilities = ["browser"]
        "#;
        let config: SimulatorConfig = toml::from_str(toml).unwrap();
        assert!(config.enabled);
        assert_eq!(config.fail_actions, vec![StepAction::Analyze]);
        assert_eq!(config.workers.len(), 1);
        assert_eq!(config.workers[0].location, "unknown");
        assert_eq!(config.workers[0].capabilities, vec!["browser"]);
    }
}
