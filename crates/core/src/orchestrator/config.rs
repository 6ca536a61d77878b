//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the task orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Deadline for a single step, in milliseconds.
    /// Unset means a step waits for its result indefinitely.
    #[serde(default)]
    pub step_timeout_ms: Option<u64>,

    /// Capacity of the WebSocket fan-out channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_event_buffer() -> usize {
    256
}

impl OrchestratorConfig {
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: None,
            event_buffer: default_event_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.step_timeout_ms, None);
        assert_eq!(config.step_timeout(), None);
        assert_eq!(config.event_buffer, 256);
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: OrchestratorConfig = toml::from_str("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            step_timeout_ms = 15000
            event_buffer = 64
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.step_timeout(), Some(Duration::from_secs(15)));
        assert_eq!(config.event_buffer, 64);
    }
}
