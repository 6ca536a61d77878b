use super::{types::Config, ConfigError, StoreBackend};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - SQLite store has a path
/// - Step timeout, when set, is not 0
/// - An enabled simulator has workers
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Store validation
    if config.store.backend == StoreBackend::Sqlite && config.store.path.is_none() {
        return Err(ConfigError::ValidationError(
            "store.path is required when store.backend = \"sqlite\"".to_string(),
        ));
    }

    // Orchestrator validation
    if config.orchestrator.step_timeout_ms == Some(0) {
        return Err(ConfigError::ValidationError(
            "orchestrator.step_timeout_ms cannot be 0".to_string(),
        ));
    }

    // Simulator validation
    if config.simulator.enabled && config.simulator.workers.is_empty() {
        return Err(ConfigError::ValidationError(
            "simulator.workers cannot be empty when the simulator is enabled".to_string(),
        ));
    }

    Ok(())
}
