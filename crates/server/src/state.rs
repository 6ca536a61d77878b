use std::sync::Arc;

use scraperdash_core::{Config, EventBus, FleetSimulator, Orchestrator, SanitizedConfig};

use crate::api::WsBroadcaster;

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Arc<Orchestrator>,
    simulator: Option<Arc<FleetSimulator>>,
    ws_broadcaster: WsBroadcaster,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: Arc<Orchestrator>,
        simulator: Option<Arc<FleetSimulator>>,
        ws_broadcaster: WsBroadcaster,
    ) -> Self {
        Self {
            config,
            orchestrator,
            simulator,
            ws_broadcaster,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.orchestrator.bus()
    }

    pub fn simulator(&self) -> Option<&Arc<FleetSimulator>> {
        self.simulator.as_ref()
    }

    pub fn ws_broadcaster(&self) -> &WsBroadcaster {
        &self.ws_broadcaster
    }
}
