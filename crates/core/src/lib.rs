pub mod bus;
pub mod config;
pub mod executor;
pub mod fleet;
pub mod metrics;
pub mod orchestrator;
pub mod planner;
pub mod simulator;
pub mod task;
pub mod testing;

pub use bus::{BusError, BusStream, EventBus, Message, SubscriptionId, TopicPattern};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
    StoreBackend,
};
pub use executor::{
    BusScrapeExecutor, CapabilityTable, LocalAnalyzer, LocalConfigurator, StepContext, StepError,
    StepExecutor, StepOutcome,
};
pub use fleet::{FleetRegistry, Performance, Worker, WorkerStatus};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorStatus, INTERRUPTED_REASON,
};
pub use planner::PlanError;
pub use simulator::{FleetSimulator, SimulatedWorker, SimulatorConfig};
pub use task::{
    MemoryTaskStore, SqliteTaskStore, Step, StepAction, Task, TaskDescriptor, TaskFilter,
    TaskState, TaskStore, TaskStoreError, TaskType,
};
