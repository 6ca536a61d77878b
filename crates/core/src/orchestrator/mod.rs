//! Task orchestrator.
//!
//! Drives each submitted task through `Planning -> Executing ->
//! {Completed | Failed | Cancelled}`:
//! - **Planning**: synchronous, at submission
//! - **Executing**: one driver per task, steps strictly in plan order
//! - **Cancellation**: checked against the store before any step result lands

mod config;
mod driver;
mod runner;
mod shared;
mod types;

pub use config::OrchestratorConfig;
pub use runner::{Orchestrator, INTERRUPTED_REASON};
pub use types::{OrchestratorError, OrchestratorStatus};
