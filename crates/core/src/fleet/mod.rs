//! Worker fleet tracking.

mod registry;
mod types;

pub use registry::FleetRegistry;
pub use types::{Performance, Worker, WorkerStatus};
