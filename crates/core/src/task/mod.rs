//! Task model and storage.

mod memory_store;
mod sqlite_store;
mod store;
mod types;

pub use memory_store::MemoryTaskStore;
pub use sqlite_store::SqliteTaskStore;
pub use store::{
    apply_to, progress, StepFailure, TaskFilter, TaskMutation, TaskStore, TaskStoreError,
};
pub use types::{
    Params, Step, StepAction, StepValidation, Task, TaskDescriptor, TaskState, TaskType,
};
