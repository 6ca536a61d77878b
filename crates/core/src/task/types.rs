//! Task and step model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form parameter mapping.
pub type Params = serde_json::Map<String, Value>;

/// Kind of work a task describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Scraping,
    Analysis,
    Configuration,
    /// Any type the planner has no template for.
    #[serde(untagged)]
    Other(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            TaskType::Scraping => "scraping",
            TaskType::Analysis => "analysis",
            TaskType::Configuration => "configuration",
            TaskType::Other(name) => name,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Recorded, plan not yet attached.
    #[serde(alias = "queued")]
    Planning,
    /// Plan attached, steps running.
    #[serde(alias = "running")]
    Executing,
    /// Reserved for a validation phase between steps. Not entered today.
    Evaluating,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Planning,
        TaskState::Executing,
        TaskState::Evaluating,
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Cancelled,
    ];

    /// Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Planning => "planning",
            TaskState::Executing => "executing",
            TaskState::Evaluating => "evaluating",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown task state: {}", s))
    }
}

/// What a step asks a capability to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Scrape,
    Analyze,
    Configure,
}

impl StepAction {
    pub const ALL: [StepAction; 3] = [StepAction::Scrape, StepAction::Analyze, StepAction::Configure];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepAction::Scrape => "scrape",
            StepAction::Analyze => "analyze",
            StepAction::Configure => "configure",
        }
    }
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Success contract for a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepValidation {
    /// Facts the executor must report.
    pub required: BTreeSet<String>,
    /// Output keys that must equal these values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Params>,
}

impl StepValidation {
    pub fn requiring<I, S>(facts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: facts.into_iter().map(Into::into).collect(),
            conditions: None,
        }
    }
}

/// One unit of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub action: StepAction,
    pub description: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub validation: StepValidation,
}

/// What a collaborator submits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Params,
}

impl TaskDescriptor {
    pub fn new(task_type: TaskType, title: impl Into<String>) -> Self {
        Self {
            task_type,
            title: title.into(),
            description: String::new(),
            params: Params::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// A unit of orchestrated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub state: TaskState,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<Step>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_index: Option<usize>,
    /// Step outputs keyed by step id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Params>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(rename = "assignedVM", default, skip_serializing_if = "Option::is_none")]
    pub assigned_vm: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Task {
    /// A fresh task in `Planning`.
    pub fn new(id: impl Into<String>, descriptor: TaskDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            task_type: descriptor.task_type,
            title: descriptor.title,
            description: descriptor.description,
            state: TaskState::Planning,
            params: descriptor.params,
            plan: None,
            current_step_index: None,
            result: None,
            error: None,
            progress: 0.0,
            assigned_vm: None,
            start_time: now,
            end_time: None,
        }
    }

    pub fn plan_len(&self) -> usize {
        self.plan.as_ref().map_or(0, Vec::len)
    }

    /// Step at `current_step_index`, if the task is mid-plan.
    pub fn current_step(&self) -> Option<&Step> {
        let index = self.current_step_index?;
        self.plan.as_ref()?.get(index)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
