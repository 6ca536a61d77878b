//! Step capabilities.
//!
//! Each [`StepAction`] maps to one [`StepExecutor`] in a [`CapabilityTable`].
//! The orchestrator looks the executor up, runs it, and then checks the
//! step's validation contract against the returned [`StepOutcome`].

mod analyze;
mod configure;
mod scrape;

pub use analyze::LocalAnalyzer;
pub use configure::LocalConfigurator;
pub use scrape::BusScrapeExecutor;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::bus::{BusError, EventBus};
use crate::task::{Params, Step, StepAction};

/// Errors a capability can return.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    /// The work ran and did not succeed.
    #[error("{0}")]
    Failed(String),

    /// The step's parameters are unusable.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("no result within {0} ms")]
    Timeout(u64),

    #[error("no capability registered for action '{0}'")]
    NoCapability(StepAction),
}

/// What the executor gets to know about the surrounding task.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub task_id: String,
    pub step_index: usize,
    pub assigned_vm: Option<String>,
    /// Output of the previous step, if any.
    pub previous_output: Option<Value>,
    pub task_params: Params,
}

/// Successful execution: the facts asserted and the step's output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub facts: BTreeSet<String>,
    pub output: Value,
}

impl StepOutcome {
    pub fn new(output: Value) -> Self {
        Self {
            facts: BTreeSet::new(),
            output,
        }
    }

    pub fn with_fact(mut self, fact: impl Into<String>) -> Self {
        self.facts.insert(fact.into());
        self
    }

    pub fn assert_fact(&mut self, fact: impl Into<String>) {
        self.facts.insert(fact.into());
    }
}

/// A capability that runs one kind of step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, ctx: &StepContext, step: &Step) -> Result<StepOutcome, StepError>;
}

/// Action to executor lookup.
#[derive(Clone, Default)]
pub struct CapabilityTable {
    executors: HashMap<StepAction, Arc<dyn StepExecutor>>,
}

impl std::fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut actions: Vec<_> = self.executors.keys().collect();
        actions.sort();
        f.debug_struct("CapabilityTable")
            .field("actions", &actions)
            .finish()
    }
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scrape over the bus, analyze and configure locally.
    pub fn standard(bus: Arc<EventBus>) -> Result<Self, BusError> {
        let mut table = Self::new();
        table.register(
            StepAction::Scrape,
            Arc::new(BusScrapeExecutor::new(Arc::clone(&bus))?),
        );
        table.register(StepAction::Analyze, Arc::new(LocalAnalyzer::new()));
        table.register(StepAction::Configure, Arc::new(LocalConfigurator::new(bus)));
        Ok(table)
    }

    /// Install or replace the executor for `action`.
    pub fn register(&mut self, action: StepAction, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(action, executor);
    }

    pub fn get(&self, action: StepAction) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(&action).cloned()
    }

    pub fn has(&self, action: StepAction) -> bool {
        self.executors.contains_key(&action)
    }
}

/// Check a step's validation contract against an outcome.
///
/// Every required fact must be asserted and every condition must equal the
/// same key of the output.
pub fn check_contract(step: &Step, outcome: &StepOutcome) -> Result<(), String> {
    let missing: Vec<&str> = step
        .validation
        .required
        .iter()
        .filter(|fact| !outcome.facts.contains(*fact))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing required facts: {}", missing.join(", ")));
    }

    if let Some(conditions) = &step.validation.conditions {
        for (key, expected) in conditions {
            if outcome.output.get(key) != Some(expected) {
                return Err(format!("condition not met: {}", key));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StepValidation;
    use serde_json::json;

    fn step(required: &[&str], conditions: Option<Value>) -> Step {
        let mut validation = StepValidation::requiring(required.iter().copied());
        validation.conditions = conditions.and_then(|c| c.as_object().cloned());
        Step {
            id: "s".to_string(),
            action: StepAction::Analyze,
            description: "s".to_string(),
            params: Params::new(),
            validation,
        }
    }

    #[test]
    fn test_contract_requires_every_fact() {
        let step = step(&["a", "b"], None);
        let partial = StepOutcome::new(json!({})).with_fact("a");
        let err = check_contract(&step, &partial).unwrap_err();
        assert!(err.contains("b"));

        let full = partial.with_fact("b").with_fact("extra");
        assert!(check_contract(&step, &full).is_ok());
    }

    #[test]
    fn test_contract_checks_conditions() {
        let step = step(&[], Some(json!({"status": "ok"})));
        assert!(check_contract(&step, &StepOutcome::new(json!({"status": "ok"}))).is_ok());
        assert!(check_contract(&step, &StepOutcome::new(json!({"status": "bad"}))).is_err());
        assert!(check_contract(&step, &StepOutcome::new(json!(null))).is_err());
    }

    #[test]
    fn test_table_register_replaces() {
        let bus = Arc::new(EventBus::new());
        let mut table = CapabilityTable::standard(Arc::clone(&bus)).unwrap();
        for action in StepAction::ALL {
            assert!(table.has(action));
        }

        let analyzer: Arc<dyn StepExecutor> = Arc::new(LocalAnalyzer::new());
        table.register(StepAction::Scrape, Arc::clone(&analyzer));
        let got = table.get(StepAction::Scrape).unwrap();
        assert!(Arc::ptr_eq(&got, &analyzer));
    }

    #[test]
    fn test_empty_table() {
        let table = CapabilityTable::new();
        assert!(table.get(StepAction::Scrape).is_none());
    }
}
