//! Configuration steps.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{StepContext, StepError, StepExecutor, StepOutcome};
use crate::bus::{topic, EventBus};
use crate::task::Step;

/// Validates `params.config` against `params.rules` and, when the step names
/// a `target`, pushes it out on `config/{target}/apply`.
#[derive(Debug)]
pub struct LocalConfigurator {
    bus: Arc<EventBus>,
}

impl LocalConfigurator {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

fn missing_keys<'a>(config: &serde_json::Map<String, Value>, rules: &'a Value) -> Vec<&'a str> {
    rules
        .get("requiredKeys")
        .and_then(Value::as_array)
        .map(|keys| {
            keys.iter()
                .filter_map(Value::as_str)
                .filter(|key| !config.contains_key(*key))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl StepExecutor for LocalConfigurator {
    async fn execute(&self, ctx: &StepContext, step: &Step) -> Result<StepOutcome, StepError> {
        let config = match step.params.get("config") {
            Some(Value::Object(config)) => config,
            Some(other) => {
                return Err(StepError::Rejected(format!(
                    "config must be an object, got {}",
                    other
                )))
            }
            None => return Err(StepError::Rejected("no config given".to_string())),
        };

        if let Some(rules) = step.params.get("rules") {
            let missing = missing_keys(config, rules);
            if !missing.is_empty() {
                return Err(StepError::Failed(format!(
                    "missing required config keys: {}",
                    missing.join(", ")
                )));
            }
        }

        let mut outcome = StepOutcome::new(json!({ "config": config }));
        outcome.assert_fact("configValidated");

        if let Some(target) = step.params.get("target") {
            let target = target
                .as_str()
                .filter(|t| !t.is_empty() && !t.contains('/'))
                .ok_or_else(|| StepError::Rejected(format!("invalid target: {}", target)))?;

            let delivered = self.bus.publish(
                &topic::config_apply(target),
                json!({
                    "taskId": ctx.task_id,
                    "target": target,
                    "config": config,
                }),
            );
            info!(task_id = %ctx.task_id, target = %target, delivered, "Configuration applied");

            outcome.output["target"] = json!(target);
            outcome.assert_fact("configApplied");
            outcome.assert_fact("systemUpdated");
        }

        Ok(outcome)
    }
}
