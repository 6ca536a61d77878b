//! Plan generation.
//!
//! A closed policy table from task type to step templates. Adding a task
//! type means adding a branch to [`generate`] and a template function.

use serde_json::{json, Value};
use thiserror::Error;

use crate::task::{Params, Step, StepAction, StepValidation, Task, TaskType};

/// Timeout handed to the scraper for page initialization.
pub const PAGE_TIMEOUT_MS: u64 = 30_000;

/// Errors from plan generation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("unsupported task type: {0}")]
    UnsupportedTaskType(String),

    #[error("plan generator produced no steps")]
    EmptyPlan,
}

/// Produce the ordered plan for `task`. Pure.
pub fn generate(task: &Task) -> Result<Vec<Step>, PlanError> {
    let plan = match &task.task_type {
        TaskType::Scraping => scraping_plan(task),
        TaskType::Analysis => analysis_plan(task),
        TaskType::Configuration => configuration_plan(task),
        TaskType::Other(name) => return Err(PlanError::UnsupportedTaskType(name.clone())),
    };

    if plan.is_empty() {
        return Err(PlanError::EmptyPlan);
    }
    Ok(plan)
}

/// `{task_id}-step-{n}`, 1-based.
pub fn step_id(task_id: &str, n: usize) -> String {
    format!("{}-step-{}", task_id, n)
}

fn scraping_plan(task: &Task) -> Vec<Step> {
    let mut connect = Params::new();
    copy_param(&task.params, "url", &mut connect, "url");
    connect.insert("timeout".to_string(), json!(PAGE_TIMEOUT_MS));
    copy_param(
        &task.params,
        "requiredCapabilities",
        &mut connect,
        "requiredCapabilities",
    );

    let mut extract = Params::new();
    extract.insert(
        "selectors".to_string(),
        param_or(&task.params, "selectors", json!({})),
    );
    extract.insert(
        "extractionRules".to_string(),
        param_or(&task.params, "rules", json!([])),
    );

    let mut analyze = Params::new();
    analyze.insert(
        "validationRules".to_string(),
        param_or(&task.params, "validation", json!({})),
    );

    vec![
        step(
            task,
            1,
            StepAction::Scrape,
            "Initialize browser and connect to target",
            connect,
            ["browserInitialized", "pageLoaded"],
        ),
        step(
            task,
            2,
            StepAction::Scrape,
            "Extract target data",
            extract,
            ["dataExtracted", "validationPassed"],
        ),
        step(
            task,
            3,
            StepAction::Analyze,
            "Analyze and validate extracted data",
            analyze,
            ["analysisComplete", "dataValidated"],
        ),
    ]
}

fn analysis_plan(task: &Task) -> Vec<Step> {
    let mut load = Params::new();
    copy_param(&task.params, "data", &mut load, "data");
    load.insert(
        "preprocessSteps".to_string(),
        param_or(&task.params, "preprocess", json!([])),
    );

    let mut analyze = Params::new();
    copy_param(&task.params, "analysisType", &mut analyze, "analysisType");
    copy_param(&task.params, "analysisConfig", &mut analyze, "config");

    vec![
        step(
            task,
            1,
            StepAction::Analyze,
            "Load and preprocess data",
            load,
            ["dataLoaded", "preprocessingComplete"],
        ),
        step(
            task,
            2,
            StepAction::Analyze,
            "Perform analysis",
            analyze,
            ["analysisComplete", "resultsGenerated"],
        ),
    ]
}

fn configuration_plan(task: &Task) -> Vec<Step> {
    let mut validate = Params::new();
    copy_param(&task.params, "config", &mut validate, "config");
    copy_param(&task.params, "validationRules", &mut validate, "rules");

    let mut apply = Params::new();
    copy_param(&task.params, "config", &mut apply, "config");
    copy_param(&task.params, "target", &mut apply, "target");

    vec![
        step(
            task,
            1,
            StepAction::Configure,
            "Validate configuration parameters",
            validate,
            ["configValidated"],
        ),
        step(
            task,
            2,
            StepAction::Configure,
            "Apply configuration",
            apply,
            ["configApplied", "systemUpdated"],
        ),
    ]
}

fn step<const N: usize>(
    task: &Task,
    n: usize,
    action: StepAction,
    description: &str,
    params: Params,
    required: [&str; N],
) -> Step {
    Step {
        id: step_id(&task.id, n),
        action,
        description: description.to_string(),
        params,
        validation: StepValidation::requiring(required),
    }
}

// Absent and null source keys are left out of the step params.
fn copy_param(from: &Params, key: &str, to: &mut Params, as_key: &str) {
    if let Some(value) = from.get(key).filter(|v| !v.is_null()) {
        to.insert(as_key.to_string(), value.clone());
    }
}

fn param_or(from: &Params, key: &str, default: Value) -> Value {
    from.get(key)
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskDescriptor;
    use chrono::Utc;

    fn task(task_type: TaskType, params: Value) -> Task {
        let params = match params {
            Value::Object(map) => map,
            _ => Params::new(),
        };
        let mut descriptor = TaskDescriptor::new(task_type, "test");
        descriptor.params = params;
        Task::new("task_1", descriptor, Utc::now())
    }

    fn required(step: &Step) -> Vec<&str> {
        step.validation.required.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_scraping_plan() {
        let plan = generate(&task(
            TaskType::Scraping,
            json!({"url": "https://x.test", "selectors": {"title": ".t"}}),
        ))
        .unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].params["url"], "https://x.test");
        assert_eq!(plan[0].params["timeout"], 30_000);
        assert_eq!(plan[1].params["selectors"], json!({"title": ".t"}));
        assert_eq!(plan[1].params["extractionRules"], json!([]));
        assert_eq!(plan[2].params["validationRules"], json!({}));

        assert_eq!(
            plan.iter().map(|s| s.action).collect::<Vec<_>>(),
            vec![StepAction::Scrape, StepAction::Scrape, StepAction::Analyze]
        );
        assert_eq!(required(&plan[0]), vec!["browserInitialized", "pageLoaded"]);
        assert_eq!(required(&plan[1]), vec!["dataExtracted", "validationPassed"]);
        assert_eq!(required(&plan[2]), vec!["analysisComplete", "dataValidated"]);
        assert_eq!(plan[0].id, "task_1-step-1");
        assert_eq!(plan[2].id, "task_1-step-3");
    }

    #[test]
    fn test_scraping_plan_without_url_omits_it() {
        let plan = generate(&task(TaskType::Scraping, json!({}))).unwrap();
        assert!(!plan[0].params.contains_key("url"));
        assert!(!plan[0].params.contains_key("requiredCapabilities"));
    }

    #[test]
    fn test_analysis_plan() {
        let plan = generate(&task(
            TaskType::Analysis,
            json!({
                "data": [1, 2, 3],
                "preprocess": ["dedupe"],
                "analysisType": "summary",
                "analysisConfig": {"depth": 2}
            }),
        ))
        .unwrap();

        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|s| s.action == StepAction::Analyze));
        assert_eq!(plan[0].params["data"], json!([1, 2, 3]));
        assert_eq!(plan[0].params["preprocessSteps"], json!(["dedupe"]));
        assert_eq!(plan[1].params["analysisType"], "summary");
        assert_eq!(plan[1].params["config"], json!({"depth": 2}));
        assert_eq!(required(&plan[1]), vec!["analysisComplete", "resultsGenerated"]);
    }

    #[test]
    fn test_configuration_plan() {
        let plan = generate(&task(
            TaskType::Configuration,
            json!({
                "config": {"concurrency": 4},
                "validationRules": {"requiredKeys": ["concurrency"]},
                "target": "vm-1"
            }),
        ))
        .unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].params["rules"], json!({"requiredKeys": ["concurrency"]}));
        assert_eq!(plan[1].params["target"], "vm-1");
        assert_eq!(required(&plan[0]), vec!["configValidated"]);
        assert_eq!(required(&plan[1]), vec!["configApplied", "systemUpdated"]);
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let err = generate(&task(TaskType::Other("translation".to_string()), json!({})))
            .unwrap_err();
        assert_eq!(err, PlanError::UnsupportedTaskType("translation".to_string()));
    }

    #[test]
    fn test_generation_is_pure() {
        let t = task(TaskType::Scraping, json!({"url": "https://x.test"}));
        assert_eq!(generate(&t).unwrap(), generate(&t).unwrap());
    }
}
