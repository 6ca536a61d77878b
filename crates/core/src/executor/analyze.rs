//! Local analysis of step data.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{StepContext, StepError, StepExecutor, StepOutcome};
use crate::task::Step;

/// Runs `analyze` steps in process.
///
/// Input is `params.data`, falling back to the previous step's output
/// (its `data` field when it has one). Supported preprocess steps are
/// `drop_nulls` and `dedupe`. Validation rules understand `requiredFields`
/// and `minItems`.
#[derive(Debug, Clone, Default)]
pub struct LocalAnalyzer;

impl LocalAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

fn input_data(ctx: &StepContext, step: &Step) -> Option<Value> {
    if let Some(data) = step.params.get("data").filter(|v| !v.is_null()) {
        return Some(data.clone());
    }
    let previous = ctx.previous_output.as_ref().filter(|v| !v.is_null())?;
    match previous.get("data") {
        Some(data) if previous.is_object() => Some(data.clone()),
        _ => Some(previous.clone()),
    }
}

fn preprocess(data: Value, steps: &[Value]) -> Result<Value, StepError> {
    let mut data = data;
    for op in steps {
        let name = op
            .as_str()
            .ok_or_else(|| StepError::Rejected(format!("preprocess step must be a string: {}", op)))?;
        data = match (name, data) {
            ("drop_nulls", Value::Array(items)) => {
                Value::Array(items.into_iter().filter(|v| !v.is_null()).collect())
            }
            ("dedupe", Value::Array(items)) => {
                let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    if !unique.contains(&item) {
                        unique.push(item);
                    }
                }
                Value::Array(unique)
            }
            ("drop_nulls" | "dedupe", other) => other,
            (unknown, _) => {
                return Err(StepError::Rejected(format!(
                    "unknown preprocess step: {}",
                    unknown
                )))
            }
        };
    }
    Ok(data)
}

fn records(data: &Value) -> Vec<&Value> {
    match data {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn summarize(data: &Value, analysis_type: Option<&Value>) -> Value {
    let records = records(data);
    let fields: BTreeSet<&str> = records
        .iter()
        .filter_map(|r| r.as_object())
        .flat_map(|o| o.keys().map(String::as_str))
        .collect();

    let mut summary = json!({
        "records": records.len(),
        "fields": fields,
    });
    if let Some(kind) = analysis_type {
        summary["analysisType"] = kind.clone();
    }
    summary
}

fn validate(data: &Value, rules: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    let records = records(data);

    if let Some(min) = rules.get("minItems").and_then(Value::as_u64) {
        if (records.len() as u64) < min {
            violations.push(format!("expected at least {} items, got {}", min, records.len()));
        }
    }

    if let Some(fields) = rules.get("requiredFields").and_then(Value::as_array) {
        for (index, record) in records.iter().enumerate() {
            for field in fields.iter().filter_map(Value::as_str) {
                if record.get(field).is_none_or(Value::is_null) {
                    violations.push(format!("record {} missing field '{}'", index, field));
                }
            }
        }
    }

    violations
}

#[async_trait]
impl StepExecutor for LocalAnalyzer {
    async fn execute(&self, ctx: &StepContext, step: &Step) -> Result<StepOutcome, StepError> {
        let mut outcome = StepOutcome::default();

        let data = match input_data(ctx, step) {
            Some(data) => {
                outcome.assert_fact("dataLoaded");
                data
            }
            None => Value::Null,
        };

        let preprocess_steps = match step.params.get("preprocessSteps") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(steps)) => steps.clone(),
            Some(other) => {
                return Err(StepError::Rejected(format!(
                    "preprocessSteps must be a list, got {}",
                    other
                )))
            }
        };
        let data = preprocess(data, &preprocess_steps)?;
        outcome.assert_fact("preprocessingComplete");

        let summary = summarize(&data, step.params.get("analysisType"));
        outcome.assert_fact("analysisComplete");
        outcome.assert_fact("resultsGenerated");

        let violations = match step.params.get("validationRules") {
            Some(rules) if rules.is_object() => validate(&data, rules),
            _ => Vec::new(),
        };
        if violations.is_empty() {
            outcome.assert_fact("dataValidated");
        }

        outcome.output = json!({
            "data": data,
            "summary": summary,
            "violations": violations,
        });
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Params, StepAction, StepValidation};

    fn step(params: Value) -> Step {
        Step {
            id: "t-step-1".to_string(),
            action: StepAction::Analyze,
            description: "analyze".to_string(),
            params: params.as_object().cloned().unwrap_or_else(Params::new),
            validation: StepValidation::default(),
        }
    }

    #[tokio::test]
    async fn test_loads_and_preprocesses_param_data() {
        let outcome = LocalAnalyzer::new()
            .execute(
                &StepContext::default(),
                &step(json!({
                    "data": [1, null, 2, 1],
                    "preprocessSteps": ["drop_nulls", "dedupe"]
                })),
            )
            .await
            .unwrap();

        assert_eq!(outcome.output["data"], json!([1, 2]));
        assert_eq!(outcome.output["summary"]["records"], 2);
        for fact in ["dataLoaded", "preprocessingComplete", "analysisComplete", "dataValidated"] {
            assert!(outcome.facts.contains(fact), "missing {}", fact);
        }
    }

    #[tokio::test]
    async fn test_uses_previous_output() {
        let ctx = StepContext {
            previous_output: Some(json!({"title": "Widget", "price": 4})),
            ..Default::default()
        };
        let outcome = LocalAnalyzer::new()
            .execute(
                &ctx,
                &step(json!({"validationRules": {"requiredFields": ["title", "price"]}})),
            )
            .await
            .unwrap();

        assert!(outcome.facts.contains("dataLoaded"));
        assert!(outcome.facts.contains("dataValidated"));
        assert_eq!(outcome.output["summary"]["fields"], json!(["price", "title"]));
    }

    #[tokio::test]
    async fn test_unwraps_previous_data_field() {
        let ctx = StepContext {
            previous_output: Some(json!({"data": [{"a": 1}], "summary": {}})),
            ..Default::default()
        };
        let outcome = LocalAnalyzer::new()
            .execute(&ctx, &step(json!({"analysisType": "summary"})))
            .await
            .unwrap();
        assert_eq!(outcome.output["data"], json!([{"a": 1}]));
        assert_eq!(outcome.output["summary"]["analysisType"], "summary");
    }

    #[tokio::test]
    async fn test_violations_withhold_validated_fact() {
        let outcome = LocalAnalyzer::new()
            .execute(
                &StepContext::default(),
                &step(json!({
                    "data": [{"title": "a"}, {"title": null}],
                    "validationRules": {"requiredFields": ["title"], "minItems": 3}
                })),
            )
            .await
            .unwrap();

        assert!(!outcome.facts.contains("dataValidated"));
        assert_eq!(outcome.output["violations"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_data_withholds_loaded_fact() {
        let outcome = LocalAnalyzer::new()
            .execute(&StepContext::default(), &step(json!({})))
            .await
            .unwrap();
        assert!(!outcome.facts.contains("dataLoaded"));
        assert!(outcome.facts.contains("analysisComplete"));
    }

    #[tokio::test]
    async fn test_unknown_preprocess_step_rejected() {
        let err = LocalAnalyzer::new()
            .execute(
                &StepContext::default(),
                &step(json!({"data": [1], "preprocessSteps": ["normalize"]})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Rejected(_)));
    }
}
