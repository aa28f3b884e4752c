//! Orchestrator for multi-stage response validation.
//!
//! The orchestrator is the composition root. It:
//! - Builds every detector with the same `ValidationLevel` and config
//! - Selects stages from the response type
//! - Merges stage results through the `Aggregator`
//!
//! ## Dispatch
//!
//! | Response type | Stages |
//! |---------------|--------|
//! | `workflow_runs` | hallucination (list), integrity, cross-reference if `workflows` is present |
//! | `workflows` | hallucination (definitions) |
//! | `workflow_run` | hallucination (single run) |

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, debug_span};

use crate::aggregate::{conclude, Aggregator};
use crate::config::{MergeWeights, ValidationConfig};
use crate::detectors::{
    default_config, CrossValidationChecker, DataIntegrityValidator, Detector,
    HallucinationDetector,
};
use crate::finding::Finding;
use crate::records::collection;
use crate::types::{Metadata, RequestParams, ResponseType, ValidationLevel, ValidationResult};
use crate::ValidationError;

/// Runs the detectors for a response and merges their results.
///
/// Holds only immutable state, so one orchestrator can be shared across
/// threads.
#[derive(Debug, Clone)]
pub struct ValidationOrchestrator {
    level: ValidationLevel,
    config: Arc<ValidationConfig>,
    hallucination: HallucinationDetector,
    integrity: DataIntegrityValidator,
    cross_reference: CrossValidationChecker,
    aggregator: Aggregator,
}

impl ValidationOrchestrator {
    /// Create an orchestrator with the built-in configuration.
    pub fn new(level: ValidationLevel) -> Self {
        Self::with_config(level, default_config())
    }

    /// Create an orchestrator with a custom configuration.
    pub fn with_config(level: ValidationLevel, config: Arc<ValidationConfig>) -> Self {
        Self {
            level,
            hallucination: HallucinationDetector::with_config(level, Arc::clone(&config)),
            integrity: DataIntegrityValidator::with_config(level, Arc::clone(&config)),
            cross_reference: CrossValidationChecker::with_config(level, Arc::clone(&config)),
            aggregator: Aggregator::new(level, config.merge_weights),
            config,
        }
    }

    /// Override the per-stage merge weights.
    pub fn with_merge_weights(mut self, weights: MergeWeights) -> Result<Self, ValidationError> {
        weights.check().map_err(ValidationError::InvalidMergeWeights)?;
        self.aggregator = Aggregator::new(self.level, weights);
        Ok(self)
    }

    pub fn level(&self) -> ValidationLevel {
        self.level
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Validate a GitHub Actions response.
    ///
    /// # Arguments
    ///
    /// * `response_data` - The raw JSON response
    /// * `request_params` - The request that produced it
    /// * `response_type` - Which endpoint shape the response has
    ///
    /// # Returns
    ///
    /// A single merged `ValidationResult`. Metadata always carries
    /// `response_type`, `item_count` and `stages`.
    pub fn validate_github_actions_response(
        &self,
        response_data: &Value,
        request_params: &RequestParams,
        response_type: ResponseType,
    ) -> ValidationResult {
        let span = debug_span!("validate_response", response_type = %response_type, level = %self.level);
        let _enter = span.enter();

        let (stages, item_count) = match response_type {
            ResponseType::WorkflowRuns => {
                let runs = match collection(response_data, "workflow_runs") {
                    Ok(runs) => runs,
                    Err(finding) => return self.collection_failure(finding, response_type),
                };

                let mut stages = vec![
                    (
                        self.hallucination.stage(),
                        self.hallucination.validate_workflow_list(runs),
                    ),
                    (
                        self.integrity.stage(),
                        self.integrity
                            .validate_response_consistency(response_data, request_params),
                    ),
                ];

                if let Some(Value::Array(workflows)) = response_data.get("workflows") {
                    stages.push((
                        self.cross_reference.stage(),
                        self.cross_reference.cross_validate_workflow_data(runs, workflows),
                    ));
                }

                (stages, runs.len())
            }

            ResponseType::Workflows => {
                let workflows = match collection(response_data, "workflows") {
                    Ok(workflows) => workflows,
                    Err(finding) => return self.collection_failure(finding, response_type),
                };
                let result = self.hallucination.validate_workflow_definitions(workflows);
                (vec![(self.hallucination.stage(), result)], workflows.len())
            }

            ResponseType::WorkflowRun => {
                let run = response_data
                    .get("workflow_run")
                    .filter(|v| v.is_object())
                    .unwrap_or(response_data);
                let result = self.hallucination.validate_workflow_run(run);
                (vec![(self.hallucination.stage(), result)], 1)
            }
        };

        let result = self
            .aggregator
            .merge(&stages, self.base_metadata(response_type, item_count));

        debug!(
            is_valid = result.is_valid(),
            confidence = result.confidence(),
            issues = result.issues().len(),
            stages = stages.len(),
            "response validated"
        );
        result
    }

    /// Validate with loosely-typed request parameters and a string tag.
    ///
    /// Errors only on caller misuse: an unknown response type or request
    /// parameters that are not an object.
    pub fn validate_json(
        &self,
        response_data: &Value,
        request_params: &Value,
        response_type: &str,
    ) -> Result<ValidationResult, ValidationError> {
        let response_type: ResponseType = response_type.parse()?;
        let request_params = RequestParams::from_value(request_params)?;
        Ok(self.validate_github_actions_response(response_data, &request_params, response_type))
    }

    /// Cross-validate separately fetched runs and workflows responses.
    ///
    /// Each argument may be the full list response or a bare array.
    pub fn cross_validate(&self, runs_response: &Value, workflows_response: &Value) -> ValidationResult {
        let span = debug_span!("cross_validate", level = %self.level);
        let _enter = span.enter();

        let collections = collection(runs_response, "workflow_runs")
            .and_then(|runs| collection(workflows_response, "workflows").map(|wfs| (runs, wfs)));

        let mut base = Metadata::new();
        base.insert("validation_level".to_string(), json!(self.level.as_str()));

        match collections {
            Ok((runs, workflows)) => {
                base.insert("item_count".to_string(), json!(runs.len()));
                let result = self.cross_reference.cross_validate_workflow_data(runs, workflows);
                self.aggregator
                    .merge(&[(self.cross_reference.stage(), result)], base)
            }
            Err(finding) => {
                base.insert("item_count".to_string(), json!(0));
                base.insert("stages".to_string(), json!([]));
                conclude(&[finding], 0.0, self.cross_reference.policy(), self.level, base)
            }
        }
    }

    /// The response lacks its item collection: the structural finding alone.
    fn collection_failure(&self, finding: Finding, response_type: ResponseType) -> ValidationResult {
        debug!(issue = %finding, "response has no item collection");
        let mut metadata = self.base_metadata(response_type, 0);
        metadata.insert("stages".to_string(), json!([]));
        conclude(&[finding], 0.0, self.hallucination.policy(), self.level, metadata)
    }

    fn base_metadata(&self, response_type: ResponseType, item_count: usize) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("response_type".to_string(), json!(response_type.as_str()));
        metadata.insert("item_count".to_string(), json!(item_count));
        metadata.insert("validation_level".to_string(), json!(self.level.as_str()));
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_run(id: i64) -> Value {
        json!({
            "id": id,
            "name": "CI Pipeline",
            "status": "completed",
            "conclusion": "success",
            "event": "push",
            "head_branch": "main",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:05:00Z",
            "html_url": format!("https://github.com/octo-org/hello-world/actions/runs/{}", id)
        })
    }

    fn endpoint() -> RequestParams {
        RequestParams {
            endpoint: Some("actions/runs".to_string()),
            ..RequestParams::default()
        }
    }

    #[test]
    fn test_workflow_runs_end_to_end() {
        let orchestrator = ValidationOrchestrator::new(ValidationLevel::Strict);
        let result = orchestrator.validate_github_actions_response(
            &json!({"workflow_runs": [valid_run(1)]}),
            &endpoint(),
            ResponseType::WorkflowRuns,
        );

        assert!(result.is_valid(), "{:?}", result.issues());
        assert!(result.confidence() > 0.8);
        assert_eq!(result.metadata()["response_type"], json!("workflow_runs"));
        assert_eq!(result.metadata()["item_count"], json!(1));
        assert_eq!(result.metadata()["stages"], json!(["hallucination", "integrity"]));
    }

    #[test]
    fn test_level_is_threaded_to_every_stage() {
        let orchestrator = ValidationOrchestrator::new(ValidationLevel::Paranoid);
        assert_eq!(orchestrator.hallucination.level(), ValidationLevel::Paranoid);
        assert_eq!(orchestrator.integrity.level(), ValidationLevel::Paranoid);
        assert_eq!(orchestrator.cross_reference.level(), ValidationLevel::Paranoid);

        let result = orchestrator.validate_github_actions_response(
            &json!({"workflow_runs": []}),
            &endpoint(),
            ResponseType::WorkflowRuns,
        );
        assert_eq!(result.validation_level(), ValidationLevel::Paranoid);
    }

    #[test]
    fn test_integrity_failure_fails_merged_result() {
        let runs: Vec<Value> = (1..=10).map(valid_run).collect();
        let params = RequestParams {
            per_page: Some(5),
            ..endpoint()
        };
        let result = ValidationOrchestrator::new(ValidationLevel::Strict).validate_github_actions_response(
            &json!({"workflow_runs": runs}),
            &params,
            ResponseType::WorkflowRuns,
        );

        assert!(!result.is_valid());
        assert!(result.has_issue_containing("more items than requested"));
        assert_eq!(result.metadata()["hallucination.is_valid"], json!(true));
        assert_eq!(result.metadata()["integrity.is_valid"], json!(false));
    }

    #[test]
    fn test_embedded_workflows_add_cross_reference_stage() {
        let response = json!({
            "workflow_runs": [valid_run(1)],
            "workflows": [{"id": 9, "name": "Nightly", "state": "active", "path": ".github/workflows/nightly.yml"}]
        });
        let result = ValidationOrchestrator::new(ValidationLevel::Strict).validate_github_actions_response(
            &response,
            &endpoint(),
            ResponseType::WorkflowRuns,
        );

        assert_eq!(
            result.metadata()["stages"],
            json!(["hallucination", "integrity", "cross_reference"])
        );
        assert!(result.has_issue_containing("unknown workflow: CI Pipeline"));
        assert!(!result.is_valid());
    }

    #[test]
    fn test_workflows_response() {
        let response = json!({
            "total_count": 1,
            "workflows": [{"id": 9, "name": "CI Pipeline", "state": "active", "path": ".github/workflows/ci.yml"}]
        });
        let result = ValidationOrchestrator::new(ValidationLevel::Strict).validate_github_actions_response(
            &response,
            &RequestParams::default(),
            ResponseType::Workflows,
        );

        assert!(result.is_valid());
        assert_eq!(result.metadata()["stages"], json!(["hallucination"]));
    }

    #[test]
    fn test_single_run_response() {
        let orchestrator = ValidationOrchestrator::new(ValidationLevel::Basic);
        let bare = orchestrator.validate_github_actions_response(
            &valid_run(3),
            &RequestParams::default(),
            ResponseType::WorkflowRun,
        );
        let wrapped = orchestrator.validate_github_actions_response(
            &json!({"workflow_run": valid_run(3)}),
            &RequestParams::default(),
            ResponseType::WorkflowRun,
        );

        assert!(bare.is_valid());
        assert_eq!(bare.confidence(), wrapped.confidence());
        assert_eq!(bare.metadata()["hallucination.run_id"], json!(3));
    }

    #[test]
    fn test_missing_collection_is_hard() {
        let result = ValidationOrchestrator::new(ValidationLevel::Strict).validate_github_actions_response(
            &json!({"total_count": 3}),
            &endpoint(),
            ResponseType::WorkflowRuns,
        );

        assert!(!result.is_valid());
        assert_eq!(result.issues(), ["Missing required field: workflow_runs"]);
        assert_eq!(result.confidence(), 0.0);
        assert_eq!(result.metadata()["stages"], json!([]));
    }

    #[test]
    fn test_validate_json_rejects_unknown_type() {
        let orchestrator = ValidationOrchestrator::new(ValidationLevel::Strict);
        let err = orchestrator
            .validate_json(&json!({"jobs": []}), &json!({}), "jobs")
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedResponseType(ref t) if t == "jobs"));

        let err = orchestrator
            .validate_json(&json!({"workflow_runs": []}), &json!("per_page=5"), "workflow_runs")
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidRequestParams(_)));
    }

    #[test]
    fn test_merge_weights_override() {
        let bad = MergeWeights {
            hallucination: -1.0,
            integrity: 1.0,
            cross_reference: 1.0,
        };
        assert!(ValidationOrchestrator::new(ValidationLevel::Strict)
            .with_merge_weights(bad)
            .is_err());

        let integrity_only = MergeWeights {
            hallucination: 0.0,
            integrity: 1.0,
            cross_reference: 0.0,
        };
        let orchestrator = ValidationOrchestrator::new(ValidationLevel::Strict)
            .with_merge_weights(integrity_only)
            .unwrap();

        let mut run = valid_run(1);
        run["name"] = json!("Test Workflow");
        let result = orchestrator.validate_github_actions_response(
            &json!({"workflow_runs": [run]}),
            &endpoint(),
            ResponseType::WorkflowRuns,
        );
        // the hallucination penalty carries no weight
        assert_eq!(result.confidence(), 1.0);
        assert!(result.has_issue_containing("generic demo name"));
    }

    #[test]
    fn test_cross_validate_separate_responses() {
        let orchestrator = ValidationOrchestrator::new(ValidationLevel::Strict);
        let runs = json!({"workflow_runs": [valid_run(1)]});
        let workflows = json!({"workflows": [{"id": 9, "name": "CI Pipeline", "state": "active", "path": ".github/workflows/ci.yml"}]});

        let result = orchestrator.cross_validate(&runs, &workflows);
        assert!(result.is_valid());
        assert_eq!(result.metadata()["stages"], json!(["cross_reference"]));

        let result = orchestrator.cross_validate(&runs, &json!({}));
        assert!(!result.is_valid());
        assert!(result.has_issue_containing("Missing required field: workflows"));
    }
}
