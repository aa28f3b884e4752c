//! Cross Validation Checker
//!
//! **Question**: Do the runs and the workflow definitions describe the same
//! repository?
//!
//! A run's `name` is a soft reference to a workflow definition's `name`, and
//! its optional `workflow_id` a reference to a definition's `id`. Each
//! reference is one check; a dangling one is a hard finding. When enough
//! workflows are present, the share of workflows with no runs at all is one
//! more check.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::aggregate::{conclude, ratio_confidence, Stage};
use crate::config::ValidationConfig;
use crate::finding::{item_location, Finding, IssueKind};
use crate::records::parse_id;
use crate::types::{Metadata, ValidationLevel, ValidationResult};

use super::{default_config, Detector};

/// Checks referential consistency between runs and workflow definitions.
#[derive(Debug, Clone)]
pub struct CrossValidationChecker {
    level: ValidationLevel,
    config: Arc<ValidationConfig>,
}

impl CrossValidationChecker {
    pub fn new(level: ValidationLevel) -> Self {
        Self::with_config(level, default_config())
    }

    pub fn with_config(level: ValidationLevel, config: Arc<ValidationConfig>) -> Self {
        Self { level, config }
    }

    /// Cross-check `workflow_runs` against `workflows`.
    pub fn cross_validate_workflow_data(
        &self,
        workflow_runs: &[Value],
        workflows: &[Value],
    ) -> ValidationResult {
        let policy = self.policy();

        let definitions: Vec<&Value> = workflows.iter().filter(|w| w.is_object()).collect();
        let known_names: HashSet<&str> = definitions.iter().filter_map(|w| text(w, "name")).collect();
        let known_ids: HashSet<i64> = definitions
            .iter()
            .filter_map(|w| w.get("id").and_then(parse_id))
            .collect();

        let mut findings = Vec::new();
        let mut checks = 0usize;
        let mut unnamed_runs = 0usize;
        let mut referenced_names = HashSet::new();
        let mut referenced_ids = HashSet::new();

        for (index, run) in workflow_runs.iter().enumerate() {
            match text(run, "name") {
                Some(name) => {
                    checks += 1;
                    referenced_names.insert(name);
                    if !known_names.contains(name) {
                        findings.push(
                            Finding::hard(
                                IssueKind::ReferentialIntegrity,
                                format!("Run references unknown workflow: {}", name),
                            )
                            .at(item_location(index)),
                        );
                    }
                }
                None => unnamed_runs += 1,
            }

            if let Some(workflow_id) = run.get("workflow_id").and_then(parse_id) {
                checks += 1;
                referenced_ids.insert(workflow_id);
                if !known_ids.contains(&workflow_id) {
                    findings.push(
                        Finding::hard(
                            IssueKind::ReferentialIntegrity,
                            format!("Run references unknown workflow id: {}", workflow_id),
                        )
                        .at(item_location(index)),
                    );
                }
            }
        }

        let orphaned = definitions
            .iter()
            .filter(|w| {
                let by_name = text(w, "name").is_some_and(|n| referenced_names.contains(n));
                let by_id = w
                    .get("id")
                    .and_then(parse_id)
                    .is_some_and(|id| referenced_ids.contains(&id));
                !by_name && !by_id
            })
            .count();

        let mut metadata = Metadata::new();
        metadata.insert("run_count".to_string(), json!(workflow_runs.len()));
        metadata.insert("workflow_count".to_string(), json!(definitions.len()));
        metadata.insert("unnamed_runs".to_string(), json!(unnamed_runs));
        metadata.insert("orphaned_workflows".to_string(), json!(orphaned));

        let orphan_check_applies = !workflow_runs.is_empty()
            && !definitions.is_empty()
            && definitions.len() >= self.config.orphan_min_workflows;

        if orphan_check_applies {
            checks += 1;
            let ratio = orphaned as f64 / definitions.len() as f64;
            metadata.insert("orphan_ratio".to_string(), json!(ratio));
            if ratio > policy.orphan_ratio_threshold {
                findings.push(Finding::hard(
                    IssueKind::ReferentialIntegrity,
                    format!(
                        "Too many orphaned workflows: {} of {} have no runs",
                        orphaned,
                        definitions.len()
                    ),
                ));
            }
        }

        metadata.insert("total_checks".to_string(), json!(checks));
        let confidence = ratio_confidence(findings.len() as f64, checks as f64);

        let result = conclude(&findings, confidence, policy, self.level, metadata);
        debug!(
            level = %self.level,
            runs = workflow_runs.len(),
            workflows = definitions.len(),
            orphaned,
            confidence = result.confidence(),
            "cross-validated workflow data"
        );
        result
    }
}

impl Detector for CrossValidationChecker {
    fn stage(&self) -> Stage {
        Stage::CrossReference
    }

    fn level(&self) -> ValidationLevel {
        self.level
    }

    fn config(&self) -> &ValidationConfig {
        &self.config
    }
}

/// Trimmed, non-empty string field.
fn text<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
