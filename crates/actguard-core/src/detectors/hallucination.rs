//! Hallucination Detector
//!
//! **Question**: Does this look like data a real GitHub Actions API returned?
//!
//! This detector evaluates single records and homogeneous lists:
//! - structure: required fields present and non-null
//! - format: ids, statuses, conclusions and timestamps parse
//! - plausibility: free text checked against the suspicious pattern table
//!
//! ## Level Gates
//!
//! | Level | Adds |
//! |-------|------|
//! | **BASIC** | Required fields, formats, pattern scan of `name` |
//! | **STRICT** | `html_url` shape, duplicate ids in lists |
//! | **PARANOID** | `html_url` required, positive ids, timestamp ordering, status/conclusion agreement, known event types, pattern scan of `display_title` and `head_branch` |

use std::collections::HashSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::aggregate::{conclude, minimum_confidence, penalized_confidence, Stage};
use crate::config::ValidationConfig;
use crate::finding::{item_location, Finding, IssueKind};
use crate::records::{is_known_event, parse_id, RunStatus, WorkflowDefinition, WorkflowRun};
use crate::types::{Metadata, ValidationLevel, ValidationResult};

use super::{default_config, Detector};

lazy_static! {
    static ref RUN_URL: Regex =
        Regex::new(r"^https://[^\s/]+/[^\s/]+/[^\s/]+/actions/runs/\d+(/\S*)?$").unwrap();
}

/// Free-text fields of a run scanned at each level.
const BASIC_TEXT_FIELDS: &[&str] = &["name"];
const PARANOID_TEXT_FIELDS: &[&str] = &["name", "display_title", "head_branch"];

/// Structural and plausibility checks on runs and workflow definitions.
#[derive(Debug, Clone)]
pub struct HallucinationDetector {
    level: ValidationLevel,
    config: Arc<ValidationConfig>,
}

impl HallucinationDetector {
    pub fn new(level: ValidationLevel) -> Self {
        Self::with_config(level, default_config())
    }

    pub fn with_config(level: ValidationLevel, config: Arc<ValidationConfig>) -> Self {
        Self { level, config }
    }

    /// Validate a single workflow run.
    pub fn validate_workflow_run(&self, record: &Value) -> ValidationResult {
        let findings = self.run_findings(record);
        let confidence = penalized_confidence(&findings, self.policy());

        let mut metadata = Metadata::new();
        if let Some(id) = record.get("id").and_then(parse_id) {
            metadata.insert("run_id".to_string(), json!(id));
        }
        metadata.insert("item_count".to_string(), json!(1));

        let result = conclude(&findings, confidence, self.policy(), self.level, metadata);
        debug!(
            level = %self.level,
            confidence = result.confidence(),
            issues = result.issues().len(),
            "validated workflow run"
        );
        result
    }

    /// Validate a list of workflow runs.
    ///
    /// Overall confidence is the worst item's, further penalized by list-level
    /// hard findings. Item issues carry an `item[i]: ` prefix.
    pub fn validate_workflow_list(&self, records: &[Value]) -> ValidationResult {
        self.validate_list(records, |record| self.run_findings(record), "run")
    }

    /// Validate a single workflow definition.
    pub fn validate_workflow_definition(&self, record: &Value) -> ValidationResult {
        let findings = self.definition_findings(record);
        let confidence = penalized_confidence(&findings, self.policy());

        let mut metadata = Metadata::new();
        metadata.insert("item_count".to_string(), json!(1));

        conclude(&findings, confidence, self.policy(), self.level, metadata)
    }

    /// Validate a list of workflow definitions.
    pub fn validate_workflow_definitions(&self, records: &[Value]) -> ValidationResult {
        self.validate_list(records, |record| self.definition_findings(record), "workflow")
    }

    fn validate_list<F>(&self, records: &[Value], check: F, noun: &str) -> ValidationResult
    where
        F: Fn(&Value) -> Vec<Finding>,
    {
        let policy = self.policy();
        let ceiling = self.config.max_list_size;

        let mut metadata = Metadata::new();
        metadata.insert("item_count".to_string(), json!(records.len()));

        if records.len() > ceiling {
            debug!(items = records.len(), ceiling, "list exceeds ceiling");
            metadata.insert("max_list_size".to_string(), json!(ceiling));
            let finding = Finding::hard(
                IssueKind::Plausibility,
                format!("Unreasonably large list: {} items (max {})", records.len(), ceiling),
            );
            return conclude(&[finding], 0.0, policy, self.level, metadata);
        }

        let mut findings = Vec::new();
        let mut item_confidences = Vec::with_capacity(records.len());
        let mut valid_items = 0usize;

        for (index, record) in records.iter().enumerate() {
            let item_findings = check(record);
            let confidence = penalized_confidence(&item_findings, policy);
            trace!(index, confidence, findings = item_findings.len(), "list item checked");

            if !item_findings.iter().any(Finding::is_hard) && confidence >= policy.acceptance_threshold {
                valid_items += 1;
            }
            item_confidences.push(confidence);
            findings.extend(item_findings.into_iter().map(|f| f.at(item_location(index))));
        }

        let list_findings = if self.level >= ValidationLevel::Strict {
            duplicate_ids(records, noun)
        } else {
            Vec::new()
        };

        let confidence = minimum_confidence(item_confidences)
            * penalized_confidence(&list_findings, policy);
        findings.extend(list_findings);

        metadata.insert("valid_items".to_string(), json!(valid_items));

        let result = conclude(&findings, confidence, policy, self.level, metadata);
        debug!(
            level = %self.level,
            items = records.len(),
            confidence = result.confidence(),
            issues = result.issues().len(),
            "validated {} list",
            noun
        );
        result
    }

    /// All findings for one run at this detector's level.
    fn run_findings(&self, record: &Value) -> Vec<Finding> {
        let mut findings = match WorkflowRun::parse(record) {
            Ok(run) => self.run_semantics(&run),
            Err(findings) => findings,
        };

        if self.level >= ValidationLevel::Paranoid
            && record.is_object()
            && record.get("html_url").map_or(true, Value::is_null)
        {
            findings.push(Finding::missing_field("html_url"));
        }

        let fields = if self.level >= ValidationLevel::Paranoid {
            PARANOID_TEXT_FIELDS
        } else {
            BASIC_TEXT_FIELDS
        };
        findings.extend(self.scan_text(record, fields));

        findings
    }

    /// Level-gated checks on a structurally sound run.
    ///
    /// STRICT adds format checks only. Cross-field consistency starts at PARANOID.
    fn run_semantics(&self, run: &WorkflowRun) -> Vec<Finding> {
        let mut findings = Vec::new();

        if self.level >= ValidationLevel::Strict {
            if let Some(url) = &run.html_url {
                if !RUN_URL.is_match(url) {
                    findings.push(Finding::invalid_format("html_url"));
                }
            }
        }

        if self.level < ValidationLevel::Paranoid {
            return findings;
        }

        if run.id <= 0 {
            findings.push(Finding::invalid_id());
        }

        if run.updated_at < run.created_at {
            findings.push(Finding::hard(
                IssueKind::Consistency,
                "updated_at precedes created_at",
            ));
        }

        match (run.status, run.conclusion) {
            (RunStatus::Completed, None) => findings.push(Finding::soft(
                IssueKind::Consistency,
                "Completed run missing conclusion",
                0.85,
            )),
            (status, Some(_)) if status.is_unfinished() => findings.push(Finding::soft(
                IssueKind::Consistency,
                "Conclusion set on unfinished run",
                0.85,
            )),
            _ => {}
        }

        if !is_known_event(&run.event) {
            findings.push(Finding::soft(
                IssueKind::Plausibility,
                format!("Unrecognized event type: {}", run.event),
                0.9,
            ));
        }

        findings
    }

    fn definition_findings(&self, record: &Value) -> Vec<Finding> {
        let mut findings = match WorkflowDefinition::parse(record) {
            Ok(workflow) if self.level >= ValidationLevel::Paranoid && workflow.id <= 0 => {
                vec![Finding::invalid_id()]
            }
            Ok(_) => Vec::new(),
            Err(findings) => findings,
        };
        findings.extend(self.scan_text(record, BASIC_TEXT_FIELDS));
        findings
    }

    /// Suspicious pattern findings over the string values of `fields`.
    fn scan_text(&self, record: &Value, fields: &[&str]) -> Vec<Finding> {
        let texts: Vec<&str> = fields
            .iter()
            .filter_map(|field| record.get(*field).and_then(Value::as_str))
            .collect();

        self.config
            .suspicious_patterns
            .scan(&texts)
            .into_iter()
            .map(|pattern| Finding::suspicious_pattern(pattern.name(), pattern.weight()))
            .collect()
    }
}

impl Detector for HallucinationDetector {
    fn stage(&self) -> Stage {
        Stage::Hallucination
    }

    fn level(&self) -> ValidationLevel {
        self.level
    }

    fn config(&self) -> &ValidationConfig {
        &self.config
    }
}

/// One hard finding per id seen more than once, in first-repeat order.
fn duplicate_ids(records: &[Value], noun: &str) -> Vec<Finding> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut findings = Vec::new();

    for id in records.iter().filter_map(|r| r.get("id").and_then(parse_id)) {
        if !seen.insert(id) && reported.insert(id) {
            findings.push(Finding::hard(
                IssueKind::Consistency,
                format!("Duplicate {} ID: {}", noun, id),
            ));
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_run() -> Value {
        json!({
            "id": 30433642,
            "name": "CI Pipeline",
            "display_title": "Bump serde to 1.0.210",
            "status": "completed",
            "conclusion": "success",
            "event": "push",
            "head_branch": "main",
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:05:00Z",
            "html_url": "https://github.com/octo-org/hello-world/actions/runs/30433642"
        })
    }

    fn run_with_id(id: i64) -> Value {
        let mut run = valid_run();
        run["id"] = json!(id);
        run["html_url"] = json!(format!(
            "https://github.com/octo-org/hello-world/actions/runs/{}",
            id
        ));
        run
    }

    fn detector(level: ValidationLevel) -> HallucinationDetector {
        HallucinationDetector::new(level)
    }

    #[test]
    fn test_valid_run_passes_at_every_level() {
        for level in ValidationLevel::ALL {
            let result = detector(level).validate_workflow_run(&valid_run());
            assert!(result.is_valid(), "{:?}: {:?}", level, result.issues());
            assert!(result.confidence() > 0.9);
            assert!(result.issues().is_empty());
        }
    }

    #[test]
    fn test_missing_field_fails() {
        let mut run = valid_run();
        run.as_object_mut().unwrap().remove("head_branch");

        let result = detector(ValidationLevel::Basic).validate_workflow_run(&run);
        assert!(!result.is_valid());
        assert!(result.has_issue_containing("Missing required field: head_branch"));
    }

    #[test]
    fn test_html_url_required_only_at_paranoid() {
        let mut run = valid_run();
        run.as_object_mut().unwrap().remove("html_url");

        assert!(detector(ValidationLevel::Strict).validate_workflow_run(&run).is_valid());

        let paranoid = detector(ValidationLevel::Paranoid).validate_workflow_run(&run);
        assert!(!paranoid.is_valid());
        assert!(paranoid.has_issue_containing("Missing required field: html_url"));
    }

    #[test]
    fn test_invalid_formats_fail() {
        let mut run = valid_run();
        run["id"] = json!("run-one");
        run["status"] = json!("exploded");
        run["created_at"] = json!("yesterday");

        let result = detector(ValidationLevel::Basic).validate_workflow_run(&run);
        assert!(!result.is_valid());
        assert!(result.has_issue_containing("Invalid ID format"));
        assert!(result.has_issue_containing("Invalid status value"));
        assert!(result.has_issue_containing("Invalid created_at timestamp"));
        assert_eq!(result.metadata()["hard_violations"], json!(3));
    }

    #[test]
    fn test_suspicious_name_is_soft() {
        let mut run = valid_run();
        run["name"] = json!("Test Workflow");

        let result = detector(ValidationLevel::Strict).validate_workflow_run(&run);
        assert!(result.is_valid());
        assert!(result.has_issue_containing("Suspicious pattern detected: generic demo name"));
        assert!(result.confidence() < 1.0);
    }

    #[test]
    fn test_paranoid_scans_more_fields() {
        let mut run = valid_run();
        run["head_branch"] = json!("placeholder-branch");

        let strict = detector(ValidationLevel::Strict).validate_workflow_run(&run);
        let paranoid = detector(ValidationLevel::Paranoid).validate_workflow_run(&run);

        assert!(strict.issues().is_empty());
        assert!(paranoid.has_issue_containing("placeholder text"));
        assert!(paranoid.confidence() < strict.confidence());
    }

    #[test]
    fn test_timestamp_ordering_checked_at_paranoid() {
        let mut run = valid_run();
        run["updated_at"] = json!("2024-05-01T09:00:00Z");

        assert!(detector(ValidationLevel::Strict).validate_workflow_run(&run).is_valid());
        let paranoid = detector(ValidationLevel::Paranoid).validate_workflow_run(&run);
        assert!(!paranoid.is_valid());
        assert!(paranoid.has_issue_containing("updated_at precedes created_at"));
    }

    #[test]
    fn test_status_conclusion_agreement() {
        let mut run = valid_run();
        run["status"] = json!("in_progress");

        let result = detector(ValidationLevel::Paranoid).validate_workflow_run(&run);
        assert!(result.is_valid());
        assert!(result.has_issue_containing("Conclusion set on unfinished run"));

        run["status"] = json!("completed");
        run["conclusion"] = Value::Null;
        let result = detector(ValidationLevel::Paranoid).validate_workflow_run(&run);
        assert!(result.is_valid());
        assert!(result.has_issue_containing("Completed run missing conclusion"));
    }

    #[test]
    fn test_optional_conclusion_keeps_strict_confidence() {
        let mut completed = valid_run();
        completed["conclusion"] = Value::Null;

        let mut queued = valid_run();
        queued["status"] = json!("queued");

        for run in [completed, queued] {
            for level in [ValidationLevel::Basic, ValidationLevel::Strict] {
                let result = detector(level).validate_workflow_run(&run);
                assert!(result.is_valid());
                assert!(result.issues().is_empty(), "{:?}", result.issues());
                assert_eq!(result.confidence(), 1.0);
            }
        }
    }

    #[test]
    fn test_non_positive_id_rejected_only_at_paranoid() {
        let run = run_with_id(0);

        for level in [ValidationLevel::Basic, ValidationLevel::Strict] {
            let result = detector(level).validate_workflow_run(&run);
            assert!(result.is_valid());
            assert!(result.confidence() > 0.9);
        }

        let paranoid = detector(ValidationLevel::Paranoid).validate_workflow_run(&run);
        assert!(!paranoid.is_valid());
        assert!(paranoid.has_issue_containing("Invalid ID format"));
    }

    #[test]
    fn test_bad_html_url_fails_from_strict() {
        let mut run = valid_run();
        run["html_url"] = json!("http://example.invalid/run");

        assert!(detector(ValidationLevel::Basic).validate_workflow_run(&run).is_valid());
        let strict = detector(ValidationLevel::Strict).validate_workflow_run(&run);
        assert!(strict.has_issue_containing("Invalid html_url format"));
    }

    #[test]
    fn test_unknown_event_flagged_at_paranoid() {
        let mut run = valid_run();
        run["event"] = json!("telepathy");

        let paranoid = detector(ValidationLevel::Paranoid).validate_workflow_run(&run);
        assert!(paranoid.has_issue_containing("Unrecognized event type: telepathy"));
        assert!(detector(ValidationLevel::Strict)
            .validate_workflow_run(&run)
            .issues()
            .is_empty());
    }

    #[test]
    fn test_list_takes_worst_item() {
        let mut suspicious = run_with_id(2);
        suspicious["name"] = json!("Sample pipeline");

        let result = detector(ValidationLevel::Strict)
            .validate_workflow_list(&[run_with_id(1), suspicious.clone()]);
        let single = detector(ValidationLevel::Strict).validate_workflow_run(&suspicious);

        assert_eq!(result.confidence(), single.confidence());
        assert!(result.has_issue_containing("item[1]: Suspicious pattern detected"));
        assert_eq!(result.metadata()["item_count"], json!(2));
    }

    #[test]
    fn test_empty_list_is_valid() {
        let result = detector(ValidationLevel::Paranoid).validate_workflow_list(&[]);
        assert!(result.is_valid());
        assert_eq!(result.confidence(), 1.0);
    }

    #[test]
    fn test_oversized_list_rejected() {
        let records: Vec<Value> = (1..=1500).map(run_with_id).collect();
        let result = detector(ValidationLevel::Basic).validate_workflow_list(&records);

        assert!(!result.is_valid());
        assert!(result.has_issue_containing("Unreasonably large list"));
        assert_eq!(result.issues().len(), 1);
    }

    #[test]
    fn test_duplicate_ids_flagged_from_strict() {
        let records = vec![run_with_id(7), run_with_id(7), run_with_id(7)];

        assert!(detector(ValidationLevel::Basic).validate_workflow_list(&records).is_valid());
        let strict = detector(ValidationLevel::Strict).validate_workflow_list(&records);
        assert!(!strict.is_valid());
        assert_eq!(
            strict.issues().iter().filter(|i| i.contains("Duplicate run ID: 7")).count(),
            1
        );
    }

    #[test]
    fn test_non_object_item_fails_list() {
        let result = detector(ValidationLevel::Basic)
            .validate_workflow_list(&[run_with_id(1), json!(42)]);
        assert!(!result.is_valid());
        assert!(result.has_issue_containing("item[1]: Invalid record: expected object"));
    }

    #[test]
    fn test_workflow_definitions() {
        let workflows = vec![
            json!({"id": 1, "name": "CI Pipeline", "state": "active", "path": ".github/workflows/ci.yml"}),
            json!({"id": 2, "name": "Release", "state": "disabled_manually", "path": ".github/workflows/release.yaml"}),
        ];
        let result = detector(ValidationLevel::Strict).validate_workflow_definitions(&workflows);
        assert!(result.is_valid(), "{:?}", result.issues());

        let broken = json!({"id": 3, "name": "Deploy", "state": "active"});
        let result = detector(ValidationLevel::Strict).validate_workflow_definition(&broken);
        assert!(!result.is_valid());
        assert!(result.has_issue_containing("Missing required field: path"));
    }

    #[test]
    fn test_custom_pattern_table() {
        let mut config = ValidationConfig::default();
        config.suspicious_patterns = crate::detectors::PatternTable::new(vec![
            crate::detectors::SuspiciousPattern::new("internal codename", r"(?i)\bbluebird\b", 0.5)
                .unwrap(),
        ]);
        let detector = HallucinationDetector::with_config(ValidationLevel::Strict, Arc::new(config));

        let mut run = valid_run();
        run["name"] = json!("Bluebird nightly");
        let result = detector.validate_workflow_run(&run);
        assert!(result.has_issue_containing("internal codename"));

        run["name"] = json!("Test Workflow");
        assert!(detector.validate_workflow_run(&run).issues().is_empty());
    }
}
