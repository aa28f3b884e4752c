//! Aggregate: Combines findings and stage results into confidence scores.
//!
//! Every combination rule used by the detectors and the orchestrator lives
//! here as a pure function:
//! 1. A single record starts at 1.0 and is multiplied once per finding
//!    (`penalized_confidence`)
//! 2. A list takes the worst item (`minimum_confidence`)
//! 3. Request/reference checks use `1 - violations / checks` (`ratio_confidence`)
//! 4. The orchestrator averages stage confidences by weight (`weighted_average`)
//!
//! Acceptance is never part of the arithmetic: a result is valid only when it
//! has no hard finding and its confidence reaches the level's threshold.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{LevelPolicy, MergeWeights};
use crate::finding::{Finding, Severity};
use crate::types::{clamp_confidence, Metadata, ValidationLevel, ValidationResult};

/// The validation stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Hallucination,
    Integrity,
    CrossReference,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Hallucination => "hallucination",
            Stage::Integrity => "integrity",
            Stage::CrossReference => "cross_reference",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multiply 1.0 by the level's factor for each finding.
///
/// Hard findings apply `hard_penalty`; soft findings apply the level-scaled
/// multiplier of their own weight.
pub fn penalized_confidence(findings: &[Finding], policy: &LevelPolicy) -> f64 {
    let raw = findings.iter().fold(1.0, |confidence, finding| {
        confidence
            * match finding.severity {
                Severity::Hard => policy.hard_penalty,
                Severity::Soft => policy.soft_multiplier(finding.weight),
            }
    });
    clamp_confidence(raw)
}

/// Worst-case confidence. An empty input is fully confident.
pub fn minimum_confidence<I>(confidences: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let min = confidences.into_iter().fold(f64::INFINITY, f64::min);
    if min.is_infinite() {
        1.0
    } else {
        clamp_confidence(min)
    }
}

/// `1 - weighted_violations / max_possible`, or 1.0 when nothing was checked.
pub fn ratio_confidence(weighted_violations: f64, max_possible: f64) -> f64 {
    if max_possible <= 0.0 {
        return 1.0;
    }
    clamp_confidence(1.0 - weighted_violations / max_possible)
}

/// Weighted mean of `(confidence, weight)` pairs.
///
/// Falls back to the plain mean when every weight is zero; an empty input is
/// fully confident.
pub fn weighted_average(entries: &[(f64, f64)]) -> f64 {
    if entries.is_empty() {
        return 1.0;
    }

    let total_weight: f64 = entries.iter().map(|(_, w)| w).sum();
    if total_weight <= 0.0 {
        let sum: f64 = entries.iter().map(|(c, _)| c).sum();
        return clamp_confidence(sum / entries.len() as f64);
    }

    let weighted: f64 = entries.iter().map(|(c, w)| c * w).sum();
    clamp_confidence(weighted / total_weight)
}

/// Count `(hard, soft)` findings.
pub fn tally(findings: &[Finding]) -> (usize, usize) {
    let hard = findings.iter().filter(|f| f.is_hard()).count();
    (hard, findings.len() - hard)
}

/// Count findings per issue kind, keyed by the kind's name.
pub fn tally_kinds(findings: &[Finding]) -> BTreeMap<&'static str, usize> {
    let mut kinds = BTreeMap::new();
    for finding in findings {
        *kinds.entry(finding.kind.as_str()).or_insert(0) += 1;
    }
    kinds
}

/// Build the final result for a set of findings and a computed confidence.
pub fn conclude(
    findings: &[Finding],
    confidence: f64,
    policy: &LevelPolicy,
    level: ValidationLevel,
    mut metadata: Metadata,
) -> ValidationResult {
    let (hard, soft) = tally(findings);
    let confidence = clamp_confidence(confidence);
    let is_valid = hard == 0 && confidence >= policy.acceptance_threshold;

    metadata.insert("hard_violations".to_string(), json!(hard));
    metadata.insert("soft_violations".to_string(), json!(soft));
    metadata.insert("issue_kinds".to_string(), json!(tally_kinds(findings)));

    ValidationResult::new(
        is_valid,
        confidence,
        findings.iter().map(Finding::to_issue).collect(),
        metadata,
        level,
    )
}

/// Merges per-stage results into one.
#[derive(Debug, Clone)]
pub struct Aggregator {
    level: ValidationLevel,
    weights: MergeWeights,
}

impl Aggregator {
    pub fn new(level: ValidationLevel, weights: MergeWeights) -> Self {
        Self { level, weights }
    }

    /// Merge stage results in execution order.
    ///
    /// `is_valid` is the AND of all stages, confidence is the weighted
    /// average, issues are concatenated and each stage's metadata is copied
    /// under a `<stage>.` prefix. `base` entries are kept as-is.
    pub fn merge(&self, stages: &[(Stage, ValidationResult)], mut base: Metadata) -> ValidationResult {
        let is_valid = stages.iter().all(|(_, result)| result.is_valid());

        let entries: Vec<(f64, f64)> = stages
            .iter()
            .map(|(stage, result)| (result.confidence(), self.weights.weight(*stage)))
            .collect();
        let confidence = weighted_average(&entries);

        let mut issues = Vec::new();
        for (stage, result) in stages {
            issues.extend(result.issues().iter().cloned());

            for (key, value) in result.metadata() {
                base.insert(format!("{}.{}", stage, key), value.clone());
            }
            base.insert(format!("{}.confidence", stage), json!(result.confidence()));
            base.insert(format!("{}.is_valid", stage), json!(result.is_valid()));
        }

        let stage_names: Vec<Value> = stages.iter().map(|(s, _)| json!(s.as_str())).collect();
        base.insert("stages".to_string(), Value::Array(stage_names));

        ValidationResult::new(is_valid, confidence, issues, base, self.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LevelPolicies;
    use crate::finding::IssueKind;

    fn strict() -> LevelPolicy {
        LevelPolicies::default().strict
    }

    fn stage_result(is_valid: bool, confidence: f64, issues: &[&str]) -> ValidationResult {
        let mut metadata = Metadata::new();
        metadata.insert("item_count".to_string(), json!(issues.len()));
        ValidationResult::new(
            is_valid,
            confidence,
            issues.iter().map(|s| s.to_string()).collect(),
            metadata,
            ValidationLevel::Strict,
        )
    }

    #[test]
    fn test_no_findings_is_full_confidence() {
        assert_eq!(penalized_confidence(&[], &strict()), 1.0);
    }

    #[test]
    fn test_hard_findings_outweigh_soft() {
        let policy = strict();
        let hard = penalized_confidence(&[Finding::invalid_id()], &policy);
        let soft = penalized_confidence(&[Finding::suspicious_pattern("generic demo name", 0.8)], &policy);

        assert!((hard - 0.4).abs() < 1e-12);
        assert!((soft - 0.8).abs() < 1e-12);
        assert!(hard < soft);
    }

    #[test]
    fn test_penalties_multiply() {
        let findings = vec![
            Finding::soft(IssueKind::Plausibility, "a", 0.5),
            Finding::soft(IssueKind::Plausibility, "b", 0.5),
        ];
        assert!((penalized_confidence(&findings, &strict()) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_minimum_confidence() {
        assert_eq!(minimum_confidence(vec![0.9, 0.4, 0.7]), 0.4);
        assert_eq!(minimum_confidence(Vec::new()), 1.0);
    }

    #[test]
    fn test_ratio_confidence() {
        assert_eq!(ratio_confidence(0.0, 0.0), 1.0);
        assert_eq!(ratio_confidence(1.0, 4.0), 0.75);
        assert_eq!(ratio_confidence(5.0, 4.0), 0.0);
    }

    #[test]
    fn test_weighted_average() {
        assert_eq!(weighted_average(&[]), 1.0);
        assert!((weighted_average(&[(1.0, 1.0), (0.5, 1.0)]) - 0.75).abs() < 1e-12);
        assert!((weighted_average(&[(1.0, 3.0), (0.0, 1.0)]) - 0.75).abs() < 1e-12);
        // zero weights fall back to the plain mean
        assert!((weighted_average(&[(1.0, 0.0), (0.0, 0.0)]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_conclude_hard_finding_is_invalid() {
        let findings = vec![Finding::missing_field("name")];
        let result = conclude(&findings, 0.99, &strict(), ValidationLevel::Strict, Metadata::new());

        assert!(!result.is_valid());
        assert_eq!(result.issues(), ["Missing required field: name"]);
        assert_eq!(result.metadata()["hard_violations"], json!(1));
        assert_eq!(result.metadata()["issue_kinds"], json!({"structural": 1}));
    }

    #[test]
    fn test_issue_kinds_counted_by_name() {
        let findings = vec![
            Finding::invalid_id(),
            Finding::missing_field("name"),
            Finding::missing_field("event"),
            Finding::suspicious_pattern("placeholder text", 0.6),
        ];
        let kinds = tally_kinds(&findings);

        assert_eq!(kinds["format"], 1);
        assert_eq!(kinds["structural"], 2);
        assert_eq!(kinds["plausibility"], 1);
        assert!(!kinds.contains_key("referential_integrity"));

        let clean = conclude(&[], 1.0, &strict(), ValidationLevel::Strict, Metadata::new());
        assert_eq!(clean.metadata()["issue_kinds"], json!({}));
    }

    #[test]
    fn test_conclude_soft_only_can_stay_valid() {
        let findings = vec![Finding::suspicious_pattern("placeholder text", 0.6)];
        let result = conclude(&findings, 0.6, &strict(), ValidationLevel::Strict, Metadata::new());

        assert!(result.is_valid());
        assert_eq!(result.issues().len(), 1);
        assert_eq!(result.metadata()["soft_violations"], json!(1));
    }

    #[test]
    fn test_conclude_below_threshold_is_invalid() {
        let findings = vec![Finding::suspicious_pattern("language model artifact", 0.4)];
        let result = conclude(&findings, 0.4, &strict(), ValidationLevel::Strict, Metadata::new());
        assert!(!result.is_valid());
    }

    #[test]
    fn test_merge_ands_validity_and_averages() {
        let aggregator = Aggregator::new(ValidationLevel::Strict, MergeWeights::default());
        let merged = aggregator.merge(
            &[
                (Stage::Hallucination, stage_result(true, 1.0, &[])),
                (Stage::Integrity, stage_result(false, 0.5, &["Response contains more items than requested"])),
            ],
            Metadata::new(),
        );

        assert!(!merged.is_valid());
        assert!((merged.confidence() - 0.75).abs() < 1e-12);
        assert_eq!(merged.issues(), ["Response contains more items than requested"]);
        assert_eq!(merged.metadata()["integrity.item_count"], json!(1));
        assert_eq!(merged.metadata()["stages"], json!(["hallucination", "integrity"]));
    }

    #[test]
    fn test_merge_respects_weights() {
        let weights = MergeWeights {
            hallucination: 3.0,
            integrity: 1.0,
            cross_reference: 1.0,
        };
        let merged = Aggregator::new(ValidationLevel::Basic, weights).merge(
            &[
                (Stage::Hallucination, stage_result(true, 1.0, &[])),
                (Stage::Integrity, stage_result(true, 0.0, &[])),
            ],
            Metadata::new(),
        );
        assert!((merged.confidence() - 0.75).abs() < 1e-12);
        assert_eq!(merged.validation_level(), ValidationLevel::Basic);
    }
}
