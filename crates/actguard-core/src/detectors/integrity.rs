//! Data Integrity Validator
//!
//! **Question**: Is this response consistent with the request that produced it?
//!
//! Every check that applies to the request is counted, and confidence is
//! `1 - weighted_violations / checks_performed`:
//!
//! | Check | Applies when | Severity |
//! |-------|--------------|----------|
//! | Page size | `per_page` given | hard |
//! | Page bounds | `page`, `per_page` and `total_count` given | hard |
//! | Total count | response carries `total_count` | hard |
//! | Filters | `status` / `branch` / `event` given, once per item | hard |
//! | Staleness | `since` or `requested_at` given, once per item | soft |
//!
//! The wall clock is never read; staleness is judged against the request's
//! own timestamps.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde_json::{json, Value};
use tracing::debug;

use crate::aggregate::{conclude, ratio_confidence, Stage};
use crate::config::ValidationConfig;
use crate::finding::{item_location, Finding, IssueKind};
use crate::records::{collection, parse_timestamp};
use crate::types::{Metadata, RequestParams, ValidationLevel, ValidationResult};

use super::{default_config, Detector};

/// Keys under which list responses carry their items.
const ITEM_KEYS: [&str; 2] = ["workflow_runs", "workflows"];

/// Checks a response against its request parameters.
#[derive(Debug, Clone)]
pub struct DataIntegrityValidator {
    level: ValidationLevel,
    config: Arc<ValidationConfig>,
}

/// Running count of checks and violations.
#[derive(Default)]
struct Ledger {
    findings: Vec<Finding>,
    checks: f64,
    weighted_violations: f64,
}

impl Ledger {
    fn check(&mut self) {
        self.checks += 1.0;
    }

    fn violation(&mut self, finding: Finding, weight: f64) {
        self.weighted_violations += weight;
        self.findings.push(finding);
    }
}

impl DataIntegrityValidator {
    pub fn new(level: ValidationLevel) -> Self {
        Self::with_config(level, default_config())
    }

    pub fn with_config(level: ValidationLevel, config: Arc<ValidationConfig>) -> Self {
        Self { level, config }
    }

    /// Validate `response_data` against `request_params`.
    pub fn validate_response_consistency(
        &self,
        response_data: &Value,
        request_params: &RequestParams,
    ) -> ValidationResult {
        let policy = self.policy();
        let mut metadata = Metadata::new();

        let items = match response_items(response_data) {
            Ok(items) => items,
            Err(finding) => {
                metadata.insert("item_count".to_string(), json!(0));
                return conclude(&[finding], 0.0, policy, self.level, metadata);
            }
        };
        metadata.insert("item_count".to_string(), json!(items.len()));

        let mut ledger = Ledger::default();

        if let Some(per_page) = request_params.per_page {
            ledger.check();
            if items.len() as u64 > per_page {
                ledger.violation(
                    Finding::hard(
                        IssueKind::Consistency,
                        format!(
                            "Response contains more items than requested ({} > per_page {})",
                            items.len(),
                            per_page
                        ),
                    ),
                    1.0,
                );
            }
        }

        self.check_total_count(response_data, items.len(), request_params, &mut ledger);
        self.check_filters(items, request_params, &mut ledger);

        let cutoff = self.stale_cutoff(request_params);
        let stale_items = match cutoff {
            Some(cutoff) => self.check_staleness(items, cutoff, &mut ledger),
            None => 0,
        };

        let confidence = ratio_confidence(ledger.weighted_violations, ledger.checks);

        metadata.insert("checks_performed".to_string(), json!(ledger.checks));
        metadata.insert("weighted_violations".to_string(), json!(ledger.weighted_violations));
        metadata.insert("stale_items".to_string(), json!(stale_items));
        if let Some(cutoff) = cutoff {
            metadata.insert("stale_cutoff".to_string(), json!(format_instant(cutoff)));
        }

        let result = conclude(&ledger.findings, confidence, policy, self.level, metadata);
        debug!(
            level = %self.level,
            checks = ledger.checks,
            violations = ledger.weighted_violations,
            confidence = result.confidence(),
            "checked response consistency"
        );
        result
    }

    fn check_total_count(
        &self,
        response: &Value,
        item_count: usize,
        params: &RequestParams,
        ledger: &mut Ledger,
    ) {
        let Some(raw) = response.get("total_count").filter(|v| !v.is_null()) else {
            return;
        };

        ledger.check();
        let Some(total) = raw.as_u64() else {
            ledger.violation(Finding::invalid_format("total_count"), 1.0);
            return;
        };

        if total < item_count as u64 {
            ledger.violation(
                Finding::hard(
                    IssueKind::Consistency,
                    format!(
                        "Reported total_count is smaller than item count ({} < {})",
                        total, item_count
                    ),
                ),
                1.0,
            );
        }

        if let (Some(page), Some(per_page)) = (params.page, params.per_page) {
            ledger.check();
            let skipped = page.saturating_sub(1).saturating_mul(per_page);
            if item_count > 0 && skipped >= total {
                ledger.violation(
                    Finding::hard(
                        IssueKind::Consistency,
                        format!("Items returned for page {} beyond total_count {}", page, total),
                    ),
                    1.0,
                );
            }
        }
    }

    fn check_filters(&self, items: &[Value], params: &RequestParams, ledger: &mut Ledger) {
        let filters: Vec<(&str, &str)> = [
            ("status", params.status.as_deref()),
            ("branch", params.branch.as_deref()),
            ("event", params.event.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, wanted)| wanted.map(|w| (name, w)))
        .collect();

        if filters.is_empty() {
            return;
        }

        for (index, item) in items.iter().enumerate() {
            for (name, wanted) in &filters {
                ledger.check();
                if !matches_filter(item, name, wanted) {
                    ledger.violation(
                        Finding::hard(
                            IssueKind::Consistency,
                            format!("Response item does not match requested {} filter", name),
                        )
                        .at(item_location(index)),
                        1.0,
                    );
                }
            }
        }
    }

    /// Items updated before this instant are stale.
    fn stale_cutoff(&self, params: &RequestParams) -> Option<DateTime<Utc>> {
        if let Some(since) = params.since {
            return Some(since);
        }
        let requested_at = params.requested_at?;
        let window = TimeDelta::from_std(self.policy().freshness_window).unwrap_or(TimeDelta::MAX);
        Some(
            requested_at
                .checked_sub_signed(window)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        )
    }

    fn check_staleness(&self, items: &[Value], cutoff: DateTime<Utc>, ledger: &mut Ledger) -> usize {
        let stale_weight = self.policy().stale_weight;
        let mut stale = 0;

        for (index, item) in items.iter().enumerate() {
            ledger.check();
            let updated_at = item
                .get("updated_at")
                .and_then(Value::as_str)
                .and_then(parse_timestamp);

            if let Some(updated_at) = updated_at.filter(|t| *t < cutoff) {
                stale += 1;
                ledger.violation(
                    Finding::soft(
                        IssueKind::Consistency,
                        format!(
                            "Stale data detected (updated {}, expected after {})",
                            format_instant(updated_at),
                            format_instant(cutoff)
                        ),
                        stale_weight,
                    )
                    .at(item_location(index)),
                    stale_weight,
                );
            }
        }

        stale
    }
}

impl Detector for DataIntegrityValidator {
    fn stage(&self) -> Stage {
        Stage::Integrity
    }

    fn level(&self) -> ValidationLevel {
        self.level
    }

    fn config(&self) -> &ValidationConfig {
        &self.config
    }
}

fn response_items(response: &Value) -> Result<&[Value], Finding> {
    for key in ITEM_KEYS {
        if let Ok(items) = collection(response, key) {
            return Ok(items);
        }
    }
    collection(response, ITEM_KEYS[0])
}

/// Whether `item` satisfies the named request filter.
fn matches_filter(item: &Value, filter: &str, wanted: &str) -> bool {
    let field = |name: &str| item.get(name).and_then(Value::as_str);
    match filter {
        // GitHub accepts both statuses and conclusions in the `status` filter.
        "status" => [field("status"), field("conclusion")]
            .into_iter()
            .flatten()
            .any(|value| value.eq_ignore_ascii_case(wanted)),
        "branch" => field("head_branch") == Some(wanted),
        "event" => field("event") == Some(wanted),
        _ => true,
    }
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}
