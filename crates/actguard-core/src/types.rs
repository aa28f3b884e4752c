//! Core types shared by every validation layer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ValidationError;

/// Key/value context attached to a result.
///
/// Ordered so that two results built from the same input serialize identically.
pub type Metadata = BTreeMap<String, Value>;

/// Strictness policy applied by every detector.
///
/// Levels are ordered: `Basic < Strict < Paranoid`. A higher level never
/// relaxes a check that a lower level performs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    Basic,
    #[default]
    Strict,
    Paranoid,
}

impl ValidationLevel {
    /// All levels, least strict first.
    pub const ALL: [ValidationLevel; 3] = [
        ValidationLevel::Basic,
        ValidationLevel::Strict,
        ValidationLevel::Paranoid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Basic => "basic",
            ValidationLevel::Strict => "strict",
            ValidationLevel::Paranoid => "paranoid",
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(ValidationLevel::Basic),
            "strict" => Ok(ValidationLevel::Strict),
            "paranoid" => Ok(ValidationLevel::Paranoid),
            _ => Err(ValidationError::UnknownLevel(s.to_string())),
        }
    }
}

/// Clamp a raw confidence into `[0.0, 1.0]`. NaN maps to `0.0`.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// The verdict of one validation call.
///
/// Built once per call and never mutated afterwards; the constructor is the
/// only way in, and it clamps `confidence`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    is_valid: bool,
    confidence: f64,
    issues: Vec<String>,
    metadata: Metadata,
    validation_level: ValidationLevel,
}

impl ValidationResult {
    pub fn new(
        is_valid: bool,
        confidence: f64,
        issues: Vec<String>,
        metadata: Metadata,
        validation_level: ValidationLevel,
    ) -> Self {
        Self {
            is_valid,
            confidence: clamp_confidence(confidence),
            issues,
            metadata,
            validation_level,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Plausibility score in `[0.0, 1.0]`.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Issues in the order the checks produced them.
    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn validation_level(&self) -> ValidationLevel {
        self.validation_level
    }

    /// True if any issue contains `needle`.
    pub fn has_issue_containing(&self, needle: &str) -> bool {
        self.issues.iter().any(|issue| issue.contains(needle))
    }

    /// Coarse pass/warn/fail reading for display.
    pub fn outcome(&self) -> Outcome {
        match (self.is_valid, self.issues.is_empty()) {
            (true, true) => Outcome::Pass,
            (true, false) => Outcome::Warn,
            (false, _) => Outcome::Fail,
        }
    }
}

/// Display bucket for a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Pass => "PASS",
            Outcome::Warn => "WARN",
            Outcome::Fail => "FAIL",
        })
    }
}

/// Which shape of GitHub Actions response is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// `GET /repos/{owner}/{repo}/actions/runs`
    WorkflowRuns,
    /// `GET /repos/{owner}/{repo}/actions/workflows`
    Workflows,
    /// `GET /repos/{owner}/{repo}/actions/runs/{run_id}`
    WorkflowRun,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::WorkflowRuns => "workflow_runs",
            ResponseType::Workflows => "workflows",
            ResponseType::WorkflowRun => "workflow_run",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "workflow_runs" => Ok(ResponseType::WorkflowRuns),
            "workflows" => Ok(ResponseType::Workflows),
            "workflow_run" => Ok(ResponseType::WorkflowRun),
            other => Err(ValidationError::UnsupportedResponseType(other.to_string())),
        }
    }
}

/// The request that produced a response.
///
/// Mirrors the query parameters of the GitHub Actions list endpoints. Unknown
/// keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    /// API path the response came from (e.g. `actions/runs`)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Requested page size
    #[serde(default, deserialize_with = "lenient_u64")]
    pub per_page: Option<u64>,

    /// Requested page number
    #[serde(default, deserialize_with = "lenient_u64")]
    pub page: Option<u64>,

    /// Status or conclusion filter
    #[serde(default)]
    pub status: Option<String>,

    /// Branch filter
    #[serde(default)]
    pub branch: Option<String>,

    /// Event filter
    #[serde(default)]
    pub event: Option<String>,

    /// Only items updated at or after this instant were asked for
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,

    /// When the request was issued; anchors the freshness window
    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,
}

impl RequestParams {
    /// Parse request parameters from loosely-typed JSON.
    ///
    /// `null` yields empty parameters. Anything other than an object or
    /// `null` is a caller error.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => serde_json::from_value(value.clone())
                .map_err(|e| ValidationError::InvalidRequestParams(e.to_string())),
            other => Err(ValidationError::InvalidRequestParams(format!(
                "expected an object, found {}",
                json_kind(other)
            ))),
        }
    }

    /// Whether the request carries any expectation about recency.
    pub fn implies_recency(&self) -> bool {
        self.since.is_some() || self.requested_at.is_some()
    }
}

/// Accept a JSON number or a numeric string.
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected a non-negative integer, found {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("expected a non-negative integer, found {s:?}"))),
        Some(other) => Err(de::Error::custom(format!(
            "expected a non-negative integer, found {}",
            json_kind(&other)
        ))),
    }
}

/// Short name of a JSON value's type, for messages.
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
