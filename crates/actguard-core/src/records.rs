//! Typed views of the GitHub Actions shapes being validated.
//!
//! Raw payloads are `serde_json::Value`s of unknown quality. Parsing turns a
//! value into a typed record or returns every structural/format finding at
//! once; nothing here panics or errors on bad data.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::finding::{Finding, IssueKind};
use crate::types::json_kind;

/// Event types that can trigger a workflow run.
pub const KNOWN_EVENTS: &[&str] = &[
    "branch_protection_rule",
    "check_run",
    "check_suite",
    "create",
    "delete",
    "deployment",
    "deployment_status",
    "discussion",
    "discussion_comment",
    "dynamic",
    "fork",
    "gollum",
    "issue_comment",
    "issues",
    "label",
    "merge_group",
    "milestone",
    "page_build",
    "public",
    "pull_request",
    "pull_request_review",
    "pull_request_review_comment",
    "pull_request_target",
    "push",
    "registry_package",
    "release",
    "repository_dispatch",
    "schedule",
    "status",
    "watch",
    "workflow_call",
    "workflow_dispatch",
    "workflow_run",
];

pub fn is_known_event(event: &str) -> bool {
    KNOWN_EVENTS.binary_search(&event).is_ok()
}

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Requested,
    Pending,
    ActionRequired,
    Cancelled,
    Failure,
    Neutral,
    Skipped,
    Stale,
    Success,
    TimedOut,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Waiting => "waiting",
            RunStatus::Requested => "requested",
            RunStatus::Pending => "pending",
            RunStatus::ActionRequired => "action_required",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failure => "failure",
            RunStatus::Neutral => "neutral",
            RunStatus::Skipped => "skipped",
            RunStatus::Stale => "stale",
            RunStatus::Success => "success",
            RunStatus::TimedOut => "timed_out",
        }
    }

    /// Statuses of runs that have not finished yet.
    pub fn is_unfinished(&self) -> bool {
        matches!(
            self,
            RunStatus::Queued
                | RunStatus::InProgress
                | RunStatus::Waiting
                | RunStatus::Requested
                | RunStatus::Pending
        )
    }
}

impl FromStr for RunStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string())).map_err(|_| ())
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conclusion of a finished workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    Stale,
    StartupFailure,
}

impl FromStr for RunConclusion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string())).map_err(|_| ())
    }
}

/// State of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Active,
    Deleted,
    DisabledFork,
    DisabledInactivity,
    DisabledManually,
}

impl FromStr for WorkflowState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string())).map_err(|_| ())
    }
}

/// A workflow run as returned by `actions/runs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRun {
    pub id: i64,
    pub name: String,
    pub display_title: Option<String>,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub event: String,
    pub head_branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub html_url: Option<String>,
    pub workflow_id: Option<i64>,
}

impl WorkflowRun {
    /// Fields every run must carry at any level.
    pub const REQUIRED_FIELDS: [&'static str; 7] = [
        "id",
        "name",
        "status",
        "event",
        "head_branch",
        "created_at",
        "updated_at",
    ];

    /// Parse a run, collecting every structural and format finding.
    pub fn parse(value: &Value) -> Result<Self, Vec<Finding>> {
        let Some(object) = value.as_object() else {
            return Err(vec![Finding::not_an_object(json_kind(value))]);
        };

        let mut reader = FieldReader::new(object);

        let id = reader.required_id("id");
        let name = reader.required_str("name");
        let status = reader.required_enum::<RunStatus>("status", "Invalid status value");
        let event = reader.required_str("event");
        let head_branch = reader.required_str("head_branch");
        let created_at = reader.required_timestamp("created_at");
        let updated_at = reader.required_timestamp("updated_at");
        let display_title = reader.optional_str("display_title");
        let conclusion =
            reader.optional_enum::<RunConclusion>("conclusion", "Invalid conclusion value");
        let html_url = reader.optional_str("html_url");
        let workflow_id = reader.optional_id("workflow_id");

        let findings = reader.finish();
        match (id, name, status, event, head_branch, created_at, updated_at) {
            (
                Some(id),
                Some(name),
                Some(status),
                Some(event),
                Some(head_branch),
                Some(created_at),
                Some(updated_at),
            ) if findings.is_empty() => Ok(Self {
                id,
                name,
                display_title: display_title.flatten(),
                status,
                conclusion: conclusion.flatten(),
                event,
                head_branch,
                created_at,
                updated_at,
                html_url: html_url.flatten(),
                workflow_id: workflow_id.flatten(),
            }),
            _ => Err(findings),
        }
    }
}

/// A workflow definition as returned by `actions/workflows`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowDefinition {
    pub id: i64,
    pub name: String,
    pub state: WorkflowState,
    pub path: String,
}

impl WorkflowDefinition {
    pub const REQUIRED_FIELDS: [&'static str; 4] = ["id", "name", "state", "path"];

    /// Parse a workflow definition, collecting every finding.
    pub fn parse(value: &Value) -> Result<Self, Vec<Finding>> {
        let Some(object) = value.as_object() else {
            return Err(vec![Finding::not_an_object(json_kind(value))]);
        };

        let mut reader = FieldReader::new(object);

        let id = reader.required_id("id");
        let name = reader.required_str("name");
        let state = reader.required_enum::<WorkflowState>("state", "Invalid state value");
        let path = reader.required_str("path");

        if let Some(path) = &path {
            if !is_workflow_path(path) {
                reader.push(Finding::hard(IssueKind::Format, "Invalid workflow path"));
            }
        }

        let findings = reader.finish();
        match (id, name, state, path) {
            (Some(id), Some(name), Some(state), Some(path)) if findings.is_empty() => Ok(Self {
                id,
                name,
                state,
                path,
            }),
            _ => Err(findings),
        }
    }
}

/// `.github/workflows/<file>.yml` or `.yaml`.
fn is_workflow_path(path: &str) -> bool {
    path.strip_prefix(".github/workflows/")
        .map(|file| {
            !file.is_empty()
                && !file.contains('/')
                && (file.ends_with(".yml") || file.ends_with(".yaml"))
                && file.len() > ".yml".len()
        })
        .unwrap_or(false)
}

/// Extract the item list of a response.
///
/// A bare array is accepted as-is; otherwise `key` must name an array.
pub fn collection<'a>(response: &'a Value, key: &str) -> Result<&'a [Value], Finding> {
    match response {
        Value::Array(items) => Ok(items),
        Value::Object(object) => match object.get(key) {
            Some(Value::Array(items)) => Ok(items),
            None | Some(Value::Null) => Err(Finding::missing_field(key)),
            Some(_) => Err(Finding::invalid_format(key)),
        },
        other => Err(Finding::hard(
            IssueKind::Structural,
            format!("Invalid response: expected object or array, found {}", json_kind(other)),
        )),
    }
}

/// Parse an ISO-8601 timestamp. Offset-less values are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse an integer ID from a JSON number or numeric string.
pub fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads fields off a JSON object, accumulating findings.
struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    findings: Vec<Finding>,
}

impl<'a> FieldReader<'a> {
    fn new(object: &'a Map<String, Value>) -> Self {
        Self {
            object,
            findings: Vec::new(),
        }
    }

    fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    fn finish(self) -> Vec<Finding> {
        self.findings
    }

    /// Present and non-null, else a missing-field finding.
    fn required(&mut self, field: &str) -> Option<&'a Value> {
        match self.object.get(field) {
            None | Some(Value::Null) => {
                self.findings.push(Finding::missing_field(field));
                None
            }
            Some(value) => Some(value),
        }
    }

    /// `None` when absent or null; `Some(None)` when present but unusable.
    fn optional(&self, field: &str) -> Option<&'a Value> {
        match self.object.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn required_str(&mut self, field: &str) -> Option<String> {
        let value = self.required(field)?;
        match value.as_str().map(str::trim) {
            Some("") => {
                self.findings.push(Finding::missing_field(field));
                None
            }
            Some(text) => Some(text.to_string()),
            None => {
                self.findings.push(Finding::invalid_format(field));
                None
            }
        }
    }

    fn optional_str(&mut self, field: &str) -> Option<Option<String>> {
        let Some(value) = self.optional(field) else {
            return Some(None);
        };
        match value.as_str() {
            Some(text) => Some(Some(text.to_string())),
            None => {
                self.findings.push(Finding::invalid_format(field));
                None
            }
        }
    }

    fn required_id(&mut self, field: &str) -> Option<i64> {
        let value = self.required(field)?;
        let id = parse_id(value);
        if id.is_none() {
            self.findings.push(Finding::invalid_id());
        }
        id
    }

    fn optional_id(&mut self, field: &str) -> Option<Option<i64>> {
        let Some(value) = self.optional(field) else {
            return Some(None);
        };
        match parse_id(value) {
            Some(id) => Some(Some(id)),
            None => {
                self.findings.push(Finding::invalid_format(field));
                None
            }
        }
    }

    fn required_enum<T: FromStr>(&mut self, field: &str, invalid: &str) -> Option<T> {
        let value = self.required(field)?;
        let parsed = value.as_str().and_then(|s| s.trim().parse::<T>().ok());
        if parsed.is_none() {
            self.findings.push(Finding::hard(IssueKind::Format, invalid));
        }
        parsed
    }

    fn optional_enum<T: FromStr>(&mut self, field: &str, invalid: &str) -> Option<Option<T>> {
        let Some(value) = self.optional(field) else {
            return Some(None);
        };
        match value.as_str().and_then(|s| s.trim().parse::<T>().ok()) {
            Some(parsed) => Some(Some(parsed)),
            None => {
                self.findings.push(Finding::hard(IssueKind::Format, invalid));
                None
            }
        }
    }

    fn required_timestamp(&mut self, field: &str) -> Option<DateTime<Utc>> {
        let value = self.required(field)?;
        let parsed = value.as_str().and_then(parse_timestamp);
        if parsed.is_none() {
            self.findings.push(Finding::invalid_timestamp(field));
        }
        parsed
    }
}
