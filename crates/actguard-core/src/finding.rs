//! Findings produced by the validation layers.
//!
//! Every problem a detector sees in the data becomes a `Finding`, never an
//! error. A finding records what kind of problem it is, whether it is hard
//! (forces `is_valid = false`) or soft (only lowers confidence), and where in
//! the payload it was found.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Taxonomy of data problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Missing or malformed required field
    Structural,
    /// Value present but fails type/format parsing
    Format,
    /// Heuristic match suggesting fabricated content
    Plausibility,
    /// Response contradicts its own request
    Consistency,
    /// Cross-collection reference failure
    ReferentialIntegrity,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Structural => "structural",
            IssueKind::Format => "format",
            IssueKind::Plausibility => "plausibility",
            IssueKind::Consistency => "consistency",
            IssueKind::ReferentialIntegrity => "referential_integrity",
        }
    }
}

/// How a finding affects acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Forces the result invalid
    Hard,
    /// Lowers confidence only
    Soft,
}

/// A single problem found in the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: IssueKind,

    pub severity: Severity,

    /// Issue text as surfaced to callers
    pub message: String,

    /// Confidence multiplier in `(0, 1]` for soft findings, before level
    /// scaling. Hard findings use the level's hard penalty instead.
    pub weight: f64,

    /// Where in the payload (e.g. `"item[3]"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Finding {
    /// A hard finding.
    pub fn hard(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Hard,
            message: message.into(),
            weight: 1.0,
            location: None,
        }
    }

    /// A soft finding with a confidence weight.
    pub fn soft(kind: IssueKind, message: impl Into<String>, weight: f64) -> Self {
        Self {
            kind,
            severity: Severity::Soft,
            message: message.into(),
            weight,
            location: None,
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self::hard(IssueKind::Structural, format!("Missing required field: {}", field))
    }

    pub fn not_an_object(found: &str) -> Self {
        Self::hard(
            IssueKind::Structural,
            format!("Invalid record: expected object, found {}", found),
        )
    }

    pub fn invalid_id() -> Self {
        Self::hard(IssueKind::Format, "Invalid ID format")
    }

    pub fn invalid_timestamp(field: &str) -> Self {
        Self::hard(IssueKind::Format, format!("Invalid {} timestamp", field))
    }

    pub fn invalid_format(field: &str) -> Self {
        Self::hard(IssueKind::Format, format!("Invalid {} format", field))
    }

    pub fn suspicious_pattern(name: &str, weight: f64) -> Self {
        Self::soft(
            IssueKind::Plausibility,
            format!("Suspicious pattern detected: {}", name),
            weight,
        )
    }

    /// Attach a location, replacing any previous one.
    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn is_hard(&self) -> bool {
        self.severity == Severity::Hard
    }

    /// Render as an issue string: `"<location>: <message>"` or the bare message.
    pub fn to_issue(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}", location, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Location label for the `index`-th item of a list.
pub fn item_location(index: usize) -> String {
    format!("item[{}]", index)
}
