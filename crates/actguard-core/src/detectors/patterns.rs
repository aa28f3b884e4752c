//! Suspicious-text rule table.
//!
//! Each rule pairs a regex with a confidence weight in `(0, 1)`. A match on a
//! free-text field multiplies confidence by the (level-scaled) weight; rules
//! never fail a record on their own.
//!
//! The built-in table targets content typical of fabricated API data:
//! placeholder strings, unrendered templates, generic demo names and text that
//! reads like a language model talking about itself.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

lazy_static! {
    static ref BUILTIN: PatternTable = PatternTable {
        rules: vec![
            SuspiciousPattern::builtin(
                "placeholder text",
                r"(?i)\b(lorem ipsum|placeholder|dummy|foo\s?bar|xxx+|tbd|changeme)\b",
                0.6,
            ),
            SuspiciousPattern::builtin(
                "unrendered template",
                r"\{\{[^}]*\}\}|\$\{[A-Za-z_][A-Za-z0-9_]*\}|<[A-Z][A-Z0-9_]{2,}>",
                0.5,
            ),
            SuspiciousPattern::builtin(
                "generic demo name",
                r"(?i)^\s*(test|my|sample|example|demo|untitled)\s+(workflow|pipeline|run|job)s?(\s+\d+)?\s*$",
                0.8,
            ),
            SuspiciousPattern::builtin(
                "sequential numbering",
                r"(?i)^\s*(workflow|pipeline|run|job)[\s_-]?\d+\s*$",
                0.85,
            ),
            SuspiciousPattern::builtin(
                "language model artifact",
                r"(?i)\b(as an ai|language model|i cannot provide|i'm sorry|hypothetical|fictional)\b",
                0.4,
            ),
        ],
    };
}

/// One rule of the table.
#[derive(Debug, Clone)]
pub struct SuspiciousPattern {
    name: String,
    regex: Regex,
    weight: f64,
}

impl SuspiciousPattern {
    /// Compile a rule. The weight must lie strictly between 0 and 1.
    pub fn new(name: impl Into<String>, pattern: &str, weight: f64) -> Result<Self, ConfigError> {
        let name = name.into();
        if !(weight > 0.0 && weight < 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "pattern '{}' weight must be within (0, 1), got {}",
                name, weight
            )));
        }
        let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            name: name.clone(),
            source,
        })?;
        Ok(Self { name, regex, weight })
    }

    fn builtin(name: &str, pattern: &str, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            regex: Regex::new(pattern).unwrap(),
            weight,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Serialized form of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub name: String,
    pub pattern: String,
    pub weight: f64,
}

/// An ordered set of suspicious-text rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<PatternRule>", into = "Vec<PatternRule>")]
pub struct PatternTable {
    rules: Vec<SuspiciousPattern>,
}

impl PatternTable {
    pub fn new(rules: Vec<SuspiciousPattern>) -> Self {
        Self { rules }
    }

    /// The built-in rules.
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules matching any of `texts`, each reported once, in table order.
    pub fn scan<'a>(&'a self, texts: &[&str]) -> Vec<&'a SuspiciousPattern> {
        self.rules
            .iter()
            .filter(|rule| texts.iter().any(|text| rule.is_match(text)))
            .collect()
    }
}

impl Default for PatternTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TryFrom<Vec<PatternRule>> for PatternTable {
    type Error = ConfigError;

    fn try_from(rules: Vec<PatternRule>) -> Result<Self, Self::Error> {
        rules
            .into_iter()
            .map(|r| SuspiciousPattern::new(r.name, &r.pattern, r.weight))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }
}

impl From<PatternTable> for Vec<PatternRule> {
    fn from(table: PatternTable) -> Self {
        table
            .rules
            .into_iter()
            .map(|rule| PatternRule {
                pattern: rule.pattern().to_string(),
                name: rule.name,
                weight: rule.weight,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(text: &str) -> Vec<String> {
        PatternTable::builtin()
            .scan(&[text])
            .into_iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    #[test]
    fn test_placeholder_detection() {
        assert_eq!(matched("Lorem ipsum build"), vec!["placeholder text"]);
        assert_eq!(matched("deploy-placeholder"), vec!["placeholder text"]);
        assert!(matched("Deploy to production").is_empty());
    }

    #[test]
    fn test_unrendered_template_detection() {
        assert!(matched("Build {{ matrix.os }}").contains(&"unrendered template".to_string()));
        assert!(matched("Release ${VERSION}").contains(&"unrendered template".to_string()));
        assert!(matched("Deploy <WORKFLOW_NAME>").contains(&"unrendered template".to_string()));
        assert!(matched("Build <3 times").is_empty());
    }

    #[test]
    fn test_generic_names() {
        assert_eq!(matched("Test Workflow"), vec!["generic demo name"]);
        assert_eq!(matched("Sample pipeline 2"), vec!["generic demo name"]);
        assert_eq!(matched("workflow_7"), vec!["sequential numbering"]);
        assert!(matched("Test Suite").is_empty());
        assert!(matched("CI Pipeline").is_empty());
    }

    #[test]
    fn test_language_model_artifacts() {
        assert_eq!(
            matched("As an AI, I generated this run"),
            vec!["language model artifact"]
        );
    }

    #[test]
    fn test_scan_reports_each_rule_once() {
        let table = PatternTable::builtin();
        let hits = table.scan(&["placeholder", "dummy branch"]);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_new_rejects_bad_weight() {
        assert!(SuspiciousPattern::new("heavy", "x", 1.0).is_err());
        assert!(SuspiciousPattern::new("zero", "x", 0.0).is_err());
        assert!(SuspiciousPattern::new("ok", "x", 0.5).is_ok());
    }

    #[test]
    fn test_new_rejects_bad_regex() {
        assert!(matches!(
            SuspiciousPattern::new("broken", "(", 0.5),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_serialized_rules_rebuild_table() {
        let rules: Vec<PatternRule> = PatternTable::builtin().into();
        let rebuilt = PatternTable::try_from(rules).unwrap();
        assert_eq!(rebuilt.len(), PatternTable::builtin().len());
    }
}
