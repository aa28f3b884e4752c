//! Config parsing from YAML/JSON.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::Stage;
use crate::detectors::PatternTable;
use crate::types::ValidationLevel;

use super::schema::validate_config_schema;

/// Errors that can occur when loading a config.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Invalid suspicious pattern '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Knobs for one validation level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelPolicy {
    /// Minimum confidence for a result to be accepted
    pub acceptance_threshold: f64,

    /// Confidence multiplier applied once per hard violation
    pub hard_penalty: f64,

    /// Scales how much of a soft finding's weight is applied
    pub soft_scale: f64,

    /// Items last updated further back than this before `requested_at` are stale
    #[serde(with = "humantime_duration")]
    pub freshness_window: Duration,

    /// Orphaned-workflow ratio above which cross-validation fails
    pub orphan_ratio_threshold: f64,

    /// Weight of one stale item in the integrity violation count
    pub stale_weight: f64,
}

impl LevelPolicy {
    /// Multiplier for a soft finding with the given weight.
    pub fn soft_multiplier(&self, weight: f64) -> f64 {
        (1.0 - (1.0 - weight) * self.soft_scale).clamp(0.0, 1.0)
    }
}

/// One `LevelPolicy` per `ValidationLevel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelPolicies {
    pub basic: LevelPolicy,
    pub strict: LevelPolicy,
    pub paranoid: LevelPolicy,
}

impl Default for LevelPolicies {
    fn default() -> Self {
        const DAY: u64 = 24 * 60 * 60;
        Self {
            basic: LevelPolicy {
                acceptance_threshold: 0.3,
                hard_penalty: 0.5,
                soft_scale: 0.75,
                freshness_window: Duration::from_secs(90 * DAY),
                orphan_ratio_threshold: 0.95,
                stale_weight: 0.5,
            },
            strict: LevelPolicy {
                acceptance_threshold: 0.5,
                hard_penalty: 0.4,
                soft_scale: 1.0,
                freshness_window: Duration::from_secs(30 * DAY),
                orphan_ratio_threshold: 0.9,
                stale_weight: 0.75,
            },
            paranoid: LevelPolicy {
                acceptance_threshold: 0.7,
                hard_penalty: 0.3,
                soft_scale: 1.25,
                freshness_window: Duration::from_secs(7 * DAY),
                orphan_ratio_threshold: 0.8,
                stale_weight: 1.0,
            },
        }
    }
}

impl LevelPolicies {
    pub fn get(&self, level: ValidationLevel) -> &LevelPolicy {
        match level {
            ValidationLevel::Basic => &self.basic,
            ValidationLevel::Strict => &self.strict,
            ValidationLevel::Paranoid => &self.paranoid,
        }
    }
}

/// Per-stage weights for the orchestrator's confidence average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeWeights {
    pub hallucination: f64,
    pub integrity: f64,
    pub cross_reference: f64,
}

impl Default for MergeWeights {
    fn default() -> Self {
        Self {
            hallucination: 1.0,
            integrity: 1.0,
            cross_reference: 1.0,
        }
    }
}

impl MergeWeights {
    pub fn weight(&self, stage: Stage) -> f64 {
        match stage {
            Stage::Hallucination => self.hallucination,
            Stage::Integrity => self.integrity,
            Stage::CrossReference => self.cross_reference,
        }
    }

    /// Weights must be finite, non-negative and not all zero.
    pub fn check(&self) -> Result<(), String> {
        let all = [self.hallucination, self.integrity, self.cross_reference];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(format!("merge weights must be finite and non-negative: {:?}", self));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err("merge weights must not all be zero".to_string());
        }
        Ok(())
    }
}

/// Complete configuration for the detectors and the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Lists longer than this are rejected outright
    pub max_list_size: usize,

    /// Orphan ratio is only judged with at least this many workflows
    pub orphan_min_workflows: usize,

    pub levels: LevelPolicies,

    pub merge_weights: MergeWeights,

    /// Regex rules scanned against free-text fields
    pub suspicious_patterns: PatternTable,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_list_size: 1000,
            orphan_min_workflows: 5,
            levels: LevelPolicies::default(),
            merge_weights: MergeWeights::default(),
            suspicious_patterns: PatternTable::builtin(),
        }
    }
}

impl ValidationConfig {
    /// Parse a config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Schema check, deserialize, then semantic validation.
    fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        // An empty YAML document means "all defaults".
        let value = if value.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            value
        };

        validate_config_schema(&value).map_err(ConfigError::SchemaError)?;
        let config: ValidationConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// The policy for `level`.
    pub fn policy(&self, level: ValidationLevel) -> &LevelPolicy {
        self.levels.get(level)
    }

    /// Validate value ranges and cross-level monotonicity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_list_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_list_size must be at least 1".to_string(),
            ));
        }

        for level in ValidationLevel::ALL {
            let policy = self.policy(level);
            check_unit(level, "acceptance_threshold", policy.acceptance_threshold)?;
            check_unit(level, "hard_penalty", policy.hard_penalty)?;
            check_unit(level, "orphan_ratio_threshold", policy.orphan_ratio_threshold)?;
            check_unit(level, "stale_weight", policy.stale_weight)?;
            if !policy.soft_scale.is_finite() || policy.soft_scale < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "{}.soft_scale must be a non-negative number",
                    level
                )));
            }
        }

        self.validate_monotonic()?;

        self.merge_weights
            .check()
            .map_err(ConfigError::ValidationError)?;

        Ok(())
    }

    /// Stricter levels may only tighten.
    fn validate_monotonic(&self) -> Result<(), ConfigError> {
        let pairs = [
            (ValidationLevel::Basic, ValidationLevel::Strict),
            (ValidationLevel::Strict, ValidationLevel::Paranoid),
        ];

        for (lower, higher) in pairs {
            let lo = self.policy(lower);
            let hi = self.policy(higher);

            let violations = [
                (hi.acceptance_threshold < lo.acceptance_threshold, "acceptance_threshold"),
                (hi.hard_penalty > lo.hard_penalty, "hard_penalty"),
                (hi.soft_scale < lo.soft_scale, "soft_scale"),
                (hi.freshness_window > lo.freshness_window, "freshness_window"),
                (hi.orphan_ratio_threshold > lo.orphan_ratio_threshold, "orphan_ratio_threshold"),
                (hi.stale_weight < lo.stale_weight, "stale_weight"),
            ];

            if let Some((_, field)) = violations.iter().find(|(bad, _)| *bad) {
                return Err(ConfigError::ValidationError(format!(
                    "{} at level {} is looser than at level {}",
                    field, higher, lower
                )));
            }
        }

        Ok(())
    }
}

fn check_unit(level: ValidationLevel, field: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ValidationError(format!(
            "{}.{} must be within [0, 1], got {}",
            level, field, value
        )));
    }
    Ok(())
}

/// Serde adapter for `humantime` duration strings such as `"30days"`.
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
