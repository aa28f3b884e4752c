//! Validation configuration.
//!
//! Every threshold, ceiling, window and penalty used by the detectors lives in
//! a `ValidationConfig`. Configs load from YAML or JSON, are checked against an
//! embedded JSON Schema and then validated semantically.

mod parser;
mod schema;

pub use parser::{ConfigError, LevelPolicies, LevelPolicy, MergeWeights, ValidationConfig};
pub use schema::validate_config_schema;
