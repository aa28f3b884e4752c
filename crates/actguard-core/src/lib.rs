//! # actguard-core
//!
//! Confidence-weighted validation of GitHub Actions API data.
//!
//! This crate decides whether workflow runs and workflow definitions returned
//! by an API, or by a generator standing in for one, are:
//! - Plausible: well-formed and free of fabricated-looking content
//! - Consistent: in agreement with the request that produced them
//! - Referentially sound: runs point at workflows that exist
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces the same result
//! 2. **Never raises on data**: Bad data becomes issues, not errors
//! 3. **Monotonic**: A stricter level never yields higher confidence
//! 4. **Thread-safe**: Detectors hold only immutable state
//!
//! ## Example
//!
//! ```rust,ignore
//! use actguard_core::{RequestParams, ResponseType, ValidationLevel, ValidationOrchestrator};
//!
//! let orchestrator = ValidationOrchestrator::new(ValidationLevel::Strict);
//! let params = RequestParams::from_value(&serde_json::json!({"per_page": 30}))?;
//! let result = orchestrator.validate_github_actions_response(&response, &params, ResponseType::WorkflowRuns);
//!
//! if result.is_valid() {
//!     println!("OK ({:.2})", result.confidence());
//! } else {
//!     for issue in result.issues() {
//!         println!("- {}", issue);
//!     }
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod detectors;
pub mod finding;
pub mod orchestrator;
pub mod records;
pub mod types;

// Re-export main types at crate root
pub use aggregate::{Aggregator, Stage};
pub use config::{ConfigError, LevelPolicies, LevelPolicy, MergeWeights, ValidationConfig};
pub use detectors::{
    CrossValidationChecker, DataIntegrityValidator, Detector, HallucinationDetector, PatternRule,
    PatternTable, SuspiciousPattern,
};
pub use finding::{Finding, IssueKind, Severity};
pub use orchestrator::ValidationOrchestrator;
pub use records::{RunConclusion, RunStatus, WorkflowDefinition, WorkflowRun, WorkflowState};
pub use types::{
    clamp_confidence, Metadata, Outcome, RequestParams, ResponseType, ValidationLevel,
    ValidationResult,
};

use serde_json::Value;
use thiserror::Error;

/// Errors from caller misuse.
///
/// Problems with the data under validation are reported in
/// `ValidationResult::issues`, never here.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Unknown validation level: {0}")]
    UnknownLevel(String),

    #[error("Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    #[error("Invalid request parameters: {0}")]
    InvalidRequestParams(String),

    #[error("Invalid merge weights: {0}")]
    InvalidMergeWeights(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Validate a response with the built-in configuration.
///
/// This is the main entry point for one-off validation. Build a
/// `ValidationOrchestrator` to reuse a custom config across calls.
///
/// # Arguments
///
/// * `response_data` - The raw JSON response
/// * `request_params` - The request that produced it
/// * `response_type` - Which endpoint shape the response has
/// * `level` - Strictness applied by every stage
pub fn validate(
    response_data: &Value,
    request_params: &RequestParams,
    response_type: ResponseType,
    level: ValidationLevel,
) -> ValidationResult {
    ValidationOrchestrator::new(level).validate_github_actions_response(
        response_data,
        request_params,
        response_type,
    )
}
