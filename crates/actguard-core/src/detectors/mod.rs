//! The validation detectors.
//!
//! Each detector is constructed with a `ValidationLevel` and a shared
//! `ValidationConfig`, holds no other state, and turns raw JSON into a
//! `ValidationResult` without side effects.

mod cross_reference;
mod hallucination;
mod integrity;
mod patterns;

use std::sync::Arc;

use lazy_static::lazy_static;

pub use cross_reference::CrossValidationChecker;
pub use hallucination::HallucinationDetector;
pub use integrity::DataIntegrityValidator;
pub use patterns::{PatternRule, PatternTable, SuspiciousPattern};

use crate::aggregate::Stage;
use crate::config::{LevelPolicy, ValidationConfig};
use crate::types::ValidationLevel;

lazy_static! {
    static ref DEFAULT_CONFIG: Arc<ValidationConfig> = Arc::new(ValidationConfig::default());
}

/// Shared handle to the built-in configuration.
pub(crate) fn default_config() -> Arc<ValidationConfig> {
    Arc::clone(&DEFAULT_CONFIG)
}

/// Common surface of the detectors.
pub trait Detector: Send + Sync {
    /// The stage this detector contributes to.
    fn stage(&self) -> Stage;

    fn level(&self) -> ValidationLevel;

    fn config(&self) -> &ValidationConfig;

    /// The policy for this detector's level.
    fn policy(&self) -> &LevelPolicy {
        self.config().policy(self.level())
    }
}
