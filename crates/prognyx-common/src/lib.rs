//! prognyx-common: Shared types, errors, and configuration used across all Prognyx crates.

pub mod error;
pub mod profile;
pub mod method;
pub mod eligibility;
pub mod prediction;
pub mod confidence;
pub mod engine_config;

// Re-export commonly used types
pub use error::{AnalysisError, ConfigError, Result};
pub use profile::{DataProfile, DataQuality, DataType, RawAvailability, RawIndicator};
pub use method::MethodSpec;
pub use eligibility::{Eligibility, EligibilityReport, Ineligibility};
pub use prediction::{
    CalibratedResult, EnsemblePrediction, EnsembleStrategy, Evidence, MethodFailureKind,
    MethodResult, MethodStatus, SkippedMethod, StrategyHint,
};
pub use engine_config::EngineConfig;
