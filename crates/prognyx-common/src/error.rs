use thiserror::Error;

use crate::eligibility::EligibilityReport;
use crate::prediction::SkippedMethod;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Invalid data profile: {0}")]
    InvalidProfile(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Analysis infeasible for record {record_id}: {}", .report.ineligible_summary())]
    AnalysisInfeasible {
        record_id: String,
        report: EligibilityReport,
    },

    #[error("Analysis timed out for record {record_id}: no method succeeded before the deadline ({} unfinished)", .failures.len())]
    AnalysisTimeout {
        record_id: String,
        failures: Vec<SkippedMethod>,
    },

    #[error("All methods failed for record {record_id} ({} failures)", .failures.len())]
    AllMethodsFailed {
        record_id: String,
        failures: Vec<SkippedMethod>,
    },

    #[error("Meta-combiner error: {0}")]
    Combiner(String),

    #[error("Profile store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AnalysisError {
    /// True for the request-level failures a caller is expected to surface
    /// to an end user rather than retry.
    pub fn is_data_problem(&self) -> bool {
        matches!(
            self,
            AnalysisError::InvalidProfile(_)
                | AnalysisError::RecordNotFound(_)
                | AnalysisError::AnalysisInfeasible { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
