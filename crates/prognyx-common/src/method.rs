//! Method Registry entries.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::profile::DataType;

/// Description of one analysis method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSpec {
    /// Method identifier (e.g. "prs", "grn_network")
    pub id: String,

    /// Required data types and the minimum quality for each.
    #[serde(default)]
    pub requirements: BTreeMap<DataType, f64>,

    /// Nominal execution timeout for one backend call chain.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Base reliability weight in [0, 1].
    #[serde(default = "default_reliability")]
    pub reliability: f64,

    /// Declared priority; lower runs first.
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Substitute method used when this one fails or times out.
    #[serde(default)]
    pub fallback: Option<String>,

    /// Reserve method: never planned directly, only used as a substitute.
    #[serde(default)]
    pub fallback_only: bool,
}

fn default_timeout_ms() -> u64 { 30_000 }
fn default_reliability() -> f64 { 0.5 }
fn default_priority() -> u32 { 100 }

impl MethodSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            requirements: BTreeMap::new(),
            timeout_ms: default_timeout_ms(),
            reliability: default_reliability(),
            priority: default_priority(),
            fallback: None,
            fallback_only: false,
        }
    }

    pub fn requires(mut self, data_type: DataType, min_quality: f64) -> Self {
        self.requirements.insert(data_type, min_quality);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn reserve(mut self) -> Self {
        self.fallback_only = true;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn required_types(&self) -> impl Iterator<Item = &DataType> {
        self.requirements.keys()
    }

    /// True if this method's requirements are a strict superset of `other`'s.
    pub fn is_stricter_than(&self, other: &MethodSpec) -> bool {
        self.requirements.len() > other.requirements.len()
            && other.requirements.keys().all(|t| self.requirements.contains_key(t))
    }
}

/// Built-in registry used when no `[[methods]]` are configured.
pub fn default_methods() -> Vec<MethodSpec> {
    vec![
        MethodSpec::new("prs")
            .requires(DataType::Genomic, 0.0)
            .with_timeout(Duration::from_secs(30))
            .with_reliability(0.80)
            .with_priority(10)
            .with_fallback("prs_reduced_panel"),
        MethodSpec::new("multi_omics_integration")
            .requires(DataType::Genomic, 0.6)
            .requires(DataType::Expression, 0.6)
            .requires(DataType::MultiOmics, 0.5)
            .with_timeout(Duration::from_secs(90))
            .with_reliability(0.85)
            .with_priority(10),
        MethodSpec::new("grn_network")
            .requires(DataType::Expression, 0.8)
            .with_timeout(Duration::from_secs(60))
            .with_reliability(0.75)
            .with_priority(20)
            .with_fallback("expression_signature"),
        MethodSpec::new("expression_signature")
            .requires(DataType::Expression, 0.0)
            .with_timeout(Duration::from_secs(20))
            .with_reliability(0.70)
            .with_priority(30),
        MethodSpec::new("clinical_risk")
            .requires(DataType::Clinical, 0.5)
            .with_timeout(Duration::from_secs(15))
            .with_reliability(0.65)
            .with_priority(40),
        MethodSpec::new("prs_reduced_panel")
            .requires(DataType::Genomic, 0.0)
            .with_timeout(Duration::from_secs(15))
            .with_reliability(0.60)
            .with_priority(50)
            .reserve(),
    ]
}

/// Structural checks shared by the registry and config loader.
pub fn validate_specs(specs: &[MethodSpec]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for spec in specs {
        if spec.id.trim().is_empty() {
            return Err(ConfigError::Invalid("method id must not be empty".into()));
        }
        if !seen.insert(spec.id.as_str()) {
            return Err(ConfigError::Invalid(format!("duplicate method id '{}'", spec.id)));
        }
        if !(0.0..=1.0).contains(&spec.reliability) {
            return Err(ConfigError::Invalid(format!(
                "method '{}': reliability {} outside [0, 1]",
                spec.id, spec.reliability
            )));
        }
        if spec.timeout_ms == 0 {
            return Err(ConfigError::Invalid(format!("method '{}': timeout must be > 0", spec.id)));
        }
        for (data_type, threshold) in &spec.requirements {
            if !(0.0..=1.0).contains(threshold) {
                return Err(ConfigError::Invalid(format!(
                    "method '{}': {} threshold {} outside [0, 1]",
                    spec.id, data_type, threshold
                )));
            }
        }
    }

    for spec in specs {
        if let Some(target) = &spec.fallback {
            if target == &spec.id {
                return Err(ConfigError::Invalid(format!(
                    "method '{}' cannot fall back to itself",
                    spec.id
                )));
            }
            if !seen.contains(target.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "method '{}': unknown fallback target '{}'",
                    spec.id, target
                )));
            }
        }
    }
    Ok(())
}
