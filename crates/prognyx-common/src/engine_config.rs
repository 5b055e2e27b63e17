//! Engine configuration.
//!
//! Loaded from `prognyx.toml` (or the path in `PROGNYX_CONFIG`). YAML files
//! are accepted too. Every field has a default so a minimal file works.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::confidence::{DampeningFn, VarianceMapping};
use crate::error::ConfigError;
use crate::method::{default_methods, validate_specs, MethodSpec};

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Method Registry entries. Empty means the built-in registry.
    #[serde(default)]
    pub methods: Vec<MethodSpec>,

    /// Backend endpoint per method id.
    #[serde(default)]
    pub backends: BTreeMap<String, BackendEndpoint>,

    /// Trained linear meta-combiners for stacking.
    #[serde(default)]
    pub combiners: Vec<CombinerConfig>,

    /// Initial historical accuracy snapshot (method id → accuracy in [0, 1]).
    #[serde(default)]
    pub accuracy: BTreeMap<String, f64>,
}

// ── Execution ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum concurrent backend calls per request.
    #[serde(default = "default_pool_size")]
    pub worker_pool_size: usize,

    /// Global request deadline when the caller gives none.
    #[serde(default = "default_deadline_ms")]
    pub request_deadline_ms: u64,

    /// Attempts per backend call (transient failures only).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts; counted against the method's timeout.
    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Cap on planned methods; the rest stay available as fallbacks.
    #[serde(default)]
    pub max_planned_methods: Option<usize>,
}

fn default_pool_size() -> usize { 8 }
fn default_deadline_ms() -> u64 { 120_000 }
fn default_max_attempts() -> u32 { 2 }
fn default_backoff_ms() -> u64 { 250 }

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_pool_size(),
            request_deadline_ms: default_deadline_ms(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_backoff_ms(),
            max_planned_methods: None,
        }
    }
}

impl ExecutionConfig {
    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

// ── Scoring ─────────────────────────────────────────────────────────────────

/// Scale of backend risk scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
}

fn default_min_score() -> f64 { 0.0 }
fn default_max_score() -> f64 { 100.0 }

impl Default for ScoringConfig {
    fn default() -> Self {
        Self { min_score: default_min_score(), max_score: default_max_score() }
    }
}

impl ScoringConfig {
    pub fn range(&self) -> f64 {
        self.max_score - self.min_score
    }
}

// ── Calibration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// f(quality)
    #[serde(default)]
    pub quality: DampeningFn,
    /// g(historical accuracy)
    #[serde(default)]
    pub accuracy: DampeningFn,
}

// ── Aggregation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// How strongly score variance lowers weighted-voting confidence.
    #[serde(default = "default_disagreement_penalty")]
    pub disagreement_penalty: f64,

    /// Variance floor for a fully confident method (fraction of σ₀²).
    #[serde(default = "default_min_variance")]
    pub bayesian_min_variance: f64,

    #[serde(default)]
    pub variance_mapping: VarianceMapping,
}

fn default_disagreement_penalty() -> f64 { 1.0 }
fn default_min_variance() -> f64 { 1e-3 }

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            disagreement_penalty: default_disagreement_penalty(),
            bayesian_min_variance: default_min_variance(),
            variance_mapping: VarianceMapping::default(),
        }
    }
}

// ── Strategy selection ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// When set, method sets whose recent mean agreement falls below this
    /// are combined with Bayesian averaging instead of weighted voting.
    #[serde(default)]
    pub low_agreement_threshold: Option<f64>,

    /// Number of past requests remembered per method-set signature.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Minimum recorded requests before history influences selection.
    #[serde(default = "default_history_min_samples")]
    pub history_min_samples: usize,
}

fn default_history_window() -> usize { 20 }
fn default_history_min_samples() -> usize { 5 }

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            low_agreement_threshold: None,
            history_window: default_history_window(),
            history_min_samples: default_history_min_samples(),
        }
    }
}

// ── Backends & combiners ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEndpoint {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Linear meta-combiner trained for one exact method set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinerConfig {
    pub methods: Vec<String>,
    /// Coefficient per method applied to its score.
    pub coefficients: BTreeMap<String, f64>,
    #[serde(default)]
    pub intercept: f64,
}

// ── Loading ─────────────────────────────────────────────────────────────────

impl EngineConfig {
    /// Load from `PROGNYX_CONFIG` or `./prognyx.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("PROGNYX_CONFIG").unwrap_or_else(|_| "prognyx.toml".to_string());
        if !Path::new(&path).exists() {
            return Err(ConfigError::NotFound(path));
        }
        Self::from_file(&path)
    }

    /// Load from a TOML or YAML file (chosen by extension).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Registry entries, falling back to the built-in set.
    pub fn method_specs(&self) -> Vec<MethodSpec> {
        if self.methods.is_empty() {
            default_methods()
        } else {
            self.methods.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.execution.worker_pool_size == 0 {
            return invalid("execution.worker_pool_size must be > 0".into());
        }
        if self.execution.max_attempts == 0 {
            return invalid("execution.max_attempts must be > 0".into());
        }
        if self.execution.request_deadline_ms == 0 {
            return invalid("execution.request_deadline_ms must be > 0".into());
        }
        if self.execution.max_planned_methods == Some(0) {
            return invalid("execution.max_planned_methods must be > 0 when set".into());
        }
        if !(self.scoring.range() > 0.0) {
            return invalid(format!(
                "scoring range [{}, {}] is empty",
                self.scoring.min_score, self.scoring.max_score
            ));
        }
        self.calibration.quality.validate().map_err(|e| ConfigError::Invalid(format!("calibration.quality: {e}")))?;
        self.calibration.accuracy.validate().map_err(|e| ConfigError::Invalid(format!("calibration.accuracy: {e}")))?;
        if self.aggregation.disagreement_penalty < 0.0 {
            return invalid("aggregation.disagreement_penalty must be >= 0".into());
        }
        if !(self.aggregation.bayesian_min_variance > 0.0) {
            return invalid("aggregation.bayesian_min_variance must be > 0".into());
        }
        if let Some(t) = self.strategy.low_agreement_threshold {
            if !(0.0..=1.0).contains(&t) {
                return invalid(format!("strategy.low_agreement_threshold {t} outside [0, 1]"));
            }
        }

        let specs = self.method_specs();
        validate_specs(&specs)?;

        for (method, accuracy) in &self.accuracy {
            if !(0.0..=1.0).contains(accuracy) {
                return invalid(format!("accuracy for '{method}' = {accuracy} outside [0, 1]"));
            }
        }
        for combiner in &self.combiners {
            if combiner.methods.len() < 2 {
                return invalid("a combiner needs at least two methods".into());
            }
            for m in &combiner.methods {
                if !specs.iter().any(|s| &s.id == m) {
                    return invalid(format!("combiner references unknown method '{m}'"));
                }
                match combiner.coefficients.get(m) {
                    Some(c) if c.is_finite() => {}
                    Some(c) => return invalid(format!("combiner coefficient for '{m}' = {c} is not finite")),
                    None => return invalid(format!("combiner has no coefficient for '{m}'")),
                }
            }
            if combiner.methods.iter().all(|m| combiner.coefficients.get(m) == Some(&0.0)) {
                return invalid("combiner coefficients are all zero".into());
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
