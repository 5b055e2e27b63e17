//! Per-method results and the final ensemble prediction.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque evidence blob returned by a backend.
pub type Evidence = BTreeMap<String, serde_json::Value>;

/// Evidence key recording which fallback produced a substituted result.
pub const SUBSTITUTED_BY: &str = "substituted_by";

/// Evidence key flagging a result calibrated without historical accuracy.
pub const UNCALIBRATED: &str = "uncalibrated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodStatus {
    Success,
    Failed,
    Timeout,
    Skipped,
}

impl fmt::Display for MethodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodStatus::Success => write!(f, "success"),
            MethodStatus::Failed => write!(f, "failed"),
            MethodStatus::Timeout => write!(f, "timeout"),
            MethodStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodFailureKind {
    /// Eligible for retry.
    Transient,
    /// Not retried; triggers fallback immediately.
    Permanent,
    Timeout,
    /// No backend registered for the method.
    Unavailable,
    /// The task running the method was lost (panic or abort).
    Aborted,
}

impl fmt::Display for MethodFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MethodFailureKind::Transient => "transient",
            MethodFailureKind::Permanent => "permanent",
            MethodFailureKind::Timeout => "timeout",
            MethodFailureKind::Unavailable => "unavailable",
            MethodFailureKind::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodFailure {
    pub kind: MethodFailureKind,
    pub message: String,
}

// ── MethodResult ────────────────────────────────────────────────────────────

/// Terminal outcome of one planned method. Built once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodResult {
    pub method_id: String,
    pub status: MethodStatus,
    pub score: Option<f64>,
    pub confidence: Option<f64>,
    pub evidence: Arc<Evidence>,
    pub duration: Duration,
    pub attempts: u32,
    /// Fallback method that produced this result, if substituted.
    pub substituted_by: Option<String>,
    pub failure: Option<MethodFailure>,
}

impl MethodResult {
    pub fn success(
        method_id: impl Into<String>,
        score: f64,
        confidence: f64,
        evidence: Evidence,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            method_id: method_id.into(),
            status: MethodStatus::Success,
            score: Some(score),
            confidence: Some(confidence),
            evidence: Arc::new(evidence),
            duration,
            attempts,
            substituted_by: None,
            failure: None,
        }
    }

    pub fn failed(
        method_id: impl Into<String>,
        kind: MethodFailureKind,
        message: impl Into<String>,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        let status = if kind == MethodFailureKind::Timeout {
            MethodStatus::Timeout
        } else {
            MethodStatus::Failed
        };
        Self {
            method_id: method_id.into(),
            status,
            score: None,
            confidence: None,
            evidence: Arc::new(Evidence::new()),
            duration,
            attempts,
            substituted_by: None,
            failure: Some(MethodFailure { kind, message: message.into() }),
        }
    }

    pub fn timeout(method_id: impl Into<String>, message: impl Into<String>, duration: Duration, attempts: u32) -> Self {
        Self::failed(method_id, MethodFailureKind::Timeout, message, duration, attempts)
    }

    pub fn skipped(method_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            method_id: method_id.into(),
            status: MethodStatus::Skipped,
            score: None,
            confidence: None,
            evidence: Arc::new(Evidence::new()),
            duration: Duration::ZERO,
            attempts: 0,
            substituted_by: None,
            failure: Some(MethodFailure {
                kind: MethodFailureKind::Unavailable,
                message: message.into(),
            }),
        }
    }

    /// Map a fallback's successful result back onto the original slot.
    ///
    /// The original failure is kept in `failure` so the substitution stays
    /// visible; evidence gains a `substituted_by` marker.
    pub fn substituted(original: &MethodResult, fallback: &MethodResult, elapsed: Duration) -> Self {
        let mut evidence = (*fallback.evidence).clone();
        evidence.insert(
            SUBSTITUTED_BY.to_string(),
            serde_json::Value::String(fallback.method_id.clone()),
        );
        Self {
            method_id: original.method_id.clone(),
            status: MethodStatus::Success,
            score: fallback.score,
            confidence: fallback.confidence,
            evidence: Arc::new(evidence),
            duration: elapsed,
            attempts: original.attempts + fallback.attempts,
            substituted_by: Some(fallback.method_id.clone()),
            failure: original.failure.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == MethodStatus::Success && self.score.is_some()
    }

    /// Method whose backend actually produced the numbers.
    pub fn producer(&self) -> &str {
        self.substituted_by.as_deref().unwrap_or(&self.method_id)
    }

    pub fn failure_reason(&self) -> String {
        match &self.failure {
            Some(f) => format!("{}: {}", f.kind, f.message),
            None => self.status.to_string(),
        }
    }
}

// ── CalibratedResult ────────────────────────────────────────────────────────

/// A successful result after confidence calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratedResult {
    pub method_id: String,
    pub score: f64,
    pub raw_confidence: f64,
    pub calibrated_confidence: f64,
    /// f(quality)
    pub quality_factor: f64,
    /// g(historical accuracy); 1.0 when uncalibrated
    pub accuracy_factor: f64,
    /// Base reliability weight of the producing method.
    pub reliability: f64,
    /// No historical accuracy was available.
    pub uncalibrated: bool,
    pub substituted_by: Option<String>,
    pub evidence: Arc<Evidence>,
}

// ── Strategy ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleStrategy {
    WeightedVoting,
    Stacking,
    BayesianAveraging,
    /// Single contributor; output equals its calibrated result.
    PassThrough,
}

impl fmt::Display for EnsembleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnsembleStrategy::WeightedVoting => "weighted_voting",
            EnsembleStrategy::Stacking => "stacking",
            EnsembleStrategy::BayesianAveraging => "bayesian_averaging",
            EnsembleStrategy::PassThrough => "pass_through",
        };
        f.write_str(s)
    }
}

/// Caller preference for how results are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyHint {
    #[default]
    Auto,
    /// Prefer an output with a principled uncertainty estimate.
    UncertaintyFirst,
    WeightedVoting,
    Stacking,
}

// ── EnsemblePrediction ──────────────────────────────────────────────────────

/// A planned method that did not contribute to the prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedMethod {
    pub method_id: String,
    pub status: MethodStatus,
    pub reason: String,
}

impl SkippedMethod {
    pub fn from_result(result: &MethodResult) -> Self {
        Self {
            method_id: result.method_id.clone(),
            status: result.status,
            reason: result.failure_reason(),
        }
    }
}

/// Final combined prediction for one analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub analysis_id: Uuid,
    pub record_id: String,
    pub strategy: EnsembleStrategy,
    pub score: f64,
    pub confidence: f64,
    /// Contribution weight per successful method; sums to 1.
    pub weights: BTreeMap<String, f64>,
    /// 0 = maximal disagreement, 1 = full agreement.
    pub agreement: f64,
    /// Evidence of each contributing method.
    pub evidence: BTreeMap<String, Evidence>,
    pub skipped: Vec<SkippedMethod>,
    /// Produced from a strict subset of the planned methods.
    pub partial: bool,
    pub created_at: DateTime<Utc>,
}

impl EnsemblePrediction {
    pub fn contributors(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    pub fn weight_sum(&self) -> f64 {
        self.weights.values().sum()
    }
}
