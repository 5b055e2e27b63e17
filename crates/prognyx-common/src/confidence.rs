//! Confidence shaping functions used by calibration and Bayesian averaging.
//!
//! `calibrated = raw × f(quality) × g(accuracy)` where `f` and `g` are any
//! `Dampening` implementation. The config-driven `DampeningFn` covers the
//! common shapes; callers can plug their own.

use serde::{Deserialize, Serialize};

/// Monotonic non-decreasing map from [0, 1] into (0, 1].
pub trait Dampening: Send + Sync + std::fmt::Debug {
    fn dampen(&self, x: f64) -> f64;
}

/// Built-in dampening shapes, selectable from config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DampeningFn {
    /// No penalty: always 1.0.
    Identity,
    /// floor + (1 − floor) · x
    Linear { floor: f64 },
    /// max(x^exponent, floor)
    Power { exponent: f64, floor: f64 },
    /// floor + (1 − floor) / (1 + e^(−steepness·(x − midpoint)))
    Logistic { midpoint: f64, steepness: f64, floor: f64 },
}

impl Default for DampeningFn {
    fn default() -> Self {
        DampeningFn::Linear { floor: 0.5 }
    }
}

impl DampeningFn {
    pub fn floor(&self) -> Option<f64> {
        match self {
            DampeningFn::Identity => None,
            DampeningFn::Linear { floor }
            | DampeningFn::Power { floor, .. }
            | DampeningFn::Logistic { floor, .. } => Some(*floor),
        }
    }

    /// Parameter sanity: floors in (0, 1], positive exponent/steepness.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(floor) = self.floor() {
            if !(floor > 0.0 && floor <= 1.0) {
                return Err(format!("dampening floor {floor} outside (0, 1]"));
            }
        }
        match self {
            DampeningFn::Power { exponent, .. } if *exponent <= 0.0 => {
                Err(format!("power exponent {exponent} must be > 0"))
            }
            DampeningFn::Logistic { steepness, .. } if *steepness <= 0.0 => {
                Err(format!("logistic steepness {steepness} must be > 0"))
            }
            _ => Ok(()),
        }
    }
}

impl Dampening for DampeningFn {
    fn dampen(&self, x: f64) -> f64 {
        let x = if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) };
        let y = match self {
            DampeningFn::Identity => 1.0,
            DampeningFn::Linear { floor } => floor + (1.0 - floor) * x,
            DampeningFn::Power { exponent, floor } => x.powf(*exponent).max(*floor),
            DampeningFn::Logistic { midpoint, steepness, floor } => {
                floor + (1.0 - floor) / (1.0 + (-steepness * (x - midpoint)).exp())
            }
        };
        y.clamp(f64::MIN_POSITIVE, 1.0)
    }
}

/// Maps a posterior variance (relative to the prior scale σ₀²) to a
/// confidence in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VarianceMapping {
    /// 1 − v/σ₀²
    Linear,
    /// e^(−rate · v/σ₀²)
    Exponential { rate: f64 },
}

impl Default for VarianceMapping {
    fn default() -> Self {
        VarianceMapping::Linear
    }
}

impl VarianceMapping {
    pub fn to_confidence(&self, relative_variance: f64) -> f64 {
        let v = relative_variance.max(0.0);
        let c = match self {
            VarianceMapping::Linear => 1.0 - v,
            VarianceMapping::Exponential { rate } => (-rate * v).exp(),
        };
        c.clamp(0.0, 1.0)
    }
}
