//! Confidence Calibrator.
//!
//! calibrated = raw × f(quality) × g(historical accuracy)
//!
//! Quality is the lowest quality across the producing method's required
//! data types. For a substituted result the producer is the fallback, so
//! its quality, accuracy and reliability apply.

use tracing::warn;

use prognyx_common::confidence::Dampening;
use prognyx_common::{CalibratedResult, DataProfile, MethodResult};

use crate::registry::MethodRegistry;
use crate::stores::PerformanceStore;

pub struct Calibrator<'a> {
    registry: &'a MethodRegistry,
    profile: &'a DataProfile,
    accuracy: &'a dyn PerformanceStore,
    quality_fn: &'a dyn Dampening,
    accuracy_fn: &'a dyn Dampening,
}

impl<'a> Calibrator<'a> {
    pub fn new(
        registry: &'a MethodRegistry,
        profile: &'a DataProfile,
        accuracy: &'a dyn PerformanceStore,
        quality_fn: &'a dyn Dampening,
        accuracy_fn: &'a dyn Dampening,
    ) -> Self {
        Self { registry, profile, accuracy, quality_fn, accuracy_fn }
    }

    /// `None` for non-successful results.
    pub fn calibrate(&self, result: &MethodResult) -> Option<CalibratedResult> {
        if !result.is_success() {
            return None;
        }
        let (score, raw) = (result.score?, result.confidence?);
        let producer = result.producer();
        let Some(spec) = self.registry.get(producer) else {
            warn!(method_id = %result.method_id, producer, "Result from unregistered method dropped");
            return None;
        };

        let quality = self.profile.min_quality(spec.required_types());
        let quality_factor = self.quality_fn.dampen(quality);
        let (accuracy_factor, uncalibrated) = match self.accuracy.accuracy(producer) {
            Some(acc) => (self.accuracy_fn.dampen(acc), false),
            None => (1.0, true),
        };

        Some(CalibratedResult {
            method_id: result.method_id.clone(),
            score,
            raw_confidence: raw,
            calibrated_confidence: (raw * quality_factor * accuracy_factor).clamp(0.0, 1.0),
            quality_factor,
            accuracy_factor,
            reliability: spec.reliability,
            uncalibrated,
            substituted_by: result.substituted_by.clone(),
            evidence: result.evidence.clone(),
        })
    }

    pub fn calibrate_all(&self, results: &[MethodResult]) -> Vec<CalibratedResult> {
        results.iter().filter_map(|r| self.calibrate(r)).collect()
    }
}
