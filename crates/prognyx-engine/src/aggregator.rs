//! Ensemble Aggregator.
//!
//! Combines calibrated results into one score, confidence, weight map and
//! agreement score. Weights always cover exactly the contributing methods
//! and sum to 1.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use prognyx_common::confidence::VarianceMapping;
use prognyx_common::engine_config::{AggregationConfig, ScoringConfig};
use prognyx_common::{AnalysisError, CalibratedResult, EnsembleStrategy, Result};

use crate::combiner::{MetaCombiner, StackingInput};

#[derive(Debug, Clone)]
pub struct AggregationSettings {
    pub disagreement_penalty: f64,
    /// Variance floor ε for a method reporting confidence 1.0.
    pub min_variance: f64,
    pub variance_mapping: VarianceMapping,
    pub min_score: f64,
    pub max_score: f64,
}

impl AggregationSettings {
    pub fn from_config(aggregation: &AggregationConfig, scoring: &ScoringConfig) -> Self {
        Self {
            disagreement_penalty: aggregation.disagreement_penalty,
            min_variance: aggregation.bayesian_min_variance,
            variance_mapping: aggregation.variance_mapping.clone(),
            min_score: scoring.min_score,
            max_score: scoring.max_score,
        }
    }

    fn range(&self) -> f64 {
        self.max_score - self.min_score
    }
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self::from_config(&AggregationConfig::default(), &ScoringConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Strategy actually applied (may differ from the plan's after degradation).
    pub strategy: EnsembleStrategy,
    pub score: f64,
    pub confidence: f64,
    pub weights: BTreeMap<String, f64>,
    pub agreement: f64,
}

pub struct EnsembleAggregator {
    settings: AggregationSettings,
}

impl EnsembleAggregator {
    pub fn new(settings: AggregationSettings) -> Self {
        Self { settings }
    }

    /// Apply `strategy` to the calibrated results.
    ///
    /// A single contributor always yields pass-through. Stacking falls back
    /// to weighted voting when the surviving set has no combiner or the
    /// combiner fails.
    pub fn aggregate(
        &self,
        strategy: EnsembleStrategy,
        results: &[CalibratedResult],
        combiner: Option<&dyn MetaCombiner>,
    ) -> Result<Aggregate> {
        let aggregate = match (results, strategy, combiner) {
            ([], ..) => {
                return Err(AnalysisError::Other(anyhow::anyhow!(
                    "no calibrated results to aggregate"
                )))
            }
            ([single], ..) => pass_through(single),
            (_, EnsembleStrategy::BayesianAveraging, _) => self.bayesian_averaging(results),
            (_, EnsembleStrategy::Stacking, Some(combiner)) => match self.stacking(results, combiner) {
                Ok(stacked) => stacked,
                Err(e) => {
                    warn!(error = %e, "Meta-combiner failed, using weighted voting");
                    self.weighted_voting(results)
                }
            },
            _ => self.weighted_voting(results),
        };

        debug!(
            requested = %strategy,
            applied = %aggregate.strategy,
            score = aggregate.score,
            confidence = aggregate.confidence,
            agreement = aggregate.agreement,
            "Aggregated ensemble"
        );
        Ok(aggregate)
    }

    /// wᵢ ∝ calibratedᵢ × reliabilityᵢ; confidence is the weighted mean
    /// confidence reduced by the normalised weighted score variance.
    pub fn weighted_voting(&self, results: &[CalibratedResult]) -> Aggregate {
        let weights = normalise(
            results
                .iter()
                .map(|r| (r.method_id.clone(), r.calibrated_confidence * r.reliability)),
        );
        let score = weighted_sum(results, &weights, |r| r.score);
        let mean_confidence = weighted_sum(results, &weights, |r| r.calibrated_confidence);

        let variance = weighted_sum(results, &weights, |r| (r.score - score).powi(2));
        // largest possible variance of values confined to the score range
        let max_variance = (self.settings.range() / 2.0).powi(2);
        let spread = (variance / max_variance).clamp(0.0, 1.0);
        let confidence =
            mean_confidence * (1.0 - self.settings.disagreement_penalty * spread).clamp(0.0, 1.0);

        Aggregate {
            strategy: EnsembleStrategy::WeightedVoting,
            score: self.clamp_score(score),
            confidence: confidence.clamp(0.0, 1.0),
            agreement: agreement(results, self.settings.range()),
            weights,
        }
    }

    /// Precision weighting with varianceᵢ = max(1 − cᵢ, ε) · σ₀². Everything is
    /// expressed relative to σ₀², so the prior scale cancels out.
    pub fn bayesian_averaging(&self, results: &[CalibratedResult]) -> Aggregate {
        let eps = self.settings.min_variance;
        let precisions: Vec<(String, f64)> = results
            .iter()
            .map(|r| (r.method_id.clone(), 1.0 / (1.0 - r.calibrated_confidence).max(eps)))
            .collect();
        let total_precision: f64 = precisions.iter().map(|(_, p)| p).sum();
        let weights = normalise(precisions);

        let score = weighted_sum(results, &weights, |r| r.score);
        let posterior_variance = 1.0 / total_precision;

        Aggregate {
            strategy: EnsembleStrategy::BayesianAveraging,
            score: self.clamp_score(score),
            confidence: self.settings.variance_mapping.to_confidence(posterior_variance),
            agreement: agreement(results, self.settings.range()),
            weights,
        }
    }

    pub fn stacking(&self, results: &[CalibratedResult], combiner: &dyn MetaCombiner) -> Result<Aggregate> {
        let inputs: Vec<StackingInput> = results
            .iter()
            .map(|r| StackingInput {
                method_id: r.method_id.clone(),
                score: r.score,
                confidence: r.calibrated_confidence,
            })
            .collect();
        let out = combiner.combine(&inputs)?;
        if !out.score.is_finite() || !out.confidence.is_finite() {
            return Err(AnalysisError::Combiner(format!(
                "non-finite output (score {}, confidence {})",
                out.score, out.confidence
            )));
        }

        let weights = match &out.weights {
            Some(reported) => normalise(
                results
                    .iter()
                    .map(|r| (r.method_id.clone(), reported.get(&r.method_id).copied().unwrap_or(0.0).max(0.0))),
            ),
            None => normalise(results.iter().map(|r| (r.method_id.clone(), r.calibrated_confidence))),
        };

        Ok(Aggregate {
            strategy: EnsembleStrategy::Stacking,
            score: self.clamp_score(out.score),
            confidence: out.confidence.clamp(0.0, 1.0),
            agreement: agreement(results, self.settings.range()),
            weights,
        })
    }

    fn clamp_score(&self, score: f64) -> f64 {
        score.clamp(self.settings.min_score, self.settings.max_score)
    }
}

impl Default for EnsembleAggregator {
    fn default() -> Self {
        Self::new(AggregationSettings::default())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn pass_through(result: &CalibratedResult) -> Aggregate {
    Aggregate {
        strategy: EnsembleStrategy::PassThrough,
        score: result.score,
        confidence: result.calibrated_confidence,
        weights: BTreeMap::from([(result.method_id.clone(), 1.0)]),
        agreement: 1.0,
    }
}

/// Scale non-negative raw weights to sum to 1. All-zero (or non-finite)
/// input becomes uniform.
pub fn normalise<I>(raw: I) -> BTreeMap<String, f64>
where
    I: IntoIterator<Item = (String, f64)>,
{
    let mut weights: BTreeMap<String, f64> = raw
        .into_iter()
        .map(|(id, w)| (id, if w.is_finite() { w.max(0.0) } else { 0.0 }))
        .collect();
    let sum: f64 = weights.values().sum();
    let n = weights.len() as f64;
    for w in weights.values_mut() {
        *w = if sum > 0.0 { *w / sum } else { 1.0 / n };
    }
    weights
}

fn weighted_sum<F>(results: &[CalibratedResult], weights: &BTreeMap<String, f64>, value: F) -> f64
where
    F: Fn(&CalibratedResult) -> f64,
{
    results
        .iter()
        .map(|r| weights.get(&r.method_id).copied().unwrap_or(0.0) * value(r))
        .sum()
}

/// 1 − mean pairwise squared score difference / range², clamped to [0, 1].
/// A single contributor agrees with itself.
pub fn agreement(results: &[CalibratedResult], range: f64) -> f64 {
    if results.len() < 2 || range <= 0.0 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in results.iter().enumerate() {
        for b in &results[i + 1..] {
            total += (a.score - b.score).powi(2);
            pairs += 1;
        }
    }
    (1.0 - total / pairs as f64 / range.powi(2)).clamp(0.0, 1.0)
}
