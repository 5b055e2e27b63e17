//! Trained meta-combiners used by the stacking strategy.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use prognyx_common::engine_config::CombinerConfig;
use prognyx_common::{AnalysisError, Result};

use crate::registry::signature;

/// One base-model output fed to a meta-combiner.
#[derive(Debug, Clone, PartialEq)]
pub struct StackingInput {
    pub method_id: String,
    pub score: f64,
    /// Calibrated confidence.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackedOutput {
    pub score: f64,
    pub confidence: f64,
    /// Per-method contribution, if the combiner can report one.
    pub weights: Option<BTreeMap<String, f64>>,
}

pub trait MetaCombiner: Send + Sync {
    fn combine(&self, inputs: &[StackingInput]) -> Result<StackedOutput>;
}

/// Lookup of a meta-combiner by exact method-set signature.
pub trait CombinerRegistry: Send + Sync {
    fn get(&self, signature: &str) -> Option<Arc<dyn MetaCombiner>>;
}

// ── Linear combiner ─────────────────────────────────────────────────────────

/// score = intercept + Σ coefᵢ · scoreᵢ
/// confidence = Σ |coefᵢ| · confᵢ / Σ |coefᵢ|
#[derive(Debug, Clone)]
pub struct LinearMetaCombiner {
    coefficients: BTreeMap<String, f64>,
    intercept: f64,
}

impl LinearMetaCombiner {
    pub fn new(coefficients: BTreeMap<String, f64>, intercept: f64) -> Self {
        Self { coefficients, intercept }
    }
}

impl MetaCombiner for LinearMetaCombiner {
    fn combine(&self, inputs: &[StackingInput]) -> Result<StackedOutput> {
        if inputs.is_empty() {
            return Err(AnalysisError::Combiner("no inputs".into()));
        }

        let mut score = self.intercept;
        let mut conf_num = 0.0;
        let mut abs_sum = 0.0;
        let mut weights = BTreeMap::new();

        for input in inputs {
            let coef = *self.coefficients.get(&input.method_id).ok_or_else(|| {
                AnalysisError::Combiner(format!("no coefficient for '{}'", input.method_id))
            })?;
            score += coef * input.score;
            conf_num += coef.abs() * input.confidence;
            abs_sum += coef.abs();
            weights.insert(input.method_id.clone(), coef.abs());
        }

        if abs_sum <= 0.0 {
            return Err(AnalysisError::Combiner("all coefficients are zero".into()));
        }
        for w in weights.values_mut() {
            *w /= abs_sum;
        }

        Ok(StackedOutput {
            score,
            confidence: conf_num / abs_sum,
            weights: Some(weights),
        })
    }
}

// ── Static registry ─────────────────────────────────────────────────────────

#[derive(Default, Clone)]
pub struct StaticCombinerRegistry {
    combiners: HashMap<String, Arc<dyn MetaCombiner>>,
}

impl StaticCombinerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a combiner for the given method set.
    pub fn with<I, S>(mut self, methods: I, combiner: Arc<dyn MetaCombiner>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.combiners.insert(signature(methods), combiner);
        self
    }

    pub fn from_config(combiners: &[CombinerConfig]) -> Self {
        combiners.iter().fold(Self::new(), |reg, c| {
            let linear = LinearMetaCombiner::new(c.coefficients.clone(), c.intercept);
            reg.with(&c.methods, Arc::new(linear))
        })
    }

    pub fn len(&self) -> usize {
        self.combiners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combiners.is_empty()
    }
}

impl CombinerRegistry for StaticCombinerRegistry {
    fn get(&self, signature: &str) -> Option<Arc<dyn MetaCombiner>> {
        self.combiners.get(signature).cloned()
    }
}
