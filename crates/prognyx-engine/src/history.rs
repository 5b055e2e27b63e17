//! Rolling agreement scores per method-set signature.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

#[derive(Debug)]
pub struct AgreementHistory {
    window: usize,
    scores: RwLock<HashMap<String, VecDeque<f64>>>,
}

impl AgreementHistory {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            scores: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, signature: &str, agreement: f64) {
        let mut scores = self.scores.write().unwrap_or_else(|e| e.into_inner());
        let entry = scores.entry(signature.to_string()).or_default();
        entry.push_back(agreement.clamp(0.0, 1.0));
        while entry.len() > self.window {
            entry.pop_front();
        }
    }

    /// Mean agreement and sample count for a signature.
    pub fn mean(&self, signature: &str) -> Option<(f64, usize)> {
        let scores = self.scores.read().unwrap_or_else(|e| e.into_inner());
        let entry = scores.get(signature).filter(|e| !e.is_empty())?;
        let mean = entry.iter().sum::<f64>() / entry.len() as f64;
        Some((mean, entry.len()))
    }

    /// True once at least `min_samples` are recorded and their mean is below
    /// `threshold`.
    pub fn is_low(&self, signature: &str, threshold: f64, min_samples: usize) -> bool {
        matches!(self.mean(signature), Some((mean, n)) if n >= min_samples && mean < threshold)
    }
}

impl Default for AgreementHistory {
    fn default() -> Self {
        Self::new(20)
    }
}
