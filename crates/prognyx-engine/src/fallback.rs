//! Fallback Handler.
//!
//! Decisions are computed once per request from the registry, the
//! eligibility report and the plan, then shared read-only by every method
//! task. Only the failing method's own `fallback` target is considered; the
//! target's fallback is never followed. A target is claimed by at most one
//! planned method, the earliest in plan order.

use std::collections::HashMap;
use std::sync::Arc;

use prognyx_common::{EligibilityReport, MethodSpec};

use crate::backend::{BackendAnalyzer, BackendSet};
use crate::plan::AnalysisPlan;
use crate::registry::MethodRegistry;

#[derive(Clone)]
pub enum FallbackDecision {
    Substitute {
        spec: MethodSpec,
        backend: Arc<dyn BackendAnalyzer>,
    },
    NoSubstitute(String),
}

impl FallbackDecision {
    pub fn target(&self) -> Option<&str> {
        match self {
            FallbackDecision::Substitute { spec, .. } => Some(&spec.id),
            FallbackDecision::NoSubstitute(_) => None,
        }
    }
}

impl std::fmt::Debug for FallbackDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackDecision::Substitute { spec, .. } => write!(f, "Substitute({})", spec.id),
            FallbackDecision::NoSubstitute(reason) => write!(f, "NoSubstitute({reason})"),
        }
    }
}

#[derive(Debug, Default)]
pub struct FallbackHandler {
    decisions: HashMap<String, FallbackDecision>,
}

impl FallbackHandler {
    pub fn new(
        registry: &MethodRegistry,
        report: &EligibilityReport,
        plan: &AnalysisPlan,
        backends: &BackendSet,
    ) -> Self {
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut decisions = HashMap::with_capacity(plan.len());
        for id in plan.method_ids() {
            let decision = match decide(id, registry, report, plan, backends) {
                FallbackDecision::Substitute { spec, .. } if claimed.contains_key(&spec.id) => {
                    FallbackDecision::NoSubstitute(format!(
                        "fallback '{}' already claimed by '{}'",
                        spec.id, claimed[&spec.id]
                    ))
                }
                decision => {
                    if let Some(target) = decision.target() {
                        claimed.insert(target.to_string(), id.to_string());
                    }
                    decision
                }
            };
            decisions.insert(id.to_string(), decision);
        }
        Self { decisions }
    }

    pub fn resolve(&self, method_id: &str) -> FallbackDecision {
        self.decisions
            .get(method_id)
            .cloned()
            .unwrap_or_else(|| FallbackDecision::NoSubstitute(format!("'{method_id}' is not planned")))
    }
}

fn decide(
    method_id: &str,
    registry: &MethodRegistry,
    report: &EligibilityReport,
    plan: &AnalysisPlan,
    backends: &BackendSet,
) -> FallbackDecision {
    let no = |reason: String| FallbackDecision::NoSubstitute(reason);

    let Some(target) = registry.get(method_id).and_then(|s| s.fallback.as_deref()) else {
        return no("no fallback configured".into());
    };
    let Some(spec) = registry.get(target) else {
        return no(format!("fallback '{target}' is not registered"));
    };
    if !report.is_eligible(target) {
        return no(format!("fallback '{target}' is not eligible"));
    }
    if plan.contains(target) {
        return no(format!("fallback '{target}' already planned"));
    }
    match backends.get(target) {
        Some(backend) => FallbackDecision::Substitute { spec: spec.clone(), backend },
        None => no(format!("fallback '{target}' has no backend")),
    }
}
