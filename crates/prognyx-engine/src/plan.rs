//! Plan Builder: eligibility report → immutable `AnalysisPlan`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use prognyx_common::engine_config::{ExecutionConfig, StrategyConfig};
use prognyx_common::{
    AnalysisError, EligibilityReport, EnsembleStrategy, MethodSpec, Result, StrategyHint,
};

use crate::backend::BackendSet;
use crate::combiner::CombinerRegistry;
use crate::history::AgreementHistory;
use crate::registry::{signature, MethodRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMethod {
    pub method_id: String,
    pub priority: u32,
    pub reliability: f64,
    /// A backend was registered for this method when the plan was built.
    pub backend_resolved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisPlan {
    pub record_id: String,
    /// Execution order.
    pub methods: Vec<PlannedMethod>,
    pub strategy: EnsembleStrategy,
    /// Signature of the planned method set.
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

impl AnalysisPlan {
    pub fn contains(&self, method_id: &str) -> bool {
        self.methods.iter().any(|m| m.method_id == method_id)
    }

    pub fn method_ids(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|m| m.method_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

// ── Strategy decision table ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyInputs {
    pub method_count: usize,
    /// A meta-combiner is trained for the exact planned signature.
    pub combiner_available: bool,
    pub hint: StrategyHint,
    /// Recent agreement for this signature is below the configured threshold.
    pub history_low_agreement: bool,
}

/// Pure strategy selection. First matching row wins:
///
/// | methods | hint               | combiner | low agreement | strategy             |
/// |---------|--------------------|----------|---------------|----------------------|
/// | ≤ 1     | any                | any      | any           | `pass_through`       |
/// | ≥ 2     | `uncertainty_first`| any      | any           | `bayesian_averaging` |
/// | ≥ 2     | `weighted_voting`  | any      | any           | `weighted_voting`    |
/// | ≥ 2     | other              | yes      | any           | `stacking`           |
/// | ≥ 2     | other              | no       | yes           | `bayesian_averaging` |
/// | ≥ 2     | other              | no       | no            | `weighted_voting`    |
pub fn select_strategy(inputs: &StrategyInputs) -> EnsembleStrategy {
    if inputs.method_count <= 1 {
        return EnsembleStrategy::PassThrough;
    }
    match inputs.hint {
        StrategyHint::UncertaintyFirst => EnsembleStrategy::BayesianAveraging,
        StrategyHint::WeightedVoting => EnsembleStrategy::WeightedVoting,
        StrategyHint::Auto | StrategyHint::Stacking => {
            if inputs.combiner_available {
                EnsembleStrategy::Stacking
            } else if inputs.history_low_agreement {
                EnsembleStrategy::BayesianAveraging
            } else {
                EnsembleStrategy::WeightedVoting
            }
        }
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

pub struct PlanBuilder<'a> {
    registry: &'a MethodRegistry,
    backends: &'a BackendSet,
    combiners: &'a dyn CombinerRegistry,
    history: &'a AgreementHistory,
    strategy: &'a StrategyConfig,
    max_planned: Option<usize>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(
        registry: &'a MethodRegistry,
        backends: &'a BackendSet,
        combiners: &'a dyn CombinerRegistry,
        history: &'a AgreementHistory,
        strategy: &'a StrategyConfig,
        execution: &ExecutionConfig,
    ) -> Self {
        Self {
            registry,
            backends,
            combiners,
            history,
            strategy,
            max_planned: execution.max_planned_methods,
        }
    }

    pub fn build(
        &self,
        record_id: &str,
        report: &EligibilityReport,
        hint: StrategyHint,
    ) -> Result<AnalysisPlan> {
        // Report order already breaks ties deterministically; the stable sort
        // keeps it for equal (priority, reliability).
        let mut chosen: Vec<&MethodSpec> = report
            .eligible_ids()
            .into_iter()
            .filter_map(|id| self.registry.get(id))
            .filter(|spec| !spec.fallback_only)
            .collect();
        chosen.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.reliability.total_cmp(&a.reliability))
        });

        if chosen.is_empty() {
            return Err(AnalysisError::AnalysisInfeasible {
                record_id: record_id.to_string(),
                report: report.clone(),
            });
        }
        if let Some(cap) = self.max_planned {
            chosen.truncate(cap.max(1));
        }

        let methods: Vec<PlannedMethod> = chosen
            .iter()
            .map(|spec| PlannedMethod {
                method_id: spec.id.clone(),
                priority: spec.priority,
                reliability: spec.reliability,
                backend_resolved: self.backends.contains(&spec.id),
            })
            .collect();

        let signature = signature(methods.iter().map(|m| m.method_id.as_str()));
        let history_low_agreement = self.strategy.low_agreement_threshold.is_some_and(|t| {
            self.history.is_low(&signature, t, self.strategy.history_min_samples)
        });
        let inputs = StrategyInputs {
            method_count: methods.len(),
            combiner_available: self.combiners.get(&signature).is_some(),
            hint,
            history_low_agreement,
        };
        let strategy = select_strategy(&inputs);

        debug!(
            record_id,
            %signature,
            %strategy,
            methods = methods.len(),
            unresolved = methods.iter().filter(|m| !m.backend_resolved).count(),
            "Built analysis plan"
        );

        Ok(AnalysisPlan {
            record_id: record_id.to_string(),
            methods,
            strategy,
            signature,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use prognyx_common::{DataType, RawAvailability};

    use crate::availability::assess;
    use crate::backend::ScriptedBackend;
    use crate::combiner::{LinearMetaCombiner, StaticCombinerRegistry};
    use crate::feasibility::resolve;

    fn inputs(count: usize, combiner: bool, hint: StrategyHint, low: bool) -> StrategyInputs {
        StrategyInputs {
            method_count: count,
            combiner_available: combiner,
            hint,
            history_low_agreement: low,
        }
    }

    #[test]
    fn test_decision_table() {
        use EnsembleStrategy::*;
        use StrategyHint as H;

        let rows = [
            (inputs(1, true, H::UncertaintyFirst, true), PassThrough),
            (inputs(2, false, H::Auto, false), WeightedVoting),
            (inputs(2, true, H::Auto, false), Stacking),
            (inputs(3, true, H::UncertaintyFirst, false), BayesianAveraging),
            (inputs(2, true, H::WeightedVoting, true), WeightedVoting),
            (inputs(2, false, H::Stacking, false), WeightedVoting),
            (inputs(2, false, H::Auto, true), BayesianAveraging),
            (inputs(2, true, H::Auto, true), Stacking),
        ];
        for (row, expected) in rows {
            assert_eq!(select_strategy(&row), expected, "{row:?}");
        }
    }

    struct Fixture {
        registry: MethodRegistry,
        backends: BackendSet,
        combiners: StaticCombinerRegistry,
        history: AgreementHistory,
        strategy: StrategyConfig,
        execution: ExecutionConfig,
    }

    impl Fixture {
        fn new(specs: Vec<MethodSpec>) -> Self {
            let registry = MethodRegistry::new(specs).unwrap();
            let mut backends = BackendSet::new();
            for spec in registry.iter() {
                backends.insert(&spec.id, Arc::new(ScriptedBackend::new(50.0, 0.5)));
            }
            Self {
                registry,
                backends,
                combiners: StaticCombinerRegistry::new(),
                history: AgreementHistory::default(),
                strategy: StrategyConfig::default(),
                execution: ExecutionConfig::default(),
            }
        }

        fn build(&self, raw: RawAvailability, hint: StrategyHint) -> Result<AnalysisPlan> {
            let profile = assess(&raw).unwrap();
            let report = resolve(&profile, &self.registry);
            PlanBuilder::new(
                &self.registry,
                &self.backends,
                &self.combiners,
                &self.history,
                &self.strategy,
                &self.execution,
            )
            .build("rec-1", &report, hint)
        }
    }

    fn scenario_specs() -> Vec<MethodSpec> {
        vec![
            MethodSpec::new("prs").requires(DataType::Genomic, 0.0).with_priority(10).with_reliability(0.8),
            MethodSpec::new("expression_signature")
                .requires(DataType::Expression, 0.0)
                .with_priority(10)
                .with_reliability(0.7),
            MethodSpec::new("grn_network").requires(DataType::Expression, 0.8).with_priority(5),
        ]
    }

    fn scenario_raw() -> RawAvailability {
        RawAvailability::new()
            .present(DataType::Genomic, 0.9)
            .present(DataType::Expression, 0.5)
            .absent(DataType::Clinical)
    }

    #[test]
    fn test_two_methods_weighted_voting() {
        let fx = Fixture::new(scenario_specs());
        let plan = fx.build(scenario_raw(), StrategyHint::Auto).unwrap();
        assert_eq!(plan.method_ids().collect::<Vec<_>>(), vec!["prs", "expression_signature"]);
        assert_eq!(plan.strategy, EnsembleStrategy::WeightedVoting);
        assert_eq!(plan.signature, "expression_signature+prs");
        assert!(plan.methods.iter().all(|m| m.backend_resolved));
    }

    #[test]
    fn test_infeasible_carries_report() {
        let fx = Fixture::new(scenario_specs());
        let err = fx.build(RawAvailability::new(), StrategyHint::Auto).unwrap_err();
        match err {
            AnalysisError::AnalysisInfeasible { report, .. } => {
                assert!(report.eligible_ids().is_empty());
                assert_eq!(report.entries.len(), 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_single_method_is_pass_through() {
        let fx = Fixture::new(scenario_specs());
        let raw = RawAvailability::new().present(DataType::Genomic, 0.9);
        let plan = fx.build(raw, StrategyHint::UncertaintyFirst).unwrap();
        assert_eq!(plan.strategy, EnsembleStrategy::PassThrough);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_reserve_methods_not_planned() {
        let mut specs = scenario_specs();
        specs.push(MethodSpec::new("prs_lite").requires(DataType::Genomic, 0.0).with_priority(1).reserve());
        let fx = Fixture::new(specs);
        let plan = fx.build(scenario_raw(), StrategyHint::Auto).unwrap();
        assert!(!plan.contains("prs_lite"));
    }

    #[test]
    fn test_cap_keeps_highest_priority() {
        let mut fx = Fixture::new(scenario_specs());
        fx.execution.max_planned_methods = Some(1);
        let plan = fx.build(scenario_raw(), StrategyHint::Auto).unwrap();
        assert_eq!(plan.method_ids().collect::<Vec<_>>(), vec!["prs"]);
        assert_eq!(plan.strategy, EnsembleStrategy::PassThrough);
    }

    #[test]
    fn test_stacking_when_combiner_trained() {
        let mut fx = Fixture::new(scenario_specs());
        fx.combiners = StaticCombinerRegistry::new().with(
            ["prs", "expression_signature"],
            Arc::new(LinearMetaCombiner::new(Default::default(), 0.0)),
        );
        let plan = fx.build(scenario_raw(), StrategyHint::Auto).unwrap();
        assert_eq!(plan.strategy, EnsembleStrategy::Stacking);
    }

    #[test]
    fn test_low_history_agreement_switches_to_bayesian() {
        let mut fx = Fixture::new(scenario_specs());
        fx.strategy.low_agreement_threshold = Some(0.6);
        fx.strategy.history_min_samples = 2;
        fx.history.record("expression_signature+prs", 0.3);
        fx.history.record("expression_signature+prs", 0.4);
        let plan = fx.build(scenario_raw(), StrategyHint::Auto).unwrap();
        assert_eq!(plan.strategy, EnsembleStrategy::BayesianAveraging);
    }

    #[test]
    fn test_missing_backend_marked_unresolved() {
        let mut fx = Fixture::new(scenario_specs());
        fx.backends = BackendSet::new().with("prs", Arc::new(ScriptedBackend::new(1.0, 0.5)));
        let plan = fx.build(scenario_raw(), StrategyHint::Auto).unwrap();
        let sig = plan.methods.iter().find(|m| m.method_id == "expression_signature").unwrap();
        assert!(!sig.backend_resolved);
    }
}
