//! `AnalysisEngine`: the request entry point.
//!
//! profile store → assess → resolve → plan → execute → calibrate → aggregate

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use prognyx_common::confidence::Dampening;
use prognyx_common::prediction::UNCALIBRATED;
use prognyx_common::{
    AnalysisError, ConfigError, DataProfile, EligibilityReport, EngineConfig, EnsemblePrediction,
    Evidence, MethodStatus, Result, SkippedMethod, StrategyHint,
};

use crate::aggregator::{AggregationSettings, EnsembleAggregator};
use crate::availability::assess;
use crate::backend::{BackendAnalyzer, BackendSet};
use crate::calibrator::Calibrator;
use crate::combiner::{CombinerRegistry, StaticCombinerRegistry};
use crate::coordinator::{ExecutionCoordinator, ExecutionSettings, RequestContext};
use crate::fallback::FallbackHandler;
use crate::feasibility::resolve;
use crate::history::AgreementHistory;
use crate::plan::{AnalysisPlan, PlanBuilder};
use crate::registry::{signature, MethodRegistry};
use crate::stores::{AccuracySnapshot, ProfileStore};

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Global request deadline; the configured default applies when unset.
    pub deadline: Option<Duration>,
    pub strategy_hint: StrategyHint,
    /// Forwarded verbatim to every backend call.
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl AnalyzeOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_hint(mut self, hint: StrategyHint) -> Self {
        self.strategy_hint = hint;
        self
    }

    pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

/// Result of planning without executing.
#[derive(Debug, Clone)]
pub struct PlanPreview {
    pub profile: DataProfile,
    pub report: EligibilityReport,
    pub plan: AnalysisPlan,
}

pub struct AnalysisEngine {
    config: EngineConfig,
    registry: Arc<MethodRegistry>,
    backends: Arc<BackendSet>,
    profiles: Arc<dyn ProfileStore>,
    accuracy: ArcSwap<AccuracySnapshot>,
    combiners: Arc<dyn CombinerRegistry>,
    quality_fn: Arc<dyn Dampening>,
    accuracy_fn: Arc<dyn Dampening>,
    history: AgreementHistory,
    coordinator: ExecutionCoordinator,
    aggregator: EnsembleAggregator,
}

impl AnalysisEngine {
    pub fn builder() -> AnalysisEngineBuilder {
        AnalysisEngineBuilder::default()
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history(&self) -> &AgreementHistory {
        &self.history
    }

    /// Snapshot new requests will calibrate against.
    pub fn accuracy_snapshot(&self) -> Arc<AccuracySnapshot> {
        self.accuracy.load_full()
    }

    /// Swap in a new accuracy snapshot. In-flight requests keep the one
    /// they started with.
    pub fn refresh_accuracy(&self, snapshot: AccuracySnapshot) {
        info!(methods = snapshot.len(), "Refreshed historical accuracy snapshot");
        self.accuracy.store(Arc::new(snapshot));
    }

    /// Profile, eligibility and plan for a record, without running anything.
    pub async fn plan(&self, record_id: &str, hint: StrategyHint) -> Result<PlanPreview> {
        let raw = self.profiles.get_raw_availability(record_id).await?;
        let profile = assess(&raw)?;
        let report = resolve(&profile, &self.registry);
        let plan = self.plan_builder().build(record_id, &report, hint)?;
        Ok(PlanPreview { profile, report, plan })
    }

    #[instrument(skip(self, options), fields(hint = ?options.strategy_hint))]
    pub async fn analyze(&self, record_id: &str, options: AnalyzeOptions) -> Result<EnsemblePrediction> {
        let started = Instant::now();
        let budget = options.deadline.unwrap_or_else(|| self.config.execution.request_deadline());
        let deadline = started.checked_add(budget).unwrap_or_else(|| started + Duration::from_secs(86_400));

        let PlanPreview { profile, report, plan } = self.plan(record_id, options.strategy_hint).await?;
        info!(
            signature = %plan.signature,
            strategy = %plan.strategy,
            planned = plan.len(),
            "Analysis planned"
        );

        let fallback = Arc::new(FallbackHandler::new(&self.registry, &report, &plan, &self.backends));
        let ctx = Arc::new(RequestContext {
            record_id: record_id.to_string(),
            profile,
            params: options.params,
        });
        let batch = self
            .coordinator
            .execute(&plan, &self.registry, &self.backends, fallback, ctx.clone(), deadline)
            .await;

        let skipped: Vec<SkippedMethod> = batch
            .results
            .iter()
            .filter(|r| !r.is_success())
            .map(SkippedMethod::from_result)
            .collect();

        if batch.successes() == 0 {
            let all_timeouts = skipped.iter().all(|s| s.status == MethodStatus::Timeout);
            warn!(deadline_elapsed = batch.deadline_elapsed, "No method succeeded");
            return Err(if batch.deadline_elapsed || all_timeouts {
                AnalysisError::AnalysisTimeout { record_id: record_id.to_string(), failures: skipped }
            } else {
                AnalysisError::AllMethodsFailed { record_id: record_id.to_string(), failures: skipped }
            });
        }

        // One snapshot for the whole calibration pass.
        let accuracy = self.accuracy.load_full();
        let calibrator = Calibrator::new(
            &self.registry,
            &ctx.profile,
            accuracy.as_ref(),
            self.quality_fn.as_ref(),
            self.accuracy_fn.as_ref(),
        );
        let calibrated = calibrator.calibrate_all(&batch.results);

        let contributors = signature(calibrated.iter().map(|c| c.method_id.as_str()));
        let combiner = self.combiners.get(&contributors);
        let aggregate = self
            .aggregator
            .aggregate(plan.strategy, &calibrated, combiner.as_deref())?;

        // keyed by the planned set, which is what the next plan looks up
        if calibrated.len() > 1 {
            self.history.record(&plan.signature, aggregate.agreement);
        }

        let evidence: BTreeMap<String, Evidence> = calibrated
            .iter()
            .map(|c| {
                let mut summary = (*c.evidence).clone();
                if c.uncalibrated {
                    summary.insert(UNCALIBRATED.to_string(), serde_json::Value::Bool(true));
                }
                (c.method_id.clone(), summary)
            })
            .collect();

        let prediction = EnsemblePrediction {
            analysis_id: Uuid::new_v4(),
            record_id: record_id.to_string(),
            strategy: aggregate.strategy,
            score: aggregate.score,
            confidence: aggregate.confidence,
            weights: aggregate.weights,
            agreement: aggregate.agreement,
            evidence,
            partial: calibrated.len() < plan.len(),
            skipped,
            created_at: Utc::now(),
        };

        info!(
            analysis_id = %prediction.analysis_id,
            strategy = %prediction.strategy,
            score = prediction.score,
            confidence = prediction.confidence,
            agreement = prediction.agreement,
            partial = prediction.partial,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis complete"
        );
        Ok(prediction)
    }

    fn plan_builder(&self) -> PlanBuilder<'_> {
        PlanBuilder::new(
            &self.registry,
            &self.backends,
            self.combiners.as_ref(),
            &self.history,
            &self.config.strategy,
            &self.config.execution,
        )
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct AnalysisEngineBuilder {
    config: Option<EngineConfig>,
    registry: Option<MethodRegistry>,
    backends: BackendSet,
    profiles: Option<Arc<dyn ProfileStore>>,
    accuracy: Option<AccuracySnapshot>,
    combiners: Option<Arc<dyn CombinerRegistry>>,
    quality_fn: Option<Arc<dyn Dampening>>,
    accuracy_fn: Option<Arc<dyn Dampening>>,
}

impl AnalysisEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides the registry derived from the config.
    pub fn registry(mut self, registry: MethodRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn backend(mut self, method_id: &str, backend: Arc<dyn BackendAnalyzer>) -> Self {
        self.backends.insert(method_id, backend);
        self
    }

    pub fn backends(mut self, backends: BackendSet) -> Self {
        self.backends = backends;
        self
    }

    pub fn profile_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(store);
        self
    }

    /// Overrides the `[accuracy]` table of the config.
    pub fn accuracy(mut self, snapshot: AccuracySnapshot) -> Self {
        self.accuracy = Some(snapshot);
        self
    }

    /// Overrides the `[[combiners]]` of the config.
    pub fn combiners(mut self, combiners: Arc<dyn CombinerRegistry>) -> Self {
        self.combiners = Some(combiners);
        self
    }

    pub fn quality_dampening(mut self, f: Arc<dyn Dampening>) -> Self {
        self.quality_fn = Some(f);
        self
    }

    pub fn accuracy_dampening(mut self, g: Arc<dyn Dampening>) -> Self {
        self.accuracy_fn = Some(g);
        self
    }

    pub fn build(self) -> Result<AnalysisEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let registry = match self.registry {
            Some(r) => r,
            None => MethodRegistry::from_config(&config)?,
        };
        let profiles = self
            .profiles
            .ok_or_else(|| ConfigError::Invalid("a profile store is required".into()))?;

        for id in self.backends.method_ids() {
            if !registry.contains(id) {
                warn!(method_id = id, "Backend registered for unknown method");
            }
        }

        let accuracy = self
            .accuracy
            .unwrap_or_else(|| AccuracySnapshot::from_map(config.accuracy.clone()));
        let combiners = self
            .combiners
            .unwrap_or_else(|| Arc::new(StaticCombinerRegistry::from_config(&config.combiners)) as Arc<dyn CombinerRegistry>);
        let quality_fn = self
            .quality_fn
            .unwrap_or_else(|| Arc::new(config.calibration.quality.clone()) as Arc<dyn Dampening>);
        let accuracy_fn = self
            .accuracy_fn
            .unwrap_or_else(|| Arc::new(config.calibration.accuracy.clone()) as Arc<dyn Dampening>);

        let coordinator =
            ExecutionCoordinator::new(ExecutionSettings::from_config(&config.execution, &config.scoring));
        let aggregator =
            EnsembleAggregator::new(AggregationSettings::from_config(&config.aggregation, &config.scoring));

        info!(
            methods = registry.len(),
            backends = self.backends.method_ids().count(),
            pool = config.execution.worker_pool_size,
            "Analysis engine ready"
        );

        Ok(AnalysisEngine {
            history: AgreementHistory::new(config.strategy.history_window),
            registry: Arc::new(registry),
            backends: Arc::new(self.backends),
            profiles,
            accuracy: ArcSwap::from_pointee(accuracy),
            combiners,
            quality_fn,
            accuracy_fn,
            coordinator,
            aggregator,
            config,
        })
    }
}
