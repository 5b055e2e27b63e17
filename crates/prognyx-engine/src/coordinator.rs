//! Execution Coordinator.
//!
//! Every planned method runs as its own task in a `JoinSet`, gated by a
//! shared worker pool. A method's budget is `min(permit time + nominal
//! timeout, request deadline)`; retries and backoff come out of that same
//! budget. A failing method consults the Fallback Handler inside its own
//! task, so siblings are never blocked by it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use prognyx_common::engine_config::{ExecutionConfig, ScoringConfig};
use prognyx_common::{DataProfile, MethodFailureKind, MethodResult, MethodSpec, MethodStatus};

use crate::backend::{BackendAnalyzer, BackendError, BackendOutput, BackendSet, InvocationRequest};
use crate::fallback::{FallbackDecision, FallbackHandler};
use crate::plan::AnalysisPlan;
use crate::registry::MethodRegistry;

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub worker_pool_size: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub min_score: f64,
    pub max_score: f64,
}

impl ExecutionSettings {
    pub fn from_config(execution: &ExecutionConfig, scoring: &ScoringConfig) -> Self {
        Self {
            worker_pool_size: execution.worker_pool_size.max(1),
            max_attempts: execution.max_attempts.max(1),
            retry_backoff: execution.retry_backoff(),
            min_score: scoring.min_score,
            max_score: scoring.max_score,
        }
    }

    /// Reject outputs a backend should never produce.
    fn check_output(&self, output: &BackendOutput) -> Result<(), String> {
        if !output.score.is_finite() || output.score < self.min_score || output.score > self.max_score {
            return Err(format!(
                "score {} outside [{}, {}]",
                output.score, self.min_score, self.max_score
            ));
        }
        if !(0.0..=1.0).contains(&output.confidence) {
            return Err(format!("confidence {} outside [0, 1]", output.confidence));
        }
        Ok(())
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default(), &ScoringConfig::default())
    }
}

/// Read-only inputs shared by all method tasks of one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub record_id: String,
    pub profile: DataProfile,
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Terminal results of one request, in plan order.
#[derive(Debug)]
pub struct Batch {
    pub results: Vec<MethodResult>,
    /// The request deadline closed the batch before every task finished.
    pub deadline_elapsed: bool,
}

impl Batch {
    pub fn successes(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }
}

pub struct ExecutionCoordinator {
    settings: Arc<ExecutionSettings>,
    pool: Arc<Semaphore>,
}

impl ExecutionCoordinator {
    pub fn new(settings: ExecutionSettings) -> Self {
        let pool = Arc::new(Semaphore::new(settings.worker_pool_size));
        Self { settings: Arc::new(settings), pool }
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Run the plan to completion or until `deadline`, whichever comes first.
    pub async fn execute(
        &self,
        plan: &AnalysisPlan,
        registry: &MethodRegistry,
        backends: &BackendSet,
        fallback: Arc<FallbackHandler>,
        ctx: Arc<RequestContext>,
        deadline: Instant,
    ) -> Batch {
        let opened = Instant::now();
        let mut slots: Vec<Option<MethodResult>> = vec![None; plan.len()];
        let mut tasks = JoinSet::new();

        for (index, planned) in plan.methods.iter().enumerate() {
            let id = planned.method_id.as_str();
            let spec = registry.get(id);
            let backend = backends.get(id).filter(|_| planned.backend_resolved);
            let (Some(spec), Some(backend)) = (spec, backend) else {
                warn!(record_id = %ctx.record_id, method_id = id, "No backend registered, skipping");
                slots[index] = Some(MethodResult::skipped(id, "no backend registered"));
                continue;
            };

            let task = run_method(
                spec.clone(),
                backend,
                ctx.clone(),
                fallback.clone(),
                self.pool.clone(),
                self.settings.clone(),
                deadline,
            );
            tasks.spawn(async move { (index, task.await) });
        }

        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((index, result)) => slots[index] = Some(result),
                    Err(e) => warn!(record_id = %ctx.record_id, error = %e, "Method task lost"),
                }
            }
        };
        let deadline_elapsed = timeout_at(deadline, collect).await.is_err();
        if deadline_elapsed {
            tasks.abort_all();
        }

        let results: Vec<MethodResult> = plan
            .methods
            .iter()
            .zip(slots)
            .map(|(planned, slot)| {
                slot.unwrap_or_else(|| {
                    if deadline_elapsed {
                        MethodResult::timeout(&planned.method_id, "request deadline elapsed", opened.elapsed(), 0)
                    } else {
                        MethodResult::failed(
                            &planned.method_id,
                            MethodFailureKind::Aborted,
                            "method task panicked",
                            opened.elapsed(),
                            0,
                        )
                    }
                })
            })
            .collect();

        let count = |status: MethodStatus| results.iter().filter(|r| r.status == status).count();
        info!(
            record_id = %ctx.record_id,
            planned = results.len(),
            succeeded = count(MethodStatus::Success),
            failed = count(MethodStatus::Failed),
            timed_out = count(MethodStatus::Timeout),
            skipped = count(MethodStatus::Skipped),
            deadline_elapsed,
            elapsed_ms = opened.elapsed().as_millis() as u64,
            "Batch closed"
        );

        Batch { results, deadline_elapsed }
    }
}

#[instrument(skip_all, fields(record_id = %ctx.record_id, method_id = %spec.id))]
async fn run_method(
    spec: MethodSpec,
    backend: Arc<dyn BackendAnalyzer>,
    ctx: Arc<RequestContext>,
    fallback: Arc<FallbackHandler>,
    pool: Arc<Semaphore>,
    settings: Arc<ExecutionSettings>,
    deadline: Instant,
) -> MethodResult {
    let queued = Instant::now();
    let _permit = match timeout_at(deadline, pool.acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => {
            return MethodResult::failed(&spec.id, MethodFailureKind::Aborted, "worker pool closed", queued.elapsed(), 0);
        }
        Err(_) => {
            return MethodResult::timeout(&spec.id, "request deadline elapsed while queued", queued.elapsed(), 0);
        }
    };

    let started = Instant::now();
    let method_deadline = budget_end(started, spec.timeout(), deadline);
    let primary = invoke_with_retry(&spec, backend.as_ref(), &ctx, &settings, method_deadline).await;
    if primary.is_success() {
        debug!(attempts = primary.attempts, elapsed_ms = primary.duration.as_millis() as u64, "Method succeeded");
        return primary;
    }
    warn!(status = %primary.status, reason = %primary.failure_reason(), "Method failed");

    match fallback.resolve(&spec.id) {
        FallbackDecision::Substitute { spec: fb_spec, backend: fb_backend } => {
            let fb_deadline = budget_end(Instant::now(), fb_spec.timeout(), deadline);
            let fb_result = invoke_with_retry(&fb_spec, fb_backend.as_ref(), &ctx, &settings, fb_deadline).await;
            if fb_result.is_success() {
                info!(fallback = %fb_spec.id, "Substituted fallback result");
                MethodResult::substituted(&primary, &fb_result, started.elapsed())
            } else {
                warn!(fallback = %fb_spec.id, reason = %fb_result.failure_reason(), "Fallback failed");
                MethodResult { duration: started.elapsed(), ..primary }
            }
        }
        FallbackDecision::NoSubstitute(reason) => {
            debug!(%reason, "No fallback");
            primary
        }
    }
}

/// `min(start + timeout, deadline)`.
fn budget_end(start: Instant, timeout: Duration, deadline: Instant) -> Instant {
    start.checked_add(timeout).map_or(deadline, |end| end.min(deadline))
}

async fn invoke_with_retry(
    spec: &MethodSpec,
    backend: &dyn BackendAnalyzer,
    ctx: &RequestContext,
    settings: &ExecutionSettings,
    deadline: Instant,
) -> MethodResult {
    let started = Instant::now();
    let mut attempt = 0;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return MethodResult::timeout(&spec.id, "no time budget left", started.elapsed(), attempt);
        }
        attempt += 1;

        let request = InvocationRequest {
            record_id: ctx.record_id.clone(),
            method_id: spec.id.clone(),
            attempt,
            profile: ctx.profile.clone(),
            params: ctx.params.clone(),
        };

        let error = match timeout_at(deadline, backend.invoke(&request, remaining)).await {
            Err(_) => {
                return MethodResult::timeout(
                    &spec.id,
                    format!("no response within {}ms", remaining.as_millis()),
                    started.elapsed(),
                    attempt,
                );
            }
            Ok(Ok(output)) => match settings.check_output(&output) {
                Ok(()) => {
                    return MethodResult::success(
                        &spec.id,
                        output.score,
                        output.confidence,
                        output.evidence,
                        started.elapsed(),
                        attempt,
                    );
                }
                Err(msg) => BackendError::Permanent(format!("malformed output: {msg}")),
            },
            Ok(Err(e)) => e,
        };

        let kind = error.kind();
        if kind == MethodFailureKind::Transient && attempt < settings.max_attempts {
            let wake = Instant::now() + settings.retry_backoff;
            if wake < deadline {
                debug!(method_id = %spec.id, attempt, error = %error, "Transient failure, retrying");
                sleep_until(wake).await;
                continue;
            }
        }
        return MethodResult::failed(&spec.id, kind, error.to_string(), started.elapsed(), attempt);
    }
}
