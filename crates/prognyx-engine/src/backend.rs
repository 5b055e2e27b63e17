//! Backend analyzers.
//!
//! One `BackendAnalyzer` per method id, resolved through `BackendSet` when a
//! plan is built. The engine never looks a backend up by name at call time.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use prognyx_common::{DataProfile, EngineConfig, Evidence, MethodFailureKind};

/// Payload sent to a backend for one attempt.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationRequest {
    pub record_id: String,
    pub method_id: String,
    pub attempt: u32,
    pub profile: DataProfile,
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Raw prediction returned by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendOutput {
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Evidence,
}

impl BackendOutput {
    pub fn new(score: f64, confidence: f64) -> Self {
        Self { score, confidence, evidence: Evidence::new() }
    }

    pub fn with_evidence(mut self, key: &str, value: serde_json::Value) -> Self {
        self.evidence.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Worth retrying (5xx, throttling, connection refused).
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// Retrying will not help (bad request, malformed response).
    #[error("permanent backend failure: {0}")]
    Permanent(String),

    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    pub fn kind(&self) -> MethodFailureKind {
        match self {
            BackendError::Transient(_) => MethodFailureKind::Transient,
            BackendError::Permanent(_) => MethodFailureKind::Permanent,
            BackendError::Timeout(_) => MethodFailureKind::Timeout,
        }
    }
}

/// Capability interface every analysis backend implements.
#[async_trait]
pub trait BackendAnalyzer: Send + Sync {
    /// Run the method once. `timeout` is the remaining per-method budget;
    /// the coordinator enforces it regardless.
    async fn invoke(
        &self,
        request: &InvocationRequest,
        timeout: Duration,
    ) -> Result<BackendOutput, BackendError>;
}

// ── BackendSet ──────────────────────────────────────────────────────────────

/// Method id → backend.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: HashMap<String, Arc<dyn BackendAnalyzer>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, method_id: &str, backend: Arc<dyn BackendAnalyzer>) -> Self {
        self.insert(method_id, backend);
        self
    }

    pub fn insert(&mut self, method_id: &str, backend: Arc<dyn BackendAnalyzer>) {
        self.backends.insert(method_id.to_string(), backend);
    }

    pub fn get(&self, method_id: &str) -> Option<Arc<dyn BackendAnalyzer>> {
        self.backends.get(method_id).cloned()
    }

    pub fn contains(&self, method_id: &str) -> bool {
        self.backends.contains_key(method_id)
    }

    pub fn method_ids(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// HTTP backends for every `[backends.<id>]` entry.
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("prognyx/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let mut set = Self::new();
        for (method_id, endpoint) in &config.backends {
            let backend = HttpBackendAnalyzer::new(client.clone(), &endpoint.base_url)
                .with_api_key(endpoint.api_key.clone());
            set.insert(method_id, Arc::new(backend));
        }
        Ok(set)
    }
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.method_ids().collect();
        ids.sort_unstable();
        f.debug_struct("BackendSet").field("methods", &ids).finish()
    }
}

// ── HTTP backend ────────────────────────────────────────────────────────────

/// Remote method service reached over HTTP: `POST <base_url>/invoke` with the
/// `InvocationRequest` as JSON, answering a `BackendOutput`.
pub struct HttpBackendAnalyzer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpBackendAnalyzer {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/invoke", self.base_url)
    }
}

/// Map a non-success HTTP status onto a retry class.
pub fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let msg = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        BackendError::Transient(msg)
    } else {
        BackendError::Permanent(msg)
    }
}

fn classify_transport(err: reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout)
    } else if err.is_decode() || err.is_builder() {
        BackendError::Permanent(err.to_string())
    } else {
        BackendError::Transient(err.to_string())
    }
}

#[async_trait]
impl BackendAnalyzer for HttpBackendAnalyzer {
    async fn invoke(
        &self,
        request: &InvocationRequest,
        timeout: Duration,
    ) -> Result<BackendOutput, BackendError> {
        let url = self.endpoint();
        debug!(method_id = %request.method_id, attempt = request.attempt, %url, "Invoking HTTP backend");

        let mut req = self.client.post(&url).timeout(timeout).json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| classify_transport(e, timeout))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        resp.json::<BackendOutput>()
            .await
            .map_err(|e| BackendError::Permanent(format!("malformed backend response: {e}")))
    }
}

// ── Scripted backend (mocking) ──────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    Fail(BackendError),
    #[cfg(test)]
    Panic,
}

/// In-process backend with scripted behaviour, for tests and dry runs.
///
/// Each call first consumes the next scripted step (if any); once the script
/// is exhausted it returns the fixed output, or the permanent failure set by
/// `always_fail`. Every call sleeps `delay` first.
pub struct ScriptedBackend {
    output: BackendOutput,
    delay: Duration,
    script: Mutex<VecDeque<Step>>,
    always: Option<BackendError>,
    calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new(score: f64, confidence: f64) -> Self {
        Self::from_output(BackendOutput::new(score, confidence))
    }

    pub fn from_output(output: BackendOutput) -> Self {
        Self {
            output,
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            always: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_evidence(mut self, key: &str, value: serde_json::Value) -> Self {
        self.output.evidence.insert(key.to_string(), value);
        self
    }

    /// Fail the next call with `error` (steps queue in order).
    pub fn then_fail(self, error: BackendError) -> Self {
        self.push(Step::Fail(error));
        self
    }

    /// Panic on the next call.
    #[cfg(test)]
    pub(crate) fn then_panic(self) -> Self {
        self.push(Step::Panic);
        self
    }

    /// Fail every call once the script is exhausted.
    pub fn always_fail(mut self, error: BackendError) -> Self {
        self.always = Some(error);
        self
    }

    pub fn invocations(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, step: Step) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(step);
    }

    fn next_step(&self) -> Option<Step> {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }
}

#[async_trait]
impl BackendAnalyzer for ScriptedBackend {
    async fn invoke(
        &self,
        _request: &InvocationRequest,
        _timeout: Duration,
    ) -> Result<BackendOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.next_step() {
            Some(Step::Fail(e)) => return Err(e),
            #[cfg(test)]
            Some(Step::Panic) => panic!("scripted backend panic"),
            None => {}
        }
        match &self.always {
            Some(e) => Err(e.clone()),
            None => Ok(self.output.clone()),
        }
    }
}
