//! prognyx-engine: Analysis routing and ensemble prediction.
//!
//! Decides which analysis methods can run for a record, runs them
//! concurrently with fault isolation and single-hop fallback, and combines
//! their calibrated outputs into one prediction.

pub mod registry;
pub mod availability;
pub mod feasibility;
pub mod plan;
pub mod backend;
pub mod stores;
pub mod combiner;
pub mod history;
pub mod fallback;
pub mod coordinator;
pub mod calibrator;
pub mod aggregator;
pub mod engine;

pub use backend::{BackendAnalyzer, BackendError, BackendOutput, BackendSet, HttpBackendAnalyzer, InvocationRequest, ScriptedBackend};
pub use engine::{AnalysisEngine, AnalysisEngineBuilder, AnalyzeOptions, PlanPreview};
pub use plan::{select_strategy, AnalysisPlan, StrategyInputs};
pub use registry::MethodRegistry;
pub use stores::{AccuracySnapshot, InMemoryProfileStore, JsonDirProfileStore, PerformanceStore, ProfileStore};
pub use combiner::{CombinerRegistry, LinearMetaCombiner, MetaCombiner, StaticCombinerRegistry};
