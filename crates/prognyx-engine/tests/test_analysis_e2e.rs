//! End-to-end analysis through `AnalysisEngine` with scripted backends.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use prognyx_common::prediction::{SUBSTITUTED_BY, UNCALIBRATED};
use prognyx_common::{
    AnalysisError, DataType, Eligibility, EngineConfig, EnsembleStrategy, Ineligibility,
    MethodSpec, MethodStatus, RawAvailability, StrategyHint,
};
use prognyx_engine::{
    AccuracySnapshot, AnalysisEngine, AnalyzeOptions, BackendError, InMemoryProfileStore,
    MethodRegistry, ScriptedBackend,
};

fn scenario_registry() -> MethodRegistry {
    MethodRegistry::new(vec![
        MethodSpec::new("prs")
            .requires(DataType::Genomic, 0.0)
            .with_reliability(0.8)
            .with_priority(10),
        MethodSpec::new("grn_network")
            .requires(DataType::Expression, 0.8)
            .with_reliability(0.75)
            .with_priority(15),
        MethodSpec::new("expression_signature")
            .requires(DataType::Expression, 0.0)
            .with_reliability(0.7)
            .with_priority(20),
        MethodSpec::new("clinical_risk")
            .requires(DataType::Clinical, 0.5)
            .with_priority(30),
    ])
    .unwrap()
}

fn scenario_store() -> Arc<InMemoryProfileStore> {
    Arc::new(InMemoryProfileStore::new().with(
        "patient-1",
        RawAvailability::new()
            .present(DataType::Genomic, 0.9)
            .present(DataType::Expression, 0.5)
            .absent(DataType::Clinical),
    ))
}

#[tokio::test]
async fn test_two_method_scenario() {
    let grn = Arc::new(ScriptedBackend::new(10.0, 0.99));
    let engine = AnalysisEngine::builder()
        .registry(scenario_registry())
        .profile_store(scenario_store())
        .backend("prs", Arc::new(ScriptedBackend::new(70.0, 0.8)))
        .backend("expression_signature", Arc::new(ScriptedBackend::new(80.0, 0.6)))
        .backend("grn_network", grn.clone())
        .build()
        .unwrap();

    let preview = engine.plan("patient-1", StrategyHint::Auto).await.unwrap();
    assert_eq!(
        preview.report.eligible_ids(),
        vec!["prs", "expression_signature"]
    );
    assert_eq!(
        preview.report.get("grn_network"),
        Some(&Eligibility::Ineligible(vec![Ineligibility::LowQuality {
            data_type: DataType::Expression,
            actual: 0.5,
            required: 0.8,
        }]))
    );

    let prediction = engine.analyze("patient-1", AnalyzeOptions::default()).await.unwrap();

    assert_eq!(prediction.strategy, EnsembleStrategy::WeightedVoting);
    assert!(prediction.score > 70.0 && prediction.score < 80.0, "score {}", prediction.score);
    assert!(prediction.score - 70.0 < 80.0 - prediction.score, "score {}", prediction.score);
    assert!((prediction.weight_sum() - 1.0).abs() < 1e-6);
    assert_eq!(prediction.contributors().collect::<Vec<_>>(), vec!["expression_signature", "prs"]);
    assert!((prediction.agreement - 0.99).abs() < 1e-9);
    assert!(!prediction.partial);
    assert!(prediction.skipped.is_empty());
    assert_eq!(grn.invocations(), 0);

    // no historical accuracy configured
    assert_eq!(
        prediction.evidence["prs"].get(UNCALIBRATED),
        Some(&serde_json::Value::Bool(true))
    );
}

#[tokio::test]
async fn test_single_method_pass_through() {
    let config = EngineConfig::from_toml_str("[calibration.quality]\nkind = \"identity\"\n").unwrap();
    let store = InMemoryProfileStore::new()
        .with("patient-2", RawAvailability::new().present(DataType::Genomic, 0.6));
    let engine = AnalysisEngine::builder()
        .config(config)
        .registry(scenario_registry())
        .profile_store(Arc::new(store))
        .backend("prs", Arc::new(ScriptedBackend::new(55.0, 0.9)))
        .build()
        .unwrap();

    let prediction = engine
        .analyze("patient-2", AnalyzeOptions::default().with_hint(StrategyHint::UncertaintyFirst))
        .await
        .unwrap();

    assert_eq!(prediction.strategy, EnsembleStrategy::PassThrough);
    assert_eq!(prediction.score, 55.0);
    assert_eq!(prediction.confidence, 0.9);
    assert_eq!(prediction.agreement, 1.0);
    assert_eq!(prediction.weights.get("prs"), Some(&1.0));
}

#[tokio::test]
async fn test_historical_accuracy_lowers_confidence() {
    let config = EngineConfig::from_toml_str(
        "[calibration.quality]\nkind = \"identity\"\n[accuracy]\nprs = 0.5\n",
    )
    .unwrap();
    let store = InMemoryProfileStore::new()
        .with("patient-2", RawAvailability::new().present(DataType::Genomic, 0.6));
    let engine = AnalysisEngine::builder()
        .config(config)
        .registry(scenario_registry())
        .profile_store(Arc::new(store))
        .backend("prs", Arc::new(ScriptedBackend::new(55.0, 0.9)))
        .build()
        .unwrap();

    let before = engine.analyze("patient-2", AnalyzeOptions::default()).await.unwrap();
    // default accuracy dampening: linear with floor 0.5 → g(0.5) = 0.75
    assert!((before.confidence - 0.675).abs() < 1e-9);
    assert!(before.evidence["prs"].get(UNCALIBRATED).is_none());

    engine.refresh_accuracy(AccuracySnapshot::empty().with("prs", 1.0));
    let after = engine.analyze("patient-2", AnalyzeOptions::default()).await.unwrap();
    assert!((after.confidence - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_infeasible_when_nothing_eligible() {
    let store = InMemoryProfileStore::new()
        .with("empty", RawAvailability::new().absent(DataType::Genomic));
    let engine = AnalysisEngine::builder()
        .registry(scenario_registry())
        .profile_store(Arc::new(store))
        .build()
        .unwrap();

    match engine.analyze("empty", AnalyzeOptions::default()).await {
        Err(AnalysisError::AnalysisInfeasible { record_id, report }) => {
            assert_eq!(record_id, "empty");
            assert_eq!(report.entries.len(), 4);
            assert!(report.eligible_ids().is_empty());
        }
        other => panic!("expected AnalysisInfeasible, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_profile_rejected() {
    let store = InMemoryProfileStore::new()
        .with("bad", RawAvailability::new().present(DataType::Genomic, 1.4));
    let engine = AnalysisEngine::builder()
        .registry(scenario_registry())
        .profile_store(Arc::new(store))
        .build()
        .unwrap();

    let err = engine.analyze("bad", AnalyzeOptions::default()).await.unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidProfile(_)));
}

#[tokio::test]
async fn test_uncertainty_first_uses_bayesian_averaging() {
    let engine = AnalysisEngine::builder()
        .registry(scenario_registry())
        .profile_store(scenario_store())
        .backend("prs", Arc::new(ScriptedBackend::new(70.0, 0.8)))
        .backend("expression_signature", Arc::new(ScriptedBackend::new(80.0, 0.6)))
        .build()
        .unwrap();

    let prediction = engine
        .analyze("patient-1", AnalyzeOptions::default().with_hint(StrategyHint::UncertaintyFirst))
        .await
        .unwrap();

    assert_eq!(prediction.strategy, EnsembleStrategy::BayesianAveraging);
    assert!((prediction.weight_sum() - 1.0).abs() < 1e-6);
    assert!(prediction.weights["prs"] > prediction.weights["expression_signature"]);
    assert!(prediction.confidence > 0.0 && prediction.confidence <= 1.0);
}

#[tokio::test]
async fn test_stacking_with_configured_combiner() {
    let config = EngineConfig::from_toml_str(
        r#"
[[methods]]
id = "prs"
reliability = 0.8
priority = 10
[methods.requirements]
genomic = 0.0

[[methods]]
id = "expression_signature"
reliability = 0.7
priority = 20
[methods.requirements]
expression = 0.0

[[combiners]]
methods = ["prs", "expression_signature"]
intercept = 0.0
[combiners.coefficients]
prs = 0.25
expression_signature = 0.75
"#,
    )
    .unwrap();
    let engine = AnalysisEngine::builder()
        .config(config)
        .profile_store(scenario_store())
        .backend("prs", Arc::new(ScriptedBackend::new(70.0, 0.8)))
        .backend("expression_signature", Arc::new(ScriptedBackend::new(80.0, 0.6)))
        .build()
        .unwrap();

    let prediction = engine.analyze("patient-1", AnalyzeOptions::default()).await.unwrap();
    assert_eq!(prediction.strategy, EnsembleStrategy::Stacking);
    assert!((prediction.score - 77.5).abs() < 1e-9);
    assert!((prediction.weights["expression_signature"] - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn test_fallback_substitution_end_to_end() {
    let registry = MethodRegistry::new(vec![
        MethodSpec::new("prs")
            .requires(DataType::Genomic, 0.0)
            .with_reliability(0.8)
            .with_fallback("prs_reduced_panel"),
        MethodSpec::new("prs_reduced_panel")
            .requires(DataType::Genomic, 0.0)
            .with_reliability(0.6)
            .reserve(),
        MethodSpec::new("expression_signature").requires(DataType::Expression, 0.0),
    ])
    .unwrap();
    let engine = AnalysisEngine::builder()
        .registry(registry)
        .profile_store(scenario_store())
        .backend(
            "prs",
            Arc::new(ScriptedBackend::new(0.0, 0.0).always_fail(BackendError::Permanent("genotype file unreadable".into()))),
        )
        .backend("prs_reduced_panel", Arc::new(ScriptedBackend::new(66.0, 0.7)))
        .backend("expression_signature", Arc::new(ScriptedBackend::new(72.0, 0.6)))
        .build()
        .unwrap();

    let prediction = engine.analyze("patient-1", AnalyzeOptions::default()).await.unwrap();

    assert_eq!(prediction.contributors().collect::<Vec<_>>(), vec!["expression_signature", "prs"]);
    assert_eq!(
        prediction.evidence["prs"].get(SUBSTITUTED_BY),
        Some(&serde_json::json!("prs_reduced_panel"))
    );
    assert!(!prediction.partial);
    assert!(prediction.skipped.is_empty());
}

#[tokio::test]
async fn test_shared_fallback_fills_only_one_slot() {
    let registry = MethodRegistry::new(vec![
        MethodSpec::new("a").requires(DataType::Genomic, 0.0).with_priority(1).with_fallback("c"),
        MethodSpec::new("b").requires(DataType::Genomic, 0.0).with_priority(2).with_fallback("c"),
        MethodSpec::new("c").requires(DataType::Genomic, 0.0).reserve(),
        MethodSpec::new("d").requires(DataType::Genomic, 0.0).with_priority(3),
    ])
    .unwrap();
    let reserve = Arc::new(ScriptedBackend::new(20.0, 0.8));
    let engine = AnalysisEngine::builder()
        .registry(registry)
        .profile_store(scenario_store())
        .backend(
            "a",
            Arc::new(ScriptedBackend::new(0.0, 0.0).always_fail(BackendError::Permanent("a down".into()))),
        )
        .backend(
            "b",
            Arc::new(ScriptedBackend::new(0.0, 0.0).always_fail(BackendError::Permanent("b down".into()))),
        )
        .backend("c", reserve.clone())
        .backend("d", Arc::new(ScriptedBackend::new(80.0, 0.8)))
        .build()
        .unwrap();

    let prediction = engine.analyze("patient-1", AnalyzeOptions::default()).await.unwrap();

    assert_eq!(reserve.invocations(), 1);
    assert_eq!(prediction.contributors().collect::<Vec<_>>(), vec!["a", "d"]);
    assert!(prediction.partial);
    assert_eq!(prediction.skipped.len(), 1);
    assert_eq!(prediction.skipped[0].method_id, "b");
    assert!((prediction.weights["a"] - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_failing_combiner_still_yields_prediction() {
    use prognyx_engine::{LinearMetaCombiner, StaticCombinerRegistry};

    let partial_coefficients = LinearMetaCombiner::new(
        std::collections::BTreeMap::from([("prs".to_string(), 1.0)]),
        0.0,
    );
    let combiners = StaticCombinerRegistry::new()
        .with(["prs", "expression_signature"], Arc::new(partial_coefficients));
    let engine = AnalysisEngine::builder()
        .registry(scenario_registry())
        .profile_store(scenario_store())
        .combiners(Arc::new(combiners))
        .backend("prs", Arc::new(ScriptedBackend::new(70.0, 0.8)))
        .backend("expression_signature", Arc::new(ScriptedBackend::new(80.0, 0.6)))
        .build()
        .unwrap();

    let preview = engine.plan("patient-1", StrategyHint::Auto).await.unwrap();
    assert_eq!(preview.plan.strategy, EnsembleStrategy::Stacking);

    let prediction = engine.analyze("patient-1", AnalyzeOptions::default()).await.unwrap();
    assert_eq!(prediction.strategy, EnsembleStrategy::WeightedVoting);
    assert!(prediction.score > 70.0 && prediction.score < 80.0);
    assert!((prediction.weight_sum() - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_all_failures_yield_no_prediction() {
    let engine = AnalysisEngine::builder()
        .registry(scenario_registry())
        .profile_store(scenario_store())
        .backend(
            "prs",
            Arc::new(ScriptedBackend::new(0.0, 0.0).always_fail(BackendError::Permanent("x".into()))),
        )
        .build()
        .unwrap();

    match engine.analyze("patient-1", AnalyzeOptions::default()).await {
        Err(AnalysisError::AllMethodsFailed { failures, .. }) => {
            assert_eq!(failures.len(), 2);
            let statuses: Vec<MethodStatus> = failures.iter().map(|f| f.status).collect();
            assert_eq!(statuses, vec![MethodStatus::Failed, MethodStatus::Skipped]);
        }
        other => panic!("expected AllMethodsFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_requests_share_engine() {
    let engine = Arc::new(
        AnalysisEngine::builder()
            .registry(scenario_registry())
            .profile_store(scenario_store())
            .backend("prs", Arc::new(ScriptedBackend::new(70.0, 0.8)))
            .backend("expression_signature", Arc::new(ScriptedBackend::new(80.0, 0.6)))
            .build()
            .unwrap(),
    );

    let mut set = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let engine = engine.clone();
        set.spawn(async move { engine.analyze("patient-1", AnalyzeOptions::default()).await });
    }

    let mut scores = Vec::new();
    while let Some(joined) = set.join_next().await {
        let prediction = joined.unwrap().unwrap();
        scores.push(prediction.score);
    }
    assert_eq!(scores.len(), 16);
    assert!(scores.windows(2).all(|w| (w[0] - w[1]).abs() < 1e-12));
    let (mean, n) = engine.history().mean("expression_signature+prs").unwrap();
    assert_eq!(n, 16);
    assert!((mean - 0.99).abs() < 1e-9);
}
