//! Classification and plan-cache behavior through the public API

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use threader::{
    AccelerationGateway, Computation, EngineConfig, NativeGateway, Signature,
    SignatureClassifier, Strategy, Task, Threader, ThreaderError,
};

#[test]
fn test_normalization_collapses_formatting() {
    let variants = [
        "x => x * 2",
        "(x) => x * 2",
        "x=>{ return x * 2; }",
        "  (x)  =>  {return x*2}  ",
        "(x => x * 2);",
        "x => (x * 2)",
    ];
    for source in variants {
        assert_eq!(
            Signature::normalize(source).as_str(),
            "x=>x*2",
            "source: {source}"
        );
    }
}

#[test]
fn test_identical_plan_for_repeat_classification() {
    let classifier = SignatureClassifier::new(None);
    let computation = Computation::new("row => row.total", |v| Ok(v["total"].clone()));

    let first = classifier.classify(&computation);
    let second = classifier.classify(&computation);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.strategy(), Strategy::Isolated);
}

#[test]
fn test_strategy_selection_with_gateway() {
    let gateway: Arc<dyn AccelerationGateway> = Arc::new(NativeGateway::new());
    let classifier = SignatureClassifier::new(Some(gateway));

    let cases = [
        ("x => x + 1", Strategy::Recognized),
        ("s => s.toLowerCase()", Strategy::Recognized),
        ("xs => Math.min(...xs)", Strategy::Accelerated),
        ("xs => xs.sort((a, b) => a - b)", Strategy::Accelerated),
        ("xs => xs.filter(x => x > 1)", Strategy::Isolated),
    ];
    for (source, expected) in cases {
        let plan = classifier.classify(&Computation::from_source(source));
        assert_eq!(plan.strategy(), expected, "source: {source}");
    }
    assert_eq!(classifier.cache().len(), 5);
}

#[tokio::test]
async fn test_engine_without_acceleration_ignores_other_engines_gateway() {
    let accelerated = Threader::builder()
        .config(EngineConfig::development())
        .native_gateway()
        .build()
        .unwrap();
    let mut config = EngineConfig::development();
    config.enable_acceleration = false;
    let plain = Threader::builder()
        .config(config)
        .native_gateway()
        .build()
        .unwrap();

    let doubled = Computation::from_source("xs => xs.map(x => x * 2)");
    let value = accelerated
        .submit(Task::new(doubled.clone(), json!([1, 2])))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(value, json!([2, 4]));

    let result = plain.submit(Task::new(doubled, json!([1, 2]))).unwrap().await;
    assert!(matches!(result, Err(ThreaderError::Unlinked { .. })), "{result:?}");
    assert_eq!(plain.metrics().accelerated_executions, 0);
    assert!(!plain.stats().acceleration_available);

    accelerated.shutdown().await.unwrap();
    plain.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_leaves_other_engines_cache_alone() {
    let a = Threader::new(EngineConfig::development()).unwrap();
    let b = Threader::new(EngineConfig::development()).unwrap();

    let triple = Computation::from_source("n => n * 3");
    a.submit(Task::new(triple.clone(), json!(1))).unwrap().await.unwrap();
    b.submit(Task::new(triple, json!(2))).unwrap().await.unwrap();
    assert_eq!(b.classifier().cache().len(), 1);

    a.shutdown().await.unwrap();
    assert!(a.classifier().cache().is_empty());
    assert_eq!(b.classifier().cache().len(), 1);

    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_independent_engines_have_separate_caches() {
    let a = Threader::new(EngineConfig::development()).unwrap();
    let b = Threader::new(EngineConfig::development()).unwrap();

    a.submit(Task::new(Computation::from_source("x => x * 3"), json!(1)))
        .unwrap()
        .await
        .unwrap();

    assert_eq!(a.classifier().cache().len(), 1);
    assert!(b.classifier().cache().is_empty());

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_same_signature_reuses_first_kernel() {
    let threader = Threader::new(EngineConfig::development()).unwrap();

    let first = Computation::new("x => transform(x)", |_| Ok(json!("first")));
    let second = Computation::new("x => transform( x )", |_| Ok(json!("second")));

    let a = threader.submit(Task::new(first, json!(null))).unwrap();
    assert_eq!(a.await.unwrap(), json!("first"));
    let b = threader.submit(Task::new(second, json!(null))).unwrap();
    assert_eq!(b.await.unwrap(), json!("first"));

    threader.shutdown().await.unwrap();
}
