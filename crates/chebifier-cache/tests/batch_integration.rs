//! Integration tests for [`CachedPredictor`] in front of a shared
//! [`PredictionCache`].
//!
//! All predictors are [`MockPredictor`]s, which answer `"{model}_P{i}"` for
//! position `i` of each call, so the values show which call produced them.

use std::sync::Arc;
use std::time::Duration;

use chebifier_cache::mock::MockPredictor;
use chebifier_cache::{
    CacheError, CacheStats, CachedPredictor, PredictError, PredictionCache, Predictor,
};

fn shared_cache(max_size: usize) -> Arc<PredictionCache<String>> {
    Arc::new(PredictionCache::new(max_size).unwrap())
}

fn cached(
    mock: &Arc<MockPredictor>,
    cache: &Arc<PredictionCache<String>>,
) -> CachedPredictor<String> {
    CachedPredictor::<String>::new(mock.clone(), Arc::clone(cache)).unwrap()
}

fn values(results: Vec<Option<String>>) -> Vec<String> {
    results
        .into_iter()
        .map(|r| r.expect("every position should have a prediction"))
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn shared_cache_across_models() {
    let cache = shared_cache(20);
    let mock_a = Arc::new(MockPredictor::new("modelA"));
    let mock_b = Arc::new(MockPredictor::new("modelB"));
    let model_a = cached(&mock_a, &cache);
    let model_b = cached(&mock_b, &cache);

    let batch = ["AAA", "BBB", "CCC", "DDD", "EEE"];
    let first_a = values(model_a.predict_cached(&batch).await.unwrap());
    let first_b = values(model_b.predict_cached(&batch).await.unwrap());
    assert_eq!(
        first_a,
        strings(&["modelA_P0", "modelA_P1", "modelA_P2", "modelA_P3", "modelA_P4"])
    );
    assert_eq!(
        first_b,
        strings(&["modelB_P0", "modelB_P1", "modelB_P2", "modelB_P3", "modelB_P4"])
    );
    assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 10 });
    assert_eq!(cache.len(), 10);

    // DDD is cached; FFF is the only SMILES sent to the model, so it gets P0.
    let second = values(model_a.predict_cached(&["FFF", "DDD"]).await.unwrap());
    assert_eq!(second, strings(&["modelA_P0", "modelA_P3"]));
    assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 11 });

    let third = values(
        model_a
            .predict_cached(&["EEE", "GGG", "DDD", "HHH", "BBB", "ZZZ"])
            .await
            .unwrap(),
    );
    assert_eq!(
        third,
        strings(&[
            "modelA_P4", // EEE, cached
            "modelA_P0", // GGG
            "modelA_P3", // DDD, cached
            "modelA_P1", // HHH
            "modelA_P1", // BBB, cached
            "modelA_P2", // ZZZ
        ])
    );
    assert_eq!(cache.stats(), CacheStats { hits: 4, misses: 14 });

    assert_eq!(
        mock_a.calls(),
        vec![
            strings(&["AAA", "BBB", "CCC", "DDD", "EEE"]),
            strings(&["FFF"]),
            strings(&["GGG", "HHH", "ZZZ"]),
        ]
    );
    assert_eq!(mock_b.call_count(), 1);
}

#[tokio::test]
async fn model_sees_only_the_misses() {
    let cache = shared_cache(10);
    cache.insert("x1", "m", "cached-x1".to_string());
    cache.insert("x3", "m", "cached-x3".to_string());
    let mock = Arc::new(MockPredictor::new("m"));
    let predictor = cached(&mock, &cache);

    let out = values(predictor.predict_cached(&["x1", "x2", "x3"]).await.unwrap());
    assert_eq!(out, strings(&["cached-x1", "m_P0", "cached-x3"]));
    assert_eq!(mock.calls(), vec![strings(&["x2"])]);
}

#[tokio::test]
async fn fully_cached_batch_never_calls_the_model() {
    let cache = shared_cache(10);
    let mock = Arc::new(MockPredictor::new("m"));
    let predictor = cached(&mock, &cache);

    predictor.predict_cached(&["a", "b"]).await.unwrap();
    predictor.predict_cached(&["b", "a", "b"]).await.unwrap();
    assert_eq!(mock.call_count(), 1);
    assert_eq!(cache.stats(), CacheStats { hits: 3, misses: 2 });
}

#[tokio::test]
async fn duplicate_misses_are_sent_twice() {
    let cache = shared_cache(10);
    let mock = Arc::new(MockPredictor::new("m"));
    let predictor = cached(&mock, &cache);

    let out = values(predictor.predict_cached(&["x", "x"]).await.unwrap());
    assert_eq!(mock.calls(), vec![strings(&["x", "x"])]);
    assert_eq!(out, strings(&["m_P0", "m_P1"]));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn absent_predictions_are_retried() {
    let cache = shared_cache(10);
    let mock = Arc::new(MockPredictor::new("m").with_absent(["[invalid]"]));
    let predictor = cached(&mock, &cache);

    let out = predictor
        .predict_cached(&["CCO", "[invalid]"])
        .await
        .unwrap();
    assert_eq!(out, vec![Some("m_P0".to_string()), None]);
    assert!(cache.contains("CCO", "m"));
    assert!(!cache.contains("[invalid]", "m"));

    let again = predictor
        .predict_cached(&["CCO", "[invalid]"])
        .await
        .unwrap();
    assert_eq!(again, vec![Some("m_P0".to_string()), None]);
    assert_eq!(
        mock.calls(),
        vec![strings(&["CCO", "[invalid]"]), strings(&["[invalid]"])]
    );
}

#[tokio::test]
async fn model_failure_propagates_unchanged() {
    let cache = shared_cache(10);
    cache.insert("a", "m", "kept".to_string());
    let mock = Arc::new(MockPredictor::new("m").failing("service unavailable"));
    let predictor = cached(&mock, &cache);

    let err = predictor.predict_cached(&["a", "b"]).await.unwrap_err();
    match err {
        PredictError::Failed { model, message } => {
            assert_eq!(model, "m");
            assert_eq!(message, "service unavailable");
        }
        other => panic!("unexpected error: {other}"),
    }
    // Earlier entries survive; nothing new was cached.
    assert_eq!(cache.len(), 1);
    assert!(!cache.contains("b", "m"));
}

#[tokio::test]
async fn short_result_is_a_length_mismatch() {
    let cache = shared_cache(10);
    let mock = Arc::new(MockPredictor::new("m").dropping_last());
    let predictor = cached(&mock, &cache);

    let err = predictor.predict_cached(&["a", "b", "c"]).await.unwrap_err();
    assert!(matches!(
        err,
        PredictError::LengthMismatch {
            expected: 3,
            actual: 2,
            ..
        }
    ));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn cached_predictor_is_a_predictor() {
    let cache = shared_cache(10);
    let mock = Arc::new(MockPredictor::new("electra"));
    let predictor: Arc<dyn Predictor<String>> = Arc::new(cached(&mock, &cache));
    assert_eq!(predictor.model_name(), "electra");

    let input = strings(&["CCO", "O"]);
    predictor.predict(&input).await.unwrap();
    let out = predictor.predict(&input).await.unwrap();
    assert_eq!(out, vec![Some("electra_P0".to_string()), Some("electra_P1".to_string())]);
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn blank_model_name_is_rejected() {
    let cache = shared_cache(10);
    for name in ["", "   "] {
        let mock = Arc::new(MockPredictor::new(name));
        let err = CachedPredictor::<String>::new(mock, Arc::clone(&cache)).unwrap_err();
        assert_eq!(err, CacheError::MissingModelName);
    }
}

#[tokio::test]
async fn eviction_forces_recomputation() {
    let cache = shared_cache(2);
    let mock = Arc::new(MockPredictor::new("m"));
    let predictor = cached(&mock, &cache);

    predictor.predict_cached(&["a", "b", "c"]).await.unwrap();
    assert_eq!(cache.len(), 2);
    assert!(!cache.contains("a", "m"));

    predictor.predict_cached(&["a"]).await.unwrap();
    assert_eq!(mock.calls().last().unwrap(), &strings(&["a"]));
}

#[tokio::test(start_paused = true)]
async fn slow_model_runs_outside_the_cache_lock() {
    let cache = shared_cache(10);
    cache.insert("warm", "slow", "ready".to_string());
    let mock = Arc::new(MockPredictor::new("slow").with_delay(Duration::from_secs(30)));
    let predictor = Arc::new(cached(&mock, &cache));

    let background = {
        let predictor = Arc::clone(&predictor);
        tokio::spawn(async move { predictor.predict_cached(&["cold"]).await })
    };
    tokio::task::yield_now().await;

    // The pending model call must not block lookups on the same cache.
    assert_eq!(cache.get("warm", "slow").as_deref(), Some("ready"));

    let out = background.await.unwrap().unwrap();
    assert_eq!(out, vec![Some("slow_P0".to_string())]);
    assert!(cache.contains("cold", "slow"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_cache() {
    let cache = shared_cache(64);
    let mock_a = Arc::new(MockPredictor::new("modelA").with_delay(Duration::from_millis(5)));
    let mock_b = Arc::new(MockPredictor::new("modelB").with_delay(Duration::from_millis(5)));
    let predictors = [
        Arc::new(cached(&mock_a, &cache)),
        Arc::new(cached(&mock_b, &cache)),
    ];

    let mut handles = Vec::new();
    for task in 0..8 {
        let predictor = Arc::clone(&predictors[task % 2]);
        handles.push(tokio::spawn(async move {
            let batch: Vec<String> = (0..10).map(|i| format!("C{}", (task + i) % 12)).collect();
            let out = predictor.predict_cached(&batch).await.unwrap();
            assert_eq!(out.len(), batch.len());
            assert!(out.iter().all(Option::is_some));
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    // 12 distinct SMILES per model. Racing callers may compute a key twice,
    // but each key is stored once.
    assert_eq!(cache.len(), 24);
    assert_eq!(cache.stats().lookups(), 80);
}

#[tokio::test]
async fn predictions_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("predictions.db");

    {
        let cache = Arc::new(PredictionCache::<String>::open(10, &path).unwrap());
        let mock = Arc::new(MockPredictor::new("m"));
        cached(&mock, &cache)
            .predict_cached(&["CCO", "O"])
            .await
            .unwrap();
        assert_eq!(cache.save().unwrap(), 2);
    }

    let cache = Arc::new(PredictionCache::<String>::open(10, &path).unwrap());
    let mock = Arc::new(MockPredictor::new("m"));
    let out = values(cached(&mock, &cache).predict_cached(&["O", "CCO"]).await.unwrap());
    assert_eq!(out, strings(&["m_P1", "m_P0"]));
    assert_eq!(mock.call_count(), 0);

    cache.clear();
    assert!(!path.exists());
}
