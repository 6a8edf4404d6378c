use super::*;
use rand::Rng;

fn estimator() -> AdaptiveTimeout {
    AdaptiveTimeout::new(
        AdaptiveTimeoutConfig::new()
            .with_bounds(Duration::from_millis(200), Duration::from_secs(5))
            .with_history_size(10),
    )
    .unwrap()
}

#[test]
fn test_config_defaults() {
    let config = AdaptiveTimeoutConfig::default();
    assert_eq!(config.percentile, 95.0);
    assert_eq!(config.buffer, Duration::from_millis(100));
    assert_eq!(config.history_size, 100);
}

#[test]
fn test_invalid_config_rejected() {
    let bad = [
        AdaptiveTimeoutConfig::new().with_percentile(0.0),
        AdaptiveTimeoutConfig::new().with_percentile(101.0),
        AdaptiveTimeoutConfig::new().with_history_size(0),
        AdaptiveTimeoutConfig::new().with_bounds(Duration::from_secs(10), Duration::from_secs(1)),
        AdaptiveTimeoutConfig::new().with_bounds(Duration::ZERO, Duration::from_secs(1)),
    ];
    for config in bad {
        assert!(AdaptiveTimeout::new(config).is_err());
    }
}

#[test]
fn test_empty_window_returns_min() {
    let estimator = estimator();
    assert_eq!(estimator.get_timeout(), Duration::from_millis(200));
    assert_eq!(estimator.stats().count, 0);
}

#[test]
fn test_percentile_plus_buffer() {
    let estimator = estimator();
    for ms in [100.0, 200.0, 300.0, 400.0, 1000.0] {
        estimator.record_ms(ms);
    }

    // p95 of five samples is the largest one
    assert_eq!(estimator.get_timeout(), Duration::from_millis(1100));

    let stats = estimator.stats();
    assert_eq!(stats.count, 5);
    assert_eq!(stats.min_ms, 100.0);
    assert_eq!(stats.max_ms, 1000.0);
    assert_eq!(stats.mean_ms, 400.0);
    assert_eq!(stats.p50_ms, 300.0);
    assert_eq!(stats.current_timeout_ms, 1100.0);
}

#[test]
fn test_clamps_to_bounds() {
    let estimator = estimator();
    estimator.record_ms(1.0);
    assert_eq!(estimator.get_timeout(), Duration::from_millis(200));

    estimator.reset();
    estimator.record(Duration::from_secs(60));
    assert_eq!(estimator.get_timeout(), Duration::from_secs(5));
}

#[test]
fn test_window_drops_oldest() {
    let estimator = estimator();
    estimator.record_ms(4000.0);
    for _ in 0..10 {
        estimator.record_ms(100.0);
    }

    let stats = estimator.stats();
    assert_eq!(stats.count, 10);
    assert_eq!(stats.max_ms, 100.0);
}

#[test]
fn test_invalid_samples_ignored() {
    let estimator = estimator();
    estimator.record_ms(f64::NAN);
    estimator.record_ms(-5.0);
    estimator.record_ms(f64::INFINITY);
    assert_eq!(estimator.stats().count, 0);
}

#[test]
fn test_timeout_always_within_bounds() {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let estimator = estimator();
        let samples = rng.gen_range(0..30);
        for _ in 0..samples {
            let magnitude = 10f64.powi(rng.gen_range(-3..12));
            estimator.record_ms(rng.gen::<f64>() * magnitude);
        }

        let timeout = estimator.get_timeout();
        assert!(timeout >= Duration::from_millis(200));
        assert!(timeout <= Duration::from_secs(5));
    }
}

#[tokio::test(start_paused = true)]
async fn test_execute_records_latency() {
    let estimator = estimator();

    let value = estimator
        .execute(async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            42
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    let stats = estimator.stats();
    assert_eq!(stats.count, 1);
    assert!(stats.max_ms >= 150.0);
}

#[tokio::test(start_paused = true)]
async fn test_execute_times_out() {
    let estimator = estimator();

    let result = estimator
        .execute(tokio::time::sleep(Duration::from_secs(10)))
        .await;

    assert!(matches!(result, Err(Error::Timeout(d)) if d == Duration::from_millis(200)));
    assert_eq!(estimator.stats().max_ms, 200.0);
}
