use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration;

use anyhow::{Result, anyhow};
use estimate_service::{
    clients::circuit_breaker::{
        AIRTABLE_SERVICE, CircuitBreaker, CircuitBreakerRegistry, CircuitOpenError, EIA_SERVICE,
        PVWATTS_SERVICE,
    },
    config::Config,
    models::circuit_breaker::{CircuitBreakerConfig, CircuitState},
};
use tokio::time::sleep;

fn fast_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout: Duration::from_millis(500),
        monitoring_period: Duration::from_millis(1000),
        success_threshold: 3,
    }
}

async fn fail_once(breaker: &CircuitBreaker) {
    let _ = breaker
        .execute(|| async { Err::<(), _>(anyhow!("upstream down")) })
        .await;
}

/// Test: Enough failures inside the monitoring window open the circuit and
/// fail fast without invoking the operation
#[tokio::test(start_paused = true)]
async fn test_failures_open_the_circuit() -> Result<()> {
    let breaker = CircuitBreaker::new(PVWATTS_SERVICE.to_string(), fast_config());

    for _ in 0..3 {
        fail_once(&breaker).await;
    }

    assert_eq!(breaker.state().await, CircuitState::Open);

    let invoked = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invoked);

    let result = breaker
        .execute(|| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            }
        })
        .await;

    let error = result.expect_err("open circuit should reject the call");
    assert!(
        error.downcast_ref::<CircuitOpenError>().is_some(),
        "Rejection should be a CircuitOpenError"
    );
    assert_eq!(
        invoked.load(Ordering::SeqCst),
        0,
        "Operation must not run while the circuit is open"
    );

    Ok(())
}

/// Test: An open circuit transitions to half-open once the cooldown elapses
#[tokio::test(start_paused = true)]
async fn test_open_circuit_half_opens_after_cooldown() -> Result<()> {
    let breaker = CircuitBreaker::new(PVWATTS_SERVICE.to_string(), fast_config());

    for _ in 0..3 {
        fail_once(&breaker).await;
    }
    assert_eq!(breaker.state().await, CircuitState::Open);

    sleep(Duration::from_millis(500)).await;

    assert_eq!(breaker.state().await, CircuitState::HalfOpen);

    Ok(())
}

/// Test: Three consecutive half-open successes close the circuit and clear
/// the failure history
#[tokio::test(start_paused = true)]
async fn test_half_open_successes_close_the_circuit() -> Result<()> {
    let breaker = CircuitBreaker::new(EIA_SERVICE.to_string(), fast_config());

    for _ in 0..3 {
        fail_once(&breaker).await;
    }
    sleep(Duration::from_millis(500)).await;
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);

    for _ in 0..3 {
        breaker
            .execute(|| async { Ok::<_, anyhow::Error>("estimate") })
            .await?;
    }

    assert_eq!(breaker.state().await, CircuitState::Closed);

    let snapshot = breaker.snapshot().await;
    assert_eq!(snapshot.failures_in_window, 0, "History should be cleared");
    assert_eq!(snapshot.success_count, 0);

    Ok(())
}

/// Test: A single failure while half-open reopens the circuit immediately
#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens_the_circuit() -> Result<()> {
    let breaker = CircuitBreaker::new(EIA_SERVICE.to_string(), fast_config());

    for _ in 0..3 {
        fail_once(&breaker).await;
    }
    sleep(Duration::from_millis(500)).await;
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);

    fail_once(&breaker).await;

    assert_eq!(breaker.state().await, CircuitState::Open);

    let result = breaker
        .execute(|| async { Ok::<_, anyhow::Error>(()) })
        .await;
    assert!(
        result
            .expect_err("reopened circuit should reject calls")
            .downcast_ref::<CircuitOpenError>()
            .is_some()
    );

    Ok(())
}

/// Test: A success while closed clears the accumulated failure history
#[tokio::test(start_paused = true)]
async fn test_success_clears_failure_history_while_closed() -> Result<()> {
    let breaker = CircuitBreaker::new(AIRTABLE_SERVICE.to_string(), fast_config());

    fail_once(&breaker).await;
    fail_once(&breaker).await;

    breaker
        .execute(|| async { Ok::<_, anyhow::Error>(()) })
        .await?;

    fail_once(&breaker).await;
    fail_once(&breaker).await;

    assert_eq!(
        breaker.state().await,
        CircuitState::Closed,
        "Two failures after a clearing success must not open the circuit"
    );
    assert_eq!(breaker.snapshot().await.failures_in_window, 2);

    fail_once(&breaker).await;
    assert_eq!(breaker.state().await, CircuitState::Open);

    Ok(())
}

/// Test: Failures older than the monitoring window do not count toward the
/// threshold
#[tokio::test(start_paused = true)]
async fn test_failures_outside_window_are_pruned() -> Result<()> {
    let breaker = CircuitBreaker::new(
        PVWATTS_SERVICE.to_string(),
        CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(500),
            monitoring_period: Duration::from_millis(300),
            success_threshold: 3,
        },
    );

    fail_once(&breaker).await;
    fail_once(&breaker).await;

    sleep(Duration::from_millis(350)).await;

    fail_once(&breaker).await;

    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert_eq!(
        breaker.snapshot().await.failures_in_window,
        1,
        "Only the fresh failure should remain in the window"
    );

    Ok(())
}

/// Test: Manual reset forces a closed circuit with empty state
#[tokio::test(start_paused = true)]
async fn test_reset_returns_breaker_to_closed() -> Result<()> {
    let breaker = CircuitBreaker::new(AIRTABLE_SERVICE.to_string(), fast_config());

    for _ in 0..3 {
        fail_once(&breaker).await;
    }
    assert_eq!(breaker.state().await, CircuitState::Open);

    breaker.reset().await;

    let snapshot = breaker.snapshot().await;
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failures_in_window, 0);
    assert_eq!(snapshot.seconds_since_last_failure, None);
    assert_eq!(snapshot.success_count, 0);

    Ok(())
}

/// Test: Full trip scenario from failing fast through probing to recovery
#[tokio::test(start_paused = true)]
async fn test_open_probe_recover_scenario() -> Result<()> {
    let breaker = CircuitBreaker::new(PVWATTS_SERVICE.to_string(), fast_config());
    let invoked = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        let counter = Arc::clone(&invoked);
        let _ = breaker
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow!("production estimate unavailable"))
                }
            })
            .await;
    }

    // Fourth call fails fast while the cooldown is running.
    let counter = Arc::clone(&invoked);
    let result = breaker
        .execute(|| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            }
        })
        .await;
    assert!(
        result
            .expect_err("call during cooldown should fail fast")
            .downcast_ref::<CircuitOpenError>()
            .is_some()
    );
    assert_eq!(invoked.load(Ordering::SeqCst), 3);

    sleep(Duration::from_millis(500)).await;

    // The probe is admitted again and three successes recover the circuit.
    for _ in 0..3 {
        let counter = Arc::clone(&invoked);
        breaker
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(())
                }
            })
            .await?;
    }

    assert_eq!(invoked.load(Ordering::SeqCst), 6);
    assert_eq!(breaker.state().await, CircuitState::Closed);

    Ok(())
}

/// Test: Concurrent callers share one breaker without corrupting its state
#[tokio::test]
async fn test_concurrent_callers_share_breaker_state() -> Result<()> {
    let breaker = Arc::new(CircuitBreaker::new(EIA_SERVICE.to_string(), fast_config()));
    let completed = Arc::new(AtomicU32::new(0));

    let mut handles = vec![];

    for _ in 0..10 {
        let breaker = Arc::clone(&breaker);
        let counter = Arc::clone(&completed);

        handles.push(tokio::spawn(async move {
            let result = breaker
                .execute(|| async { Ok::<_, anyhow::Error>("rate schedule") })
                .await;

            if result.is_ok() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    futures_util::future::join_all(handles).await;

    assert_eq!(completed.load(Ordering::SeqCst), 10);
    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert_eq!(breaker.snapshot().await.failures_in_window, 0);

    Ok(())
}

/// Test: The registry serves the named breakers and rejects unknown services
#[tokio::test]
async fn test_registry_routes_by_service_name() -> Result<()> {
    let registry = CircuitBreakerRegistry::from_config(&Config::default());

    let value = registry
        .execute(PVWATTS_SERVICE, || async { Ok::<_, anyhow::Error>(42) })
        .await?;
    assert_eq!(value, 42);

    assert!(
        registry.get("mapbox").is_err(),
        "Unknown service names should not resolve to a breaker"
    );

    Ok(())
}

/// Test: Breakers in the registry trip independently per service
#[tokio::test]
async fn test_registry_breakers_are_independent() -> Result<()> {
    let mut config = Config::default();
    config.breaker_failure_threshold = 2;
    let registry = CircuitBreakerRegistry::from_config(&config);

    let eia = registry.get(EIA_SERVICE)?;
    fail_once(&eia).await;
    fail_once(&eia).await;
    assert_eq!(eia.state().await, CircuitState::Open);

    let pvwatts = registry.get(PVWATTS_SERVICE)?;
    assert_eq!(pvwatts.state().await, CircuitState::Closed);
    registry
        .execute(PVWATTS_SERVICE, || async { Ok::<_, anyhow::Error>(()) })
        .await?;

    Ok(())
}
