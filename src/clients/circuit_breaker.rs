use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    models::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState},
};

pub const PVWATTS_SERVICE: &str = "pvwatts";
pub const EIA_SERVICE: &str = "eia";
pub const AIRTABLE_SERVICE: &str = "airtable";
pub const STRIPE_SERVICE: &str = "stripe";
pub const EMAIL_SERVICE: &str = "email";

/// Returned instead of invoking the wrapped operation while the circuit is
/// open. Callers downcast to distinguish fast-fails from real upstream errors.
#[derive(Debug, Clone)]
pub struct CircuitOpenError {
    pub service: String,
}

impl Display for CircuitOpenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Circuit breaker is open for {}", self.service)
    }
}

impl std::error::Error for CircuitOpenError {}

struct BreakerState {
    state: CircuitState,
    failure_times: Vec<Instant>,
    last_failure_time: Option<Instant>,
    success_count: u32,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_times: Vec::new(),
            last_failure_time: None,
            success_count: 0,
        }
    }
}

pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(service_name: String, config: CircuitBreakerConfig) -> Self {
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            config,
            inner: Mutex::new(BreakerState::new()),
        }
    }

    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        {
            let mut inner = self.inner.lock().await;
            self.evaluate(&mut inner);

            match inner.state {
                CircuitState::Open => {
                    warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                    return Err(CircuitOpenError {
                        service: self.service_name.clone(),
                    }
                    .into());
                }
                CircuitState::HalfOpen => {
                    debug!(service = %self.service_name, "Circuit breaker in half-open state, probing");
                }
                CircuitState::Closed => {}
            }
        }

        match operation().await {
            Ok(result) => {
                self.record_success().await;
                Ok(result)
            }
            Err(e) => {
                self.record_failure().await;
                Err(e)
            }
        }
    }

    /// Current state after applying any lazy transition. Observing an open
    /// circuit whose cooldown has elapsed moves it to half-open.
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        self.evaluate(&mut inner);
        inner.state
    }

    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let mut inner = self.inner.lock().await;
        self.evaluate(&mut inner);

        CircuitBreakerSnapshot {
            service: self.service_name.clone(),
            state: inner.state,
            failures_in_window: inner.failure_times.len() as u32,
            seconds_since_last_failure: inner
                .last_failure_time
                .map(|t| Instant::now().duration_since(t).as_secs()),
            success_count: inner.success_count,
        }
    }

    /// Unconditionally forces the circuit closed with empty failure history.
    /// Operator use only.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        *inner = BreakerState::new();
        info!(service = %self.service_name, "Circuit breaker manually reset");
    }

    fn evaluate(&self, inner: &mut BreakerState) {
        let now = Instant::now();

        inner
            .failure_times
            .retain(|t| now.duration_since(*t) <= self.config.monitoring_period);

        if inner.state == CircuitState::Open {
            if let Some(last_failure) = inner.last_failure_time {
                if now.duration_since(last_failure) >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        self.evaluate(&mut inner);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                debug!(
                    service = %self.service_name,
                    successes = inner.success_count,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success recorded"
                );

                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_times.clear();
                    inner.last_failure_time = None;
                    inner.success_count = 0;
                    info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Closed => {
                inner.failure_times.clear();
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        self.evaluate(&mut inner);

        let now = Instant::now();
        inner.failure_times.push(now);
        inner.last_failure_time = Some(now);

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.success_count = 0;
            warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            return;
        }

        let failures = inner.failure_times.len() as u32;
        debug!(
            service = %self.service_name,
            failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if inner.state == CircuitState::Closed && failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            warn!(
                service = %self.service_name,
                failures,
                "Circuit breaker opened due to repeated failures"
            );
        }
    }
}

/// One breaker per guarded third-party dependency, built once at startup and
/// owned by the application context.
pub struct CircuitBreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn from_config(config: &Config) -> Self {
        let standard = config.breaker_config();
        let critical = config.critical_breaker_config();

        let mut breakers = HashMap::new();

        // The tenant datastore and payment processor sit on the signup path,
        // so they recover on the shorter critical cooldown.
        for (service, breaker_config) in [
            (PVWATTS_SERVICE, standard.clone()),
            (EIA_SERVICE, standard.clone()),
            (EMAIL_SERVICE, standard),
            (AIRTABLE_SERVICE, critical.clone()),
            (STRIPE_SERVICE, critical),
        ] {
            breakers.insert(
                service.to_string(),
                Arc::new(CircuitBreaker::new(service.to_string(), breaker_config)),
            );
        }

        Self { breakers }
    }

    pub fn get(&self, service: &str) -> Result<Arc<CircuitBreaker>, Error> {
        self.breakers
            .get(service)
            .cloned()
            .ok_or_else(|| anyhow!("No circuit breaker registered for {}", service))
    }

    pub async fn execute<F, Fut, T>(&self, service: &str, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        self.get(service)?.execute(operation).await
    }

    pub async fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots = Vec::with_capacity(self.breakers.len());

        for breaker in self.breakers.values() {
            snapshots.push(breaker.snapshot().await);
        }

        snapshots
    }
}
