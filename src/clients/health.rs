use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::{
    context::AppContext,
    models::{
        circuit_breaker::{CircuitBreakerSnapshot, CircuitState},
        health::{HealthCheckResponse, HealthStatus, ServiceHealth},
    },
};

pub struct HealthChecker {
    context: Arc<AppContext>,
}

impl HealthChecker {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        for snapshot in self.context.breakers.snapshots().await {
            debug!(
                service = %snapshot.service,
                circuit_state = %snapshot.state.as_str(),
                "Circuit breaker state checked"
            );
            checks.insert(snapshot.service.clone(), Self::breaker_health(&snapshot));
        }

        checks.insert("job_queue".to_string(), self.queue_health());

        let status = Self::overall_status(&checks);

        HealthCheckResponse {
            status,
            timestamp: Utc::now(),
            checks,
        }
    }

    fn breaker_health(snapshot: &CircuitBreakerSnapshot) -> ServiceHealth {
        let state = snapshot.state.as_str().to_string();

        match snapshot.state {
            CircuitState::Closed => ServiceHealth::healthy().with_circuit_breaker(state),
            CircuitState::HalfOpen => {
                ServiceHealth::degraded("Circuit breaker in recovery mode".to_string())
                    .with_circuit_breaker(state)
            }
            CircuitState::Open => ServiceHealth::degraded(format!(
                "Circuit breaker open after {} failures in window",
                snapshot.failures_in_window
            ))
            .with_circuit_breaker(state),
        }
    }

    fn queue_health(&self) -> ServiceHealth {
        let stats = self.context.queue.stats();

        if stats.dropped > 0 {
            ServiceHealth::degraded(format!(
                "{} jobs dropped after exhausting retries",
                stats.dropped
            ))
            .with_queue(stats)
        } else {
            ServiceHealth::healthy().with_queue(stats)
        }
    }

    fn overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
        let has_unhealthy = checks
            .values()
            .any(|health| health.status == HealthStatus::Unhealthy);

        let has_degraded = checks
            .values()
            .any(|health| health.status == HealthStatus::Degraded);

        if has_unhealthy {
            HealthStatus::Unhealthy
        } else if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
