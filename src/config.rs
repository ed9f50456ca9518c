use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::circuit_breaker::CircuitBreakerConfig;

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,

    #[serde(default = "default_breaker_reset_timeout_seconds")]
    pub breaker_reset_timeout_seconds: u64,

    #[serde(default = "default_breaker_monitoring_period_seconds")]
    pub breaker_monitoring_period_seconds: u64,

    #[serde(default = "default_breaker_success_threshold")]
    pub breaker_success_threshold: u32,

    /// Cooldown for the tenant-datastore and payment-processor breakers,
    /// which gate the signup flow and need to probe for recovery sooner.
    #[serde(default = "default_critical_breaker_reset_timeout_seconds")]
    pub critical_breaker_reset_timeout_seconds: u64,

    #[serde(default = "default_airtable_job_priority")]
    pub airtable_job_priority: i32,

    #[serde(default = "default_airtable_job_max_attempts")]
    pub airtable_job_max_attempts: u32,

    #[serde(default = "default_provision_job_priority")]
    pub provision_job_priority: i32,

    #[serde(default = "default_provision_job_max_attempts")]
    pub provision_job_max_attempts: u32,

    #[serde(default = "default_job_max_attempts")]
    pub default_job_max_attempts: u32,
}

fn default_server_port() -> u16 {
    8080
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_reset_timeout_seconds() -> u64 {
    60
}

fn default_breaker_monitoring_period_seconds() -> u64 {
    60
}

fn default_breaker_success_threshold() -> u32 {
    3
}

fn default_critical_breaker_reset_timeout_seconds() -> u64 {
    30
}

fn default_airtable_job_priority() -> i32 {
    1
}

fn default_airtable_job_max_attempts() -> u32 {
    5
}

fn default_provision_job_priority() -> i32 {
    10
}

fn default_provision_job_max_attempts() -> u32 {
    3
}

fn default_job_max_attempts() -> u32 {
    3
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|_| anyhow!("Invalid or missing environmental variable"))?;
        Ok(config)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            reset_timeout: Duration::from_secs(self.breaker_reset_timeout_seconds),
            monitoring_period: Duration::from_secs(self.breaker_monitoring_period_seconds),
            success_threshold: self.breaker_success_threshold,
        }
    }

    pub fn critical_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            reset_timeout: Duration::from_secs(self.critical_breaker_reset_timeout_seconds),
            ..self.breaker_config()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_reset_timeout_seconds: default_breaker_reset_timeout_seconds(),
            breaker_monitoring_period_seconds: default_breaker_monitoring_period_seconds(),
            breaker_success_threshold: default_breaker_success_threshold(),
            critical_breaker_reset_timeout_seconds: default_critical_breaker_reset_timeout_seconds(),
            airtable_job_priority: default_airtable_job_priority(),
            airtable_job_max_attempts: default_airtable_job_max_attempts(),
            provision_job_priority: default_provision_job_priority(),
            provision_job_max_attempts: default_provision_job_max_attempts(),
            default_job_max_attempts: default_job_max_attempts(),
        }
    }
}
