use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    clients::{
        circuit_breaker::CircuitBreakerRegistry,
        queue::{AIRTABLE_JOB_KIND, JobQueue, PROVISION_JOB_KIND},
    },
    config::Config,
    utils,
};

/// Application-lifetime owner of the circuit breaker registry and the job
/// queue. Built once from config and passed around by `Arc`; there is no
/// module-level singleton.
pub struct AppContext {
    pub config: Config,
    pub breakers: CircuitBreakerRegistry,
    pub queue: Arc<JobQueue>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl AppContext {
    /// Builds the breakers and queue, registers the default job processors,
    /// and starts the single consumer task.
    pub fn new(config: Config) -> Arc<Self> {
        let breakers = CircuitBreakerRegistry::from_config(&config);
        let queue = Arc::new(JobQueue::new(&config));

        queue.register_processor(AIRTABLE_JOB_KIND, utils::record_lead);
        queue.register_processor(PROVISION_JOB_KIND, utils::provision_tenant);

        let consumer = tokio::spawn(Arc::clone(&queue).run());

        info!("Application context initialized");

        Arc::new(Self {
            config,
            breakers,
            queue,
            consumer: Mutex::new(Some(consumer)),
        })
    }

    pub fn queue_airtable_job(&self, payload: Value) -> String {
        self.queue
            .add_job(AIRTABLE_JOB_KIND, payload, self.config.airtable_job_priority)
    }

    pub fn queue_provision_job(&self, payload: Value) -> String {
        self.queue.add_job(
            PROVISION_JOB_KIND,
            payload,
            self.config.provision_job_priority,
        )
    }

    /// Stops the queue consumer and waits for it to finish its in-flight job.
    pub async fn shutdown(&self) {
        self.queue.shutdown();

        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Queue consumer task ended abnormally");
            }
        }

        info!("Application context shut down");
    }
}
