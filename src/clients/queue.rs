use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Error, Result};
use chrono::Utc;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    models::queue::{QueueJob, QueueStats},
};

pub const AIRTABLE_JOB_KIND: &str = "airtable";
pub const PROVISION_JOB_KIND: &str = "provision";

pub type JobHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

struct QueueState {
    pending: Vec<QueueJob>,
    processors: HashMap<String, JobHandler>,
    next_seq: u64,
    processed: u64,
    dropped: u64,
    shutdown: bool,
}

/// Priority-ordered, single-consumer retry queue for best-effort background
/// work. Jobs live only in process memory; nothing survives a restart.
pub struct JobQueue {
    state: Mutex<QueueState>,
    wake: Notify,
    attempt_budgets: HashMap<String, u32>,
    default_max_attempts: u32,
}

impl JobQueue {
    pub fn new(config: &Config) -> Self {
        let mut attempt_budgets = HashMap::new();
        attempt_budgets.insert(
            AIRTABLE_JOB_KIND.to_string(),
            config.airtable_job_max_attempts,
        );
        attempt_budgets.insert(
            PROVISION_JOB_KIND.to_string(),
            config.provision_job_max_attempts,
        );

        info!("Job queue initialized");

        Self {
            state: Mutex::new(QueueState {
                pending: Vec::new(),
                processors: HashMap::new(),
                next_seq: 0,
                processed: 0,
                dropped: 0,
                shutdown: false,
            }),
            wake: Notify::new(),
            attempt_budgets,
            default_max_attempts: config.default_job_max_attempts,
        }
    }

    /// Enqueues a job and returns its generated id immediately. Never blocks
    /// on processing and has no failure path.
    pub fn add_job(&self, kind: &str, payload: Value, priority: i32) -> String {
        let max_attempts = self
            .attempt_budgets
            .get(kind)
            .copied()
            .unwrap_or(self.default_max_attempts);

        let job = QueueJob {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            payload,
            priority,
            attempts: 0,
            max_attempts,
            created_at: Utc::now(),
            seq: 0,
        };

        let id = job.id.clone();
        debug!(job_id = %id, kind = %kind, priority, "Job enqueued");
        self.insert(job);

        id
    }

    pub fn register_processor<F, Fut>(&self, kind: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), Error>> + Send + 'static,
    {
        let handler: JobHandler =
            Arc::new(move |payload| -> BoxFuture<'static, Result<(), Error>> {
                Box::pin(handler(payload))
            });

        let replaced = self
            .lock()
            .processors
            .insert(kind.to_string(), handler)
            .is_some();

        if replaced {
            warn!(kind = %kind, "Job processor replaced");
        } else {
            info!(kind = %kind, "Job processor registered");
        }
    }

    /// Consumer loop. Runs on a single spawned task; parks on the wake
    /// notification when the queue is empty and exits once shutdown is
    /// requested.
    pub async fn run(self: Arc<Self>) {
        info!("Job queue consumer started");

        loop {
            let next = {
                let mut state = self.lock();
                if state.shutdown {
                    let abandoned = state.pending.len();
                    if abandoned > 0 {
                        warn!(abandoned, "Job queue stopping with jobs still pending");
                    }
                    break;
                }

                if state.pending.is_empty() {
                    None
                } else {
                    Some(state.pending.remove(0))
                }
            };

            match next {
                Some(job) => {
                    if let Some((job, delay)) = self.dispatch(job).await {
                        let queue = Arc::clone(&self);
                        tokio::spawn(async move {
                            sleep(delay).await;
                            queue.insert(job);
                        });
                    }
                }
                None => self.wake.notified().await,
            }
        }

        info!("Job queue consumer stopped");
    }

    /// Requests the consumer loop to stop. Jobs enqueued afterwards are
    /// dropped at insertion.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.wake.notify_one();
        info!("Job queue shutdown requested");
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();

        QueueStats {
            pending: state.pending.len(),
            processed: state.processed,
            dropped: state.dropped,
        }
    }

    /// Runs one job to completion. Returns the job and a backoff delay when
    /// it failed with attempts remaining, so the caller can schedule the
    /// delayed re-insertion.
    async fn dispatch(&self, mut job: QueueJob) -> Option<(QueueJob, Duration)> {
        let handler = self.lock().processors.get(&job.kind).cloned();

        let Some(handler) = handler else {
            warn!(job_id = %job.id, kind = %job.kind, "No processor registered for job kind, dropping job");
            self.lock().dropped += 1;
            return None;
        };

        job.attempts += 1;
        debug!(
            job_id = %job.id,
            kind = %job.kind,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "Processing job"
        );

        match handler(job.payload.clone()).await {
            Ok(()) => {
                self.lock().processed += 1;
                debug!(job_id = %job.id, kind = %job.kind, "Job completed");
                None
            }
            Err(e) => {
                if job.attempts >= job.max_attempts {
                    self.dead_letter(&job, &e);
                    return None;
                }

                let delay = Duration::from_secs(2u64.saturating_pow(job.attempts));
                warn!(
                    job_id = %job.id,
                    kind = %job.kind,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    retry_delay_seconds = delay.as_secs(),
                    error = %e,
                    "Job failed, scheduling retry"
                );

                Some((job, delay))
            }
        }
    }

    fn insert(&self, mut job: QueueJob) {
        let mut state = self.lock();

        if state.shutdown {
            warn!(job_id = %job.id, kind = %job.kind, "Queue is shut down, dropping job");
            return;
        }

        job.seq = state.next_seq;
        state.next_seq += 1;

        // Descending priority, arrival order within a priority level. The
        // pending list stays sorted because every insertion lands at the
        // partition point.
        let position = state
            .pending
            .partition_point(|pending| pending.priority >= job.priority);
        state.pending.insert(position, job);

        drop(state);
        self.wake.notify_one();
    }

    fn dead_letter(&self, job: &QueueJob, error: &Error) {
        self.lock().dropped += 1;

        warn!(
            target: "dead_letter",
            job_id = %job.id,
            kind = %job.kind,
            attempts = job.attempts,
            age_seconds = (Utc::now() - job.created_at).num_seconds(),
            error = %error,
            "Job exhausted all attempts, dropping"
        );
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A poisoned lock only means a panic elsewhere; the job list itself
        // is never left torn, so take the guard either way.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
