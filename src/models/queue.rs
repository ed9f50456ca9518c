use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,

    /// Insertion counter; pending jobs are ordered by descending priority,
    /// then ascending `seq`, so equal priorities dispatch in arrival order.
    #[serde(skip)]
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processed: u64,
    pub dropped: u64,
}
