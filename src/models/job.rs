use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Verifying,
    Fetching,
    Merging,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

/// Counts reported once a sync has merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub courses_found: usize,
    pub assignments_found: usize,
    pub announcements_found: usize,
}

/// Snapshot of one connect/resync run, as returned to pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub job_id: Uuid,
    pub account_id: String,
    pub status: JobStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SyncSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    pub fn new(account_id: &str) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            status: JobStatus::Pending,
            message: "Waiting to start".to_string(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}
