use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::{JobStatus, SyncJob, SyncSummary};

struct JobEntry {
    job: SyncJob,
    status_tx: watch::Sender<JobStatus>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, JobEntry>,
    /// account id -> its non-terminal job
    active: HashMap<String, Uuid>,
}

/// In-process table of connect/sync jobs.
///
/// An account has at most one non-terminal job; [`JobRegistry::claim`] hands
/// back the running one instead of creating a second.
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the account's active job id, or registers a new pending job.
    /// The flag is `true` when a new job was created.
    pub fn claim(&self, account_id: &str) -> (Uuid, bool) {
        let mut inner = self.lock();
        if let Some(job_id) = inner.active.get(account_id) {
            return (*job_id, false);
        }

        let job = SyncJob::new(account_id);
        let job_id = job.job_id;
        let (status_tx, _) = watch::channel(job.status);
        inner.active.insert(account_id.to_string(), job_id);
        inner.jobs.insert(job_id, JobEntry { job, status_tx });
        (job_id, true)
    }

    pub fn get(&self, job_id: Uuid) -> Option<SyncJob> {
        self.lock().jobs.get(&job_id).map(|entry| entry.job.clone())
    }

    pub fn active_for(&self, account_id: &str) -> Option<Uuid> {
        self.lock().active.get(account_id).copied()
    }

    pub fn subscribe(&self, job_id: Uuid) -> Option<watch::Receiver<JobStatus>> {
        self.lock()
            .jobs
            .get(&job_id)
            .map(|entry| entry.status_tx.subscribe())
    }

    /// Moves a job to a non-terminal state. Ignored once the job has finished.
    pub fn transition(&self, job_id: Uuid, status: JobStatus, message: impl Into<String>) {
        debug_assert!(!status.is_terminal());
        self.update(job_id, |job| {
            job.status = status;
            job.message = message.into();
        });
    }

    pub fn complete(&self, job_id: Uuid, summary: SyncSummary) {
        self.update(job_id, |job| {
            job.status = JobStatus::Done;
            job.message = format!(
                "Synced {} courses, {} assignments, {} announcements",
                summary.courses_found, summary.assignments_found, summary.announcements_found
            );
            job.result = Some(summary);
        });
    }

    pub fn fail(&self, job_id: Uuid, error: impl Into<String>) {
        self.update(job_id, |job| {
            let error = error.into();
            job.status = JobStatus::Error;
            job.message = format!("Sync failed: {}", error);
            job.error = Some(error);
        });
    }

    fn update(&self, job_id: Uuid, apply: impl FnOnce(&mut SyncJob)) {
        let mut inner = self.lock();
        let Some(entry) = inner.jobs.get_mut(&job_id) else {
            return;
        };
        if entry.job.status.is_terminal() {
            return;
        }

        apply(&mut entry.job);
        let now = Utc::now();
        entry.job.updated_at = now;
        let status = entry.job.status;
        if status.is_terminal() {
            entry.job.finished_at = Some(now);
        }
        entry.status_tx.send_replace(status);

        if status.is_terminal() {
            let account_id = entry.job.account_id.clone();
            if inner.active.get(&account_id) == Some(&job_id) {
                inner.active.remove(&account_id);
            }
        }
    }

    /// Drops finished jobs older than `ttl`. Returns how many were removed.
    pub fn reap(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now() - ttl;
        let mut inner = self.lock();
        let before = inner.jobs.len();
        inner
            .jobs
            .retain(|_, entry| !matches!(entry.job.finished_at, Some(at) if at <= cutoff));
        before - inner.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_reuses_active_job() {
        let registry = JobRegistry::new();
        let (first, created) = registry.claim("acct-1");
        assert!(created);
        let (second, created) = registry.claim("acct-1");
        assert!(!created);
        assert_eq!(first, second);

        let (other, created) = registry.claim("acct-2");
        assert!(created);
        assert_ne!(first, other);
    }

    #[test]
    fn terminal_job_frees_the_account() {
        let registry = JobRegistry::new();
        let (first, _) = registry.claim("acct-1");
        registry.fail(first, "invalid token");
        assert_eq!(registry.active_for("acct-1"), None);

        let (second, created) = registry.claim("acct-1");
        assert!(created);
        assert_ne!(first, second);
    }

    #[test]
    fn finished_jobs_ignore_late_updates() {
        let registry = JobRegistry::new();
        let (job_id, _) = registry.claim("acct-1");
        registry.transition(job_id, JobStatus::Fetching, "Fetching courses");
        registry.complete(job_id, SyncSummary::default());
        registry.fail(job_id, "sync stalled");
        registry.transition(job_id, JobStatus::Merging, "late");

        let job = registry.get(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.error.is_none());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn subscribers_see_terminal_status() {
        let registry = JobRegistry::new();
        let (job_id, _) = registry.claim("acct-1");
        let rx = registry.subscribe(job_id).unwrap();
        assert_eq!(*rx.borrow(), JobStatus::Pending);
        registry.fail(job_id, "could not reach host");
        assert_eq!(*rx.borrow(), JobStatus::Error);
    }

    #[test]
    fn reap_only_removes_expired_terminal_jobs() {
        let registry = JobRegistry::new();
        let (done, _) = registry.claim("acct-1");
        let (running, _) = registry.claim("acct-2");
        registry.complete(done, SyncSummary::default());

        assert_eq!(registry.reap(Duration::from_secs(3600)), 0);
        assert_eq!(registry.reap(Duration::ZERO), 1);
        assert!(registry.get(done).is_none());
        assert!(registry.get(running).is_some());
    }
}
