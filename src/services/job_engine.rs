//! Connect / resync job engine.
//!
//! A job walks `pending -> verifying -> fetching -> merging -> done`, or ends
//! in `error` from any of those. It runs on its own task so the request that
//! started it can return the job id right away; callers poll
//! [`JobEngine::job`] or await [`JobEngine::wait_for`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{StreamExt, stream};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::canvas::{AuthError, CanvasClient, Credentials, normalize_base_url};
use crate::config::JobConfig;
use crate::db::repository;
use crate::error::AppError;
use crate::models::{ConnectionConfig, JobStatus, SyncJob, SyncSummary};
use crate::services::job_registry::JobRegistry;
use crate::services::merge::{FetchedBatch, merge_batch};

/// Reasons a job ends in `error`. Display strings are shown to the user.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Canvas account is not connected")]
    NotConnected,

    #[error("no courses found: check you completed login")]
    NoCourses,

    #[error("sync stalled: no progress for {secs}s")]
    Stalled { secs: u64 },

    #[error("could not save synced data")]
    Merge(#[source] sqlx::Error),

    #[error("could not save connection")]
    Store(#[source] sqlx::Error),
}

enum JobRequest {
    Connect {
        base_url: String,
        credentials: Credentials,
    },
    Resync,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    /// `true` when the account already had a job running and this is it.
    pub attached: bool,
}

/// Bumped after verification and after every listing call; the watchdog
/// fails the job when it stops moving. The merge step does not bump it.
struct Progress(watch::Sender<u64>);

impl Progress {
    fn bump(&self) {
        self.0.send_modify(|n| *n += 1);
    }
}

#[derive(Clone)]
pub struct JobEngine {
    db: SqlitePool,
    canvas: Arc<dyn CanvasClient>,
    registry: Arc<JobRegistry>,
    fetch_concurrency: usize,
    config: JobConfig,
}

impl JobEngine {
    pub fn new(
        db: SqlitePool,
        canvas: Arc<dyn CanvasClient>,
        fetch_concurrency: usize,
        config: JobConfig,
    ) -> Self {
        Self {
            db,
            canvas,
            registry: Arc::new(JobRegistry::new()),
            fetch_concurrency: fetch_concurrency.max(1),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn job(&self, job_id: Uuid) -> Option<SyncJob> {
        self.registry.get(job_id)
    }

    /// Starts a connect job, or returns the account's running job.
    /// Input must already be validated.
    pub fn start_connect(
        &self,
        account_id: &str,
        base_url: &str,
        credentials: Credentials,
    ) -> JobHandle {
        self.start(
            account_id,
            JobRequest::Connect {
                base_url: base_url.to_string(),
                credentials,
            },
        )
    }

    /// Starts a resync from the stored connection, or returns the account's
    /// running job.
    pub async fn start_resync(&self, account_id: &str) -> Result<JobHandle, AppError> {
        if let Some(job_id) = self.registry.active_for(account_id) {
            return Ok(JobHandle { job_id, attached: true });
        }
        if repository::find_connection(&self.db, account_id).await?.is_none() {
            return Err(AppError::NotConnected);
        }
        Ok(self.start(account_id, JobRequest::Resync))
    }

    /// Runs a resync and waits for it, up to `sync_timeout`.
    pub async fn sync_now(&self, account_id: &str) -> Result<SyncSummary, AppError> {
        let handle = self.start_resync(account_id).await?;
        let job = self.wait_for(handle.job_id, self.config.sync_timeout).await?;
        match job.status {
            JobStatus::Done => Ok(job.result.unwrap_or_default()),
            _ => Err(AppError::SyncFailed(job.error.unwrap_or(job.message))),
        }
    }

    /// Waits until the job is `done` or `error`. On timeout the job keeps
    /// running; only the wait is abandoned.
    pub async fn wait_for(&self, job_id: Uuid, timeout: Duration) -> Result<SyncJob, AppError> {
        let mut rx = self.registry.subscribe(job_id).ok_or(AppError::NotFound)?;
        let finished = async move {
            rx.wait_for(|status| status.is_terminal()).await.map(|_| ())
        };
        match tokio::time::timeout(timeout, finished).await {
            Ok(_) => self.registry.get(job_id).ok_or(AppError::NotFound),
            Err(_) => Err(AppError::Timeout(format!(
                "sync still running after {}s; poll job {}",
                timeout.as_secs(),
                job_id
            ))),
        }
    }

    fn start(&self, account_id: &str, request: JobRequest) -> JobHandle {
        let (job_id, created) = self.registry.claim(account_id);
        if !created {
            info!("account {} already has job {}, attaching", account_id, job_id);
            return JobHandle { job_id, attached: true };
        }

        info!("starting job {} for account {}", job_id, account_id);
        let engine = self.clone();
        let account_id = account_id.to_string();
        tokio::spawn(async move {
            engine.run(job_id, account_id, request).await;
        });

        JobHandle { job_id, attached: false }
    }

    async fn run(self, job_id: Uuid, account_id: String, request: JobRequest) {
        let (progress_tx, progress_rx) = watch::channel(0u64);
        let progress = Progress(progress_tx);

        let outcome = tokio::select! {
            result = self.pipeline(job_id, &account_id, request, &progress) => result,
            secs = watchdog(progress_rx, self.config.stall_timeout) => Err(JobError::Stalled { secs }),
        };

        match outcome {
            Ok(summary) => {
                info!("job {} done: {:?}", job_id, summary);
                self.registry.complete(job_id, summary);
            }
            Err(e) => {
                match &e {
                    JobError::Merge(source) | JobError::Store(source) => {
                        error!("job {} failed: {}: {}", job_id, e, source)
                    }
                    _ => warn!("job {} failed: {}", job_id, e),
                }
                self.registry.fail(job_id, e.to_string());
            }
        }
    }

    async fn pipeline(
        &self,
        job_id: Uuid,
        account_id: &str,
        request: JobRequest,
        progress: &Progress,
    ) -> Result<SyncSummary, JobError> {
        let connection = self.verify(job_id, account_id, request).await?;
        progress.bump();

        let batch = self.fetch(job_id, &connection, progress).await?;

        self.registry.transition(
            job_id,
            JobStatus::Merging,
            format!(
                "Saving {} courses, {} assignments, {} announcements",
                batch.courses.len(),
                batch.assignments.len(),
                batch.announcements.len()
            ),
        );
        merge_batch(&self.db, account_id, &batch)
            .await
            .map_err(JobError::Merge)
    }

    async fn verify(
        &self,
        job_id: Uuid,
        account_id: &str,
        request: JobRequest,
    ) -> Result<ConnectionConfig, JobError> {
        match request {
            JobRequest::Connect { base_url, credentials } => {
                self.registry
                    .transition(job_id, JobStatus::Verifying, "Verifying Canvas credentials");
                let base_url = normalize_base_url(&base_url)?;
                let verified = self.canvas.verify_credentials(&base_url, &credentials).await?;
                repository::upsert_connection(
                    &self.db,
                    account_id,
                    &base_url,
                    &verified.access_token,
                    Some(&verified.display_name),
                )
                .await
                .map_err(JobError::Store)
            }
            JobRequest::Resync => {
                self.registry
                    .transition(job_id, JobStatus::Verifying, "Checking stored Canvas connection");
                let connection = repository::find_connection(&self.db, account_id)
                    .await
                    .map_err(JobError::Store)?
                    .ok_or(JobError::NotConnected)?;
                self.canvas.verify_connection(&connection).await?;
                Ok(connection)
            }
        }
    }

    /// Courses first; then assignments per course alongside the announcement
    /// listing, which only needs the course ids. At most `fetch_concurrency`
    /// listing calls are in flight at once.
    async fn fetch(
        &self,
        job_id: Uuid,
        connection: &ConnectionConfig,
        progress: &Progress,
    ) -> Result<FetchedBatch, JobError> {
        self.registry
            .transition(job_id, JobStatus::Fetching, "Fetching courses");
        let courses = self.canvas.list_courses(connection).await;
        progress.bump();
        if courses.is_empty() {
            return Err(JobError::NoCourses);
        }

        let course_ids: Vec<String> = courses.iter().map(|c| c.external_id.clone()).collect();
        let total = course_ids.len();
        self.registry.transition(
            job_id,
            JobStatus::Fetching,
            format!("Fetching assignments for {} courses", total),
        );

        // Every listing call holds a permit, so the announcement listing
        // counts against the same cap as the assignment fan-out.
        let permits = Semaphore::new(self.fetch_concurrency);
        let finished = AtomicUsize::new(0);
        let canvas = &self.canvas;
        let registry = &self.registry;
        let permits_ref = &permits;
        let finished_ref = &finished;

        let assignments = stream::iter(course_ids.clone())
            .map(|course_id: String| async move {
                let found = {
                    let _permit = permits_ref.acquire().await.ok();
                    canvas.list_assignments(connection, &course_id).await
                };
                progress.bump();
                let done = finished_ref.fetch_add(1, Ordering::Relaxed) + 1;
                registry.transition(
                    job_id,
                    JobStatus::Fetching,
                    format!("Fetched assignments for {}/{} courses", done, total),
                );
                found
            })
            .buffer_unordered(self.fetch_concurrency)
            .collect::<Vec<_>>();

        let announcements = async {
            let found = {
                let _permit = permits_ref.acquire().await.ok();
                canvas.list_announcements(connection, &course_ids).await
            };
            progress.bump();
            found
        };

        let (assignment_sets, announcements) = tokio::join!(assignments, announcements);

        Ok(FetchedBatch {
            courses,
            assignments: assignment_sets.into_iter().flatten().collect(),
            announcements,
        })
    }
}

/// Resolves once `progress` has not moved for `stall`. Returns the stall
/// length in seconds.
async fn watchdog(mut progress: watch::Receiver<u64>, stall: Duration) -> u64 {
    loop {
        match tokio::time::timeout(stall, progress.changed()).await {
            Ok(Ok(())) => continue,
            Ok(Err(_)) => std::future::pending::<()>().await,
            Err(_) => return stall.as_secs(),
        }
    }
}
