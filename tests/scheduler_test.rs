use std::sync::Arc;
use std::time::Duration;

use canvas_sync::models::SyncSummary;
use canvas_sync::services::{JobReaper, JobRegistry};

#[tokio::test]
async fn reaper_drops_expired_jobs_only() {
    let registry = Arc::new(JobRegistry::new());
    let (finished, _) = registry.claim("acct-1");
    let (running, _) = registry.claim("acct-2");
    registry.complete(finished, SyncSummary::default());

    let reaper = JobReaper::new(registry.clone(), Duration::ZERO, Duration::from_secs(60));
    assert_eq!(reaper.run_once(), 1);
    assert!(registry.get(finished).is_none());
    assert!(registry.get(running).is_some());
    assert_eq!(registry.active_for("acct-2"), Some(running));
}

#[tokio::test]
async fn reaper_loop_runs_on_its_interval() {
    let registry = Arc::new(JobRegistry::new());
    let (job_id, _) = registry.claim("acct-1");
    registry.fail(job_id, "invalid token");

    let reaper = JobReaper::new(registry.clone(), Duration::ZERO, Duration::from_secs(1));
    let handle = tokio::spawn(reaper.start());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(registry.is_empty());
    handle.abort();
}

#[tokio::test]
async fn recent_jobs_survive_the_reaper() {
    let registry = Arc::new(JobRegistry::new());
    let (job_id, _) = registry.claim("acct-1");
    registry.complete(job_id, SyncSummary::default());

    let reaper = JobReaper::new(registry.clone(), Duration::from_secs(3600), Duration::from_secs(60));
    assert_eq!(reaper.run_once(), 0);
    assert_eq!(registry.len(), 1);
}
