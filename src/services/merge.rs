use sqlx::SqlitePool;
use tracing::info;

use crate::db::repository;
use crate::models::{AnnouncementRecord, AssignmentRecord, CourseRecord, SyncSummary};

/// Everything one crawl brought back for an account.
#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    pub courses: Vec<CourseRecord>,
    pub assignments: Vec<AssignmentRecord>,
    pub announcements: Vec<AnnouncementRecord>,
}

impl FetchedBatch {
    pub fn summary(&self) -> SyncSummary {
        SyncSummary {
            courses_found: self.courses.len(),
            assignments_found: self.assignments.len(),
            announcements_found: self.announcements.len(),
        }
    }
}

/// Upserts a batch into the store and stamps `last_synced_at`.
///
/// Rows missing from the batch are left alone: a course whose assignment
/// listing failed comes back empty, and that must not erase what we already
/// have for it. Each entity kind commits in its own transaction, and the sync
/// marker only moves once all three have committed.
pub async fn merge_batch(
    db: &SqlitePool,
    account_id: &str,
    batch: &FetchedBatch,
) -> Result<SyncSummary, sqlx::Error> {
    let courses = repository::upsert_courses(db, account_id, &batch.courses).await?;
    let assignments = repository::upsert_assignments(db, account_id, &batch.assignments).await?;
    let announcements =
        repository::upsert_announcements(db, account_id, &batch.announcements).await?;
    repository::touch_last_synced(db, account_id).await?;

    info!(
        "merged {} courses, {} assignments, {} announcements for {}",
        courses, assignments, announcements, account_id
    );

    Ok(batch.summary())
}
