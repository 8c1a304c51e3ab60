use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{
    Announcement, AnnouncementRecord, Assignment, AssignmentRecord, ConnectionConfig,
    ConnectionStatus, Course, CourseRecord,
};

pub async fn find_connection(
    db: &SqlitePool,
    account_id: &str,
) -> Result<Option<ConnectionConfig>, sqlx::Error> {
    sqlx::query_as::<_, ConnectionConfig>(
        "SELECT account_id, base_url, access_token, display_name, last_synced_at, created_at, updated_at FROM connection_configs WHERE account_id = ?"
    )
    .bind(account_id)
    .fetch_optional(db)
    .await
}

/// Creates or replaces the account's connection. `last_synced_at` survives a
/// reconnect; it only moves in [`touch_last_synced`].
pub async fn upsert_connection(
    db: &SqlitePool,
    account_id: &str,
    base_url: &str,
    access_token: &str,
    display_name: Option<&str>,
) -> Result<ConnectionConfig, sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO connection_configs
            (account_id, base_url, access_token, display_name, last_synced_at, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?5)
        ON CONFLICT (account_id) DO UPDATE SET
            base_url = excluded.base_url,
            access_token = excluded.access_token,
            display_name = excluded.display_name,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(account_id)
    .bind(base_url)
    .bind(access_token)
    .bind(display_name)
    .bind(now)
    .execute(db)
    .await?;

    find_connection(db, account_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn touch_last_synced(db: &SqlitePool, account_id: &str) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE connection_configs SET last_synced_at = ?1, updated_at = ?1 WHERE account_id = ?2",
    )
    .bind(now)
    .bind(account_id)
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

pub async fn upsert_courses(
    db: &SqlitePool,
    account_id: &str,
    courses: &[CourseRecord],
) -> Result<usize, sqlx::Error> {
    let now = Utc::now();
    let mut tx = db.begin().await?;

    for course in courses {
        sqlx::query(
            r#"
            INSERT INTO courses (external_id, account_id, name, code, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT (external_id, account_id) DO UPDATE SET
                name = excluded.name,
                code = excluded.code,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&course.external_id)
        .bind(account_id)
        .bind(&course.name)
        .bind(&course.code)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(courses.len())
}

pub async fn upsert_assignments(
    db: &SqlitePool,
    account_id: &str,
    assignments: &[AssignmentRecord],
) -> Result<usize, sqlx::Error> {
    let now = Utc::now();
    let mut tx = db.begin().await?;

    for assignment in assignments {
        sqlx::query(
            r#"
            INSERT INTO assignments
                (external_id, account_id, course_id, name, due_at, points_possible,
                submission_status, score, submitted_at, html_url, kind, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            ON CONFLICT (external_id, account_id) DO UPDATE SET
                course_id = excluded.course_id,
                name = excluded.name,
                due_at = excluded.due_at,
                points_possible = excluded.points_possible,
                submission_status = excluded.submission_status,
                score = excluded.score,
                submitted_at = excluded.submitted_at,
                html_url = excluded.html_url,
                kind = excluded.kind,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&assignment.external_id)
        .bind(account_id)
        .bind(&assignment.course_id)
        .bind(&assignment.name)
        .bind(assignment.due_at)
        .bind(assignment.points_possible)
        .bind(assignment.submission_status)
        .bind(assignment.score)
        .bind(assignment.submitted_at)
        .bind(&assignment.html_url)
        .bind(assignment.kind)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(assignments.len())
}

pub async fn upsert_announcements(
    db: &SqlitePool,
    account_id: &str,
    announcements: &[AnnouncementRecord],
) -> Result<usize, sqlx::Error> {
    let now = Utc::now();
    let mut tx = db.begin().await?;

    for announcement in announcements {
        sqlx::query(
            r#"
            INSERT INTO announcements
                (external_id, account_id, course_id, title, body_html, posted_at, html_url,
                created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT (external_id, account_id) DO UPDATE SET
                course_id = excluded.course_id,
                title = excluded.title,
                body_html = excluded.body_html,
                posted_at = excluded.posted_at,
                html_url = excluded.html_url,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&announcement.external_id)
        .bind(account_id)
        .bind(&announcement.course_id)
        .bind(&announcement.title)
        .bind(&announcement.body_html)
        .bind(announcement.posted_at)
        .bind(&announcement.html_url)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(announcements.len())
}

pub async fn fetch_courses(db: &SqlitePool, account_id: &str) -> Result<Vec<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(
        "SELECT external_id, account_id, name, code, created_at, updated_at FROM courses WHERE account_id = ? ORDER BY name COLLATE NOCASE, external_id"
    )
    .bind(account_id)
    .fetch_all(db)
    .await
}

/// Assignments by due date, undated ones last.
pub async fn fetch_assignments(
    db: &SqlitePool,
    account_id: &str,
) -> Result<Vec<Assignment>, sqlx::Error> {
    sqlx::query_as::<_, Assignment>(
        r#"
        SELECT external_id, account_id, course_id, name, due_at, points_possible,
            submission_status, score, submitted_at, html_url, kind, created_at, updated_at
        FROM assignments
        WHERE account_id = ?
        ORDER BY due_at IS NULL, due_at, name
        "#,
    )
    .bind(account_id)
    .fetch_all(db)
    .await
}

/// Announcements newest first.
pub async fn fetch_announcements(
    db: &SqlitePool,
    account_id: &str,
) -> Result<Vec<Announcement>, sqlx::Error> {
    sqlx::query_as::<_, Announcement>(
        r#"
        SELECT external_id, account_id, course_id, title, body_html, posted_at, html_url,
            created_at, updated_at
        FROM announcements
        WHERE account_id = ?
        ORDER BY posted_at IS NULL, posted_at DESC, title
        "#,
    )
    .bind(account_id)
    .fetch_all(db)
    .await
}

pub async fn count_courses(db: &SqlitePool, account_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM courses WHERE account_id = ?")
        .bind(account_id)
        .fetch_one(db)
        .await
}

pub async fn connection_status(
    db: &SqlitePool,
    account_id: &str,
) -> Result<ConnectionStatus, sqlx::Error> {
    let connection = find_connection(db, account_id).await?;
    let course_count = count_courses(db, account_id).await?;

    Ok(ConnectionStatus {
        connected: connection.is_some(),
        base_url: connection.as_ref().map(|c| c.base_url.clone()),
        last_synced_at: connection.and_then(|c| c.last_synced_at),
        course_count,
        has_data: course_count > 0,
    })
}
