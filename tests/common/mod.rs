#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use canvas_sync::canvas::{AuthError, CanvasClient, Credentials, VerifiedAccount};
use canvas_sync::models::{
    AnnouncementRecord, AssignmentKind, AssignmentRecord, ConnectionConfig, CourseRecord,
    SubmissionStatus,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

/// Fresh in-memory database with migrations applied. A single connection
/// keeps every query on the same in-memory database.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

pub fn course(id: &str, name: &str) -> CourseRecord {
    CourseRecord {
        external_id: id.to_string(),
        name: name.to_string(),
        code: None,
    }
}

pub fn assignment(
    id: &str,
    course_id: &str,
    due_at: Option<DateTime<Utc>>,
    status: Option<SubmissionStatus>,
) -> AssignmentRecord {
    AssignmentRecord {
        external_id: id.to_string(),
        course_id: course_id.to_string(),
        name: format!("Assignment {}", id),
        due_at,
        points_possible: Some(10.0),
        submission_status: status,
        score: None,
        submitted_at: None,
        html_url: None,
        kind: AssignmentKind::Assignment,
    }
}

pub fn announcement(id: &str, course_id: &str) -> AnnouncementRecord {
    AnnouncementRecord {
        external_id: id.to_string(),
        course_id: course_id.to_string(),
        title: format!("Announcement {}", id),
        body_html: Some("<p>Hello</p>".to_string()),
        posted_at: Some(Utc::now()),
        html_url: None,
    }
}

/// Scriptable in-process Canvas.
#[derive(Default)]
pub struct FakeCanvas {
    pub verify_error: Mutex<Option<AuthError>>,
    pub verify_delay: Mutex<Option<Duration>>,
    pub courses: Mutex<Vec<CourseRecord>>,
    pub assignments: Mutex<Vec<AssignmentRecord>>,
    pub announcements: Mutex<Vec<AnnouncementRecord>>,
    /// Course ids whose assignment listing "fails" (returns nothing).
    pub failing_courses: Mutex<Vec<String>>,
    /// Delay applied to every listing call.
    pub list_delay: Mutex<Option<Duration>>,
    pub verify_calls: Mutex<usize>,
    in_flight: AtomicUsize,
    /// Highest number of listing calls seen running at once.
    pub max_in_flight: AtomicUsize,
}

impl FakeCanvas {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_data(
        &self,
        courses: Vec<CourseRecord>,
        assignments: Vec<AssignmentRecord>,
        announcements: Vec<AnnouncementRecord>,
    ) {
        *self.courses.lock().unwrap() = courses;
        *self.assignments.lock().unwrap() = assignments;
        *self.announcements.lock().unwrap() = announcements;
    }

    async fn list_pause(&self) {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn check(&self) -> Result<(), AuthError> {
        *self.verify_calls.lock().unwrap() += 1;
        let delay = *self.verify_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.verify_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CanvasClient for FakeCanvas {
    async fn verify_credentials(
        &self,
        _base_url: &str,
        credentials: &Credentials,
    ) -> Result<VerifiedAccount, AuthError> {
        self.check().await?;
        let access_token = match credentials {
            Credentials::AccessToken { token } => token.clone(),
            Credentials::Password { .. } => "issued-token".to_string(),
        };
        Ok(VerifiedAccount {
            display_name: "Test Student".to_string(),
            access_token,
        })
    }

    async fn verify_connection(&self, _connection: &ConnectionConfig) -> Result<String, AuthError> {
        self.check().await?;
        Ok("Test Student".to_string())
    }

    async fn list_courses(&self, _connection: &ConnectionConfig) -> Vec<CourseRecord> {
        self.list_pause().await;
        self.courses.lock().unwrap().clone()
    }

    async fn list_assignments(
        &self,
        _connection: &ConnectionConfig,
        course_id: &str,
    ) -> Vec<AssignmentRecord> {
        self.list_pause().await;
        if self.failing_courses.lock().unwrap().iter().any(|c| c == course_id) {
            return Vec::new();
        }
        self.assignments
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.course_id == course_id)
            .cloned()
            .collect()
    }

    async fn list_announcements(
        &self,
        _connection: &ConnectionConfig,
        course_ids: &[String],
    ) -> Vec<AnnouncementRecord> {
        self.list_pause().await;
        self.announcements
            .lock()
            .unwrap()
            .iter()
            .filter(|a| course_ids.contains(&a.course_id))
            .cloned()
            .collect()
    }
}

pub fn token(value: &str) -> Credentials {
    Credentials::AccessToken {
        token: value.to_string(),
    }
}
