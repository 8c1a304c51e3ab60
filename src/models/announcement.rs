use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Course id stored when an announcement cannot be tied to a course.
pub const UNKNOWN_COURSE: &str = "unknown";

static CONTEXT_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^course_(\d+)$").unwrap());
static COURSE_LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/courses/(\d+)").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Announcement {
    pub external_id: String,
    pub account_id: String,
    pub course_id: String,
    pub title: String,
    pub body_html: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub html_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementRecord {
    pub external_id: String,
    pub course_id: String,
    pub title: String,
    pub body_html: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub html_url: Option<String>,
}

/// Best-effort course id for an announcement.
///
/// Prefers an explicit `course_<id>` context code, then a `/courses/<id>`
/// segment in the deep link, and finally [`UNKNOWN_COURSE`].
pub fn resolve_course_id(context_code: Option<&str>, html_url: Option<&str>) -> String {
    if let Some(caps) = context_code.and_then(|code| CONTEXT_CODE_REGEX.captures(code)) {
        return caps[1].to_string();
    }

    html_url
        .and_then(|link| COURSE_LINK_REGEX.captures(link))
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| UNKNOWN_COURSE.to_string())
}
