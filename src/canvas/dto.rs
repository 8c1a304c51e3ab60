use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::models::{
    AnnouncementRecord, AssignmentKind, AssignmentRecord, CourseRecord, SubmissionStatus,
    announcement::resolve_course_id,
};

/// Canvas ids come back as numbers, or as strings when the instance is
/// configured for string ids.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Num(u64),
        Str(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Num(n) => n.to_string(),
        RawId::Str(s) => s,
    })
}

#[derive(Debug, Deserialize)]
pub struct UserProfile {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct CourseDto {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub course_code: Option<String>,
}

impl CourseDto {
    /// Courses without a name are placeholders Canvas returns for
    /// restricted enrollments; they are skipped.
    pub fn into_record(self) -> Option<CourseRecord> {
        let name = self.name.map(|n| unescape_html(n.trim()))?;
        if name.is_empty() {
            return None;
        }
        Some(CourseRecord {
            external_id: self.id,
            name,
            code: self
                .course_code
                .map(|c| unescape_html(c.trim()))
                .filter(|c| !c.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmissionDto {
    #[serde(default)]
    pub workflow_state: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub late: bool,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentDto {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub points_possible: Option<f64>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub submission: Option<SubmissionDto>,
    #[serde(default)]
    pub submission_types: Vec<String>,
}

impl AssignmentDto {
    pub fn into_record(self, course_id: &str) -> AssignmentRecord {
        let kind = AssignmentKind::from_submission_types(&self.submission_types);
        let (submission_status, score, submitted_at) = match self.submission {
            Some(sub) => (
                sub.workflow_state
                    .as_deref()
                    .map(|state| SubmissionStatus::from_workflow_state(state, sub.late)),
                sub.score,
                sub.submitted_at,
            ),
            None => (None, None, None),
        };

        AssignmentRecord {
            external_id: self.id,
            course_id: course_id.to_string(),
            name: unescape_html(self.name.trim()),
            due_at: self.due_at,
            points_possible: self.points_possible,
            submission_status,
            score,
            submitted_at,
            html_url: self.html_url,
            kind,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnnouncementDto {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub context_code: Option<String>,
}

impl AnnouncementDto {
    pub fn into_record(self) -> AnnouncementRecord {
        let course_id = resolve_course_id(self.context_code.as_deref(), self.html_url.as_deref());
        AnnouncementRecord {
            external_id: self.id,
            course_id,
            title: unescape_html(self.title.trim()),
            body_html: self.message.filter(|m| !m.trim().is_empty()),
            posted_at: self.posted_at,
            html_url: self.html_url,
        }
    }
}

/// Undo the entity escaping Canvas applies to plain-text fields.
pub fn unescape_html(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
