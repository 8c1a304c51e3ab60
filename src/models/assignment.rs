use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SubmissionStatus {
    NotSubmitted,
    Submitted,
    Graded,
    Late,
    Unknown,
}

impl SubmissionStatus {
    /// Maps a Canvas `workflow_state` (plus the `late` flag) onto our status.
    pub fn from_workflow_state(state: &str, late: bool) -> Self {
        match state {
            "unsubmitted" => SubmissionStatus::NotSubmitted,
            "submitted" | "pending_review" if late => SubmissionStatus::Late,
            "submitted" | "pending_review" => SubmissionStatus::Submitted,
            "graded" => SubmissionStatus::Graded,
            _ => SubmissionStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::NotSubmitted => "not submitted",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Graded => "graded",
            SubmissionStatus::Late => "late",
            SubmissionStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AssignmentKind {
    Assignment,
    Quiz,
    Ungraded,
}

impl AssignmentKind {
    pub fn from_submission_types(types: &[String]) -> Self {
        if types.iter().any(|t| t == "online_quiz") {
            AssignmentKind::Quiz
        } else if !types.is_empty()
            && types.iter().all(|t| t == "none" || t == "not_graded")
        {
            AssignmentKind::Ungraded
        } else {
            AssignmentKind::Assignment
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentKind::Assignment => "assignment",
            AssignmentKind::Quiz => "quiz",
            AssignmentKind::Ungraded => "ungraded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Assignment {
    pub external_id: String,
    pub account_id: String,
    pub course_id: String,
    pub name: String,
    pub due_at: Option<DateTime<Utc>>,
    pub points_possible: Option<f64>,
    pub submission_status: Option<SubmissionStatus>,
    pub score: Option<f64>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub html_url: Option<String>,
    pub kind: AssignmentKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    /// Work the student still owes: no submission recorded yet, and the item
    /// is something that can be handed in.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.submission_status,
            None | Some(SubmissionStatus::NotSubmitted)
        ) && matches!(self.kind, AssignmentKind::Assignment | AssignmentKind::Quiz)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub external_id: String,
    pub course_id: String,
    pub name: String,
    pub due_at: Option<DateTime<Utc>>,
    pub points_possible: Option<f64>,
    pub submission_status: Option<SubmissionStatus>,
    pub score: Option<f64>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub html_url: Option<String>,
    pub kind: AssignmentKind,
}
