//! Read-only views over the store: the flattened text context handed to a
//! downstream assistant, and the dashboard counters.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::canvas::dto::unescape_html;
use crate::db::repository;
use crate::models::{Announcement, Assignment, Course, SubmissionStatus, UNKNOWN_COURSE};

/// Returned when the account has no courses stored.
pub const EMPTY_CONTEXT: &str = "No Canvas data synced yet. Connect a Canvas account and run a sync to load courses, assignments and announcements.";

const EXCERPT_CHARS: usize = 200;

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static SPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

pub async fn build_context(db: &SqlitePool, account_id: &str) -> Result<String, sqlx::Error> {
    let courses = repository::fetch_courses(db, account_id).await?;
    if courses.is_empty() {
        return Ok(EMPTY_CONTEXT.to_string());
    }
    let assignments = repository::fetch_assignments(db, account_id).await?;
    let announcements = repository::fetch_announcements(db, account_id).await?;
    Ok(render_context(&courses, &assignments, &announcements))
}

/// Renders the context from rows already ordered the way the repository
/// returns them (assignments by due date, announcements newest first).
pub fn render_context(
    courses: &[Course],
    assignments: &[Assignment],
    announcements: &[Announcement],
) -> String {
    if courses.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }

    let course_names: HashMap<&str, &str> = courses
        .iter()
        .map(|c| (c.external_id.as_str(), c.name.as_str()))
        .collect();
    let course_name = |id: &str| course_names.get(id).copied().unwrap_or(id).to_string();

    let mut lines: Vec<String> = Vec::new();

    let pending = pending_assignments(assignments);
    lines.push(format!("# NOT YET SUBMITTED ({})", pending.len()));
    if pending.is_empty() {
        lines.push("Nothing pending.".to_string());
    }
    for a in &pending {
        lines.push(format!(
            "- {} | {} | due: {} | {}",
            a.name,
            course_name(&a.course_id),
            format_due(a.due_at),
            a.kind.as_str()
        ));
    }

    lines.push(String::new());
    lines.push("# COURSES".to_string());
    for course in courses {
        lines.push(String::new());
        lines.push(match &course.code {
            Some(code) => format!("## {} ({})", course.name, code),
            None => format!("## {}", course.name),
        });

        let course_assignments: Vec<&Assignment> = assignments
            .iter()
            .filter(|a| a.course_id == course.external_id)
            .collect();
        if course_assignments.is_empty() {
            lines.push("Assignments: none".to_string());
        } else {
            lines.push("Assignments:".to_string());
            lines.extend(course_assignments.into_iter().map(|a| format!("- {}", describe_assignment(a))));
        }

        let course_announcements: Vec<&Announcement> = announcements
            .iter()
            .filter(|a| a.course_id == course.external_id)
            .collect();
        if !course_announcements.is_empty() {
            lines.push("Announcements:".to_string());
            lines.extend(course_announcements.into_iter().map(|a| format!("- {}", describe_announcement(a))));
        }
    }

    // Announcements tied to a course we never listed, or to none at all.
    let other: Vec<&Announcement> = announcements
        .iter()
        .filter(|a| a.course_id == UNKNOWN_COURSE || !course_names.contains_key(a.course_id.as_str()))
        .collect();
    if !other.is_empty() {
        lines.push(String::new());
        lines.push("# OTHER ANNOUNCEMENTS".to_string());
        lines.extend(other.into_iter().map(|a| format!("- {}", describe_announcement(a))));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// The not-yet-submitted set, due date ascending with undated items last.
pub fn pending_assignments(assignments: &[Assignment]) -> Vec<&Assignment> {
    let mut pending: Vec<&Assignment> = assignments.iter().filter(|a| a.is_pending()).collect();
    pending.sort_by(|a, b| match (a.due_at, b.due_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    pending
}

fn format_due(due_at: Option<DateTime<Utc>>) -> String {
    due_at
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "no due date".to_string())
}

fn describe_assignment(a: &Assignment) -> String {
    let mut line = format!("{} [{}] | due: {}", a.name, a.kind.as_str(), format_due(a.due_at));
    if let Some(points) = a.points_possible {
        line.push_str(&format!(" | points: {}", points));
    }
    let status = a
        .submission_status
        .map(|s| s.as_str())
        .unwrap_or(SubmissionStatus::NotSubmitted.as_str());
    line.push_str(&format!(" | {}", status));
    if let Some(score) = a.score {
        match a.points_possible {
            Some(points) => line.push_str(&format!(" | score: {}/{}", score, points)),
            None => line.push_str(&format!(" | score: {}", score)),
        }
    }
    line
}

fn describe_announcement(a: &Announcement) -> String {
    let posted = a
        .posted_at
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "undated".to_string());
    let mut line = format!("{} ({})", a.title, posted);
    if let Some(excerpt) = a.body_html.as_deref().map(excerpt).filter(|e| !e.is_empty()) {
        line.push_str(&format!(": {}", excerpt));
    }
    line
}

/// Plain-text excerpt of an HTML body.
pub fn excerpt(html: &str) -> String {
    let text = TAG_REGEX.replace_all(html, " ");
    let text = unescape_html(&text);
    let text = SPACE_REGEX.replace_all(text.trim(), " ");
    if text.chars().count() <= EXCERPT_CHARS {
        return text.into_owned();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountStats {
    pub course_count: usize,
    pub due_this_week: usize,
    pub due_within_24h: usize,
    pub not_submitted: usize,
    /// Mean of score / points over graded items, as a percentage.
    pub average_score: Option<f64>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

pub async fn build_stats(
    db: &SqlitePool,
    account_id: &str,
    now: DateTime<Utc>,
) -> Result<AccountStats, sqlx::Error> {
    let course_count = repository::count_courses(db, account_id).await?;
    let assignments = repository::fetch_assignments(db, account_id).await?;
    let last_synced_at = repository::find_connection(db, account_id)
        .await?
        .and_then(|c| c.last_synced_at);

    Ok(compute_stats(
        course_count.max(0) as usize,
        &assignments,
        last_synced_at,
        now,
    ))
}

pub fn compute_stats(
    course_count: usize,
    assignments: &[Assignment],
    last_synced_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> AccountStats {
    let due_between = |horizon: Duration| {
        assignments
            .iter()
            .filter(|a| matches!(a.due_at, Some(due) if due > now && due <= now + horizon))
            .count()
    };

    let percentages: Vec<f64> = assignments
        .iter()
        .filter_map(|a| match (a.score, a.points_possible) {
            (Some(score), Some(points)) if points > 0.0 => Some(score * 100.0 / points),
            _ => None,
        })
        .collect();
    let average_score = if percentages.is_empty() {
        None
    } else {
        let mean = percentages.iter().sum::<f64>() / percentages.len() as f64;
        Some((mean * 10.0).round() / 10.0)
    };

    AccountStats {
        course_count,
        due_this_week: due_between(Duration::days(7)),
        due_within_24h: due_between(Duration::hours(24)),
        not_submitted: assignments.iter().filter(|a| a.is_pending()).count(),
        average_score,
        last_synced_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssignmentKind;

    fn course(id: &str, name: &str) -> Course {
        Course {
            external_id: id.to_string(),
            account_id: "acct".to_string(),
            name: name.to_string(),
            code: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn assignment(
        id: &str,
        course_id: &str,
        due_at: Option<DateTime<Utc>>,
        status: Option<SubmissionStatus>,
        kind: AssignmentKind,
    ) -> Assignment {
        Assignment {
            external_id: id.to_string(),
            account_id: "acct".to_string(),
            course_id: course_id.to_string(),
            name: format!("Assignment {}", id),
            due_at,
            points_possible: Some(10.0),
            submission_status: status,
            score: None,
            submitted_at: None,
            html_url: None,
            kind,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn announcement(id: &str, course_id: &str, body: Option<&str>) -> Announcement {
        Announcement {
            external_id: id.to_string(),
            account_id: "acct".to_string(),
            course_id: course_id.to_string(),
            title: format!("Announcement {}", id),
            body_html: body.map(String::from),
            posted_at: None,
            html_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_store_gives_placeholder() {
        assert_eq!(render_context(&[], &[], &[]), EMPTY_CONTEXT);
    }

    #[test]
    fn pending_is_ordered_with_undated_last() {
        let now = Utc::now();
        let items = vec![
            assignment("1", "c1", None, None, AssignmentKind::Assignment),
            assignment("2", "c1", Some(now + Duration::days(3)), Some(SubmissionStatus::NotSubmitted), AssignmentKind::Quiz),
            assignment("3", "c1", Some(now - Duration::days(1)), None, AssignmentKind::Assignment),
            assignment("4", "c1", Some(now), Some(SubmissionStatus::Submitted), AssignmentKind::Assignment),
            assignment("5", "c1", Some(now), None, AssignmentKind::Ungraded),
            assignment("6", "c1", Some(now), Some(SubmissionStatus::Unknown), AssignmentKind::Assignment),
        ];

        let ids: Vec<&str> = pending_assignments(&items)
            .iter()
            .map(|a| a.external_id.as_str())
            .collect();
        assert_eq!(ids, vec!["3", "2", "1"]);
    }

    #[test]
    fn pending_section_comes_before_courses() {
        let now = Utc::now();
        let courses = vec![course("c1", "Algebra"), course("c2", "Biology")];
        let assignments = vec![assignment("1", "c1", Some(now), None, AssignmentKind::Assignment)];
        let announcements = vec![
            announcement("a1", "c2", Some("<p>Lab moved to <b>room 4</b></p>")),
            announcement("a2", UNKNOWN_COURSE, None),
        ];

        let text = render_context(&courses, &assignments, &announcements);
        let pending_at = text.find("# NOT YET SUBMITTED (1)").unwrap();
        let courses_at = text.find("# COURSES").unwrap();
        assert!(pending_at < courses_at);
        assert!(text.contains("## Biology\nAssignments: none\nAnnouncements:\n- Announcement a1 (undated): Lab moved to room 4"));
        assert!(text.contains("# OTHER ANNOUNCEMENTS\n- Announcement a2 (undated)"));
    }

    #[test]
    fn renders_full_layout_line_by_line() {
        let mut algebra = course("c1", "Algebra");
        algebra.code = Some("MATH-101".to_string());
        let assignments = vec![assignment("1", "c1", None, None, AssignmentKind::Assignment)];

        let text = render_context(&[algebra], &assignments, &[]);
        assert_eq!(
            text,
            "# NOT YET SUBMITTED (1)\n\
             - Assignment 1 | Algebra | due: no due date | assignment\n\
             \n\
             # COURSES\n\
             \n\
             ## Algebra (MATH-101)\n\
             Assignments:\n\
             - Assignment 1 [assignment] | due: no due date | points: 10 | not submitted\n"
        );
    }

    #[test]
    fn renders_status_and_score() {
        let mut graded = assignment("1", "c1", None, Some(SubmissionStatus::Graded), AssignmentKind::Quiz);
        graded.score = Some(9.5);
        let text = render_context(&[course("c1", "Algebra")], &[graded], &[]);
        assert!(text.contains("Assignment 1 [quiz] | due: no due date | points: 10 | graded | score: 9.5/10"));
    }

    #[test]
    fn excerpt_strips_markup_and_truncates() {
        assert_eq!(excerpt("<p>Exam &amp; quiz\n\n  on <i>Friday</i></p>"), "Exam & quiz on Friday");
        let long = "word ".repeat(100);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert!(cut.chars().count() <= EXCERPT_CHARS + 3);
    }

    #[test]
    fn stats_count_windows_and_average() {
        let now = Utc::now();
        let mut a = assignment("1", "c1", Some(now + Duration::hours(3)), None, AssignmentKind::Assignment);
        let b = assignment("2", "c1", Some(now + Duration::days(5)), None, AssignmentKind::Assignment);
        let mut c = assignment("3", "c1", Some(now - Duration::days(1)), Some(SubmissionStatus::Graded), AssignmentKind::Assignment);
        c.score = Some(8.0);
        a.score = Some(9.0);
        a.submission_status = Some(SubmissionStatus::Graded);

        let stats = compute_stats(1, &[a, b, c], None, now);
        assert_eq!(stats.due_within_24h, 1);
        assert_eq!(stats.due_this_week, 2);
        assert_eq!(stats.not_submitted, 1);
        assert_eq!(stats.average_score, Some(85.0));
    }
}
