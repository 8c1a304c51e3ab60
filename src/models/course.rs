use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A course row as stored for one account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub external_id: String,
    pub account_id: String,
    pub name: String,
    pub code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A course as returned by Canvas, before it is bound to an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub external_id: String,
    pub name: String,
    pub code: Option<String>,
}
