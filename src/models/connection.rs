use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-account Canvas connection. `access_token` is the only credential kept.
#[derive(Clone, Serialize, Deserialize, FromRow)]
pub struct ConnectionConfig {
    pub account_id: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub display_name: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("account_id", &self.account_id)
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .field("display_name", &self.display_name)
            .field("last_synced_at", &self.last_synced_at)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub base_url: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub course_count: i64,
    pub has_data: bool,
}
