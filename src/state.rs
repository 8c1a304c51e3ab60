use sqlx::SqlitePool;

use crate::config::AuthStrategyKind;
use crate::services::JobEngine;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub jobs: JobEngine,
    /// Credential type `/connect` accepts.
    pub auth_strategy: AuthStrategyKind,
}
