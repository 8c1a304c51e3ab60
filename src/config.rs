use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not set")]
    Missing { name: &'static str },

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// How credentials submitted to `/connect` are turned into a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategyKind {
    AccessToken,
    Password,
}

impl FromStr for AuthStrategyKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token" | "access_token" => Ok(AuthStrategyKind::AccessToken),
            "password" => Ok(AuthStrategyKind::Password),
            _ => Err(()),
        }
    }
}

/// String wrapper that never prints its contents.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted(pub String);

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

#[derive(Debug, Clone)]
pub struct CanvasConfig {
    pub per_page: u32,
    pub max_pages: u32,
    pub fetch_concurrency: usize,
    pub verify_timeout: Duration,
    pub request_timeout: Duration,
    /// Courses whose name contains any of these (case-insensitive) are skipped.
    pub course_exclude: Vec<String>,
    pub auth_strategy: AuthStrategyKind,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<Redacted>,
    pub approval_poll_interval: Duration,
    pub approval_timeout: Duration,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            per_page: 100,
            max_pages: 50,
            fetch_concurrency: 4,
            verify_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            course_exclude: vec!["Training".to_string(), "Sandbox".to_string()],
            auth_strategy: AuthStrategyKind::AccessToken,
            oauth_client_id: None,
            oauth_client_secret: None,
            approval_poll_interval: Duration::from_secs(2),
            approval_timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    /// A job with no progress for this long is failed.
    pub stall_timeout: Duration,
    /// How long `POST /accounts/{id}/sync` waits before answering 504.
    pub sync_timeout: Duration,
    pub job_ttl: Duration,
    pub reap_interval: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(120),
            sync_timeout: Duration::from_secs(300),
            job_ttl: Duration::from_secs(3600),
            reap_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub canvas: CanvasConfig,
    pub jobs: JobConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let canvas_defaults = CanvasConfig::default();
        let job_defaults = JobConfig::default();

        let database_url = lookup("DATABASE_URL")
            .unwrap_or_else(|| "sqlite://canvas_sync.db?mode=rwc".to_string());
        let bind_addr = parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?;
        let log_filter = lookup("RUST_LOG").unwrap_or_else(|| "canvas_sync=debug".to_string());

        let course_exclude = match lookup("CANVAS_COURSE_EXCLUDE") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => canvas_defaults.course_exclude,
        };

        let auth_strategy = match lookup("CANVAS_AUTH_STRATEGY") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "CANVAS_AUTH_STRATEGY",
                value: raw,
            })?,
            None => AuthStrategyKind::AccessToken,
        };

        let oauth_client_id = lookup("CANVAS_OAUTH_CLIENT_ID");
        let oauth_client_secret = lookup("CANVAS_OAUTH_CLIENT_SECRET").map(Redacted);
        if auth_strategy == AuthStrategyKind::Password {
            if oauth_client_id.is_none() {
                return Err(ConfigError::Missing { name: "CANVAS_OAUTH_CLIENT_ID" });
            }
            if oauth_client_secret.is_none() {
                return Err(ConfigError::Missing { name: "CANVAS_OAUTH_CLIENT_SECRET" });
            }
        }

        let per_page: u32 = parse_or(&lookup, "CANVAS_PER_PAGE", canvas_defaults.per_page)?;
        if per_page == 0 {
            return Err(ConfigError::Invalid { name: "CANVAS_PER_PAGE", value: "0".to_string() });
        }

        let canvas = CanvasConfig {
            per_page,
            max_pages: parse_or(&lookup, "CANVAS_MAX_PAGES", canvas_defaults.max_pages)?,
            fetch_concurrency: parse_or(
                &lookup,
                "CANVAS_FETCH_CONCURRENCY",
                canvas_defaults.fetch_concurrency,
            )?
            .clamp(1, 8),
            verify_timeout: secs_or(&lookup, "CANVAS_VERIFY_TIMEOUT_SECS", canvas_defaults.verify_timeout)?,
            request_timeout: secs_or(&lookup, "CANVAS_REQUEST_TIMEOUT_SECS", canvas_defaults.request_timeout)?,
            course_exclude,
            auth_strategy,
            oauth_client_id,
            oauth_client_secret,
            approval_poll_interval: canvas_defaults.approval_poll_interval,
            approval_timeout: secs_or(&lookup, "CANVAS_APPROVAL_TIMEOUT_SECS", canvas_defaults.approval_timeout)?,
        };

        let jobs = JobConfig {
            stall_timeout: secs_or(&lookup, "SYNC_STALL_TIMEOUT_SECS", job_defaults.stall_timeout)?,
            sync_timeout: secs_or(&lookup, "SYNC_TIMEOUT_SECS", job_defaults.sync_timeout)?,
            job_ttl: secs_or(&lookup, "JOB_TTL_SECS", job_defaults.job_ttl)?,
            reap_interval: secs_or(&lookup, "JOB_REAP_INTERVAL_SECS", job_defaults.reap_interval)?,
        };

        // Approval polling makes no progress, so it must give up before the
        // stall watchdog fires.
        if canvas.auth_strategy == AuthStrategyKind::Password
            && canvas.approval_timeout >= jobs.stall_timeout
        {
            return Err(ConfigError::Invalid {
                name: "CANVAS_APPROVAL_TIMEOUT_SECS",
                value: format!(
                    "{} (must be below SYNC_STALL_TIMEOUT_SECS={})",
                    canvas.approval_timeout.as_secs(),
                    jobs.stall_timeout.as_secs()
                ),
            });
        }

        Ok(Self {
            database_url,
            bind_addr,
            log_filter,
            canvas,
            jobs,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, name, default.as_secs()).map(Duration::from_secs)
}
