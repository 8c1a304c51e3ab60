pub mod auth;
pub mod dto;
pub mod error;

use std::fmt;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

pub use auth::{CredentialStrategy, Credentials};
pub use error::{AuthError, FetchError};

use crate::config::{AuthStrategyKind, CanvasConfig};
use crate::models::{AnnouncementRecord, AssignmentRecord, ConnectionConfig, CourseRecord};

/// Result of a successful credential check.
#[derive(Clone)]
pub struct VerifiedAccount {
    pub display_name: String,
    pub access_token: String,
}

impl fmt::Debug for VerifiedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedAccount")
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Read access to one Canvas account.
///
/// Only the verify calls can fail. Listing calls absorb their own
/// failures and hand back whatever they managed to fetch (usually nothing),
/// so one broken course never takes the whole sync down with it.
#[async_trait]
pub trait CanvasClient: Send + Sync {
    async fn verify_credentials(
        &self,
        base_url: &str,
        credentials: &Credentials,
    ) -> Result<VerifiedAccount, AuthError>;

    /// Re-checks a stored token. Returns the account's display name.
    async fn verify_connection(&self, connection: &ConnectionConfig) -> Result<String, AuthError>;

    async fn list_courses(&self, connection: &ConnectionConfig) -> Vec<CourseRecord>;

    async fn list_assignments(
        &self,
        connection: &ConnectionConfig,
        course_id: &str,
    ) -> Vec<AssignmentRecord>;

    async fn list_announcements(
        &self,
        connection: &ConnectionConfig,
        course_ids: &[String],
    ) -> Vec<AnnouncementRecord>;
}

/// Trims trailing slashes and checks the URL is an absolute http(s) URL.
pub fn normalize_base_url(raw: &str) -> Result<String, AuthError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed).map_err(|_| AuthError::InvalidUrl)?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(AuthError::InvalidUrl);
    }
    Ok(trimmed.to_string())
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}

/// True when a course name matches one of the configured "not a real course"
/// labels.
pub fn is_excluded_course(name: &str, patterns: &[String]) -> bool {
    let lower = name.to_lowercase();
    patterns
        .iter()
        .any(|p| !p.is_empty() && lower.contains(&p.to_lowercase()))
}

/// `Some(true)` when a `Link` header advertises a `rel="next"` page,
/// `Some(false)` when Link headers exist but none does, `None` without any.
fn link_has_next(headers: &HeaderMap) -> Option<bool> {
    let mut seen = false;
    for value in headers.get_all(LINK) {
        seen = true;
        let Ok(value) = value.to_str() else { continue };
        let next = value.split(',').any(|link| {
            link.split(';').skip(1).any(|param| {
                let param = param.trim();
                param
                    .strip_prefix("rel=")
                    .map(|rel| rel.trim_matches('"').split_whitespace().any(|r| r == "next"))
                    .unwrap_or(false)
            })
        });
        if next {
            return Some(true);
        }
    }
    seen.then_some(false)
}

pub struct CanvasHttpClient {
    client: Client,
    config: CanvasConfig,
    strategy: Box<dyn CredentialStrategy>,
}

impl CanvasHttpClient {
    pub fn new(config: CanvasConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("canvas-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let strategy = auth::strategy_for(&config);
        Ok(Self {
            client,
            config,
            strategy,
        })
    }

    pub fn auth_strategy(&self) -> AuthStrategyKind {
        self.strategy.kind()
    }

    /// GETs `/api/v1/{path}` page by page. A `Link` header decides whether
    /// another page follows; without one, a short page ends the listing.
    /// `per_page` stays fixed for the whole listing so `page` offsets line up.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        connection: &ConnectionConfig,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, FetchError> {
        let base = endpoint(&connection.base_url, &format!("api/v1/{}", path))?;
        let per_page = self.config.per_page as usize;
        let mut items = Vec::new();

        for page in 1..=self.config.max_pages {
            let mut url = base.clone();
            {
                let mut query = url.query_pairs_mut();
                for (key, value) in params {
                    query.append_pair(key, value);
                }
                query.append_pair("per_page", &per_page.to_string());
                query.append_pair("page", &page.to_string());
            }

            let response = self
                .client
                .get(url)
                .bearer_auth(&connection.access_token)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Http {
                    status,
                    body: error::truncate_body(&body),
                });
            }

            let has_next = link_has_next(response.headers());
            let batch: Vec<T> = response.json().await?;
            let count = batch.len();
            items.extend(batch);
            debug!("{} page {}: {} item(s)", path, page, count);

            let more = match has_next {
                Some(next) => next && count > 0,
                None => count >= per_page,
            };
            if !more {
                return Ok(items);
            }
        }

        warn!(
            "{} stopped after {} pages; results may be incomplete",
            path, self.config.max_pages
        );
        Ok(items)
    }

    async fn fetch_display_name(&self, base_url: &str, token: &str) -> Result<String, AuthError> {
        let url = endpoint(base_url, "api/v1/users/self").map_err(|_| AuthError::InvalidUrl)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .timeout(self.config.verify_timeout)
            .send()
            .await
            .map_err(|e| {
                warn!("credential check could not reach Canvas: {}", e.without_url());
                AuthError::HostUnreachable
            })?;

        match response.status() {
            status if status.is_success() => {
                let profile: dto::UserProfile = response
                    .json()
                    .await
                    .map_err(|_| AuthError::UnexpectedResponse { status: status.as_u16() })?;
                Ok(profile.name)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::InvalidToken),
            status => Err(AuthError::UnexpectedResponse { status: status.as_u16() }),
        }
    }
}

#[async_trait]
impl CanvasClient for CanvasHttpClient {
    async fn verify_credentials(
        &self,
        base_url: &str,
        credentials: &Credentials,
    ) -> Result<VerifiedAccount, AuthError> {
        let base_url = normalize_base_url(base_url)?;
        let access_token = self
            .strategy
            .obtain_token(&self.client, &base_url, credentials)
            .await?;
        let display_name = self.fetch_display_name(&base_url, &access_token).await?;
        info!("verified Canvas credentials for {}", display_name);
        Ok(VerifiedAccount {
            display_name,
            access_token,
        })
    }

    async fn verify_connection(&self, connection: &ConnectionConfig) -> Result<String, AuthError> {
        self.fetch_display_name(&connection.base_url, &connection.access_token)
            .await
    }

    async fn list_courses(&self, connection: &ConnectionConfig) -> Vec<CourseRecord> {
        let params = [("enrollment_state", "active".to_string())];
        match self.get_paginated::<dto::CourseDto>(connection, "courses", &params).await {
            Ok(raw) => {
                let total = raw.len();
                let courses: Vec<CourseRecord> = raw
                    .into_iter()
                    .filter_map(dto::CourseDto::into_record)
                    .filter(|c| !is_excluded_course(&c.name, &self.config.course_exclude))
                    .collect();
                info!("listed {} course(s), kept {}", total, courses.len());
                courses
            }
            Err(e) => {
                warn!("failed to list courses for {}: {}", connection.account_id, e);
                Vec::new()
            }
        }
    }

    async fn list_assignments(
        &self,
        connection: &ConnectionConfig,
        course_id: &str,
    ) -> Vec<AssignmentRecord> {
        let path = format!("courses/{}/assignments", course_id);
        let params = [
            ("include[]", "submission".to_string()),
            ("order_by", "due_at".to_string()),
        ];
        match self.get_paginated::<dto::AssignmentDto>(connection, &path, &params).await {
            Ok(raw) => raw.into_iter().map(|a| a.into_record(course_id)).collect(),
            Err(e) => {
                warn!("failed to list assignments for course {}: {}", course_id, e);
                Vec::new()
            }
        }
    }

    async fn list_announcements(
        &self,
        connection: &ConnectionConfig,
        course_ids: &[String],
    ) -> Vec<AnnouncementRecord> {
        if course_ids.is_empty() {
            return Vec::new();
        }

        let params: Vec<(&str, String)> = course_ids
            .iter()
            .map(|id| ("context_codes[]", format!("course_{}", id)))
            .collect();
        match self
            .get_paginated::<dto::AnnouncementDto>(connection, "announcements", &params)
            .await
        {
            Ok(raw) => raw.into_iter().map(dto::AnnouncementDto::into_record).collect(),
            Err(e) => {
                warn!("failed to list announcements for {}: {}", connection.account_id, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_base_urls() {
        assert_eq!(
            normalize_base_url(" https://canvas.example.edu/// ").unwrap(),
            "https://canvas.example.edu"
        );
        assert_eq!(normalize_base_url("canvas.example.edu"), Err(AuthError::InvalidUrl));
        assert_eq!(normalize_base_url("ftp://canvas.example.edu"), Err(AuthError::InvalidUrl));
    }

    #[test]
    fn builds_endpoints_under_a_path_prefix() {
        let url = endpoint("https://lms.example.edu/canvas/", "/api/v1/courses").unwrap();
        assert_eq!(url.as_str(), "https://lms.example.edu/canvas/api/v1/courses");
    }

    #[test]
    fn reads_next_relation_from_link_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(link_has_next(&headers), None);

        headers.insert(
            LINK,
            r#"<https://c.example.edu/api/v1/courses?page=1>; rel="current", <https://c.example.edu/api/v1/courses?page=2>; rel="next""#
                .parse()
                .unwrap(),
        );
        assert_eq!(link_has_next(&headers), Some(true));

        headers.insert(
            LINK,
            r#"<https://c.example.edu/api/v1/courses?page=1>; rel="first", <https://c.example.edu/api/v1/courses?page=3>; rel="last""#
                .parse()
                .unwrap(),
        );
        assert_eq!(link_has_next(&headers), Some(false));
    }

    #[test]
    fn excludes_sandbox_courses_case_insensitively() {
        let patterns = vec!["Training".to_string(), "Sandbox".to_string()];
        assert!(is_excluded_course("Faculty SANDBOX 2024", &patterns));
        assert!(is_excluded_course("Canvas Training", &patterns));
        assert!(!is_excluded_course("Organic Chemistry", &patterns));
        assert!(!is_excluded_course("Canvas Training", &[]));
    }
}
