//! Credential strategies that turn what the user submitted into a bearer token.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dto::{OAuthErrorResponse, TokenResponse};
use super::error::AuthError;
use crate::config::{AuthStrategyKind, CanvasConfig};

#[derive(Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    AccessToken { token: String },
    Password { username: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::AccessToken { .. } => f.write_str("Credentials::AccessToken(<redacted>)"),
            Credentials::Password { .. } => f.write_str("Credentials::Password(<redacted>)"),
        }
    }
}

impl Credentials {
    pub fn kind(&self) -> AuthStrategyKind {
        match self {
            Credentials::AccessToken { .. } => AuthStrategyKind::AccessToken,
            Credentials::Password { .. } => AuthStrategyKind::Password,
        }
    }

    /// Rejects blank fields. The message never contains the values.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Credentials::AccessToken { token } if token.trim().is_empty() => {
                Err("access token is required".to_string())
            }
            Credentials::Password { username, password }
                if username.trim().is_empty() || password.is_empty() =>
            {
                Err("username and password are required".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
pub trait CredentialStrategy: Send + Sync {
    fn kind(&self) -> AuthStrategyKind;

    async fn obtain_token(
        &self,
        http: &Client,
        base_url: &str,
        credentials: &Credentials,
    ) -> Result<String, AuthError>;
}

/// Personal access tokens are already bearer tokens.
pub struct AccessTokenStrategy;

#[async_trait]
impl CredentialStrategy for AccessTokenStrategy {
    fn kind(&self) -> AuthStrategyKind {
        AuthStrategyKind::AccessToken
    }

    async fn obtain_token(
        &self,
        _http: &Client,
        _base_url: &str,
        credentials: &Credentials,
    ) -> Result<String, AuthError> {
        match credentials {
            Credentials::AccessToken { token } => Ok(token.trim().to_string()),
            Credentials::Password { .. } => Err(AuthError::InvalidToken),
        }
    }
}

/// Exchanges username/password at the OAuth2 token endpoint. While the
/// institution waits for second-factor approval the endpoint answers
/// `authorization_pending`; we keep asking until `approval_timeout`.
pub struct PasswordGrantStrategy {
    client_id: String,
    client_secret: String,
    request_timeout: Duration,
    poll_interval: Duration,
    approval_timeout: Duration,
}

impl PasswordGrantStrategy {
    pub fn new(
        client_id: String,
        client_secret: String,
        request_timeout: Duration,
        poll_interval: Duration,
        approval_timeout: Duration,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            request_timeout,
            poll_interval,
            approval_timeout,
        }
    }

    fn form_body(&self, username: &str, password: &str) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "password")
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .append_pair("username", username)
            .append_pair("password", password)
            .finish()
    }
}

#[async_trait]
impl CredentialStrategy for PasswordGrantStrategy {
    fn kind(&self) -> AuthStrategyKind {
        AuthStrategyKind::Password
    }

    async fn obtain_token(
        &self,
        http: &Client,
        base_url: &str,
        credentials: &Credentials,
    ) -> Result<String, AuthError> {
        let (username, password) = match credentials {
            Credentials::Password { username, password } => (username.trim(), password.as_str()),
            Credentials::AccessToken { .. } => return Err(AuthError::InvalidPassword),
        };

        let token_url =
            super::endpoint(base_url, "login/oauth2/token").map_err(|_| AuthError::InvalidUrl)?;
        let body = self.form_body(username, password);
        let deadline = Instant::now() + self.approval_timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let response = http
                .post(token_url.clone())
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .timeout(self.request_timeout)
                .body(body.clone())
                .send()
                .await
                .map_err(|e| {
                    warn!("token endpoint unreachable: {}", e.without_url());
                    AuthError::HostUnreachable
                })?;

            let status = response.status();
            if status.is_success() {
                let token: TokenResponse = response
                    .json()
                    .await
                    .map_err(|_| AuthError::UnexpectedResponse { status: status.as_u16() })?;
                info!("password grant succeeded after {} attempt(s)", attempts);
                return Ok(token.access_token);
            }

            let error_code = response
                .json::<OAuthErrorResponse>()
                .await
                .map(|e| e.error)
                .unwrap_or_default();

            match (status, error_code.as_str()) {
                (_, "authorization_pending") => {
                    if Instant::now() + self.poll_interval > deadline {
                        return Err(AuthError::ApprovalRequired);
                    }
                    debug!("waiting for second-factor approval (attempt {})", attempts);
                    tokio::time::sleep(self.poll_interval).await;
                }
                (_, "invalid_grant") | (StatusCode::UNAUTHORIZED, _) => {
                    return Err(AuthError::InvalidPassword);
                }
                _ => {
                    return Err(AuthError::UnexpectedResponse { status: status.as_u16() });
                }
            }
        }
    }
}

/// Picks the strategy named in the configuration.
pub fn strategy_for(config: &CanvasConfig) -> Box<dyn CredentialStrategy> {
    match config.auth_strategy {
        AuthStrategyKind::AccessToken => Box::new(AccessTokenStrategy),
        AuthStrategyKind::Password => Box::new(PasswordGrantStrategy::new(
            config.oauth_client_id.clone().unwrap_or_default(),
            config
                .oauth_client_secret
                .as_ref()
                .map(|s| s.0.clone())
                .unwrap_or_default(),
            config.verify_timeout,
            config.approval_poll_interval,
            config.approval_timeout,
        )),
    }
}
