//! Error types for the Canvas client.

use reqwest::StatusCode;
use thiserror::Error;

/// Longest upstream body excerpt kept for diagnostics.
pub const MAX_ERROR_BODY: usize = 200;

/// Credential verification failures. These end a connect job and are shown to
/// the user as-is, so the messages never include submitted credentials.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("invalid username or password")]
    InvalidPassword,

    #[error("could not reach host")]
    HostUnreachable,

    #[error("approval required on your device")]
    ApprovalRequired,

    #[error("unexpected response from Canvas (HTTP {status})")]
    UnexpectedResponse { status: u16 },

    #[error("invalid Canvas URL")]
    InvalidUrl,
}

/// A single listing call failed. Never leaves the client; callers see an
/// empty slice instead.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Canvas API {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.without_url().to_string())
        } else {
            FetchError::Network(err.without_url().to_string())
        }
    }
}

/// Cuts an upstream error body down to [`MAX_ERROR_BODY`] characters.
pub fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
