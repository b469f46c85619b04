// Authentication types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Access + refresh token pair, always written together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Username/password submitted to the token endpoint
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Token issuance response (`POST token/`)
#[derive(Debug, Deserialize)]
pub struct TokenPairResponse {
    pub access: String,
    pub refresh: String,
}

impl From<TokenPairResponse> for CredentialPair {
    fn from(data: TokenPairResponse) -> Self {
        Self {
            access_token: data.access,
            refresh_token: data.refresh,
        }
    }
}

/// Refresh request body (`POST token/refresh/`)
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Refresh response; `refresh` is only present when the backend rotates
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Outcome of a refresh attempt, fanned out to every waiter
///
/// Cloneable so the same failure can be delivered to the whole queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no refresh token stored")]
    NoRefreshToken,

    #[error("refresh rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    #[error("refresh request failed: {0}")]
    Network(String),

    #[error("credential store unavailable: {0}")]
    Store(String),

    #[error("refresh abandoned")]
    Abandoned,
}
