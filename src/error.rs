// Error handling module
// Defines the request error taxonomy and its user-facing reduction

use serde_json::Value;
use thiserror::Error;

use crate::auth::AuthError;

const NETWORK_MESSAGE: &str = "Network error. Check your connection.";
const FALLBACK_MESSAGE: &str = "An error occurred.";
const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

/// Errors that can surface from a request sent through the pipeline
#[derive(Error, Debug)]
pub enum ApiError {
    /// No response reached the client (connect failure, timeout, broken body)
    #[error("Network error: {0}")]
    Network(String),

    /// 401 response; the pipeline absorbs it unless the replay is rejected too
    #[error("Authorization expired")]
    AuthorizationExpired { body: Value },

    /// Refresh endpoint rejected the refresh token or was unreachable
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// No refresh token was persisted
    #[error("No refresh token available")]
    NoRefreshToken,

    /// 4xx with a JSON payload from the backend
    #[error("Validation error: {status} - {body}")]
    ValidationError { status: u16, body: Value },

    /// Any other non-success response
    #[error("API error: {status} - {message}")]
    Http { status: u16, message: String },

    /// Credential store failure
    #[error("Credential store error: {0}")]
    Store(#[from] anyhow::Error),

    /// Fallback
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ApiError {
    /// HTTP status carried by the error, if a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::AuthorizationExpired { .. } => Some(401),
            ApiError::ValidationError { status, .. } | ApiError::Http { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Whether this error means the session is gone for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, ApiError::RefreshFailed(_) | ApiError::NoRefreshToken)
    }

    /// Build an error from a non-success status and its raw body
    pub fn from_response(status: u16, text: String) -> Self {
        let body = serde_json::from_str::<Value>(&text).ok();

        if status == 401 {
            return ApiError::AuthorizationExpired {
                body: body.unwrap_or(Value::Null),
            };
        }

        if (400..500).contains(&status) {
            if let Some(body) = body {
                return ApiError::ValidationError { status, body };
            }
        }

        ApiError::Http {
            status,
            message: text,
        }
    }

    /// Reduce the error to one human-readable line
    ///
    /// Field-level payloads are searched in order: a bare string body, `detail`,
    /// the first `non_field_errors` entry, then the first field with its first
    /// message.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) => NETWORK_MESSAGE.to_string(),
            // Refresh details stay in the logs
            ApiError::RefreshFailed(_) | ApiError::NoRefreshToken => {
                SESSION_EXPIRED_MESSAGE.to_string()
            }
            ApiError::ValidationError { body, .. } => {
                reduce_payload(body).unwrap_or_else(|| FALLBACK_MESSAGE.to_string())
            }
            ApiError::AuthorizationExpired { body } => {
                reduce_payload(body).unwrap_or_else(|| self.to_string())
            }
            ApiError::Http { message, .. } if !message.is_empty() => message.clone(),
            ApiError::Http { .. } | ApiError::Store(_) | ApiError::Unknown(_) => {
                FALLBACK_MESSAGE.to_string()
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NoRefreshToken => ApiError::NoRefreshToken,
            other => ApiError::RefreshFailed(other.to_string()),
        }
    }
}

fn reduce_payload(body: &Value) -> Option<String> {
    if let Some(text) = body.as_str() {
        return Some(text.to_string());
    }

    let object = body.as_object()?;

    if let Some(detail) = object.get("detail") {
        return Some(first_message(detail));
    }

    if let Some(first) = object
        .get("non_field_errors")
        .and_then(|v| v.as_array())
        .and_then(|list| list.first())
    {
        return Some(first_message(first));
    }

    let (field, messages) = object.iter().next()?;
    Some(format!("{}: {}", field, first_message(messages)))
}

/// First message of a value that may be a string, a list, or something else
fn first_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.first().map(first_message).unwrap_or_default(),
        other => other.to_string(),
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
