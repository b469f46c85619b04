use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::{CredentialStore, RefreshCoordinator};
use crate::error::ApiError;
use crate::session::SessionInvalidator;

/// Connection settings for the API client
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Base URL every request path is joined onto; must end with `/`
    pub base_url: Url,
    pub connect_timeout: Duration,
    /// Fixed per-call timeout; a timed-out call is a network error
    pub request_timeout: Duration,
}

/// One logical API call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Successful response, body decoded as JSON when possible
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        serde_json::from_value(self.body)
            .map_err(|e| ApiError::Unknown(format!("unexpected response shape: {}", e)))
    }
}

/// Which send of a logical call this is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    Retry,
}

/// A request paired with its attempt; a call is replayed at most once
#[derive(Debug, Clone, Copy)]
struct Dispatch<'a> {
    request: &'a ApiRequest,
    attempt: Attempt,
}

impl<'a> Dispatch<'a> {
    fn first(request: &'a ApiRequest) -> Self {
        Self {
            request,
            attempt: Attempt::First,
        }
    }

    fn retry(self) -> Self {
        Self {
            request: self.request,
            attempt: Attempt::Retry,
        }
    }

    fn may_refresh(&self) -> bool {
        self.attempt == Attempt::First
    }
}

/// HTTP client for the backend API
/// Attaches the bearer token to every call and replays a call once after a
/// coordinated token refresh when it receives a 401
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    base_url: Url,

    store: Arc<dyn CredentialStore>,

    coordinator: RefreshCoordinator,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(
        settings: &ClientSettings,
        store: Arc<dyn CredentialStore>,
        invalidator: Arc<SessionInvalidator>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let coordinator = RefreshCoordinator::new(
            client.clone(),
            settings.base_url.clone(),
            store.clone(),
            invalidator,
        );

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            store,
            coordinator,
        })
    }

    /// Send a request through the authenticated pipeline
    ///
    /// - no access token: sent without `Authorization`
    /// - 401 on the first attempt: waits for a refreshed token, replays once
    /// - 401 on the replay, or any other status: returned as-is
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let span = tracing::debug_span!("api_call", request_id = %Uuid::new_v4());
        self.send_authenticated(request).instrument(span).await
    }

    /// Send without credentials and without 401 interception
    pub async fn send_public(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let span = tracing::debug_span!("api_call", request_id = %Uuid::new_v4(), public = true);
        self.execute(Dispatch::first(request), None)
            .instrument(span)
            .await
    }

    async fn send_authenticated(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut dispatch = Dispatch::first(request);
        let mut token = self.store.access_token()?;

        loop {
            match self.execute(dispatch, token.as_deref()).await {
                Err(ApiError::AuthorizationExpired { .. }) if dispatch.may_refresh() => {
                    tracing::warn!(
                        method = %request.method,
                        path = %request.path,
                        "Received 401, waiting for refreshed token..."
                    );

                    // On failure the session is already invalidated
                    token = Some(self.coordinator.acquire_token(token.as_deref()).await?);
                    dispatch = dispatch.retry();
                }
                result => return result,
            }
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.send(&ApiRequest::get(path)).await
    }

    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<ApiResponse, ApiError> {
        self.send(&ApiRequest::post(path, to_body(body)?)).await
    }

    pub async fn put<B: Serialize>(&self, path: &str, body: &B) -> Result<ApiResponse, ApiError> {
        self.send(&ApiRequest::put(path, to_body(body)?)).await
    }

    pub async fn patch<B: Serialize>(&self, path: &str, body: &B) -> Result<ApiResponse, ApiError> {
        self.send(&ApiRequest::patch(path, to_body(body)?)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.send(&ApiRequest::delete(path)).await
    }

    /// Resolve a request path against the base URL
    pub fn url_for(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Unknown(format!("invalid path {}: {}", path, e)))
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    async fn execute(
        &self,
        dispatch: Dispatch<'_>,
        token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let request = dispatch.request;
        let url = self.url_for(&request.path)?;

        tracing::debug!(
            method = %request.method,
            url = %url,
            attempt = ?dispatch.attempt,
            authenticated = token.is_some(),
            "Sending HTTP request"
        );

        let mut builder = self.client.request(request.method.clone(), url.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                // Categorize the error for better debugging
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connection_failed"
                } else if e.is_request() {
                    "request_error"
                } else {
                    "unknown"
                };

                tracing::warn!(
                    error_kind = error_kind,
                    error = %e,
                    url = %url,
                    "HTTP request error"
                );

                return Err(ApiError::Network(format!("{} ({})", e, error_kind)));
            }
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read response body: {}", e)))?;

        tracing::debug!(status = %status, url = %url, "Received HTTP response");

        if status.is_success() {
            return Ok(ApiResponse {
                status: status.as_u16(),
                body: decode_body(&text),
            });
        }

        if status.as_u16() != 401 {
            tracing::warn!(
                status = status.as_u16(),
                url = %url,
                response_body = %text,
                "HTTP request failed with error response"
            );
        }

        Err(ApiError::from_response(status.as_u16(), text))
    }
}

fn to_body<B: Serialize>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::Unknown(format!("unserializable body: {}", e)))
}

/// JSON when the body parses, the raw text otherwise, `Null` when empty
fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_allows_single_retry() {
        let request = ApiRequest::get("profile/");
        let first = Dispatch::first(&request);
        assert!(first.may_refresh());

        let retry = first.retry();
        assert_eq!(retry.attempt, Attempt::Retry);
        assert!(!retry.may_refresh());
        assert!(!retry.retry().may_refresh());
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(""), Value::Null);
        assert_eq!(decode_body(r#"{"a":1}"#), json!({ "a": 1 }));
        assert_eq!(decode_body("plain"), json!("plain"));
    }

    #[test]
    fn test_request_builders() {
        let req = ApiRequest::post("declarations/rechercher/", json!({ "numero": "X1" }))
            .with_query("page", "2");
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.query, vec![("page".to_string(), "2".to_string())]);
        assert!(req.body.is_some());
        assert!(ApiRequest::delete("declarations/3/").body.is_none());
    }

    #[test]
    fn test_response_json() {
        let response = ApiResponse {
            status: 200,
            body: json!({ "access": "a", "refresh": "r" }),
        };
        let pair: crate::auth::TokenPairResponse = response.json().unwrap();
        assert_eq!(pair.access, "a");

        let bad = ApiResponse {
            status: 200,
            body: json!([]),
        };
        assert!(matches!(
            bad.json::<crate::auth::TokenPairResponse>(),
            Err(ApiError::Unknown(_))
        ));
    }
}
