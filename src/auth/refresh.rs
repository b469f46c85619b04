// Token refresh call

use reqwest::{Client, Url};

use super::types::{AuthError, RefreshRequest, RefreshResponse};

/// Path of the refresh endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "token/refresh/";

/// Exchange a refresh token for a new access token
///
/// Goes straight to the transport: the refresh call is never intercepted by the
/// request pipeline, so a 401 here is a terminal rejection.
pub async fn refresh_access_token(
    client: &Client,
    base_url: &Url,
    refresh_token: &str,
) -> Result<RefreshResponse, AuthError> {
    let url = base_url
        .join(REFRESH_PATH)
        .map_err(|e| AuthError::Network(format!("invalid refresh URL: {}", e)))?;

    tracing::info!(url = %url, "Refreshing access token...");

    let response = client
        .post(url)
        .json(&RefreshRequest {
            refresh: refresh_token,
        })
        .send()
        .await
        .map_err(|e| {
            let kind = if e.is_timeout() { "timeout" } else { "transport" };
            tracing::warn!(error_kind = kind, error = %e, "Refresh request did not complete");
            AuthError::Network(e.to_string())
        })?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            body = %error_text,
            "Token refresh rejected"
        );
        return Err(AuthError::Rejected {
            status: status.as_u16(),
            message: error_text,
        });
    }

    let data: RefreshResponse = response.json().await.map_err(|e| AuthError::Rejected {
        status: status.as_u16(),
        message: format!("malformed refresh response: {}", e),
    })?;

    if data.access.is_empty() {
        return Err(AuthError::Rejected {
            status: status.as_u16(),
            message: "refresh response does not contain an access token".to_string(),
        });
    }

    tracing::info!(
        rotated = data.refresh.is_some(),
        "Access token refreshed"
    );

    Ok(data)
}
