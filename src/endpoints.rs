// Auth-related endpoints of the backend API

use serde::Serialize;
use serde_json::Value;

use crate::auth::{CredentialPair, LoginRequest, TokenPairResponse};
use crate::error::ApiError;
use crate::http_client::{ApiClient, ApiRequest};
use crate::session::Profile;

pub const TOKEN_PATH: &str = "token/";
pub const REGISTER_PATH: &str = "register/";
pub const PROFILE_PATH: &str = "profile/";

/// Registration payload (`POST register/`)
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub password_confirm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
}

impl NewUser {
    pub fn credentials(&self) -> LoginRequest {
        LoginRequest {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Issue a token pair; bypasses the refresh pipeline so bad credentials stay a plain 401
pub async fn obtain_token(
    client: &ApiClient,
    credentials: &LoginRequest,
) -> Result<CredentialPair, ApiError> {
    let body = serde_json::to_value(credentials)
        .map_err(|e| ApiError::Unknown(format!("unserializable credentials: {}", e)))?;
    let response = client
        .send_public(&ApiRequest::post(TOKEN_PATH, body))
        .await?;
    let tokens: TokenPairResponse = response.json()?;
    Ok(tokens.into())
}

/// Create an account; does not return tokens
pub async fn register(client: &ApiClient, user: &NewUser) -> Result<Value, ApiError> {
    Ok(client.post(REGISTER_PATH, user).await?.body)
}

pub async fn profile(client: &ApiClient) -> Result<Profile, ApiError> {
    client.get(PROFILE_PATH).await?.json()
}

/// Replace the profile; returns the server's representation
pub async fn update_profile(client: &ApiClient, data: &Value) -> Result<Profile, ApiError> {
    client.put(PROFILE_PATH, data).await?.json()
}
