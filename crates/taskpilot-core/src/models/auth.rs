use serde::{Deserialize, Serialize};

use super::id::{deserialize_id, deserialize_optional_id};

/// Body of `/api/auth/login` and `/api/auth/register`.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Successful login.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Successful refresh. Servers differ on whether they echo the refresh
/// token and user id back; only the access token is used.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub user_id: Option<String>,
}

/// Account returned by `/api/auth/register`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserResponse {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub email: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}
