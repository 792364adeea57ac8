//! Authentication-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 255, message = "identifier is required"))]
    pub identifier: String,
    #[validate(length(min = 1, max = 1024, message = "password is required"))]
    pub password: String,
}

/// Token refresh request
#[derive(Debug, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "refresh_token is required"))]
    pub refresh_token: String,
}

/// Logout request
#[derive(Debug, Deserialize, Validate)]
pub struct LogoutRequest {
    #[validate(length(min = 1, message = "refresh_token is required"))]
    pub refresh_token: String,
}

/// Password policy check request
#[derive(Debug, Deserialize, Validate)]
pub struct PasswordPolicyRequest {
    #[validate(length(max = 1024))]
    pub password: String,
}

/// Current session info
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub subject: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}
