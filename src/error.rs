use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;

use crate::models::{ApiError, AuthErrorBody};

// Failures talking to the counter store or the user store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    // Also covers "no such user" so callers can't enumerate accounts
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("authentication required")]
    Unauthenticated,

    #[error("admin privileges required")]
    InsufficientPrivilege,

    #[error("too many requests, retry in {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("session token error: {0}")]
    Token(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("auth secret must be at least {min} bytes in production")]
    WeakSecret { min: usize },

    #[error("auth secret must not be empty")]
    MissingSecret,

    #[error("{name} must be greater than zero")]
    NonPositive { name: &'static str },
}

pub const LOGIN_PATH: &str = "/admin/login";

// Body for a 429 on the credentials callback. The `url` carries the
// TooManyRequests marker so the login form can show its own message.
pub fn rate_limited_response(retry_after_secs: u64) -> Response {
    let body = AuthErrorBody {
        error: "TooManyRequests".to_string(),
        message: "Too many login attempts. Please try again later.".to_string(),
        url: format!("{}?error=TooManyRequests", LOGIN_PATH),
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    if let Ok(val) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert("retry-after", val);
    }
    response
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            AuthError::RateLimitExceeded { retry_after_secs } => {
                rate_limited_response(retry_after_secs)
            }
            AuthError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                Json(ApiError::new("Authentication required")),
            )
                .into_response(),
            AuthError::InsufficientPrivilege => (
                StatusCode::FORBIDDEN,
                Json(ApiError::new("Admin privileges required")),
            )
                .into_response(),
            // store outages look like a plain login failure to the client
            AuthError::InvalidCredentials | AuthError::StoreUnavailable(_) => (
                StatusCode::UNAUTHORIZED,
                Json(AuthErrorBody {
                    error: "CredentialsSignin".to_string(),
                    message: "Invalid email or password".to_string(),
                    url: format!("{}?error=CredentialsSignin", LOGIN_PATH),
                }),
            )
                .into_response(),
            AuthError::Hashing(_) | AuthError::Token(_) => {
                tracing::error!(error = %self, "Internal authentication failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiError::new("Internal server error")),
                )
                    .into_response()
            }
        }
    }
}
