use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Login form submitted to the credentials callback
#[derive(Deserialize, Clone, Default)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

// Successful login - where the client should go next
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LoginResponse {
    pub url: String,
}

// Identity fields a client-side session query may see
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_superuser: bool,
}

// {success: false, error} used by the protected API
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiError {
    pub success: bool,
    pub error: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

// {error, message, url} shape the login form understands
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthErrorBody {
    pub error: String,
    pub message: String,
    pub url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub created_by_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Clone, Default)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize, Clone, Default)]
pub struct DeletePostQuery {
    pub id: Option<String>,
}

// {success: true, post, message} returned by the posts API
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PostResponse {
    pub success: bool,
    pub post: Post,
    pub message: String,
}
