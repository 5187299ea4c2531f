use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::AuthError;
use crate::gate::CurrentSession;
use crate::models::{ApiError, CreatePostRequest, DeletePostQuery, Post, PostResponse};
use crate::state::AppState;

fn api_error(status: StatusCode, error: &str) -> Response {
    (status, Json(ApiError::new(error))).into_response()
}

// GET / and GET /posts
pub async fn list_posts_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Post>> {
    Json(state.posts.list().await)
}

// GET /posts/{id}
pub async fn get_post_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let post = match id.parse::<i64>() {
        Ok(id) => state.posts.get(id).await,
        Err(_) => None,
    };
    match post {
        Some(post) => Json(post).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "Post not found"),
    }
}

// GET /api/posts
pub async fn list_admin_posts_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Post>> {
    Json(state.posts.list().await)
}

// POST /api/posts
pub async fn create_post_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    body: Bytes,
) -> Response {
    // the gate only lets superuser sessions this far
    let Some(session) = session else {
        return AuthError::Unauthenticated.into_response();
    };

    let request = match serde_json::from_slice::<CreatePostRequest>(&body) {
        Ok(req) if !req.title.trim().is_empty() && !req.content.trim().is_empty() => req,
        Ok(_) => return api_error(StatusCode::BAD_REQUEST, "Invalid input"),
        Err(e) => {
            debug!("Rejected post body: {}", e);
            return api_error(StatusCode::BAD_REQUEST, "Invalid input");
        }
    };

    let post = state
        .posts
        .create(&request.title, &request.content, &session.identity.id)
        .await;
    info!(post_id = post.id, slug = %post.slug, user_id = %session.identity.id, "Post created");

    (
        StatusCode::CREATED,
        Json(PostResponse {
            success: true,
            post,
            message: "Post created successfully".to_string(),
        }),
    )
        .into_response()
}

// DELETE /api/posts?id=
pub async fn delete_post_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeletePostQuery>,
) -> Response {
    let Some(raw) = query.id.filter(|id| !id.is_empty()) else {
        return api_error(StatusCode::BAD_REQUEST, "Post ID is required");
    };
    let Ok(id) = raw.trim().parse::<i64>() else {
        return api_error(StatusCode::BAD_REQUEST, "Invalid post ID");
    };

    match state.posts.delete(id).await {
        Some(post) => {
            info!(post_id = post.id, "Post deleted");
            Json(PostResponse {
                success: true,
                post,
                message: "Post deleted successfully".to_string(),
            })
            .into_response()
        }
        None => api_error(StatusCode::NOT_FOUND, "Post not found"),
    }
}
