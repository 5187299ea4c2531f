pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod posts;
pub mod rate_limit;
pub mod slug;
pub mod state;
pub mod store;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;

use crate::gate::access_gate_middleware;
use crate::handlers::*;
use crate::state::AppState;

// Every route sits behind the access gate
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/", get(list_posts_handler))
        .route("/posts", get(list_posts_handler))
        .route("/posts/{id}", get(get_post_handler))
        .route("/admin/login", get(login_page_handler))
        .route("/admin", get(dashboard_handler))
        .route("/api/auth/callback/credentials", post(credentials_handler))
        .route("/api/auth/session", get(session_handler))
        .route("/api/auth/signout", post(signout_handler))
        .route(
            "/api/posts",
            get(list_admin_posts_handler)
                .post(create_post_handler)
                .delete(delete_post_handler),
        )
        .layer(middleware::from_fn_with_state(
            state.gate.clone(),
            access_gate_middleware,
        ))
        .with_state(state)
}
