//! End-to-end tests driving the full router: access gate, login limits,
//! sessions and the posts API.

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use clap::Parser;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use blog_gate::app;
use blog_gate::auth::{MemoryUserStore, PasswordHasher, User, hasher_for};
use blog_gate::config::{Args, Environment};
use blog_gate::error::StoreError;
use blog_gate::state::AppState;
use blog_gate::store::{CounterStore, MemoryCounterStore};

const ADMIN_EMAIL: &str = "admin@example.com";
const ADMIN_PASSWORD: &str = "correct horse battery staple";
const EDITOR_EMAIL: &str = "editor@example.com";

mod helpers {
    use super::*;

    pub struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn incr(&self, _key: &str) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn get(&self, _key: &str) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn delete(&self, _keys: &[String]) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    pub fn args(environment: &str) -> Args {
        Args::try_parse_from([
            "blog-gate",
            "--auth-secret",
            "integration-test-secret-integration-test",
            "--environment",
            environment,
        ])
        .unwrap()
    }

    // Users are hashed with the test hasher, so only `test` can log them in
    pub async fn state_with(environment: &str, counters: Arc<dyn CounterStore>) -> Arc<AppState> {
        let hasher = hasher_for(Environment::Test);
        let users = MemoryUserStore::new();
        users.upsert(
            User::new(ADMIN_EMAIL, hasher.hash(ADMIN_PASSWORD).await.unwrap())
                .with_name(Some("Ada".into()), Some("Lovelace".into()))
                .superuser(),
        );
        users.upsert(User::new(EDITOR_EMAIL, hasher.hash(ADMIN_PASSWORD).await.unwrap()));
        Arc::new(AppState::from_args(&args(environment), counters, Arc::new(users)).unwrap())
    }

    pub async fn test_app() -> Router {
        app(state_with("test", Arc::new(MemoryCounterStore::new())).await)
    }

    pub fn login_request(email: &str, password: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/auth/callback/credentials")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "email": email, "password": password }).to_string(),
            ))
            .unwrap()
    }

    pub async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    // "session_token=<jwt>" from a login response
    pub fn session_cookie(response: &Response) -> String {
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    pub async fn login(app: &Router, email: &str) -> String {
        let response = app
            .clone()
            .oneshot(login_request(email, ADMIN_PASSWORD))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        session_cookie(&response)
    }

    pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }
}

use helpers::*;

#[tokio::test]
async fn health_is_public() {
    let response = test_app().await.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}

#[tokio::test]
async fn dashboard_redirects_anonymous_visitors_to_login() {
    let response = test_app().await.oneshot(get("/admin", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[header::LOCATION], "/admin/login");
}

#[tokio::test]
async fn dashboard_redirects_non_admins_with_error() {
    let app = test_app().await;
    let cookie = login(&app, EDITOR_EMAIL).await;

    let response = app.oneshot(get("/admin", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers()[header::LOCATION],
        "/admin/login?error=unauthorized"
    );
}

#[tokio::test]
async fn admin_login_sets_cookie_and_opens_dashboard() {
    let app = test_app().await;
    let response = app
        .clone()
        .oneshot(login_request(ADMIN_EMAIL, ADMIN_PASSWORD))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("session_token="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(!set_cookie.contains("Secure"));
    let cookie = session_cookie(&response);
    assert_eq!(body_json(response).await["url"], "/admin");

    let dashboard = app
        .clone()
        .oneshot(get("/admin", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(dashboard.status(), StatusCode::OK);
    let html = to_bytes(dashboard.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&html).contains("Ada Lovelace"));

    let login_page = app
        .oneshot(get("/admin/login", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(login_page.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(login_page.headers()[header::LOCATION], "/admin");
}

#[tokio::test]
async fn bad_password_and_unknown_user_get_same_response() {
    let app = test_app().await;

    let wrong = app
        .clone()
        .oneshot(login_request(ADMIN_EMAIL, "wrong"))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert!(wrong.headers().get(header::SET_COOKIE).is_none());
    let wrong = body_json(wrong).await;

    let unknown = app
        .oneshot(login_request("ghost@example.com", ADMIN_PASSWORD))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    let unknown = body_json(unknown).await;

    assert_eq!(wrong, unknown);
    assert_eq!(wrong["error"], "CredentialsSignin");
}

#[tokio::test]
async fn email_is_matched_exactly_as_stored() {
    let app = test_app().await;

    let padded = app
        .clone()
        .oneshot(login_request(" admin@example.com ", ADMIN_PASSWORD))
        .await
        .unwrap();
    assert_eq!(padded.status(), StatusCode::UNAUTHORIZED);

    let recased = app
        .oneshot(login_request("Admin@example.com", ADMIN_PASSWORD))
        .await
        .unwrap();
    assert_eq!(recased.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_login_body_is_invalid_credentials() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/callback/credentials")
        .body(Body::from("not json"))
        .unwrap();
    let response = test_app().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sixth_login_attempt_is_rate_limited() {
    let app = app(state_with("development", Arc::new(MemoryCounterStore::new())).await);

    for attempt in 1..=5 {
        let response = app
            .clone()
            .oneshot(login_request("ghost@example.com", "nope"))
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::UNAUTHORIZED,
            "attempt {} should reach the credential check",
            attempt
        );
    }

    let response = app
        .oneshot(login_request("ghost@example.com", "nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body = body_json(response).await;
    assert_eq!(body["error"], "TooManyRequests");
    assert_eq!(body["url"], "/admin/login?error=TooManyRequests");
}

#[tokio::test]
async fn login_limit_is_per_client() {
    let app = app(state_with("development", Arc::new(MemoryCounterStore::new())).await);

    for _ in 0..5 {
        let mut request = login_request("ghost@example.com", "nope");
        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
        app.clone().oneshot(request).await.unwrap();
    }

    let mut blocked = login_request("ghost@example.com", "nope");
    blocked
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
    let blocked = app.clone().oneshot(blocked).await.unwrap();
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

    let mut other = login_request("ghost@example.com", "nope");
    other
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.2".parse().unwrap());
    let other = app.oneshot(other).await.unwrap();
    assert_eq!(other.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn counter_store_outage_fails_open() {
    let app = app(state_with("development", Arc::new(DownStore)).await);

    for _ in 0..10 {
        let response = app
            .clone()
            .oneshot(login_request("ghost@example.com", "nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app.oneshot(get("/api/auth/session", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["ratelimit-remaining"], "0");
}

#[tokio::test]
async fn test_environment_never_limits_logins() {
    let app = test_app().await;
    for _ in 0..20 {
        let response = app
            .clone()
            .oneshot(login_request("ghost@example.com", "nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn api_responses_carry_rate_limit_headers() {
    let app = app(state_with("development", Arc::new(MemoryCounterStore::new())).await);
    let response = app.oneshot(get("/api/auth/session", None)).await.unwrap();

    assert_eq!(response.headers()["ratelimit-limit"], "100");
    assert_eq!(response.headers()["ratelimit-remaining"], "99");
    assert_eq!(body_json(response).await, Value::Null);
}

#[tokio::test]
async fn session_endpoint_reports_identity() {
    let app = test_app().await;
    let cookie = login(&app, ADMIN_EMAIL).await;

    let response = app
        .oneshot(get("/api/auth/session", Some(&cookie)))
        .await
        .unwrap();
    let user = body_json(response).await;
    assert_eq!(user["email"], ADMIN_EMAIL);
    assert_eq!(user["firstName"], "Ada");
    assert_eq!(user["isSuperuser"], true);
}

#[tokio::test]
async fn signout_expires_cookie() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/signout")
        .body(Body::empty())
        .unwrap();
    let response = test_app().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn posts_api_requires_a_session() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/posts")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"title":"t","content":"c"}"#))
        .unwrap();
    let response = test_app().await.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await,
        json!({ "success": false, "error": "Authentication required" })
    );
}

#[tokio::test]
async fn posts_api_forbids_non_admins() {
    let app = test_app().await;
    let cookie = login(&app, EDITOR_EMAIL).await;

    let response = app
        .oneshot(get("/api/posts", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "Admin privileges required");
}

#[tokio::test]
async fn admin_can_create_list_and_delete_posts() {
    let app = test_app().await;
    let cookie = login(&app, ADMIN_EMAIL).await;

    let create = Request::builder()
        .method("POST")
        .uri("/api/posts")
        .header(header::COOKIE, &cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "title": "Hello, World!", "content": "First post" }).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["success"], true);
    assert_eq!(created["post"]["slug"], "hello-world");
    let id = created["post"]["id"].as_i64().unwrap();

    let public = app
        .clone()
        .oneshot(get(&format!("/posts/{}", id), None))
        .await
        .unwrap();
    assert_eq!(public.status(), StatusCode::OK);
    assert_eq!(body_json(public).await["title"], "Hello, World!");

    let delete = |query: &str| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/posts{}", query))
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap()
    };

    let missing = app.clone().oneshot(delete("")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(missing).await["error"], "Post ID is required");

    let garbage = app.clone().oneshot(delete("?id=abc")).await.unwrap();
    assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(garbage).await["error"], "Invalid post ID");

    let deleted = app
        .clone()
        .oneshot(delete(&format!("?id={}", id)))
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);

    let again = app
        .clone()
        .oneshot(delete(&format!("?id={}", id)))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let listed = app.oneshot(get("/posts", None)).await.unwrap();
    assert_eq!(body_json(listed).await, json!([]));
}

#[tokio::test]
async fn empty_post_is_rejected() {
    let app = test_app().await;
    let cookie = login(&app, ADMIN_EMAIL).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/posts")
        .header(header::COOKIE, &cookie)
        .body(Body::from(r#"{"title":"","content":"x"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Invalid input");
}
