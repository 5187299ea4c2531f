//! Per-request access control.
//!
//! [`AccessGate::evaluate`] is a plain async function from a borrowed view of
//! the request to a [`GateDecision`]. [`access_gate_middleware`] is the thin
//! axum adapter that runs it in front of every route.

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::{Session, SessionIssuer};
use crate::error::{AuthError, LOGIN_PATH};
use crate::metrics::{GATE_DECISIONS, REQUEST_LATENCY};
use crate::models::ApiError;
use crate::rate_limit::{RateLimitDecision, RateLimitPolicy, RateLimiter, client_identity};

pub const DASHBOARD_PATH: &str = "/admin";
pub const CREDENTIALS_PATH: &str = "/api/auth/callback/credentials";
pub const API_PREFIX: &str = "/api";

#[derive(Clone, Debug)]
pub struct GateConfig {
    pub login_path: String,
    pub dashboard_path: String,
    pub credentials_path: String,
    pub api_prefix: String,
    pub protected_prefixes: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            login_path: LOGIN_PATH.to_string(),
            dashboard_path: DASHBOARD_PATH.to_string(),
            credentials_path: CREDENTIALS_PATH.to_string(),
            api_prefix: API_PREFIX.to_string(),
            protected_prefixes: vec!["/admin".to_string(), "/api/posts".to_string()],
        }
    }
}

impl GateConfig {
    pub fn with_protected_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.protected_prefixes = prefixes;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    // login page; only a superuser session is bounced to the dashboard, any
    // other session would loop between the two
    AuthPage,
    // credentials POST, rate limited under the auth policy
    AuthSubmit,
    PublicApi,
    ProtectedApi,
    ProtectedPage,
}

// What the gate needs to see of a request
#[derive(Clone, Copy, Debug)]
pub struct GateRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub remote_addr: Option<IpAddr>,
}

#[derive(Debug)]
pub enum Denial {
    Unauthenticated,
    InsufficientPrivilege,
    LoginRateLimited { retry_after_secs: u64 },
    ApiRateLimited(RateLimitDecision),
}

#[derive(Debug)]
pub enum GateDecision {
    Allow {
        session: Option<Session>,
        rate_limit: Option<RateLimitDecision>,
    },
    Redirect {
        location: String,
    },
    Deny(Denial),
}

impl GateDecision {
    pub fn label(&self) -> &'static str {
        match self {
            GateDecision::Allow { .. } => "allow",
            GateDecision::Redirect { .. } => "redirect",
            GateDecision::Deny(_) => "deny",
        }
    }
}

// Session (or lack of one) seen by the gate, handed to handlers
#[derive(Clone, Debug, Default)]
pub struct CurrentSession(pub Option<Session>);

pub struct AccessGate {
    config: GateConfig,
    sessions: SessionIssuer,
    limiter: RateLimiter,
    auth_policy: RateLimitPolicy,
    api_policy: RateLimitPolicy,
}

impl AccessGate {
    pub fn new(
        config: GateConfig,
        sessions: SessionIssuer,
        limiter: RateLimiter,
        auth_policy: RateLimitPolicy,
        api_policy: RateLimitPolicy,
    ) -> Self {
        Self {
            config,
            sessions,
            limiter,
            auth_policy,
            api_policy,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn classify(&self, method: &Method, path: &str) -> RouteClass {
        if path == self.config.login_path {
            return RouteClass::AuthPage;
        }
        if path == self.config.credentials_path && method == Method::POST {
            return RouteClass::AuthSubmit;
        }

        let is_api = under_prefix(path, &self.config.api_prefix);
        let is_protected = self
            .config
            .protected_prefixes
            .iter()
            .any(|prefix| under_prefix(path, prefix));

        match (is_protected, is_api) {
            (true, true) => RouteClass::ProtectedApi,
            (true, false) => RouteClass::ProtectedPage,
            (false, true) => RouteClass::PublicApi,
            (false, false) => RouteClass::Public,
        }
    }

    pub async fn evaluate(&self, request: &GateRequest<'_>) -> GateDecision {
        let class = self.classify(request.method, request.path);
        let session = self.sessions.session_from_headers(request.headers);

        match class {
            RouteClass::Public => GateDecision::Allow {
                session,
                rate_limit: None,
            },
            RouteClass::AuthPage => match session {
                // only bounce sessions the dashboard will accept, otherwise a
                // non-admin would ping-pong between login and dashboard
                Some(s) if s.is_superuser() => GateDecision::Redirect {
                    location: self.config.dashboard_path.clone(),
                },
                session => GateDecision::Allow {
                    session,
                    rate_limit: None,
                },
            },
            RouteClass::AuthSubmit => {
                let identity = client_identity(request.headers, request.remote_addr);
                let decision = self.limiter.check_policy(&self.auth_policy, &identity).await;
                if !decision.allowed {
                    warn!(ip = %identity, "Login rate limit exceeded");
                    return GateDecision::Deny(Denial::LoginRateLimited {
                        retry_after_secs: decision.reset_after_secs,
                    });
                }
                GateDecision::Allow {
                    session,
                    rate_limit: Some(decision),
                }
            }
            RouteClass::PublicApi => match self.api_quota(request).await {
                Ok(decision) => GateDecision::Allow {
                    session,
                    rate_limit: Some(decision),
                },
                Err(denied) => denied,
            },
            RouteClass::ProtectedApi => {
                let decision = match self.api_quota(request).await {
                    Ok(decision) => decision,
                    Err(denied) => return denied,
                };
                match session {
                    None => GateDecision::Deny(Denial::Unauthenticated),
                    Some(s) if !s.is_superuser() => {
                        GateDecision::Deny(Denial::InsufficientPrivilege)
                    }
                    session => GateDecision::Allow {
                        session,
                        rate_limit: Some(decision),
                    },
                }
            }
            RouteClass::ProtectedPage => match session {
                None => GateDecision::Redirect {
                    location: self.config.login_path.clone(),
                },
                Some(s) if !s.is_superuser() => GateDecision::Redirect {
                    location: format!("{}?error=unauthorized", self.config.login_path),
                },
                session => GateDecision::Allow {
                    session,
                    rate_limit: None,
                },
            },
        }
    }

    async fn api_quota(&self, request: &GateRequest<'_>) -> Result<RateLimitDecision, GateDecision> {
        let identity = client_identity(request.headers, request.remote_addr);
        let decision = self.limiter.check_policy(&self.api_policy, &identity).await;
        if !decision.allowed {
            warn!(ip = %identity, path = request.path, "API rate limit exceeded");
            return Err(GateDecision::Deny(Denial::ApiRateLimited(decision)));
        }
        Ok(decision)
    }
}

// "/admin" covers "/admin" and "/admin/..." but not "/administrator"
fn under_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn add_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert("ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(decision.remaining));
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        match self {
            Denial::Unauthenticated => AuthError::Unauthenticated.into_response(),
            Denial::InsufficientPrivilege => AuthError::InsufficientPrivilege.into_response(),
            Denial::LoginRateLimited { retry_after_secs } => {
                AuthError::RateLimitExceeded { retry_after_secs }.into_response()
            }
            Denial::ApiRateLimited(decision) => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(ApiError::new("Too many requests, please try again later")),
                )
                    .into_response();
                add_rate_limit_headers(&mut response, &decision);
                response
                    .headers_mut()
                    .insert("retry-after", HeaderValue::from(decision.reset_after_secs));
                response
            }
        }
    }
}

pub async fn access_gate_middleware(
    State(gate): State<Arc<AccessGate>>,
    mut request: Request,
    next: Next,
) -> Response {
    let start_time = Instant::now();
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let decision = gate
        .evaluate(&GateRequest {
            method: request.method(),
            path: request.uri().path(),
            headers: request.headers(),
            remote_addr,
        })
        .await;
    GATE_DECISIONS.with_label_values(&[decision.label()]).inc();

    let response = match decision {
        GateDecision::Allow {
            session,
            rate_limit,
        } => {
            request.extensions_mut().insert(CurrentSession(session));
            let mut response = next.run(request).await;
            if let Some(decision) = rate_limit {
                add_rate_limit_headers(&mut response, &decision);
            }
            response
        }
        GateDecision::Redirect { location } => {
            debug!(path = %request.uri().path(), location = %location, "Redirecting");
            Redirect::temporary(&location).into_response()
        }
        GateDecision::Deny(denial) => {
            info!(path = %request.uri().path(), denial = ?denial, "Request denied");
            denial.into_response()
        }
    };

    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());
    response
}
