//! Stateless signed sessions.
//!
//! A session is an HS256 JWT carried in an HTTP-only cookie. Nothing is kept
//! server side, so the only ways a session ends are expiry, the client
//! dropping the cookie, or rotating the signing secret.

use axum::http::{HeaderMap, HeaderValue, header};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::AuthError;
use crate::models::SessionUser;

pub const SESSION_COOKIE: &str = "session_token";

// Who a verified login belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_superuser: bool,
}

impl Identity {
    pub fn display_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        )
        .trim()
        .to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub identity: Identity,
    pub display_name: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_superuser(&self) -> bool {
        self.identity.is_superuser
    }

    pub fn user(&self) -> SessionUser {
        SessionUser {
            id: self.identity.id.clone(),
            email: self.identity.email.clone(),
            first_name: self.identity.first_name.clone(),
            last_name: self.identity.last_name.clone(),
            is_superuser: self.identity.is_superuser,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    email: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_name: Option<String>,
    #[serde(default)]
    is_superuser: bool,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct SessionIssuer {
    secret: Arc<String>,
    ttl: Duration,
    secure_cookie: bool,
}

impl SessionIssuer {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            ttl,
            secure_cookie: false,
        }
    }

    // Mark cookies Secure (HTTPS only)
    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.secure_cookie = secure;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, identity: &Identity) -> Result<(String, Session), AuthError> {
        let issued_at = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| AuthError::Token(format!("session ttl out of range: {}", e)))?;
        let expires_at = issued_at + ttl;
        let display_name = identity.display_name();

        let claims = SessionClaims {
            sub: identity.id.clone(),
            email: identity.email.clone(),
            name: display_name.clone(),
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
            is_superuser: identity.is_superuser,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| {
            tracing::error!("Failed to encode session token: {}", e);
            AuthError::Token(e.to_string())
        })?;

        let session = Session {
            identity: identity.clone(),
            display_name,
            issued_at: second_precision(issued_at),
            expires_at: second_precision(expires_at),
        };
        Ok((token, session))
    }

    /// Check signature and expiry. Any failure means "no session".
    pub fn verify(&self, token: &str) -> Option<Session> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = match decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!("Session token rejected: {}", e);
                return None;
            }
        };

        let issued_at = Utc.timestamp_opt(claims.iat, 0).single()?;
        let expires_at = Utc.timestamp_opt(claims.exp, 0).single()?;

        Some(Session {
            identity: Identity {
                id: claims.sub,
                email: claims.email,
                first_name: claims.first_name,
                last_name: claims.last_name,
                is_superuser: claims.is_superuser,
            },
            display_name: claims.name,
            issued_at,
            expires_at,
        })
    }

    // Valid session from the request's cookie, if any
    pub fn session_from_headers(&self, headers: &HeaderMap) -> Option<Session> {
        let token = cookie_value(headers, SESSION_COOKIE)?;
        self.verify(&token)
    }

    pub fn cookie(&self, token: &str) -> Result<HeaderValue, AuthError> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE,
            token,
            self.ttl.as_secs()
        );
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).map_err(|e| AuthError::Token(e.to_string()))
    }

    pub fn expired_cookie(&self) -> HeaderValue {
        let cookie = format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{}",
            SESSION_COOKIE,
            if self.secure_cookie { "; Secure" } else { "" }
        );
        HeaderValue::from_str(&cookie)
            .unwrap_or_else(|_| HeaderValue::from_static("session_token=; Path=/; Max-Age=0"))
    }
}

fn second_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(at.timestamp(), 0).single().unwrap_or(at)
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|cookie| {
            cookie
                .trim()
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('='))
                .map(|value| value.to_string())
        })
        .filter(|value| !value.is_empty())
}
