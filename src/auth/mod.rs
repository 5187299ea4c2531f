//! Credential verification and session issuance.

pub mod password;
pub mod session;
pub mod users;

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub use self::password::{Argon2Hasher, PasswordHasher, hasher_for};
pub use self::session::{Identity, SESSION_COOKIE, Session, SessionIssuer};
pub use self::users::{MemoryUserStore, User, UserStore};

use crate::error::AuthError;
use crate::metrics::LOGIN_ATTEMPTS;

#[derive(Clone)]
pub struct Authenticator {
    users: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
    issuer: SessionIssuer,
    // hash checked against when there is no real one, so misses cost the same
    decoy_hash: Arc<OnceCell<String>>,
}

impl Authenticator {
    pub fn new(
        users: Arc<dyn UserStore>,
        hasher: Arc<dyn PasswordHasher>,
        issuer: SessionIssuer,
    ) -> Self {
        Self {
            users,
            hasher,
            issuer,
            decoy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn issuer(&self) -> &SessionIssuer {
        &self.issuer
    }

    pub fn hasher(&self) -> &Arc<dyn PasswordHasher> {
        &self.hasher
    }

    /// Check an email/password pair and mint a session for it.
    ///
    /// Unknown email, missing stored hash and wrong password all come back as
    /// [`AuthError::InvalidCredentials`]. A user store outage comes back as
    /// [`AuthError::StoreUnavailable`], which renders the same way.
    pub async fn login(&self, email: &str, password: &str) -> Result<(String, Session), AuthError> {
        if email.is_empty() || password.is_empty() {
            LOGIN_ATTEMPTS.with_label_values(&["invalid"]).inc();
            return Err(AuthError::InvalidCredentials);
        }

        let user = match self.users.find_by_email(email).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.verify_decoy(password).await;
                LOGIN_ATTEMPTS.with_label_values(&["invalid"]).inc();
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => {
                LOGIN_ATTEMPTS.with_label_values(&["store_error"]).inc();
                warn!(error = %e, "User lookup failed during login");
                return Err(AuthError::StoreUnavailable(e));
            }
        };

        let Some(stored_hash) = user.password_hash.as_deref() else {
            self.verify_decoy(password).await;
            LOGIN_ATTEMPTS.with_label_values(&["invalid"]).inc();
            return Err(AuthError::InvalidCredentials);
        };

        let valid = match self.hasher.verify(password, stored_hash).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, user_id = %user.id, "Password verification errored");
                false
            }
        };
        if !valid {
            LOGIN_ATTEMPTS.with_label_values(&["invalid"]).inc();
            return Err(AuthError::InvalidCredentials);
        }

        let (token, session) = self.issuer.issue(&user.identity())?;
        LOGIN_ATTEMPTS.with_label_values(&["success"]).inc();
        info!(user_id = %user.id, superuser = user.is_superuser, "User logged in");
        Ok((token, session))
    }

    // Same hasher work as a real check, result ignored
    async fn verify_decoy(&self, password: &str) {
        let decoy = self
            .decoy_hash
            .get_or_try_init(|| self.hasher.hash("decoy-password-never-matches"))
            .await;
        match decoy {
            Ok(hash) => {
                let _ = self.hasher.verify(password, hash).await;
            }
            Err(e) => warn!(error = %e, "Could not build decoy password hash"),
        }
    }
}
