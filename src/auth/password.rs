//! Password hashing strategies.
//!
//! Production and development use Argon2id. The SHA-256 strategy exists only
//! to keep test suites fast and can only be obtained through
//! [`hasher_for`] with [`Environment::Test`].

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash as Argon2Hash, PasswordHasher as _, PasswordVerifier, SaltString,
        rand_core::OsRng,
    },
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::Environment;
use crate::error::AuthError;

#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, password: &str) -> Result<String, AuthError>;

    // false for a malformed stored hash as well as a wrong password
    async fn verify(&self, password: &str, stored_hash: &str) -> Result<bool, AuthError>;

    fn name(&self) -> &'static str;
}

pub fn hasher_for(environment: Environment) -> Arc<dyn PasswordHasher> {
    match environment {
        Environment::Test => Arc::new(Sha256Hasher),
        Environment::Development | Environment::Production => Arc::new(Argon2Hasher::new()),
    }
}

/// Salted Argon2id, tuned for interactive login.
#[derive(Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    // OWASP minimum: 19 MiB memory, 2 iterations, 1 lane
    const MEMORY_COST: u32 = 19_456;
    const TIME_COST: u32 = 2;
    const PARALLELISM: u32 = 1;
    const OUTPUT_LEN: usize = 32;

    pub fn new() -> Self {
        Self::with_params(Self::MEMORY_COST, Self::TIME_COST, Self::PARALLELISM).unwrap_or_else(
            |e| {
                tracing::error!(error = %e, "Rejected argon2 parameters, using library defaults");
                Self {
                    params: Params::default(),
                }
            },
        )
    }

    pub fn with_params(
        memory_cost: u32,
        time_cost: u32,
        parallelism: u32,
    ) -> Result<Self, AuthError> {
        let params = Params::new(memory_cost, time_cost, parallelism, Some(Self::OUTPUT_LEN))
            .map_err(|e| AuthError::Hashing(e.to_string()))?;
        Ok(Self { params })
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PasswordHasher for Argon2Hasher {
    async fn hash(&self, password: &str) -> Result<String, AuthError> {
        let params = self.params.clone();
        let password = password.to_string();

        // argon2 blocks for tens of ms; run it off the async workers
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                .hash_password(password.as_bytes(), &salt)
                .map(|h| h.to_string())
        })
        .await
        .map_err(|e| {
            tracing::error!("Password hash task panicked: {}", e);
            AuthError::Hashing("password hashing task failed".to_string())
        })?
        .map_err(|e| AuthError::Hashing(e.to_string()))
    }

    async fn verify(&self, password: &str, stored_hash: &str) -> Result<bool, AuthError> {
        let password = password.to_string();
        let stored_hash = stored_hash.to_string();

        tokio::task::spawn_blocking(move || {
            let parsed = match Argon2Hash::new(&stored_hash) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!("Stored password hash is not a valid PHC string: {}", e);
                    return false;
                }
            };
            // parameters come from the stored hash itself
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .await
        .map_err(|e| {
            tracing::error!("Password verify task panicked: {}", e);
            AuthError::Hashing("password verification task failed".to_string())
        })
    }

    fn name(&self) -> &'static str {
        "argon2id"
    }
}

/// Unsalted SHA-256 hex digest. Test environment only.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Sha256Hasher;

impl Sha256Hasher {
    fn digest(password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait]
impl PasswordHasher for Sha256Hasher {
    async fn hash(&self, password: &str) -> Result<String, AuthError> {
        Ok(Self::digest(password))
    }

    async fn verify(&self, password: &str, stored_hash: &str) -> Result<bool, AuthError> {
        Ok(Self::digest(password) == stored_hash)
    }

    fn name(&self) -> &'static str {
        "sha256-test"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hasher_uses_owasp_parameters() {
        let params = Argon2Hasher::new().params;
        assert_eq!(params.m_cost(), 19_456);
        assert_eq!(params.t_cost(), 2);
        assert_eq!(params.p_cost(), 1);
    }

    fn cheap_argon2() -> Argon2Hasher {
        Argon2Hasher::with_params(4096, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn argon2_round_trip() {
        let hasher = cheap_argon2();
        let hash = hasher.hash("correct horse").await.unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &hash).await.unwrap());
        assert!(!hasher.verify("battery staple", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn argon2_salts_every_hash() {
        let hasher = cheap_argon2();
        let a = hasher.hash("same").await.unwrap();
        let b = hasher.hash("same").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn argon2_rejects_garbage_hash() {
        let hasher = cheap_argon2();
        assert!(!hasher.verify("pw", "not-a-hash").await.unwrap());
    }

    #[tokio::test]
    async fn sha256_round_trip() {
        let hasher = Sha256Hasher;
        let hash = hasher.hash("pw").await.unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hasher.verify("pw", &hash).await.unwrap());
        assert!(!hasher.verify("pw2", &hash).await.unwrap());
    }

    #[test]
    fn only_test_environment_gets_fast_hasher() {
        assert_eq!(hasher_for(Environment::Test).name(), "sha256-test");
        assert_eq!(hasher_for(Environment::Development).name(), "argon2id");
        assert_eq!(hasher_for(Environment::Production).name(), "argon2id");
    }
}
