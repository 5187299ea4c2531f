use std::sync::Arc;

use crate::auth::{Authenticator, SessionIssuer, UserStore, hasher_for};
use crate::config::{Args, Environment};
use crate::error::ConfigError;
use crate::gate::{AccessGate, GateConfig};
use crate::posts::PostStore;
use crate::rate_limit::RateLimiter;
use crate::store::CounterStore;

// app's shared state
pub struct AppState {
    pub authenticator: Authenticator,
    pub posts: PostStore,
    pub limiter: RateLimiter,
    pub gate: Arc<AccessGate>,
    pub environment: Environment,
}

impl AppState {
    // Wire every component from parsed arguments. The stores are passed in so
    // callers (main, tests) decide which backends to use.
    pub fn from_args(
        args: &Args,
        counters: Arc<dyn CounterStore>,
        users: Arc<dyn UserStore>,
    ) -> Result<Self, ConfigError> {
        let environment = args.environment;
        let issuer = SessionIssuer::new(args.auth_secret()?, args.session_ttl())
            .with_secure_cookie(environment.is_production());
        let limiter = RateLimiter::new(counters, environment);

        let gate = AccessGate::new(
            GateConfig::default().with_protected_prefixes(args.protected_prefixes.clone()),
            issuer.clone(),
            limiter.clone(),
            args.auth_policy(),
            args.api_policy(),
        );

        Ok(Self {
            authenticator: Authenticator::new(users, hasher_for(environment), issuer),
            posts: PostStore::new(),
            limiter,
            gate: Arc::new(gate),
            environment,
        })
    }

    pub fn sessions(&self) -> &SessionIssuer {
        self.authenticator.issuer()
    }
}
