use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;

use crate::error::ConfigError;
use crate::rate_limit::{LOOPBACK_IDENTITY, RateLimitPolicy};

// Minimum signing secret length accepted in production
pub const MIN_PRODUCTION_SECRET_LEN: usize = 32;

// Which deployment we are. This is the only switch that turns on
// test-only behaviour (limiter bypass, fast password hashing).
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn is_test(self) -> bool {
        self == Environment::Test
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "blog-gate")]
#[command(about = "Blog admin server with login rate limiting and route access control")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    #[arg(long, env = "APP_ENV", value_enum, default_value_t = Environment::Development)]
    pub environment: Environment,

    // Counter store used by the rate limiter
    #[arg(
        long,
        env = "REDIS_URL",
        default_value = "redis://:devredispassword@localhost:6379"
    )]
    pub redis_url: String,

    // Session signing secret. Changing it logs everyone out. Only the server
    // needs it; maintenance subcommands run without one.
    #[arg(long, env = "AUTH_SECRET", hide_env_values = true)]
    pub auth_secret: Option<String>,

    // Session lifetime in seconds
    #[arg(long, env = "SESSION_TTL", default_value_t = 30 * 24 * 60 * 60)]
    pub session_ttl: u64,

    // Login attempts per client per window
    #[arg(long, env = "AUTH_RATE_LIMIT", default_value_t = 5)]
    pub auth_rate_limit: u64,

    // API requests per client per window
    #[arg(long, env = "API_RATE_LIMIT", default_value_t = 100)]
    pub api_rate_limit: u64,

    // Rate limit window in seconds
    #[arg(long, env = "RATE_WINDOW", default_value_t = 15 * 60)]
    pub rate_window: u64,

    // Upper bound on any single counter store call
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 500)]
    pub store_timeout_ms: u64,

    // Path prefixes that need a superuser session
    #[arg(
        long = "protected-prefix",
        env = "PROTECTED_PREFIXES",
        value_delimiter = ',',
        default_values_t = ["/admin".to_string(), "/api/posts".to_string()]
    )]
    pub protected_prefixes: Vec<String>,

    // Superuser seeded into the user store at startup
    #[arg(long, env = "ADMIN_EMAIL")]
    pub admin_email: Option<String>,

    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,

    #[arg(long, env = "ADMIN_FIRST_NAME")]
    pub admin_first_name: Option<String>,

    #[arg(long, env = "ADMIN_LAST_NAME")]
    pub admin_last_name: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Delete stored rate limit counters for a client and exit
    ClearRateLimits {
        #[arg(default_value = LOOPBACK_IDENTITY)]
        ip: String,
    },
}

impl Args {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.is_none() {
            let secret = self.auth_secret()?;
            if self.environment.is_production() && secret.len() < MIN_PRODUCTION_SECRET_LEN {
                return Err(ConfigError::WeakSecret {
                    min: MIN_PRODUCTION_SECRET_LEN,
                });
            }
        }
        for (name, value) in [
            ("auth-rate-limit", self.auth_rate_limit),
            ("api-rate-limit", self.api_rate_limit),
            ("rate-window", self.rate_window),
            ("session-ttl", self.session_ttl),
        ] {
            if value == 0 {
                return Err(ConfigError::NonPositive { name });
            }
        }
        Ok(())
    }

    pub fn auth_secret(&self) -> Result<&str, ConfigError> {
        match self.auth_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(secret),
            _ => Err(ConfigError::MissingSecret),
        }
    }

    pub fn auth_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::auth(self.auth_rate_limit, Duration::from_secs(self.rate_window))
    }

    pub fn api_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::api(self.api_rate_limit, Duration::from_secs(self.rate_window))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl)
    }
}
