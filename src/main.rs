use clap::Parser; // for cli
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use blog_gate::app;
use blog_gate::auth::{MemoryUserStore, PasswordHasher, User, hasher_for};
use blog_gate::config::{Args, Command};
use blog_gate::rate_limit::RateLimiter;
use blog_gate::state::AppState;
use blog_gate::store::{CounterStore, MemoryCounterStore, RedisCounterStore};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // parse cli arguments
    let args = Args::parse();
    args.validate()?;

    let memory = Arc::new(MemoryCounterStore::new());
    let redis = if args.redis_url.starts_with("memory") {
        None
    } else {
        Some(Arc::new(RedisCounterStore::new(
            &args.redis_url,
            args.store_timeout(),
        )?))
    };
    let counters: Arc<dyn CounterStore> = match &redis {
        Some(redis) => redis.clone() as Arc<dyn CounterStore>,
        None => memory.clone() as Arc<dyn CounterStore>,
    };

    if let Some(Command::ClearRateLimits { ip }) = &args.command {
        let limiter = RateLimiter::new(counters, args.environment);
        let cleared = limiter.clear(ip).await;
        if let Some(redis) = &redis {
            redis.close().await;
        }
        let cleared = cleared?;
        info!(ip = %ip, cleared, "Cleared rate limit counters");
        return Ok(());
    }

    let users = Arc::new(MemoryUserStore::new());
    seed_admin(&args, &users, hasher_for(args.environment).as_ref()).await?;

    let state = Arc::new(AppState::from_args(&args, counters, users)?);

    if redis.is_none() {
        let purge_store = memory.clone();
        tokio::spawn(async move {
            purge_expired_counters(purge_store, PURGE_INTERVAL).await;
        });
    }

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(port = args.port, environment = ?args.environment, "Blog server listening");
    info!(
        auth_limit = args.auth_rate_limit,
        api_limit = args.api_rate_limit,
        window_secs = args.rate_window,
        counter_store = if redis.is_some() { "redis" } else { "memory" },
        "Rate limiting configured"
    );

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(redis) = &redis {
        redis.close().await;
    }
    info!("Server stopped");
    Ok(())
}

// Superuser from ADMIN_EMAIL / ADMIN_PASSWORD, if both are set
async fn seed_admin(
    args: &Args,
    users: &MemoryUserStore,
    hasher: &dyn PasswordHasher,
) -> Result<(), Box<dyn std::error::Error>> {
    let (Some(email), Some(password)) = (&args.admin_email, &args.admin_password) else {
        warn!("No admin account configured; nobody will be able to log in");
        return Ok(());
    };

    let hash = hasher.hash(password).await?;
    let user = User::new(email.as_str(), hash)
        .with_name(args.admin_first_name.clone(), args.admin_last_name.clone())
        .superuser();
    info!(email = %user.email, hasher = hasher.name(), "Seeded admin account");
    users.upsert(user);
    Ok(())
}

// Expired in-memory counters are only reset lazily; sweep the rest
async fn purge_expired_counters(store: Arc<MemoryCounterStore>, every: Duration) {
    let mut interval = interval(every);
    loop {
        interval.tick().await;
        let purged = store.purge_expired();
        if purged > 0 {
            debug!(purged, remaining = store.len(), "Purged expired rate limit counters");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // no signal handler: serve until killed
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
