//! Hospital Management Core - maintenance worker
//!
//! Deactivates expired temporary permissions on a fixed interval and drops
//! the cached decisions of every affected principal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hms_backend::audit::TracingAuditLogger;
use hms_backend::cache::MokaPermissionCache;
use hms_backend::config::Config;
use hms_backend::repository::PgPermissionRepository;
use hms_backend::services::AuthorizationService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    init_tracing(&config);

    tracing::info!("Starting hospital management worker");
    tracing::info!("Environment: {}", config.environment);

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database.url)
        .await?;

    tracing::info!("Database connection established");

    // Run migrations in development
    if config.environment == "development" {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let authorization = AuthorizationService::new(
        Arc::new(PgPermissionRepository::new(db_pool.clone())),
        Arc::new(MokaPermissionCache::new(
            config.authorization.cache_max_capacity,
        )),
        Arc::new(TracingAuditLogger),
        &config.authorization,
    );

    let mut ticker = tokio::time::interval(config.authorization.sweep_interval());
    tracing::info!(
        interval_seconds = config.authorization.sweep_interval().as_secs(),
        "Sweeping expired temporary permissions"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match authorization.sweep_expired_temporary_permissions(Utc::now()).await {
                    Ok(affected) => tracing::debug!(affected, "Sweep finished"),
                    Err(e) => tracing::error!(error = %e, "Sweep failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    db_pool.close().await;
    Ok(())
}

/// Human-readable output locally, JSON lines in production
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "hms_worker=debug,hms_backend=debug,sqlx=warn".into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.is_production() {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
