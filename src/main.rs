use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use deadpool_redis::{Config, Runtime};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use user_directory::config::AppConfig;
use user_directory::directory::adapter::outgoing::{
    RedisSessionStore, RedisUserCache, UserStorePostgres,
};
use user_directory::directory::application::ports::incoming::UserDirectory;
use user_directory::directory::application::services::DirectoryService;
use user_directory::health;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,user_directory=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Redis TLS connections need a process-wide rustls provider.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting user directory...");

    let config = AppConfig::from_env().context("invalid configuration")?;

    // Database connection
    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect_timeout(Duration::from_secs(5))
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(false);

    let conn = Database::connect(opt)
        .await
        .context("failed to connect to database")?;
    let db_arc = Arc::new(conn);

    Migrator::up(db_arc.as_ref(), None)
        .await
        .context("failed to apply migrations")?;

    // Redis connection
    let redis_pool = Config::from_url(&config.redis_url)
        .create_pool(Some(Runtime::Tokio1))
        .context("failed to create Redis pool")?;
    let redis_arc = Arc::new(redis_pool);

    let report = health::readiness(&db_arc, &redis_arc, Duration::from_secs(2)).await;
    if report.is_ready() {
        info!(?report, "backends ready");
    } else {
        // The directory degrades without Redis, so this is not fatal.
        warn!(?report, "backends not fully ready");
    }

    let directory: Arc<dyn UserDirectory> = Arc::new(DirectoryService::new(
        Arc::new(UserStorePostgres::new(Arc::clone(&db_arc))),
        Arc::new(RedisUserCache::new(
            Arc::clone(&redis_arc),
            config.directory.cache_ttl,
        )),
        Arc::new(RedisSessionStore::new(Arc::clone(&redis_arc))),
        config.directory.timeouts,
    ));

    let listing = directory
        .list_users(Default::default(), Default::default(), Default::default())
        .await;
    match listing {
        Ok(page) => info!(users = page.total, "user directory ready"),
        Err(e) => warn!(error = %e, "user directory started degraded"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down user directory...");

    drop(directory);
    match Arc::try_unwrap(db_arc) {
        Ok(conn) => conn.close().await.context("failed to close database")?,
        Err(_) => warn!("database handle still shared at shutdown"),
    }

    Ok(())
}
