//! # Pennant Server
//!
//! Evaluation API server for Nubster Pennant.

mod config;
mod error;
mod http;
mod service;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pennant_storage::{
    Database, DatabaseConfig, EvaluationRepository, FlagRepository, PostgresRepositories,
    RedisCacheConfig, RedisEvaluationCache, SegmentRepository, SqliteRepositories, UserRepository,
};

use config::ServerConfig;
use service::FlagService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::load().context("Failed to load configuration")?;
    tracing::info!("Starting Pennant server...");

    let db = Database::connect(&DatabaseConfig::new(config.database_url.clone()))
        .await
        .context("Failed to connect to the database")?;
    db.apply_schema().await.context("Failed to apply schema")?;

    match &db {
        Database::Postgres(pool) => {
            let repos = PostgresRepositories::new(pool.clone());
            serve(&config, repos.flags, repos.segments, repos.evaluations, repos.users).await
        }
        Database::Sqlite(pool) => {
            let repos = SqliteRepositories::new(pool.clone());
            serve(&config, repos.flags, repos.segments, repos.evaluations, repos.users).await
        }
    }
}

async fn serve<F, S, E, U>(
    config: &ServerConfig,
    flags: F,
    segments: S,
    evaluations: E,
    users: U,
) -> anyhow::Result<()>
where
    F: FlagRepository + 'static,
    S: SegmentRepository + 'static,
    E: EvaluationRepository + 'static,
    U: UserRepository + 'static,
{
    let cache_config =
        RedisCacheConfig::new(config.redis_url.clone()).with_ttl(config.cache_ttl_secs);
    let evaluations = RedisEvaluationCache::connect(cache_config, evaluations)
        .await
        .context("Failed to connect to Redis")?;

    let service = Arc::new(FlagService::new(flags, segments, evaluations, users));
    let app = http::router(service);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "Pennant server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl-c");
    tracing::info!("Shutting down...");
}
