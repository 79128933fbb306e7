//! PayFlow server binary
//!
//! Wires configuration, logging, storage, the ledger services, and the HTTP
//! gateway, then serves until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use payflow::audit::AuditLogService;
use payflow::balance::BalanceService;
use payflow::cache::{CacheManager, MemoryCache};
use payflow::config::AppConfig;
use payflow::db::ConnectionManager;
use payflow::engine::TransactionEngine;
use payflow::events::{EventStoreService, ReplayEngine};
use payflow::gateway::{self, AppState};
use payflow::persistence::{
    PgAuditLogRepository, PgBalanceRepository, PgEventStoreRepository, PgTransactionRepository,
    PgUserRepository, schema,
};
use payflow::resilience::FallbackManager;
use payflow::users::UserService;

#[tokio::main]
async fn main() -> Result<()> {
    let env = std::env::var("PAYFLOW_ENV").unwrap_or_else(|_| "development".to_string());
    let config = AppConfig::load(&env)?;
    let _log_guard = payflow::logging::init_logging(&config);

    tracing::info!(env = %env, git = env!("GIT_HASH"), "Starting PayFlow");

    // Storage plane: master + replicas, health ticker, shared breaker.
    let db = Arc::new(
        ConnectionManager::connect(&config.database)
            .await
            .context("database connection failed")?,
    );
    schema::init_schema(db.write_pool())
        .await
        .context("schema initialization failed")?;
    let _health_ticker = db.spawn_health_checker();

    let pool = db.write_pool().clone();
    let balance_repo = Arc::new(PgBalanceRepository::new(pool.clone()));
    let transaction_repo = Arc::new(PgTransactionRepository::new(pool.clone()));
    let user_repo = Arc::new(PgUserRepository::new(pool.clone()));
    let audit_repo = Arc::new(PgAuditLogRepository::new(pool.clone()));
    let event_repo = Arc::new(PgEventStoreRepository::new(pool.clone()));

    // Cache plane.
    let cache = Arc::new(MemoryCache::new());
    let _cache_cleanup = cache.spawn_cleanup();
    let cache_manager = CacheManager::new(cache);

    // Ledger services.
    let events = Arc::new(EventStoreService::new(event_repo));
    let mut kernel = BalanceService::new(balance_repo.clone(), audit_repo.clone(), events.clone())
        .with_breaker(db.breaker().clone());
    if config.cache.enabled {
        kernel = kernel.with_cache(
            cache_manager.clone(),
            Duration::from_secs(config.cache.balance_ttl_secs),
        );
    }
    let kernel = Arc::new(kernel);

    let engine = TransactionEngine::new(
        transaction_repo.clone(),
        balance_repo.clone(),
        kernel.clone(),
        audit_repo.clone(),
        events.clone(),
        config.worker_pool.clone(),
    );

    let users = Arc::new(
        UserService::new(user_repo, audit_repo.clone()).with_cache(cache_manager.clone()),
    );
    let audit = Arc::new(AuditLogService::new(audit_repo));
    let replay = Arc::new(ReplayEngine::new(
        events.clone(),
        balance_repo,
        transaction_repo,
    ));

    let state = AppState {
        engine: engine.clone(),
        kernel,
        users,
        audit,
        replay,
        db,
        fallback: Arc::new(FallbackManager::new()),
    };

    let app = gateway::router(state);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Stop accepting submissions and drain in-flight transactions.
    engine.shutdown().await;
    tracing::info!("PayFlow stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
