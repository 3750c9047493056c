//! Herald API server binary entrypoint.
//!
//! Besides HTTP and WebSocket traffic, every API process runs the gateway's
//! backplane listener, the membership heartbeat, the delayed-job worker and
//! the snooze sweep. Any number of processes can share one Redis/PostgreSQL.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::db::{create_pool, run_migrations};
use herald_common::redis_pool::{create_redis_pool, open_client};
use herald_engine::jobs::RedisJobQueue;
use herald_engine::service::{EngineSettings, NotificationService};
use herald_engine::staging::RedisStaging;
use herald_engine::store::PgNotificationStore;
use herald_engine::worker::{JobWorker, run_heartbeat, run_snooze_sweep};
use herald_notifier::backplane::RedisBackplane;
use herald_notifier::gateway::Gateway;

use herald_api::routes::create_router;
use herald_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "herald_api=debug,herald_engine=debug,herald_notifier=debug,tower_http=debug",
            )
        }))
        .json()
        .init();

    tracing::info!("Starting Herald API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Database pool + migrations
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;
    tracing::info!("Database pool created, migrations applied");

    // Redis: one multiplexed connection for commands, a client for pub/sub
    let redis = create_redis_pool(&config.redis_url).await?;
    let redis_client = open_client(&config.redis_url)?;
    tracing::info!("Redis connection established");

    let membership_ttl = Duration::from_secs(config.membership_ttl_secs);
    let backplane = Arc::new(RedisBackplane::new(
        redis_client,
        redis.clone(),
        membership_ttl,
    ));
    let gateway = Arc::new(Gateway::new(
        config.node_id.clone(),
        backplane,
        Duration::from_millis(config.ack_timeout_ms),
    ));
    let listener_task = gateway.start().await?;
    tracing::info!(node_id = %config.node_id, "Gateway joined backplane");

    let service = Arc::new(NotificationService::new(
        Arc::new(PgNotificationStore::new(pool)),
        Arc::new(RedisStaging::new(
            redis.clone(),
            Duration::from_secs(config.staging_ttl_secs),
        )),
        Arc::new(RedisJobQueue::new(redis)),
        gateway,
        EngineSettings::from_config(&config),
    ));

    // Background loops
    let heartbeat_task = tokio::spawn(run_heartbeat(service.clone(), membership_ttl / 3));
    let worker = JobWorker::new(
        service.clone(),
        Duration::from_millis(config.job_poll_interval_ms),
    );
    let worker_task = tokio::spawn(async move { worker.run().await });
    let sweep_task = tokio::spawn(run_snooze_sweep(
        service.clone(),
        Duration::from_secs(config.snooze_sweep_interval_secs),
    ));

    // Build router
    let addr: SocketAddr = config.listen_addr.parse()?;
    let state = AppState::new(service, config);
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run with graceful shutdown on Ctrl+C
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    for task in [listener_task, heartbeat_task, worker_task, sweep_task] {
        task.abort();
    }

    tracing::info!("Herald API server stopped.");
    Ok(())
}
