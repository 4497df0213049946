//! Gateway binary — the thin HTTP/SSE surface over the Task Service, and
//! the process that owns the dispatcher loop's lifecycle. Bootstrap is a
//! raw accept loop: bind, loop on `accept()`, `tokio::spawn` a `TokioIo` +
//! `service_fn` per connection.

mod error;
mod routes;
mod sse;
mod state;

use broadcaster::Broadcaster;
use config::{ApiSettings, DatabaseSettings, HandlerSettings, StreamSettings};
use event_log::{EventLog, InMemoryEventLog, RedisEventLog};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use task_pipeline::{Dispatcher, DispatcherConfig, EventHandler};
use task_service::TaskService;
use task_store::prelude::*;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// Stuck tasks older than this are marked FAILED on boot, recovering
/// tasks left non-terminal by an unclean prior shutdown.
const RECOVER_STUCK_AFTER_MS: u64 = 5 * 60 * 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let stream_settings = StreamSettings::from_env()?;
    let handler_settings = HandlerSettings::from_env()?;
    let api_settings = ApiSettings::from_env()?;

    let store: Arc<dyn TaskStore> = build_store().await?;
    let log: Arc<dyn EventLog> = build_event_log(&stream_settings).await?;
    let broadcaster = Arc::new(Broadcaster::new());

    match store.recover_stuck_tasks(RECOVER_STUCK_AFTER_MS).await {
        Ok(recovered) if !recovered.is_empty() => {
            warn!(count = recovered.len(), "marked stuck tasks as failed on boot")
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "startup recovery sweep failed"),
    }

    let handler = EventHandler::with_result_ttl(
        store.clone(),
        broadcaster.clone(),
        handler_settings.status_delta,
        handler_settings.result_ttl_seconds,
    );
    let dispatcher_config = DispatcherConfig {
        stream: stream_settings.stream_name.clone(),
        group: stream_settings.group_name.clone(),
        consumer: stream_settings
            .consumer_name
            .clone()
            .unwrap_or_else(|| format!("gateway-{}", task_types::EventId::new())),
        count: stream_settings.count,
        block_ms: stream_settings.block_ms,
        reclaim_pending: stream_settings.reclaim_pending,
        reclaim_idle_ms: stream_settings.reclaim_idle_ms,
        start_id: "0".to_string(),
    };
    let mut dispatcher = Dispatcher::new(dispatcher_config, log.clone(), handler);
    dispatcher.start().await?;

    let service = TaskService::new(store, log);
    let app_state =
        Arc::new(AppState { service, broadcaster, max_digits: api_settings.max_digits });

    let bind_address = config_bind_address();
    let listener = TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "gateway listening");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping dispatcher");
                dispatcher.stop().await;
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                debug!(%peer_addr, "accepted connection");
                let state = app_state.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        let state = state.clone();
                        async move { Ok::<_, std::convert::Infallible>(routes::route(state, req).await) }
                    });
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        let err_str = err.to_string();
                        if err_str.contains("connection closed before message completed") {
                            debug!(error = %err, "client disconnected");
                        } else {
                            error!(error = %err, "error serving connection");
                        }
                    }
                });
            }
        }
    }
}

fn config_bind_address() -> String {
    std::env::var("GATEWAY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

/// `TASK_STORE_BACKEND` picks which `TaskStore` impl to construct,
/// defaulting to the in-memory backend so the gateway boots with zero
/// external services for local development.
async fn build_store() -> anyhow::Result<Arc<dyn TaskStore>> {
    let backend = std::env::var("TASK_STORE_BACKEND").unwrap_or_else(|_| "in-memory".to_string());
    match backend.as_str() {
        "postgres" => {
            let db = DatabaseSettings::from_env()?;
            let config = PostgresTaskConfig { database_url: db.database_url, ..Default::default() };
            Ok(Arc::new(PostgresTaskStore::new(config).await?))
        }
        "sqlite" => {
            let db = DatabaseSettings::from_env()?;
            let config = SqliteTaskConfig { database_url: db.database_url, ..Default::default() };
            Ok(Arc::new(SqliteTaskStore::new(config).await?))
        }
        "in-memory" => Ok(Arc::new(InMemoryTaskStore::new())),
        other => anyhow::bail!("unknown TASK_STORE_BACKEND: {other}"),
    }
}

async fn build_event_log(settings: &StreamSettings) -> anyhow::Result<Arc<dyn EventLog>> {
    let backend = std::env::var("EVENT_LOG_BACKEND").unwrap_or_else(|_| "redis".to_string());
    match backend.as_str() {
        "redis" => Ok(Arc::new(RedisEventLog::connect(&settings.redis_url).await?)),
        "in-memory" => Ok(Arc::new(InMemoryEventLog::new())),
        other => anyhow::bail!("unknown EVENT_LOG_BACKEND: {other}"),
    }
}
