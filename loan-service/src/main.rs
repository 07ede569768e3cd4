mod config;
mod routes;

use crate::config::ServiceConfig;
use crate::routes::{AppState, build_router};
use anyhow::Context;
use axum::{
    http::{HeaderValue, Request},
    middleware::{Next, from_fn},
};
use loan_flow::{
    AnonymousIdentityProvider, FlowRunner, IdentityProvider, InMemoryRecordStore,
    InMemorySessionStorage, PostgresRecordStore, RecordStore, RestIdentityProvider,
    SessionController,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize tracing; `LOG_FORMAT=pretty` for development, JSON otherwise
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "loan_service=debug,loan_flow=debug,tower_http=debug".into());

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

async fn record_store(config: &ServiceConfig) -> Arc<dyn RecordStore> {
    let Some(database_url) = config.database_url.as_deref() else {
        info!("Using in-memory record store (set DATABASE_URL to use PostgreSQL)");
        return Arc::new(InMemoryRecordStore::new());
    };

    info!("Using PostgreSQL record store");
    match PostgresRecordStore::connect(database_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(
                "Failed to connect to PostgreSQL: {}. Falling back to in-memory records.",
                e
            );
            Arc::new(InMemoryRecordStore::new())
        }
    }
}

fn identity_provider(config: &ServiceConfig) -> Arc<dyn IdentityProvider> {
    match (&config.identity_url, &config.identity_api_key) {
        (Some(url), Some(key)) => {
            info!(identity_url = %url, "Using REST identity provider");
            Arc::new(RestIdentityProvider::new(url.clone(), key.clone()))
        }
        _ => {
            info!("Using anonymous identity provider (set IDENTITY_URL and IDENTITY_API_KEY for REST sign-in)");
            Arc::new(AnonymousIdentityProvider::new())
        }
    }
}

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically drop sessions idle for longer than `ttl`
fn spawn_session_sweeper(sessions: InMemorySessionStorage, ttl: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL.min(ttl));
        loop {
            ticker.tick().await;
            let removed = sessions.purge_idle(ttl);
            if removed > 0 {
                info!(removed, remaining = sessions.len(), "Purged idle sessions");
            } else {
                debug!(remaining = sessions.len(), "No idle sessions to purge");
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServiceConfig::from_env()?;
    info!(
        app_id = %config.app_id,
        approval_rate = config.policy.approval_rate(),
        latency_ms = config.policy.latency.as_millis() as u64,
        "Loaded configuration"
    );

    let controller = SessionController::builder()
        .app_id(config.app_id.clone())
        .auth_token(config.initial_auth_token.clone())
        .identity(identity_provider(&config))
        .records(record_store(&config).await)
        .policy(config.policy.clone())
        .build()?;

    let sessions = InMemorySessionStorage::new();
    spawn_session_sweeper(sessions.clone(), config.session_ttl);
    info!(
        session_ttl_secs = config.session_ttl.as_secs(),
        "Using in-memory session storage"
    );

    let runner = FlowRunner::new(Arc::new(controller), Arc::new(sessions));

    let app = build_router(AppState { runner }).layer(from_fn(correlation_id_middleware));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(bind_addr = %config.bind_addr, "Loan service started");
    info!("Endpoints:");
    info!("  GET  /health - Health check");
    info!("  POST /session - Open a new loan session");
    info!("  POST /execute - Apply a user action to a session");
    info!("  GET  /session/:id - Fetch session state and view");

    axum::serve(listener, app).await?;
    Ok(())
}
