use rootcause::prelude::Report;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vouch_access::InMemorySessionService;
use vouch_correlation::{
    CorrelationStore, InMemoryCorrelationStore, NatsCorrelationStore, StoreError,
};
use vouch_server::{
    AppState,
    config::{CorrelationBackend, ServerConfig},
    db::PgSessionRepository,
    error::StartupError,
    exchange::HttpExchangeClient,
    router,
    sessions::SessionStore,
};

#[tokio::main]
async fn main() -> Result<(), Report<StartupError>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::load().map_err(|e| StartupError::Config {
        reason: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let store = correlation_store(&config).await?;
    let client = Arc::new(
        HttpExchangeClient::new(config.delegation.exchange_timeout()).map_err(|e| {
            StartupError::HttpClient {
                reason: e.to_string(),
            }
        })?,
    );

    let state = match config.database_url.as_deref() {
        Some(database_url) => {
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .map_err(|e| StartupError::Database {
                    reason: e.to_string(),
                })?;

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&db_pool)
                .await
                .map_err(|e| StartupError::Database {
                    reason: e.to_string(),
                })?;

            let sessions = Arc::new(PgSessionRepository::new(db_pool));
            spawn_session_cleanup(sessions.clone(), config.session.cleanup_interval());
            AppState::new(&config, sessions, store, client)
        }
        None => {
            tracing::warn!("No database_url configured; sessions are kept in memory");
            let sessions = Arc::new(InMemorySessionService::new());
            spawn_session_cleanup(sessions.clone(), config.session.cleanup_interval());
            AppState::new(&config, sessions, store, client)
        }
    }
    .map_err(|e| StartupError::Config {
        reason: e.to_string(),
    })?;
    let state = Arc::new(state);

    spawn_reload_on_sighup(state.clone())?;

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| StartupError::Serve {
            reason: format!("failed to bind to {}: {e}", config.bind_addr),
        })?;

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| StartupError::Serve {
            reason: e.to_string(),
        })?;
    Ok(())
}

async fn correlation_store(
    config: &ServerConfig,
) -> Result<Arc<dyn CorrelationStore>, Report<StartupError>> {
    let unavailable = |e: Report<StoreError>| StartupError::CorrelationStore {
        reason: e.to_string(),
    };

    match config.correlation.backend {
        CorrelationBackend::Memory => {
            tracing::info!("Correlation tickets are kept in memory");
            let store = InMemoryCorrelationStore::new(config.correlation.ttl())
                .map_err(unavailable)?;
            Ok(Arc::new(store))
        }
        CorrelationBackend::Nats => {
            let nats = config.correlation.nats().ok_or_else(|| StartupError::Config {
                reason: "correlation.nats_url is required for the nats backend".to_string(),
            })?;
            tracing::info!(url = %nats.url, "Connecting to NATS correlation store...");
            let store = NatsCorrelationStore::connect(&nats).await.map_err(unavailable)?;
            Ok(Arc::new(store))
        }
    }
}

/// Cleans up expired sessions on startup and then periodically.
fn spawn_session_cleanup<S>(sessions: Arc<S>, period: std::time::Duration)
where
    S: SessionStore + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match sessions.delete_expired().await {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted_sessions = count, "Periodic session cleanup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to cleanup expired sessions");
                }
            }
        }
    });
}

/// Reloads providers and services from configuration on SIGHUP.
fn spawn_reload_on_sighup(state: Arc<AppState>) -> Result<(), Report<StartupError>> {
    let mut hangup = signal(SignalKind::hangup()).map_err(|e| StartupError::Serve {
        reason: format!("failed to install SIGHUP handler: {e}"),
    })?;

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received; reloading provider catalog");
            let reloaded = ServerConfig::load()
                .map_err(|e| e.to_string())
                .and_then(|config| state.reload(&config).map_err(|e| e.to_string()));
            if let Err(reason) = reloaded {
                tracing::error!(%reason, "reload failed; keeping previous catalog");
            }
        }
    });
    Ok(())
}
