use anyhow::{Context, Result};
use axum::{
    Router,
    http::{header, HeaderName, HeaderValue, Method},
};
use chrono::Utc;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{info, error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gcapi_security::{
    config::Config,
    db::{PgTokenStore, TokenStore},
    handlers::{self, CSRF_HEADER},
    monitoring::Metrics,
    security,
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting the {} security service", config.project_name);

    config.validate()?;
    let config = Arc::new(config);
    info!("Configuration loaded successfully");

    // Initialize components
    let store = PgTokenStore::new(&config.database_url).await?;
    info!("Database connection established");

    // Run migrations
    run_migrations(&store).await?;
    info!("Database migrations completed");

    let core = security::initialize(&config, Arc::new(store.clone()))?;
    let metrics = Arc::new(Metrics::new());

    let state = AppState {
        codec: Arc::new(core.codec),
        auth: Arc::new(core.auth),
        metrics,
    };

    // Build router
    let app = build_router(state, &config.allowed_origins);

    // Start background tasks
    tokio::spawn(cleanup_task(store));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(origin) => Some(origin),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(CSRF_HEADER),
        ]);

    handlers::router(state)
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1MB limit
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn run_migrations(store: &PgTokenStore) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(store.pool())
        .await
        .context("Failed to run migrations")?;
    Ok(())
}

async fn cleanup_task(store: PgTokenStore) {
    let mut interval = tokio::time::interval(Duration::from_secs(3600)); // 1 hour

    loop {
        interval.tick().await;

        match store.purge_expired(Utc::now()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Purged {} expired token records", count);
                }
            }
            Err(e) => {
                error!("Failed to purge expired tokens: {}", e);
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
