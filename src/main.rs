//! crowdfund_core - Crowdfunding backend core
//!
//! Composition root: loads configuration, connects to Postgres, builds the
//! session manager, pledge ledger and analytics aggregator, and serves a
//! health endpoint until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crowdfund_core::clock::{Clock, SystemClock};
use crowdfund_core::payment::SimulatedPaymentGateway;
use crowdfund_core::store::{PgCredentialStore, PgLedgerStore};
use crowdfund_core::{db, AnalyticsAggregator, AuthSessionManager, Config, PledgeLedger};

/// Components shared with request handlers.
///
/// This binary only serves `/health`. The session, ledger and analytics
/// components are built and held here for the transport layer, which is
/// mounted outside this crate.
#[derive(Clone)]
struct AppState {
    pool: PgPool,
    #[allow(dead_code)]
    sessions: Arc<AuthSessionManager>,
    #[allow(dead_code)]
    ledger: Arc<PledgeLedger>,
    #[allow(dead_code)]
    analytics: Arc<AnalyticsAggregator>,
}

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "crowdfund_core=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Build the application router
fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match db::verify_connection(&state.pool).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;
    init_tracing(config.log_json);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting crowdfund_core");
    tracing::debug!(auth = ?config.auth, "Auth settings");
    tracing::info!("Connecting to database...");

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    // Verify database schema
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let credentials = Arc::new(PgCredentialStore::new(pool.clone()));
    let ledger_store = Arc::new(PgLedgerStore::new(pool.clone()));

    if config.is_production() {
        tracing::warn!("No payment processor configured; using the simulated gateway");
    }
    let gateway = Arc::new(SimulatedPaymentGateway::approving());

    let state = AppState {
        sessions: Arc::new(AuthSessionManager::new(
            credentials,
            config.auth.clone(),
            clock.clone(),
        )?),
        ledger: Arc::new(PledgeLedger::new(
            ledger_store.clone(),
            gateway,
            clock.clone(),
        )),
        analytics: Arc::new(AnalyticsAggregator::new(ledger_store, clock)),
        pool: pool.clone(),
    };

    tracing::info!("Listening on http://{}", addr);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
