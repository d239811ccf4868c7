// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Noctua Webhook Server
//!
//! HTTP front for the inbound payment-event webhook processor.

mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use noctua_webhook::{
    HttpParameterStore, LogMetricsSink, ProcessingLedger, RedisLedger, TokioSleep, WebhookConfig,
    WebhookProcessor,
};

use crate::routes::create_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,noctua_webhook=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Noctua webhook server v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = WebhookConfig::from_env()?;
    tracing::info!("Configuration loaded");

    // The ledger is optional: an unreachable or unconfigured ledger
    // degrades idempotency to best-effort instead of blocking startup
    let ledger: Option<Arc<dyn ProcessingLedger>> = match &config.ledger_url {
        Some(url) => match RedisLedger::connect(url).await {
            Ok(ledger) => {
                tracing::info!("Idempotency ledger connected");
                Some(Arc::new(ledger))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Idempotency ledger unavailable, continuing without it");
                None
            }
        },
        None => {
            tracing::warn!("WEBHOOK_LEDGER_URL not set, idempotency checks disabled");
            None
        }
    };

    let store = Arc::new(HttpParameterStore::new(
        config.secret_store_url.clone(),
        config.secret_store_token.clone(),
    ));

    let processor = WebhookProcessor::new(
        &config,
        store,
        ledger,
        Arc::new(LogMetricsSink),
        Arc::new(TokioSleep),
    );

    // Build the router
    let state = AppState::new(processor);
    let app = create_router(state).layer(TraceLayer::new_for_http());

    // Parse bind address
    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let addr: SocketAddr = bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
