//! Box office server
//!
//! Serves checkout and payment notifications over HTTP, with Prometheus
//! metrics on a separate listener.
//!
//! # Usage
//!
//! ```bash
//! # Start PostgreSQL
//! docker compose up -d
//!
//! # Run server (reads .env)
//! cargo run --bin boxoffice-server
//! ```

use anyhow::Context;
use axum::{routing::get, Router};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use boxoffice_core::{ManifestCodec, SystemClock};
use boxoffice_postgres::{
    migrate, PgCustomerDirectory, PgFulfillmentStore, PgPriceCatalog, PgReadinessProbe,
};
use boxoffice_runtime::{
    metrics::MetricsServer, CheckoutSessionBuilder, FulfillmentEngine, HttpPaymentGateway,
};
use boxoffice_web::{build_router, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,boxoffice=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting box office server...");

    let config = Config::from_env();
    tracing::info!(
        bind = %config.bind_addr(),
        metrics = %config.metrics_addr(),
        gateway = %config.gateway.api_url,
        "Configuration loaded"
    );
    if config.uses_dev_signing_key() {
        tracing::warn!("MANIFEST_SIGNING_KEY is not set; using the development key");
    }

    // Metrics
    let mut metrics = MetricsServer::new(
        config
            .metrics_addr()
            .parse()
            .context("invalid METRICS_HOST/METRICS_PORT")?,
    );
    metrics.start()?;
    let metrics = Arc::new(metrics);
    let metrics_listener = tokio::net::TcpListener::bind(metrics.addr()).await?;
    let metrics_router = Router::new().route(
        "/metrics",
        get({
            let metrics = Arc::clone(&metrics);
            move || {
                let metrics = Arc::clone(&metrics);
                async move { metrics.render().unwrap_or_default() }
            }
        }),
    );
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_router).await {
            tracing::error!(error = %e, "Metrics listener stopped");
        }
    });

    // Database
    let pool = config
        .postgres
        .connect()
        .await
        .context("failed to connect to PostgreSQL")?;
    migrate(&pool).await.context("failed to run migrations")?;
    tracing::info!("Database ready");

    // Services
    let codec = ManifestCodec::new(&config.manifest_signing_key);
    let gateway = HttpPaymentGateway::new(
        config.gateway.api_url.clone(),
        config.gateway.secret_key.clone(),
        config.gateway.timeout,
    )?;
    let checkout = CheckoutSessionBuilder::new(
        Arc::new(PgCustomerDirectory::new(pool.clone())),
        Arc::new(PgPriceCatalog::new(pool.clone())),
        Arc::new(gateway),
        codec.clone(),
        config.checkout.clone(),
    );
    let engine = FulfillmentEngine::new(
        PgFulfillmentStore::new(pool.clone()),
        codec,
        Arc::new(SystemClock),
    )
    .with_retry_policy(config.fulfillment_retry.clone());

    let state = AppState::new(
        checkout,
        Arc::new(engine),
        Arc::new(PgReadinessProbe::new(pool.clone())),
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(addr = %listener.local_addr()?, "Listening");

    // Serve until Ctrl+C, then drain in-flight requests for at most
    // SHUTDOWN_TIMEOUT.
    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = stop_rx.changed().await;
    });
    let mut server = std::pin::pin!(std::future::IntoFuture::into_future(server));

    tokio::select! {
        result = &mut server => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutting down gracefully...");
            let _ = stop_tx.send(true);
            if tokio::time::timeout(config.server.shutdown_timeout, server).await.is_err() {
                tracing::warn!("Shutdown timeout elapsed with requests still in flight");
            }
        }
    }

    pool.close().await;
    tracing::info!("Stopped");
    Ok(())
}
