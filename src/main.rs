use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use phone_vault::{
    http, Config, EnvelopeCipher, KeyClientRegistry, PostgresRecordStore, RecordService,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    init_tracing();
    if dotenv.is_err() {
        tracing::warn!(".env file not found, using process environment");
    }

    // Fail fast: nothing listens until config, store and key clients are all up
    let config = Config::from_env().context("failed to load configuration")?;

    tracing::info!(source = ?config.database.source, "connecting to PostgreSQL");
    let store = Arc::new(
        PostgresRecordStore::connect(&config.database)
            .await
            .context("failed to initialize record store")?,
    );

    tracing::info!(backend = ?config.kms.backend, "initializing key clients");
    let registry = KeyClientRegistry::connect(&config.kms)
        .await
        .context("failed to initialize key clients")?;

    let cipher = EnvelopeCipher::new(config.kms.timeout);
    let service = RecordService::new(Arc::new(registry), cipher, store.clone());
    let app = http::router(service, config.request_timeout);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    store.pool().close().await;
    tracing::info!("shut down");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
