use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use car_price::{config::ServerConfig, server, ArtifactStore, FeatureVector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env().context("failed to read configuration")?;

    // Artifacts must be in place before any traffic is accepted
    let store = Arc::new(ArtifactStore::new());
    let snap = store.load(&config.artifacts).with_context(|| {
        format!(
            "failed to load artifacts for {}",
            config.artifacts.schema.display()
        )
    })?;

    // Warmup forward over an all-zero row
    let zeros = FeatureVector::zeros(snap.schema().len());
    let _ = snap.predict(&zeros).context("warmup inference failed")?;
    tracing::info!("warmup forward ok");

    tracing::info!(
        "loaded schema; columns[{}]: {:?}",
        snap.schema().len(),
        snap.schema().columns()
    );
    drop(snap);

    let addr = config.addr;
    let app = server::router(server::AppState::new(store, config));

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
