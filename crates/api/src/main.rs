use std::sync::Arc;

use anyhow::Context;
use streamlab_infra::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    streamlab_observability::init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(
        streamlab_api::app::build_services(&config)
            .await
            .context("failed to wire services")?,
    );
    let worker = services.spawn_worker();

    let app = streamlab_api::app::build_app(services.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        bucket = %config.bucket,
        backend = ?services.backend,
        "StreamLab API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down worker");
    worker.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
