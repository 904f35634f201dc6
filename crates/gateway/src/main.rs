use anyhow::Context;
use common::init_observability;
use gateway::{
    config::get_configuration,
    router,
    state::{AppState, ffmpeg_opener},
};
use inference::{
    InferenceConfig, InferenceMetrics, InferenceService, backend::ort::OrtEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_configuration().context("Failed to load gateway configuration")?;
    let inference_config = InferenceConfig::from_env()?;

    let _telemetry = init_observability(
        "gateway",
        inference_config.otel_endpoint.as_deref(),
        config.log_level,
        config.environment,
    )?;

    tracing::info!(config = ?config, inference = ?inference_config, "Loaded configuration");

    let engine = OrtEngine::load(
        &inference_config.model_path,
        inference_config.device,
        inference_config.input_size,
        inference_config.iou_threshold,
    )?;

    let metrics = InferenceMetrics::new()?;
    let service = InferenceService::from_config(engine, &inference_config, metrics)?;
    tracing::info!(
        device = %service.device(),
        workers = inference_config.worker_pool_size,
        "Inference service ready"
    );

    let app = router(AppState::new(service, ffmpeg_opener()), &config)?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
