use crate::{
    backend::{DetectionEngine, Device},
    config::InferenceConfig,
    error::InferenceError,
    formatter::format_detections,
    labels::LabelTable,
    metrics::InferenceMetrics,
    pool::WorkerPool,
    types::DetectionBatch,
};
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;

/// Runs detections for request handlers without blocking the async runtime.
///
/// The engine is shared read-only by every worker; the pool bounds how many
/// forward passes run at once.
pub struct InferenceService<E: DetectionEngine> {
    engine: Arc<E>,
    pool: WorkerPool,
    metrics: InferenceMetrics,
    confidence_threshold: f32,
}

impl<E: DetectionEngine> InferenceService<E> {
    pub fn new(
        engine: E,
        pool: WorkerPool,
        metrics: InferenceMetrics,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            pool,
            metrics,
            confidence_threshold,
        }
    }

    pub fn from_config(
        engine: E,
        config: &InferenceConfig,
        metrics: InferenceMetrics,
    ) -> anyhow::Result<Self> {
        let pool = WorkerPool::new(config.worker_pool_size)?;
        Ok(Self::new(engine, pool, metrics, config.confidence_threshold))
    }

    pub fn device(&self) -> Device {
        self.engine.device()
    }

    pub fn labels(&self) -> &LabelTable {
        self.engine.labels()
    }

    pub fn metrics(&self) -> &InferenceMetrics {
        &self.metrics
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Detect objects in one decoded image.
    ///
    /// Every call counts as a prediction and records latency; failures also
    /// bump the error counter and are logged with their detail.
    #[tracing::instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub async fn predict(&self, image: RgbImage) -> Result<DetectionBatch, InferenceError> {
        self.metrics.record_prediction();
        let start = Instant::now();

        let result = self.run_detection(image).await;

        self.metrics.observe_latency(start.elapsed().as_secs_f64());

        match &result {
            Ok(batch) => {
                tracing::debug!(num_objects = batch.num_objects(), "Prediction complete");
            }
            Err(e) => {
                self.metrics.record_error();
                tracing::error!(error = %e, "Prediction error");
            }
        }

        result
    }

    async fn run_detection(&self, image: RgbImage) -> Result<DetectionBatch, InferenceError> {
        let engine = Arc::clone(&self.engine);
        let threshold = self.confidence_threshold;

        let output = self
            .pool
            .execute(move || engine.detect(&image, threshold))
            .await?
            .map_err(|e| InferenceError::Internal(format!("{e:#}")))?;

        format_detections(output, self.engine.labels())
    }
}
