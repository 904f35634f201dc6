use crate::{
    backend::DeviceSelection,
    pool::DEFAULT_POOL_SIZE,
    processing::{post::DEFAULT_IOU_THRESHOLD, pre::DEFAULT_INPUT_SIZE},
};
use std::{env, path::PathBuf};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub model_path: PathBuf,
    pub device: DeviceSelection,
    pub worker_pool_size: usize,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: (u32, u32),
    pub otel_endpoint: Option<String>,
}

impl InferenceConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let model_path = env::var("MODEL_PATH")
            .unwrap_or_else(|_| "models/best.onnx".to_string())
            .into();

        let device = env::var("DEVICE")
            .unwrap_or_else(|_| "auto".to_string())
            .parse()?;

        let worker_pool_size = env::var("WORKER_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        let confidence_threshold = env::var("CONFIDENCE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);

        let iou_threshold = env::var("IOU_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_IOU_THRESHOLD);

        let input_width = env::var("INPUT_WIDTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_INPUT_SIZE.0);

        let input_height = env::var("INPUT_HEIGHT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_INPUT_SIZE.1);

        let otel_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();

        if !(0.0..=1.0).contains(&confidence_threshold) {
            anyhow::bail!("CONFIDENCE_THRESHOLD must be within [0, 1], got {confidence_threshold}");
        }

        Ok(Self {
            model_path,
            device,
            worker_pool_size,
            confidence_threshold,
            iou_threshold,
            input_size: (input_width, input_height),
            otel_endpoint,
        })
    }
}
