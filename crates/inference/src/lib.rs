pub mod annotate;
pub mod backend;
pub mod config;
pub mod error;
pub mod formatter;
pub mod labels;
pub mod metrics;
pub mod pool;
pub mod processing;
pub mod service;
pub mod types;
pub mod video;

// Re-export commonly used types for convenience
pub use backend::{DetectionEngine, Device, DeviceSelection};
pub use config::InferenceConfig;
pub use error::InferenceError;
pub use labels::LabelTable;
pub use metrics::InferenceMetrics;
pub use service::InferenceService;
pub use types::{BoundingBox, Detection, DetectionBatch, EngineOutput};
pub use video::{
    StagedVideo, VideoDecoder, VideoDetections, VideoEncoder, annotate_video, process_video,
};
