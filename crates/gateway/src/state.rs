use crate::error::ApiError;
use common::Environment;
use inference::{DetectionEngine, InferenceError, InferenceService, VideoDecoder};
use std::path::Path;
use std::sync::Arc;

/// Opens a staged video file for decoding.
pub type VideoOpener =
    Arc<dyn Fn(&Path) -> anyhow::Result<Box<dyn VideoDecoder>> + Send + Sync + 'static>;

pub struct AppState<E: DetectionEngine> {
    pub service: Arc<InferenceService<E>>,
    pub open_video: VideoOpener,
    /// Controls how much failure detail reaches clients.
    pub environment: Environment,
}

impl<E: DetectionEngine> AppState<E> {
    pub fn new(service: InferenceService<E>, open_video: VideoOpener) -> Self {
        Self {
            service: Arc::new(service),
            open_video,
            environment: Environment::Development,
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn reject(&self, err: InferenceError) -> ApiError {
        ApiError::from_inference(err, self.environment)
    }
}

// Manual impl: cloning shares the service, so `E` need not be `Clone`
impl<E: DetectionEngine> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            open_video: Arc::clone(&self.open_video),
            environment: self.environment,
        }
    }
}

/// Video opener backed by FFmpeg.
#[cfg(feature = "ffmpeg")]
pub fn ffmpeg_opener() -> VideoOpener {
    Arc::new(|path: &Path| {
        let decoder = inference::video::ffmpeg::FfmpegDecoder::open(path)?;
        Ok(Box::new(decoder) as Box<dyn VideoDecoder>)
    })
}

/// Video opener for builds without FFmpeg; every video is rejected.
#[cfg(not(feature = "ffmpeg"))]
pub fn ffmpeg_opener() -> VideoOpener {
    Arc::new(|_: &Path| anyhow::bail!("video decoding is not enabled in this build"))
}
