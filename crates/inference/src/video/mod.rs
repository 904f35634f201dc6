use crate::{
    annotate::Annotator, backend::DetectionEngine, error::InferenceError,
    service::InferenceService, types::DetectionBatch,
};
use anyhow::Context;
use image::RgbImage;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

/// Frames decoded ahead of inference; bounds memory held by the decoder side.
const FRAME_QUEUE_DEPTH: usize = 4;

/// Output frame rate when the source does not report one.
pub const FALLBACK_FPS: f64 = 25.0;

/// Sequential frame source.
pub trait VideoDecoder {
    /// Source frame rate in frames per second, 0.0 when unknown.
    fn frame_rate(&self) -> f64;

    /// Next frame in decode order, `None` at end of stream.
    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>>;
}

impl<D: VideoDecoder + ?Sized> VideoDecoder for Box<D> {
    fn frame_rate(&self) -> f64 {
        (**self).frame_rate()
    }

    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        (**self).next_frame()
    }
}

/// Sequential frame sink.
pub trait VideoEncoder {
    fn write_frame(&mut self, frame: &RgbImage) -> anyhow::Result<()>;

    /// Flush buffered frames and close the output.
    fn finish(&mut self) -> anyhow::Result<()>;
}

/// Detections for every frame of a video, in decode order.
#[derive(Debug, Clone)]
pub struct VideoDetections {
    pub fps: f64,
    pub frames: Vec<DetectionBatch>,
}

/// An uploaded video written to a uniquely named temporary file.
///
/// The file is removed when this value is dropped, whatever the outcome.
pub struct StagedVideo {
    file: NamedTempFile,
}

impl StagedVideo {
    pub fn stage(bytes: &[u8], extension: Option<&str>) -> std::io::Result<Self> {
        let suffix = extension
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| format!(".{ext}"))
            .unwrap_or_else(|| ".mp4".to_string());

        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;

        tracing::debug!(path = %file.path().display(), bytes = bytes.len(), "Staged video upload");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

enum DecodeEvent {
    Opened { fps: f64 },
    Frame(RgbImage),
    Failed(String),
}

/// Decode a video and run detection on every frame, in order.
///
/// The decoder is opened and driven on a blocking thread and hands frames
/// over a bounded channel. It is dropped as soon as the stream ends, fails,
/// or this future stops receiving.
pub async fn process_video<E, D, F>(
    service: &InferenceService<E>,
    open_decoder: F,
) -> Result<VideoDetections, InferenceError>
where
    E: DetectionEngine,
    D: VideoDecoder,
    F: FnOnce() -> anyhow::Result<D> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
    let decode_task = tokio::task::spawn_blocking(move || decode_frames(open_decoder, tx));

    let mut fps = 0.0;
    let mut frames = Vec::new();

    while let Some(event) = rx.recv().await {
        match event {
            DecodeEvent::Opened { fps: source_fps } => fps = source_fps,
            DecodeEvent::Frame(image) => frames.push(service.predict(image).await?),
            DecodeEvent::Failed(detail) => return Err(InferenceError::Decode(detail)),
        }
    }

    decode_task
        .await
        .map_err(|e| InferenceError::Internal(format!("decoder thread failed: {e}")))?;

    tracing::info!(frames = frames.len(), fps, "Video processed");

    Ok(VideoDetections { fps, frames })
}

fn decode_frames<D, F>(open_decoder: F, tx: mpsc::Sender<DecodeEvent>)
where
    D: VideoDecoder,
    F: FnOnce() -> anyhow::Result<D>,
{
    let mut decoder = match open_decoder() {
        Ok(decoder) => decoder,
        Err(e) => {
            let _ = tx.blocking_send(DecodeEvent::Failed(format!("cannot open video: {e:#}")));
            return;
        }
    };

    if tx
        .blocking_send(DecodeEvent::Opened {
            fps: decoder.frame_rate(),
        })
        .is_err()
    {
        return;
    }

    let mut index = 0u64;
    loop {
        match decoder.next_frame() {
            Ok(Some(frame)) => {
                if tx.blocking_send(DecodeEvent::Frame(frame)).is_err() {
                    tracing::debug!(index, "Frame consumer gone, stopping decoder");
                    return;
                }
                index += 1;
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx.blocking_send(DecodeEvent::Failed(format!(
                    "unreadable frame {index}: {e:#}"
                )));
                return;
            }
        }
    }
}

/// Decode the video again and write every frame with its detections drawn on.
///
/// `open_encoder` receives the first frame's width and height and the output
/// frame rate. Returns the number of frames written.
pub fn annotate_video<D, W, F>(
    mut decoder: D,
    detections: &VideoDetections,
    annotator: &Annotator,
    open_encoder: F,
) -> anyhow::Result<usize>
where
    D: VideoDecoder,
    W: VideoEncoder,
    F: FnOnce(u32, u32, f64) -> anyhow::Result<W>,
{
    let Some(first) = decoder.next_frame()? else {
        anyhow::bail!("Video has no frames to annotate");
    };

    let fps = if detections.fps > 0.0 {
        detections.fps
    } else {
        FALLBACK_FPS
    };
    let mut encoder = open_encoder(first.width(), first.height(), fps)?;

    let mut written = 0;
    let mut next = Some(first);
    while let Some(mut frame) = next {
        let batch = detections
            .frames
            .get(written)
            .with_context(|| format!("No detections for frame {written}"))?;
        annotator.draw(&mut frame, batch);
        encoder.write_frame(&frame)?;
        written += 1;
        next = decoder.next_frame()?;
    }

    if written != detections.frames.len() {
        anyhow::bail!(
            "Decoded {written} frames but have detections for {}",
            detections.frames.len()
        );
    }

    encoder.finish()?;
    tracing::info!(frames = written, fps, "Annotated video written");

    Ok(written)
}
