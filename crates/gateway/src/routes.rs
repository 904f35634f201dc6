use crate::{
    error::ApiError,
    state::AppState,
    upload::{decode_image, read_uploads},
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::header,
    response::{Html, IntoResponse},
};
use inference::{DetectionBatch, DetectionEngine, Device, StagedVideo, process_video};
use serde::Serialize;
use std::time::Instant;

pub const MAX_BATCH_FILES: usize = 10;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head><title>Object Detection API</title></head>
  <body>
    <h1>YOLO API is running!</h1>
    <ul>
      <li>POST /predict (multipart field <code>file</code>, image)</li>
      <li>POST /batch_predict (multipart field <code>files</code>, up to 10 images)</li>
      <li>POST /predict_video (multipart field <code>file</code>, video)</li>
      <li>GET /health</li>
      <li>GET /metrics</li>
    </ul>
  </body>
</html>
"#;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub device: Device,
}

#[derive(Serialize)]
pub struct PredictResponse {
    #[serde(flatten)]
    pub batch: DetectionBatch,
    pub processing_time_ms: f64,
    pub image_size: [u32; 2],
}

#[derive(Serialize)]
pub struct BatchItem {
    #[serde(flatten)]
    pub batch: DetectionBatch,
    pub filename: Option<String>,
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub results: Vec<BatchItem>,
}

#[derive(Serialize)]
pub struct VideoResponse {
    pub video_detections: Vec<DetectionBatch>,
    pub fps: f64,
    pub num_frames: usize,
}

pub async fn root() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health<E: DetectionEngine>(State(state): State<AppState<E>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        device: state.service.device(),
    })
}

pub async fn metrics<E: DetectionEngine>(
    State(state): State<AppState<E>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .service
        .metrics()
        .render()
        .map_err(|e| ApiError::Internal(format!("Failed to render metrics: {e:#}")))?;

    Ok(([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body))
}

pub async fn predict<E: DetectionEngine>(
    State(state): State<AppState<E>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let start = Instant::now();

    let upload = read_uploads(multipart, "file", None)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::MissingFile("Field `file` is required".to_string()))?;
    upload.ensure_kind("image/", "File must be an image")?;

    let image = decode_image(upload.bytes).await?;
    let image_size = [image.width(), image.height()];

    let batch = state
        .service
        .predict(image)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(Json(PredictResponse {
        batch,
        processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        image_size,
    }))
}

pub async fn batch_predict<E: DetectionEngine>(
    State(state): State<AppState<E>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let uploads = read_uploads(
        multipart,
        "files",
        Some((MAX_BATCH_FILES, "Maximum 10 images per batch")),
    )
    .await?;

    for upload in &uploads {
        upload.ensure_kind("image/", "All files must be images")?;
    }

    let mut results = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let image = decode_image(upload.bytes).await?;
        let batch = state
            .service
            .predict(image)
            .await
            .map_err(|e| state.reject(e))?;
        results.push(BatchItem {
            batch,
            filename: upload.filename,
        });
    }

    tracing::info!(files = results.len(), "Batch prediction complete");

    Ok(Json(BatchResponse { results }))
}

pub async fn predict_video<E: DetectionEngine>(
    State(state): State<AppState<E>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VideoResponse>, ApiError> {
    let upload = read_uploads(multipart, "file", None)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::MissingFile("Field `file` is required".to_string()))?;
    upload.ensure_kind("video/", "File must be a video")?;

    let staged = StagedVideo::stage(&upload.bytes, upload.extension())
        .map_err(|e| ApiError::Internal(format!("Failed to stage video: {e}")))?;

    let path = staged.path().to_path_buf();
    let open_video = state.open_video.clone();
    let result = process_video(state.service.as_ref(), move || open_video(&path)).await;

    // Removes the temp file on every path
    drop(staged);

    let video = result.map_err(|e| state.reject(e))?;
    Ok(Json(VideoResponse {
        num_frames: video.frames.len(),
        fps: video.fps,
        video_detections: video.frames,
    }))
}
