use crate::error::ApiError;
use axum::{
    body::Bytes,
    extract::{
        Multipart,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use image::RgbImage;

/// One uploaded file from a multipart form.
#[derive(Debug)]
pub struct Upload {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl Upload {
    /// Require a content type under `prefix`, e.g. `image/`.
    pub fn ensure_kind(&self, prefix: &str, message: &str) -> Result<(), ApiError> {
        match &self.content_type {
            Some(content_type) if content_type.starts_with(prefix) => Ok(()),
            _ => Err(ApiError::BadRequest(message.to_string())),
        }
    }

    pub fn extension(&self) -> Option<&str> {
        self.filename
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext)
    }
}

/// Read every part named `field`, in order.
///
/// Reading stops with a 400 as soon as more than `max_files` parts are seen,
/// so oversized batches are never buffered whole. An absent or non-multipart
/// body, or a form without the field, is reported as a missing file.
pub async fn read_uploads(
    multipart: Result<Multipart, MultipartRejection>,
    field: &str,
    max_files: Option<(usize, &str)>,
) -> Result<Vec<Upload>, ApiError> {
    let mut multipart =
        multipart.map_err(|e| ApiError::MissingFile(format!("Field `{field}` is required: {e}")))?;

    let mut uploads = Vec::new();
    while let Some(part) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        if part.name() != Some(field) {
            continue;
        }

        if let Some((limit, message)) = max_files {
            if uploads.len() >= limit {
                return Err(ApiError::BadRequest(message.to_string()));
            }
        }

        let filename = part.file_name().map(str::to_string);
        let content_type = part.content_type().map(str::to_string);
        let bytes = part
            .bytes()
            .await
            .map_err(multipart_error)?;

        uploads.push(Upload {
            filename,
            content_type,
            bytes,
        });
    }

    if uploads.is_empty() {
        return Err(ApiError::MissingFile(format!("Field `{field}` is required")));
    }
    Ok(uploads)
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!("Upload too large: {e}"))
    } else {
        ApiError::BadRequest(format!("Multipart error: {e}"))
    }
}

/// Decode an uploaded image to RGB off the async runtime.
pub async fn decode_image(bytes: Bytes) -> Result<RgbImage, ApiError> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes).map(|img| img.to_rgb8()))
        .await
        .map_err(|e| ApiError::Internal(format!("Image decoding task failed: {e}")))?
        .map_err(|e| ApiError::BadRequest(format!("Invalid image: {e}")))
}
