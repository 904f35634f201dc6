use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::Environment;
use inference::InferenceError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// A required upload field is absent.
    #[error("{0}")]
    MissingFile(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingFile(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map an inference failure to a client response.
    ///
    /// The failure detail is logged in full; clients only see it outside
    /// production.
    pub fn from_inference(err: InferenceError, environment: Environment) -> Self {
        let expose = environment != Environment::Production;
        let with_detail = |summary: &str, detail: &str| {
            if expose {
                format!("{summary}: {detail}")
            } else {
                summary.to_string()
            }
        };

        match err {
            InferenceError::Decode(detail) => {
                tracing::warn!(error = %detail, "Upload could not be decoded");
                ApiError::BadRequest(with_detail("Invalid video", &detail))
            }
            InferenceError::Internal(detail) | InferenceError::Format(detail) => {
                tracing::error!(error = %detail, "Prediction failed");
                ApiError::Internal(with_detail("Prediction failed", &detail))
            }
            InferenceError::PoolClosed => {
                ApiError::Internal(with_detail("Prediction failed", "service is shutting down"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
