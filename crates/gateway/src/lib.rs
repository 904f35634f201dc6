pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod upload;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
};
use config::GatewayConfig;
use inference::DetectionEngine;
use state::AppState;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub use error::ApiError;

/// Build the HTTP application around a shared inference service.
///
/// The state takes its environment from `config`.
pub fn router<E: DetectionEngine>(
    state: AppState<E>,
    config: &GatewayConfig,
) -> anyhow::Result<Router> {
    let state = state.with_environment(config.environment);

    Ok(Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health::<E>))
        .route("/metrics", get(routes::metrics::<E>))
        .route("/predict", post(routes::predict::<E>))
        .route("/batch_predict", post(routes::batch_predict::<E>))
        .route("/predict_video", post(routes::predict_video::<E>))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes()))
        .layer(cors_layer(config)?)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn cors_layer(config: &GatewayConfig) -> anyhow::Result<CorsLayer> {
    let Some(origins) = config.cors_origins() else {
        return Ok(CorsLayer::permissive());
    };

    let origins = origins
        .iter()
        .map(|origin| HeaderValue::from_str(origin))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any))
}
