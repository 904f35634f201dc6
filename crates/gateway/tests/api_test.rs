use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use common::Environment;
use gateway::{
    config::GatewayConfig,
    router,
    state::{AppState, VideoOpener},
};
use image::{ImageFormat, Rgb, RgbImage};
use inference::{
    BoundingBox, EngineOutput, InferenceMetrics, InferenceService, VideoDecoder,
    backend::mock::{MockBehavior, MockEngine},
    pool::WorkerPool,
};
use serde_json::Value;
use std::{io::Cursor, path::Path, sync::Arc};
use tower::util::ServiceExt;

const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";

struct Part<'a> {
    name: &'a str,
    filename: &'a str,
    content_type: &'a str,
    data: Vec<u8>,
}

fn part<'a>(name: &'a str, filename: &'a str, content_type: &'a str, data: Vec<u8>) -> Part<'a> {
    Part {
        name,
        filename,
        content_type,
        data,
    }
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for p in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                p.name, p.filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", p.content_type).as_bytes());
        body.extend_from_slice(&p.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn red_square_png() -> Vec<u8> {
    let image = RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

struct ThreeFrames {
    left: u8,
}

impl VideoDecoder for ThreeFrames {
    fn frame_rate(&self) -> f64 {
        30.0
    }

    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        if self.left == 0 {
            return Ok(None);
        }
        self.left -= 1;
        Ok(Some(RgbImage::new(16, 16)))
    }
}

fn three_frame_opener() -> VideoOpener {
    Arc::new(|_: &Path| Ok(Box::new(ThreeFrames { left: 3 }) as Box<dyn VideoDecoder>))
}

fn failing_opener() -> VideoOpener {
    Arc::new(|_: &Path| anyhow::bail!("Invalid data found when processing input"))
}

fn setup(behavior: MockBehavior, opener: VideoOpener) -> (Router, AppState<MockEngine>) {
    setup_with_config(behavior, opener, &GatewayConfig::default())
}

fn setup_with_config(
    behavior: MockBehavior,
    opener: VideoOpener,
    config: &GatewayConfig,
) -> (Router, AppState<MockEngine>) {
    let service = InferenceService::new(
        MockEngine::new(behavior),
        WorkerPool::new(2).unwrap(),
        InferenceMetrics::new().unwrap(),
        0.25,
    );
    let state = AppState::new(service, opener);
    let app = router(state.clone(), config).unwrap();
    (app, state)
}

fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_root_serves_html() {
    let (app, _) = setup(MockBehavior::Empty, three_frame_opener());

    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.contains("text/html"));
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&body).contains("YOLO API is running!"));
}

#[tokio::test]
async fn test_health_reports_device() {
    let (app, _) = setup(MockBehavior::Empty, three_frame_opener());

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["device"], "cpu");
}

#[tokio::test]
async fn test_predict_blank_image() {
    let (app, state) = setup(MockBehavior::Empty, three_frame_opener());

    let request = multipart_request(
        "/predict",
        &[part("file", "red.png", "image/png", red_square_png())],
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["detections"], serde_json::json!([]));
    assert_eq!(json["num_objects"], 0);
    assert_eq!(json["image_size"], serde_json::json!([10, 10]));
    assert!(json["inference_time_ms"].is_number());
    assert!(json["processing_time_ms"].is_number());
    assert_eq!(state.service.metrics().predictions_total(), 1);
}

#[tokio::test]
async fn test_predict_returns_named_detections() {
    let mut output = EngineOutput::default();
    output.push(BoundingBox::new(1.0, 1.0, 9.0, 9.0), 0.87, 16);
    let (app, _) = setup(MockBehavior::Fixed(output), three_frame_opener());

    let request = multipart_request(
        "/predict",
        &[part("file", "dog.png", "image/png", red_square_png())],
    );
    let json = json_body(app.oneshot(request).await.unwrap()).await;

    assert_eq!(json["num_objects"], 1);
    let detection = &json["detections"][0];
    assert_eq!(detection["bbox"], serde_json::json!([1.0, 1.0, 9.0, 9.0]));
    assert_eq!(detection["class"], 16);
    assert_eq!(detection["class_name"], "dog");
}

#[tokio::test]
async fn test_predict_rejects_non_image_without_inference() {
    let (app, state) = setup(MockBehavior::Empty, three_frame_opener());

    let request = multipart_request(
        "/predict",
        &[part("file", "notes.txt", "text/plain", b"hello".to_vec())],
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["detail"], "File must be an image");
    assert_eq!(state.service.metrics().predictions_total(), 0);
}

#[tokio::test]
async fn test_predict_without_file_is_unprocessable() {
    let (app, _) = setup(MockBehavior::Empty, three_frame_opener());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/predict")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let request = multipart_request(
        "/predict",
        &[part("other", "red.png", "image/png", red_square_png())],
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_predict_rejects_undecodable_image() {
    let (app, state) = setup(MockBehavior::Empty, three_frame_opener());

    let request = multipart_request(
        "/predict",
        &[part("file", "broken.png", "image/png", b"not a png".to_vec())],
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.service.metrics().predictions_total(), 0);
}

#[tokio::test]
async fn test_engine_failure_is_a_server_error() {
    let (app, state) = setup(
        MockBehavior::Fail("session run failed".to_string()),
        three_frame_opener(),
    );

    let request = multipart_request(
        "/predict",
        &[part("file", "red.png", "image/png", red_square_png())],
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let detail = json_body(response).await["detail"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(detail.starts_with("Prediction failed"));
    assert_eq!(state.service.metrics().errors_total(), 1);
}

#[tokio::test]
async fn test_engine_failure_detail_is_hidden_in_production() {
    let config = GatewayConfig {
        environment: Environment::Production,
        ..GatewayConfig::default()
    };
    let (app, state) = setup_with_config(
        MockBehavior::Fail("onnxruntime: /opt/secret/models/best.onnx node 42 failed".to_string()),
        three_frame_opener(),
        &config,
    );

    let request = multipart_request(
        "/predict",
        &[part("file", "red.png", "image/png", red_square_png())],
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let detail = json_body(response).await["detail"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(detail, "Prediction failed");
    assert!(!detail.contains("/opt/secret"));
    assert_eq!(state.service.metrics().errors_total(), 1);
}

#[tokio::test]
async fn test_video_decode_detail_is_hidden_in_production() {
    let config = GatewayConfig {
        environment: Environment::Production,
        ..GatewayConfig::default()
    };
    let (app, _) = setup_with_config(MockBehavior::Empty, failing_opener(), &config);

    let request = multipart_request(
        "/predict_video",
        &[part("file", "clip.mp4", "video/mp4", b"garbage".to_vec())],
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["detail"], "Invalid video");
}

#[tokio::test]
async fn test_upload_over_body_limit_is_too_large() {
    let config = GatewayConfig {
        max_upload_mb: 1,
        ..GatewayConfig::default()
    };
    let (app, state) = setup_with_config(MockBehavior::Empty, three_frame_opener(), &config);

    let oversized = vec![0u8; 2 * 1024 * 1024];
    let request = multipart_request("/predict", &[part("file", "big.png", "image/png", oversized)]);
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(state.service.metrics().predictions_total(), 0);
}

#[tokio::test]
async fn test_batch_over_limit_is_rejected_before_inference() {
    let (app, state) = setup(MockBehavior::Empty, three_frame_opener());

    let parts: Vec<Part<'_>> = (0..11)
        .map(|_| part("files", "red.png", "image/png", red_square_png()))
        .collect();
    let response = app
        .oneshot(multipart_request("/batch_predict", &parts))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["detail"],
        "Maximum 10 images per batch"
    );
    assert_eq!(state.service.metrics().predictions_total(), 0);
}

#[tokio::test]
async fn test_batch_with_non_image_is_rejected_before_inference() {
    let (app, state) = setup(MockBehavior::Empty, three_frame_opener());

    let parts = [
        part("files", "a.png", "image/png", red_square_png()),
        part("files", "b.txt", "text/plain", b"oops".to_vec()),
    ];
    let response = app
        .oneshot(multipart_request("/batch_predict", &parts))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.service.metrics().predictions_total(), 0);
}

#[tokio::test]
async fn test_batch_results_follow_upload_order() {
    let (app, state) = setup(MockBehavior::Empty, three_frame_opener());

    let parts = [
        part("files", "first.png", "image/png", red_square_png()),
        part("files", "second.png", "image/png", red_square_png()),
        part("files", "third.png", "image/png", red_square_png()),
    ];
    let response = app
        .oneshot(multipart_request("/batch_predict", &parts))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let results = json["results"].as_array().unwrap();
    let names: Vec<&str> = results
        .iter()
        .map(|r| r["filename"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["first.png", "second.png", "third.png"]);
    assert!(results.iter().all(|r| r["num_objects"] == 0));
    assert_eq!(state.service.metrics().predictions_total(), 3);
}

#[tokio::test]
async fn test_predict_video_returns_one_batch_per_frame() {
    let (app, state) = setup(MockBehavior::Empty, three_frame_opener());

    let request = multipart_request(
        "/predict_video",
        &[part("file", "clip.mp4", "video/mp4", vec![0u8; 64])],
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["num_frames"], 3);
    assert_eq!(json["fps"], 30.0);
    assert_eq!(json["video_detections"].as_array().unwrap().len(), 3);
    assert_eq!(state.service.metrics().predictions_total(), 3);
}

#[tokio::test]
async fn test_predict_video_rejects_non_video() {
    let (app, _) = setup(MockBehavior::Empty, three_frame_opener());

    let request = multipart_request(
        "/predict_video",
        &[part("file", "red.png", "image/png", red_square_png())],
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["detail"], "File must be a video");
}

#[tokio::test]
async fn test_undecodable_video_is_a_client_error() {
    let (app, state) = setup(MockBehavior::Empty, failing_opener());

    let request = multipart_request(
        "/predict_video",
        &[part("file", "clip.mp4", "video/mp4", b"garbage".to_vec())],
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.service.metrics().predictions_total(), 0);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (app, _) = setup(MockBehavior::Empty, three_frame_opener());

    let request = multipart_request(
        "/predict",
        &[part("file", "red.png", "image/png", red_square_png())],
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("predictions_total 1"));
    assert!(text.contains("model_errors_total 0"));
    assert!(text.contains("prediction_latency_seconds_count 1"));
}
