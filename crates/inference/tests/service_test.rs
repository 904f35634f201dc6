use image::{Rgb, RgbImage};
use inference::{
    BoundingBox, EngineOutput, InferenceError, InferenceMetrics, InferenceService, LabelTable,
    backend::mock::{MockBehavior, MockEngine},
    pool::WorkerPool,
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;

fn service(behavior: MockBehavior, workers: usize) -> InferenceService<MockEngine> {
    InferenceService::new(
        MockEngine::new(behavior),
        WorkerPool::new(workers).unwrap(),
        InferenceMetrics::new().unwrap(),
        0.25,
    )
}

fn red_square() -> RgbImage {
    RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]))
}

#[tokio::test]
async fn test_blank_image_yields_empty_batch() {
    let service = service(MockBehavior::Empty, 2);

    let batch = service.predict(red_square()).await.unwrap();

    assert!(batch.detections().is_empty());
    assert_eq!(batch.num_objects(), 0);
    assert_eq!(service.metrics().predictions_total(), 1);
    assert_eq!(service.metrics().errors_total(), 0);
    assert_eq!(service.metrics().latency_samples(), 1);
}

#[tokio::test]
async fn test_detections_are_named_from_label_table() {
    let mut output = EngineOutput::default();
    output.push(BoundingBox::new(1.0, 2.0, 8.0, 9.0), 0.9, 0);
    output.push(BoundingBox::new(0.0, 0.0, 4.0, 4.0), 0.6, 2);
    output.inference_time_ms = 3.5;
    let service = service(MockBehavior::Fixed(output), 2);

    let batch = service.predict(red_square()).await.unwrap();

    assert_eq!(batch.num_objects(), 2);
    assert_eq!(batch.detections()[0].class_name, "person");
    assert_eq!(batch.detections()[1].class_name, "car");
    assert_eq!(batch.detections()[0].bbox, BoundingBox::new(1.0, 2.0, 8.0, 9.0));
    assert_eq!(batch.inference_time_ms(), 3.5);
}

#[tokio::test]
async fn test_custom_model_classes_are_used() {
    let mut output = EngineOutput::default();
    output.push(BoundingBox::new(0.0, 0.0, 6.0, 6.0), 0.7, 1);
    let labels = LabelTable::from_names(["player", "ball"]).unwrap();
    let service = InferenceService::new(
        MockEngine::new(MockBehavior::Fixed(output)).with_labels(labels),
        WorkerPool::new(1).unwrap(),
        InferenceMetrics::new().unwrap(),
        0.25,
    );

    let batch = service.predict(red_square()).await.unwrap();

    assert_eq!(batch.detections()[0].class_name, "ball");
    assert!(batch.detections().iter().all(|d| !d.class_name.is_empty()));
    assert_eq!(service.labels().len(), 2);
}

#[tokio::test]
async fn test_low_confidence_detections_are_dropped() {
    let mut output = EngineOutput::default();
    output.push(BoundingBox::new(0.0, 0.0, 5.0, 5.0), 0.1, 0);
    output.push(BoundingBox::new(0.0, 0.0, 5.0, 5.0), 0.8, 1);
    let service = service(MockBehavior::Fixed(output), 1);

    let batch = service.predict(red_square()).await.unwrap();

    assert_eq!(batch.num_objects(), 1);
    assert_eq!(batch.detections()[0].class_name, "bicycle");
}

#[tokio::test]
async fn test_engine_failure_is_counted() {
    let service = service(MockBehavior::Fail("CUDA out of memory".to_string()), 1);

    let err = service.predict(red_square()).await.unwrap_err();

    assert!(matches!(err, InferenceError::Internal(_)));
    assert!(err.to_string().contains("CUDA out of memory"));
    assert_eq!(service.metrics().predictions_total(), 1);
    assert_eq!(service.metrics().errors_total(), 1);
    assert_eq!(service.metrics().latency_samples(), 1);
}

#[tokio::test]
async fn test_unknown_class_is_rejected_not_defaulted() {
    let mut output = EngineOutput::default();
    output.push(BoundingBox::new(0.0, 0.0, 5.0, 5.0), 0.9, 500);
    let service = service(MockBehavior::Fixed(output), 1);

    let err = service.predict(red_square()).await.unwrap_err();

    assert!(matches!(err, InferenceError::Format(_)));
    assert_eq!(service.metrics().errors_total(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_are_all_served() {
    let engine = MockEngine::new(MockBehavior::PixelClass).with_delay(Duration::from_millis(20));
    let service = Arc::new(InferenceService::new(
        engine,
        WorkerPool::new(2).unwrap(),
        InferenceMetrics::new().unwrap(),
        0.25,
    ));

    let mut requests = JoinSet::new();
    for class_id in 0..8u8 {
        let service = Arc::clone(&service);
        requests.spawn(async move {
            let image = RgbImage::from_pixel(4, 4, Rgb([class_id, 0, 0]));
            let batch = service.predict(image).await.unwrap();
            (class_id, batch)
        });
    }

    while let Some(result) = requests.join_next().await {
        let (class_id, batch) = result.unwrap();
        // Each caller gets the result for its own image
        assert_eq!(batch.detections()[0].class_id, class_id as usize);
    }
    assert_eq!(service.metrics().predictions_total(), 8);
    assert_eq!(service.metrics().errors_total(), 0);
}

#[tokio::test]
async fn test_health_facts_come_from_engine() {
    let service = InferenceService::new(
        MockEngine::new(MockBehavior::Empty).with_device(inference::Device::Cuda),
        WorkerPool::new(1).unwrap(),
        InferenceMetrics::new().unwrap(),
        0.4,
    );

    assert_eq!(service.device().as_str(), "cuda");
    assert_eq!(service.labels().len(), 80);
    assert_eq!(service.confidence_threshold(), 0.4);
}
