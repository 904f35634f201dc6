use super::{DetectionEngine, Device, DeviceSelection};
use crate::{
    labels::LabelTable,
    processing::{
        post::PostProcessor,
        pre::{LetterboxParams, PreProcessor},
    },
    types::EngineOutput,
};
use image::RgbImage;
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider},
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use std::{cell::RefCell, path::Path, sync::Mutex, time::Instant};

const INPUT_NAME: &str = "images";
const OUTPUT_NAME: &str = "output0";
const NAMES_METADATA_KEY: &str = "names";

thread_local! {
    // One letterbox buffer set per worker thread
    static PREPROCESSOR: RefCell<Option<PreProcessor>> = const { RefCell::new(None) };
}

/// YOLO detector exported to ONNX by Ultralytics, run with ONNX Runtime.
///
/// `Session::run` needs exclusive access, so only the forward pass is
/// serialised through a mutex. Pre- and post-processing run in parallel on
/// the calling threads.
pub struct OrtEngine {
    session: Mutex<Session>,
    input_size: (u32, u32),
    postprocessor: PostProcessor,
    labels: LabelTable,
    device: Device,
}

impl OrtEngine {
    pub fn load(
        path: &Path,
        selection: DeviceSelection,
        input_size: (u32, u32),
        iou_threshold: f32,
    ) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!("Model file not found: {}", path.display());
        }

        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let device = resolve_device(selection)?;

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        match device {
            Device::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build()
                    .error_on_failure()])?;
            }
            Device::Cpu => {
                tracing::info!("Initializing ONNX Runtime with CPU execution provider");
            }
        }

        let session = builder.commit_from_file(path)?;
        let labels = load_labels(&session);

        tracing::info!(
            model_path = %path.display(),
            device = %device,
            num_classes = labels.len(),
            "Model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_size,
            postprocessor: PostProcessor::new(iou_threshold, labels.len()),
            labels,
            device,
        })
    }
}

impl DetectionEngine for OrtEngine {
    fn device(&self) -> Device {
        self.device
    }

    fn labels(&self) -> &LabelTable {
        &self.labels
    }

    fn detect(
        &self,
        image: &RgbImage,
        confidence_threshold: f32,
    ) -> anyhow::Result<EngineOutput> {
        let (input, transform) = preprocess_on_thread(self.input_size, image)?;

        let (output, inference_time_ms) = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| anyhow::anyhow!("Session poisoned by an earlier panic"))?;

            let _infer_span = tracing::info_span!("model_inference").entered();
            let start = Instant::now();
            let outputs =
                session.run(ort::inputs![INPUT_NAME => TensorRef::from_array_view(input.view())?])?;
            let inference_time_ms = start.elapsed().as_secs_f64() * 1000.0;

            // Outputs borrow the session, copy them out before unlocking
            let output = outputs[OUTPUT_NAME].try_extract_array::<f32>()?.into_owned();
            (output, inference_time_ms)
        };

        let mut result =
            self.postprocessor
                .parse_detections(&output.view(), &transform, confidence_threshold)?;
        result.inference_time_ms = inference_time_ms;

        Ok(result)
    }
}

/// Letterboxes `image` with the calling thread's buffers, outside any lock.
fn preprocess_on_thread(
    input_size: (u32, u32),
    image: &RgbImage,
) -> anyhow::Result<(Array<f32, IxDyn>, LetterboxParams)> {
    PREPROCESSOR.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.as_ref().is_some_and(|p| p.input_size != input_size) {
            *slot = None;
        }
        slot.get_or_insert_with(|| PreProcessor::new(input_size))
            .preprocess(image)
    })
}

fn resolve_device(selection: DeviceSelection) -> anyhow::Result<Device> {
    match selection {
        DeviceSelection::Cpu => Ok(Device::Cpu),
        DeviceSelection::Cuda => Ok(Device::Cuda),
        DeviceSelection::Auto => {
            let available = CUDAExecutionProvider::default()
                .is_available()
                .unwrap_or(false);
            Ok(if available { Device::Cuda } else { Device::Cpu })
        }
    }
}

fn load_labels(session: &Session) -> LabelTable {
    let raw = session
        .metadata()
        .ok()
        .and_then(|m| m.custom(NAMES_METADATA_KEY).ok().flatten());

    match raw.map(|r| LabelTable::from_ultralytics_metadata(&r)) {
        Some(Ok(table)) => table,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Unreadable class names in model metadata, using COCO");
            LabelTable::coco()
        }
        None => {
            tracing::warn!("No class names in model metadata, using COCO");
            LabelTable::coco()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocessing_runs_concurrently_per_thread() {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                std::thread::spawn(move || {
                    let image = RgbImage::from_pixel(100 + i * 10, 80, Rgb([i as u8, 0, 0]));
                    let (tensor, _) = preprocess_on_thread((64, 64), &image).unwrap();
                    tensor.shape().to_vec()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![1, 3, 64, 64]);
        }
    }

    #[test]
    fn test_thread_buffers_follow_input_size() {
        let image = RgbImage::from_pixel(50, 50, Rgb([200, 100, 0]));

        let (small, _) = preprocess_on_thread((32, 32), &image).unwrap();
        let (large, _) = preprocess_on_thread((64, 48), &image).unwrap();

        assert_eq!(small.shape(), &[1, 3, 32, 32]);
        assert_eq!(large.shape(), &[1, 3, 48, 64]);
    }
}
