use super::{DetectionEngine, Device};
use crate::{
    labels::LabelTable,
    types::{BoundingBox, EngineOutput},
};
use image::RgbImage;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

/// What a [`MockEngine`] returns from `detect`.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// No objects in any image.
    Empty,
    /// The same raw output for every image.
    Fixed(EngineOutput),
    /// One full-image detection whose class index is the red channel of the
    /// top-left pixel, so callers can tell frames apart.
    PixelClass,
    /// Fail every call with this message.
    Fail(String),
}

/// Engine stand-in that needs no model file.
pub struct MockEngine {
    behavior: MockBehavior,
    labels: LabelTable,
    device: Device,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockEngine {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            labels: LabelTable::coco(),
            device: Device::Cpu,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_labels(mut self, labels: LabelTable) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Sleep this long inside every `detect` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DetectionEngine for MockEngine {
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
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        match &self.behavior {
            MockBehavior::Empty => Ok(EngineOutput::default()),
            MockBehavior::Fixed(output) => {
                // Malformed fixtures are handed back untouched
                if output.confidences.len() != output.len()
                    || output.class_ids.len() != output.len()
                {
                    return Ok(output.clone());
                }
                let mut kept = EngineOutput {
                    inference_time_ms: output.inference_time_ms,
                    ..EngineOutput::default()
                };
                for i in 0..output.len() {
                    if output.confidences[i] >= confidence_threshold {
                        kept.push(output.boxes[i], output.confidences[i], output.class_ids[i]);
                    }
                }
                Ok(kept)
            }
            MockBehavior::PixelClass => {
                let class_id = image
                    .get_pixel_checked(0, 0)
                    .map(|p| p[0] as usize)
                    .unwrap_or(0);
                let mut output = EngineOutput::default();
                output.push(
                    BoundingBox::new(0.0, 0.0, image.width() as f32, image.height() as f32),
                    0.9,
                    class_id,
                );
                Ok(output)
            }
            MockBehavior::Fail(message) => anyhow::bail!("{message}"),
        }
    }
}
