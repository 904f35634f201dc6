use serde::{Serialize, Serializer, ser::SerializeSeq};

/// Axis-aligned box in absolute pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

// Serialised as `[x1, y1, x2, y2]`
impl Serialize for BoundingBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(4))?;
        seq.serialize_element(&self.x1)?;
        seq.serialize_element(&self.y1)?;
        seq.serialize_element(&self.x2)?;
        seq.serialize_element(&self.y2)?;
        seq.end()
    }
}

/// One recognized object instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    #[serde(rename = "class")]
    pub class_id: usize,
    pub class_name: String,
}

/// All detections for one image or video frame.
///
/// Only built through [`DetectionBatch::new`], which keeps `num_objects`
/// equal to the number of detections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionBatch {
    detections: Vec<Detection>,
    num_objects: usize,
    inference_time_ms: f64,
}

impl DetectionBatch {
    pub fn new(detections: Vec<Detection>, inference_time_ms: f64) -> Self {
        let num_objects = detections.len();
        Self {
            detections,
            num_objects,
            inference_time_ms,
        }
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn num_objects(&self) -> usize {
        self.num_objects
    }

    pub fn inference_time_ms(&self) -> f64 {
        self.inference_time_ms
    }
}

/// Raw output of a detection engine: parallel per-detection arrays.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub boxes: Vec<BoundingBox>,
    pub confidences: Vec<f32>,
    pub class_ids: Vec<usize>,
    pub inference_time_ms: f64,
}

impl EngineOutput {
    pub fn push(&mut self, bbox: BoundingBox, confidence: f32, class_id: usize) {
        self.boxes.push(bbox);
        self.confidences.push(confidence);
        self.class_ids.push(class_id);
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}
