use super::pre::LetterboxParams;
use crate::types::{BoundingBox, EngineOutput};
use ndarray::ArrayViewD;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const MAX_DETECTIONS: usize = 300;
const END_TO_END_WIDTH: usize = 6;

pub struct PostProcessor {
    pub iou_threshold: f32,
    pub num_classes: usize,
}

impl PostProcessor {
    pub fn new(iou_threshold: f32, num_classes: usize) -> Self {
        Self {
            iou_threshold,
            num_classes,
        }
    }

    /// Decode a YOLO output tensor into boxes in original image pixels.
    ///
    /// Accepts the anchor layout `[1, 4 + nc, N]` (cx, cy, w, h, class scores),
    /// which goes through NMS, or the end-to-end layout `[1, K, 6]`
    /// (x1, y1, x2, y2, score, class), which is already suppressed.
    #[tracing::instrument(skip(self, output, transform))]
    pub fn parse_detections(
        &self,
        output: &ArrayViewD<f32>,
        transform: &LetterboxParams,
        confidence_threshold: f32,
    ) -> anyhow::Result<EngineOutput> {
        let shape = output.shape();
        if shape.len() != 3 || shape[0] != 1 {
            anyhow::bail!("Unexpected output shape {:?}", shape);
        }

        let mut candidates = if shape[1] == 4 + self.num_classes {
            let candidates = self.decode_anchors(output, transform, confidence_threshold);
            non_max_suppression(candidates, self.iou_threshold)
        } else if shape[2] == END_TO_END_WIDTH {
            self.decode_end_to_end(output, transform, confidence_threshold)?
        } else {
            anyhow::bail!(
                "Unexpected output shape {:?} for {} classes",
                shape,
                self.num_classes
            );
        };

        candidates.truncate(MAX_DETECTIONS);

        let mut result = EngineOutput::default();
        for c in candidates {
            result.push(c.bbox, c.confidence, c.class_id);
        }
        Ok(result)
    }

    fn decode_anchors(
        &self,
        output: &ArrayViewD<f32>,
        transform: &LetterboxParams,
        confidence_threshold: f32,
    ) -> Vec<Candidate> {
        let num_anchors = output.shape()[2];
        let mut candidates = Vec::new();

        for i in 0..num_anchors {
            let mut confidence = f32::NEG_INFINITY;
            let mut class_id = 0usize;
            for c in 0..self.num_classes {
                let score = output[[0, 4 + c, i]];
                if score > confidence {
                    confidence = score;
                    class_id = c;
                }
            }

            if confidence < confidence_threshold {
                continue;
            }

            let (x1, y1, x2, y2) = cxcywh_to_xyxy(
                output[[0, 0, i]],
                output[[0, 1, i]],
                output[[0, 2, i]],
                output[[0, 3, i]],
            );

            candidates.push(Candidate {
                bbox: unletterbox(x1, y1, x2, y2, transform),
                confidence,
                class_id,
            });
        }

        candidates
    }

    fn decode_end_to_end(
        &self,
        output: &ArrayViewD<f32>,
        transform: &LetterboxParams,
        confidence_threshold: f32,
    ) -> anyhow::Result<Vec<Candidate>> {
        let num_rows = output.shape()[1];
        let mut candidates = Vec::new();

        for i in 0..num_rows {
            let confidence = output[[0, i, 4]];
            if confidence < confidence_threshold {
                continue;
            }

            let raw_class = output[[0, i, 5]];
            if !raw_class.is_finite() || raw_class < 0.0 {
                anyhow::bail!("Invalid class index {} in row {}", raw_class, i);
            }

            candidates.push(Candidate {
                bbox: unletterbox(
                    output[[0, i, 0]],
                    output[[0, i, 1]],
                    output[[0, i, 2]],
                    output[[0, i, 3]],
                    transform,
                ),
                confidence,
                class_id: raw_class.round() as usize,
            });
        }

        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(candidates)
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    bbox: BoundingBox,
    confidence: f32,
    class_id: usize,
}

/// Per-class greedy NMS; the result is sorted by descending confidence.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// Map a box from letterboxed input space back to original image pixels.
fn unletterbox(x1: f32, y1: f32, x2: f32, y2: f32, t: &LetterboxParams) -> BoundingBox {
    let w = t.orig_width as f32;
    let h = t.orig_height as f32;
    BoundingBox::new(
        ((x1 - t.offset_x) / t.scale).clamp(0.0, w),
        ((y1 - t.offset_y) / t.scale).clamp(0.0, h),
        ((x2 - t.offset_x) / t.scale).clamp(0.0, w),
        ((y2 - t.offset_y) / t.scale).clamp(0.0, h),
    )
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
    let x1 = cx - w / 2.0;
    let y1 = cy - h / 2.0;
    let x2 = cx + w / 2.0;
    let y2 = cy + h / 2.0;
    (x1, y1, x2, y2)
}
