use common::span_debug;
use crate::{
    error::InferenceError,
    labels::LabelTable,
    types::{Detection, DetectionBatch, EngineOutput},
};

/// Build a [`DetectionBatch`] from raw engine output.
///
/// Boxes are passed through untouched. Class indices missing from `labels`,
/// confidences outside `[0, 1]` and ragged arrays are rejected.
pub fn format_detections(
    output: EngineOutput,
    labels: &LabelTable,
) -> Result<DetectionBatch, InferenceError> {
    let _s = span_debug!("format_detections");

    let EngineOutput {
        boxes,
        confidences,
        class_ids,
        inference_time_ms,
    } = output;

    if boxes.len() != confidences.len() || boxes.len() != class_ids.len() {
        return Err(InferenceError::Format(format!(
            "length mismatch: {} boxes, {} confidences, {} class ids",
            boxes.len(),
            confidences.len(),
            class_ids.len()
        )));
    }

    let mut detections = Vec::with_capacity(boxes.len());

    for ((bbox, confidence), class_id) in boxes.into_iter().zip(confidences).zip(class_ids) {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(InferenceError::Format(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }

        let class_name = labels.name(class_id).ok_or_else(|| {
            InferenceError::Format(format!("class index {class_id} not in label table"))
        })?;

        detections.push(Detection {
            bbox,
            confidence,
            class_id,
            class_name: class_name.to_string(),
        });
    }

    Ok(DetectionBatch::new(detections, inference_time_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn output_with(class_ids: Vec<usize>, confidences: Vec<f32>) -> EngineOutput {
        let boxes = (0..class_ids.len())
            .map(|i| BoundingBox::new(i as f32, i as f32, i as f32 + 10.0, i as f32 + 20.0))
            .collect();
        EngineOutput {
            boxes,
            confidences,
            class_ids,
            inference_time_ms: 4.2,
        }
    }

    #[test]
    fn test_resolves_class_names_and_keeps_order() {
        let labels = LabelTable::coco();
        let batch = format_detections(output_with(vec![16, 0, 2], vec![0.9, 0.8, 0.3]), &labels)
            .unwrap();

        assert_eq!(batch.num_objects(), 3);
        let names: Vec<_> = batch
            .detections()
            .iter()
            .map(|d| d.class_name.as_str())
            .collect();
        assert_eq!(names, ["dog", "person", "car"]);
        assert_eq!(batch.inference_time_ms(), 4.2);
    }

    #[test]
    fn test_boxes_are_passed_through() {
        let labels = LabelTable::coco();
        let mut output = EngineOutput::default();
        output.push(BoundingBox::new(12.5, 7.25, 640.0, 480.0), 0.5, 1);

        let batch = format_detections(output, &labels).unwrap();
        assert_eq!(
            batch.detections()[0].bbox,
            BoundingBox::new(12.5, 7.25, 640.0, 480.0)
        );
    }

    #[test]
    fn test_unknown_class_index_is_fatal() {
        let labels = LabelTable::from_names(["cat", "dog"]).unwrap();
        let err = format_detections(output_with(vec![0, 2], vec![0.9, 0.9]), &labels).unwrap_err();

        assert!(matches!(err, InferenceError::Format(_)));
        assert!(err.to_string().contains("class index 2"));
    }

    #[test]
    fn test_confidence_out_of_range_is_rejected() {
        let labels = LabelTable::coco();
        assert!(format_detections(output_with(vec![0], vec![1.2]), &labels).is_err());
        assert!(format_detections(output_with(vec![0], vec![-0.1]), &labels).is_err());
        assert!(format_detections(output_with(vec![0], vec![f32::NAN]), &labels).is_err());
        assert!(format_detections(output_with(vec![0, 1], vec![0.0, 1.0]), &labels).is_ok());
    }

    #[test]
    fn test_ragged_output_is_rejected() {
        let labels = LabelTable::coco();
        let mut output = output_with(vec![0, 1], vec![0.9, 0.9]);
        output.confidences.pop();

        let err = format_detections(output, &labels).unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }

    #[test]
    fn test_empty_output_gives_empty_batch() {
        let batch = format_detections(EngineOutput::default(), &LabelTable::coco()).unwrap();
        assert_eq!(batch.num_objects(), 0);
        assert!(batch.detections().is_empty());
    }
}
