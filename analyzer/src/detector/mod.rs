//! Object detection capability used by the scorer.
//!
//! The scorer only asks whether a frame produced any box at all, so the
//! model behind [`ObjectDetector`] is interchangeable. With the `onnx`
//! feature a YOLOv8 detector running on ONNX Runtime is available.

#[cfg(feature = "onnx")]
mod yolo;

#[cfg(feature = "onnx")]
pub use yolo::YoloDetector;

use crate::video::Frame;

/// Axis-aligned box in pixel coordinates of the analysed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }
}

/// Boxes produced for one input image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
    pub boxes: Vec<BoundingBox>,
}

impl DetectionSet {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes }
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("failed to load detector model {path}: {reason}")]
    Load { path: String, reason: String },
    #[error("failed to prepare detector input: {0}")]
    Preprocess(String),
    #[error("detector inference failed: {0}")]
    Inference(String),
    #[error("unexpected detector output shape {0:?}")]
    OutputShape(Vec<i64>),
    #[error("no detector available: {0}")]
    Unavailable(String),
}

/// A black-box classifier over a frame.
pub trait ObjectDetector: Send {
    /// Detect objects in `frame`. Confidence filtering, if any, happens
    /// inside the detector.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionSet>, DetectorError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

impl<D: ObjectDetector + ?Sized> ObjectDetector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionSet>, DetectorError> {
        (**self).detect(frame)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Build the configured detector.
#[cfg(feature = "onnx")]
pub fn load_detector(
    config: &vidscan_common::config::DetectorConfig,
) -> Result<Box<dyn ObjectDetector>, DetectorError> {
    Ok(Box::new(YoloDetector::load(config)?))
}

/// Build the configured detector.
#[cfg(not(feature = "onnx"))]
pub fn load_detector(
    config: &vidscan_common::config::DetectorConfig,
) -> Result<Box<dyn ObjectDetector>, DetectorError> {
    Err(DetectorError::Unavailable(format!(
        "cannot load {}: built without the `onnx` feature",
        config.model_path
    )))
}

/// True if any result set holds at least one box.
pub fn any_boxes(sets: &[DetectionSet]) -> bool {
    sets.iter().any(|set| !set.is_empty())
}

/// Greedy non-maximum suppression: keep the highest-confidence box of every
/// cluster whose pairwise IoU exceeds `iou_threshold`. Boxes of different
/// classes never suppress each other.
pub fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_unstable_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}


#[cfg(test)]
mod tests {
    use super::testing::sample_box;
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: usize) -> BoundingBox {
        BoundingBox {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
        }
    }

    #[test]
    fn any_boxes_checks_every_set() {
        assert!(!any_boxes(&[]));
        assert!(!any_boxes(&[DetectionSet::default(), DetectionSet::default()]));
        assert!(any_boxes(&[
            DetectionSet::default(),
            DetectionSet::new(vec![sample_box(0.1)])
        ]));
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 0.9, 0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 0.9, 0);
        let b = bbox(20.0, 20.0, 30.0, 30.0, 0.9, 0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 0.9, 0);
        let b = bbox(5.0, 0.0, 15.0, 10.0, 0.9, 0);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_best_of_cluster() {
        let boxes = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.6, 0),
            bbox(1.0, 1.0, 11.0, 11.0, 0.9, 0),
            bbox(50.0, 50.0, 60.0, 60.0, 0.5, 0),
        ];
        let kept = nms(boxes, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.5);
    }

    #[test]
    fn nms_is_per_class() {
        let boxes = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            bbox(0.0, 0.0, 10.0, 10.0, 0.8, 2),
        ];
        assert_eq!(nms(boxes, 0.5).len(), 2);
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn loading_without_runtime_is_unavailable() {
        let config = vidscan_common::config::DetectorConfig::default();
        let err = load_detector(&config).err().map(|e| e.to_string());
        assert!(err.is_some_and(|msg| msg.contains("yolov8n.onnx")));
    }

    #[test]
    fn boxed_detector_delegates() {
        let mut boxed: Box<dyn ObjectDetector> =
            Box::new(super::testing::ScriptedDetector::constant(1, 1));
        assert_eq!(boxed.name(), "scripted");
        let frame = crate::video::Frame::new(4, 4);
        assert!(any_boxes(&boxed.detect(&frame).unwrap()));
    }
}
