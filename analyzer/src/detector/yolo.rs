//! YOLOv8 detector on ONNX Runtime.
//!
//! Expects an ultralytics ONNX export: input `images` [1, 3, 640, 640] in
//! RGB 0..1, output `output0` [1, 4 + classes, proposals] with rows
//! (cx, cy, w, h, class scores...).

use image::imageops::{self, FilterType};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use tracing::{debug, info};
use vidscan_common::config::DetectorConfig;

use super::{nms, BoundingBox, DetectionSet, DetectorError, ObjectDetector};
use crate::video::Frame;

/// YOLOv8 input size (square).
const INPUT_SIZE: u32 = 640;
/// Box geometry rows preceding the class scores.
const BOX_ROWS: usize = 4;

pub struct YoloDetector {
    session: Session,
    confidence: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    pub fn load(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let path = Path::new(&config.model_path);
        let load_err = |e: &dyn std::fmt::Display| DetectorError::Load {
            path: config.model_path.clone(),
            reason: e.to_string(),
        };

        let session = Session::builder()
            .map_err(|e| load_err(&e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_err(&e))?
            .with_intra_threads(config.intra_threads.max(1))
            .map_err(|e| load_err(&e))?
            .commit_from_file(path)
            .map_err(|e| load_err(&e))?;

        info!(
            model = config.model_path,
            confidence = config.confidence,
            iou_threshold = config.iou_threshold,
            "YOLOv8 model loaded"
        );

        Ok(Self {
            session,
            confidence: config.confidence,
            iou_threshold: config.iou_threshold,
        })
    }

    fn preprocess(frame: &Frame) -> Result<Tensor<f32>, DetectorError> {
        let resized = imageops::resize(frame, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

        // NCHW float tensor: [1, 3, 640, 640].
        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        let mut data = vec![0f32; 3 * plane];
        for (idx, pixel) in resized.pixels().enumerate() {
            data[idx] = pixel.0[0] as f32 / 255.0;
            data[plane + idx] = pixel.0[1] as f32 / 255.0;
            data[2 * plane + idx] = pixel.0[2] as f32 / 255.0;
        }

        let shape = [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize];
        Tensor::from_array((shape, data.into_boxed_slice()))
            .map_err(|e| DetectorError::Preprocess(e.to_string()))
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionSet>, DetectorError> {
        let input = Self::preprocess(frame)?;

        let outputs = self
            .session
            .run(ort::inputs!["images" => input])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let dims: Vec<i64> = shape.iter().copied().collect();

        let (rows, proposals) = match dims.as_slice() {
            [1, rows, proposals] if *rows as usize > BOX_ROWS && *proposals > 0 => {
                (*rows as usize, *proposals as usize)
            }
            _ => return Err(DetectorError::OutputShape(dims)),
        };
        if data.len() < rows * proposals {
            return Err(DetectorError::OutputShape(dims));
        }

        let (width, height) = frame.dimensions();
        let boxes = decode_proposals(
            data,
            rows - BOX_ROWS,
            proposals,
            width as f32 / INPUT_SIZE as f32,
            height as f32 / INPUT_SIZE as f32,
            self.confidence,
        );
        let boxes = nms(boxes, self.iou_threshold);
        debug!(boxes = boxes.len(), "YOLOv8 detections");

        Ok(vec![DetectionSet::new(boxes)])
    }

    fn name(&self) -> &str {
        "yolov8"
    }
}

/// Turn the column-major `[4 + classes, proposals]` output into boxes in
/// frame coordinates, keeping proposals whose best class clears `confidence`.
fn decode_proposals(
    data: &[f32],
    num_classes: usize,
    proposals: usize,
    scale_x: f32,
    scale_y: f32,
    confidence: f32,
) -> Vec<BoundingBox> {
    let frame_w = INPUT_SIZE as f32 * scale_x;
    let frame_h = INPUT_SIZE as f32 * scale_y;

    (0..proposals)
        .filter_map(|i| {
            let (class_id, score) = (0..num_classes)
                .map(|c| (c, data[(BOX_ROWS + c) * proposals + i]))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
            if score < confidence {
                return None;
            }

            let cx = data[i];
            let cy = data[proposals + i];
            let w = data[2 * proposals + i];
            let h = data[3 * proposals + i];

            Some(BoundingBox {
                x1: ((cx - w / 2.0) * scale_x).max(0.0),
                y1: ((cy - h / 2.0) * scale_y).max(0.0),
                x2: ((cx + w / 2.0) * scale_x).min(frame_w),
                y2: ((cy + h / 2.0) * scale_y).min(frame_h),
                confidence: score,
                class_id,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_best_class_above_threshold() {
        // 2 classes, 3 proposals, laid out row by row.
        let proposals = 3;
        #[rustfmt::skip]
        let data = vec![
            320.0, 100.0, 50.0,  // cx
            320.0, 100.0, 50.0,  // cy
            64.0,  20.0,  10.0,  // w
            64.0,  20.0,  10.0,  // h
            0.10,  0.80,  0.05,  // class 0
            0.90,  0.20,  0.10,  // class 1
        ];
        let boxes = decode_proposals(&data, 2, proposals, 2.0, 1.0, 0.25);
        assert_eq!(boxes.len(), 2);

        assert_eq!(boxes[0].class_id, 1);
        assert!((boxes[0].x1 - 576.0).abs() < 1e-3);
        assert!((boxes[0].x2 - 704.0).abs() < 1e-3);
        assert!((boxes[0].y1 - 288.0).abs() < 1e-3);

        assert_eq!(boxes[1].class_id, 0);
        assert!((boxes[1].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn boxes_are_clipped_to_frame() {
        let data = vec![
            5.0,   // cx
            635.0, // cy
            40.0,  // w
            40.0,  // h
            0.9,   // class 0
        ];
        let boxes = decode_proposals(&data, 1, 1, 1.0, 1.0, 0.25);
        assert_eq!(boxes[0].x1, 0.0);
        assert_eq!(boxes[0].y2, 640.0);
    }
}
