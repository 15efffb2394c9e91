//! Single-shot face detector via ONNX Runtime.
//!
//! Runs an RFB-style detector exported with two outputs: `scores`
//! `[1, N, 2]` (background, face) and `boxes` `[1, N, 4]` holding
//! normalized corner coordinates. Priors are baked into the export, so
//! decoding is a confidence cut followed by NMS.

use crate::analyzer::FrameRef;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DETECTOR_MEAN: f32 = 127.0;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; place detector weights in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detector operating point.
///
/// Registration runs once per capture and favours accuracy; scanning runs
/// every frame and favours latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorVariant {
    Accurate,
    Fast,
}

impl DetectorVariant {
    pub fn model_file(&self) -> &'static str {
        match self {
            DetectorVariant::Accurate => "version-RFB-640.onnx",
            DetectorVariant::Fast => "version-RFB-320.onnx",
        }
    }

    /// Network input size as (width, height).
    pub fn input_size(&self) -> (u32, u32) {
        match self {
            DetectorVariant::Accurate => (640, 480),
            DetectorVariant::Fast => (320, 240),
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        match self {
            DetectorVariant::Accurate => 0.5,
            DetectorVariant::Fast => 0.6,
        }
    }
}

/// ONNX face detector for one [`DetectorVariant`].
pub struct FaceDetector {
    session: Session,
    variant: DetectorVariant,
    scores_idx: usize,
    boxes_idx: usize,
}

impl FaceDetector {
    /// Load the detector model for `variant` from `model_dir`.
    pub fn load(model_dir: &Path, variant: DetectorVariant) -> Result<Self, DetectorError> {
        let model_path = model_dir.join(variant.model_file());
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "detector requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }
        let (scores_idx, boxes_idx) = discover_output_indices(&output_names);

        tracing::info!(
            path = %model_path.display(),
            ?variant,
            outputs = ?output_names,
            scores_idx,
            boxes_idx,
            "loaded face detector"
        );

        Ok(Self {
            session,
            variant,
            scores_idx,
            boxes_idx,
        })
    }

    pub fn variant(&self) -> DetectorVariant {
        self.variant
    }

    /// Detect faces, returning boxes in frame pixels sorted by confidence.
    pub fn detect(&mut self, frame: FrameRef<'_>) -> Result<Vec<BoundingBox>, DetectorError> {
        frame.check().map_err(|(expected, actual)| DetectorError::InvalidFrame { expected, actual })?;

        let input = self.preprocess(frame);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[self.scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[self.boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode(
            scores,
            boxes,
            frame.width as f32,
            frame.height as f32,
            self.variant.confidence_threshold(),
        );
        Ok(nms(candidates, DETECTOR_NMS_THRESHOLD))
    }

    /// Resize to the network input and normalize into an NCHW tensor.
    fn preprocess(&self, frame: FrameRef<'_>) -> Array4<f32> {
        let (in_w, in_h) = self.variant.input_size();
        let pixels = (frame.width * frame.height * 3) as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, in_h as usize, in_w as usize));

        let Some(view) =
            ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(frame.width, frame.height, &frame.rgb[..pixels])
        else {
            return tensor;
        };
        let resized = imageops::resize(&view, in_w, in_h, FilterType::Triangle);

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - DETECTOR_MEAN) / DETECTOR_STD;
            }
        }

        tensor
    }
}

/// Find the `scores` and `boxes` outputs by name, falling back to the
/// export's positional order `[scores, boxes]`.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");
    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            tracing::info!(?names, "detector output names not recognized, using positional mapping");
            (0, 1)
        }
    }
}

/// Decode raw outputs into frame-space boxes above `threshold`.
fn decode(
    scores: &[f32],
    boxes: &[f32],
    frame_width: f32,
    frame_height: f32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let anchors = (scores.len() / 2).min(boxes.len() / 4);
    let mut detections = Vec::new();

    for i in 0..anchors {
        let confidence = scores[i * 2 + 1];
        if confidence <= threshold {
            continue;
        }

        let x1 = boxes[i * 4].clamp(0.0, 1.0) * frame_width;
        let y1 = boxes[i * 4 + 1].clamp(0.0, 1.0) * frame_height;
        let x2 = boxes[i * 4 + 2].clamp(0.0, 1.0) * frame_width;
        let y2 = boxes[i * 4 + 3].clamp(0.0, 1.0) * frame_height;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        });
    }

    detections
}

/// Non-Maximum Suppression, returning survivors by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| kept.iou(&candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
