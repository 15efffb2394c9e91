//! Face descriptor extraction via ONNX Runtime.
//!
//! Produces a 128-dim descriptor from a square RGB crop around a detected
//! face. Distances between descriptors are what the matcher compares.

use crate::analyzer::FrameRef;
use crate::types::{BoundingBox, Descriptor, DESCRIPTOR_DIM};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const RECOGNIZER_MODEL_FILE: &str = "face_descriptor_128.onnx";

const RECOGNIZER_INPUT_SIZE: u32 = 150;
/// Fraction of the box size added on each side before cropping.
const CROP_MARGIN: f32 = 0.15;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; place descriptor weights in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Descriptor extractor.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_dir: &Path) -> Result<Self, RecognizerError> {
        let model_path = model_dir.join(RECOGNIZER_MODEL_FILE);
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded descriptor model"
        );

        Ok(Self { session })
    }

    /// Extract the descriptor for `face` in `frame`.
    pub fn extract(
        &mut self,
        frame: FrameRef<'_>,
        face: &BoundingBox,
    ) -> Result<Descriptor, RecognizerError> {
        let crop = crop_face(frame, face).ok_or(RecognizerError::EmptyCrop)?;
        let input = Self::preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != DESCRIPTOR_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        Ok(Descriptor(raw.to_vec()))
    }

    /// Scale a square crop to 0..1 in NCHW layout.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = RECOGNIZER_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in crop.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
            }
        }
        tensor
    }
}

/// Square crop around `face`, padded by [`CROP_MARGIN`], clamped to the
/// frame and resized to the network input.
fn crop_face(frame: FrameRef<'_>, face: &BoundingBox) -> Option<RgbImage> {
    let pixels = (frame.width * frame.height * 3) as usize;
    let view =
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(frame.width, frame.height, frame.rgb.get(..pixels)?.to_vec())?;

    let side = face.width.max(face.height) * (1.0 + 2.0 * CROP_MARGIN);
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let x0 = (cx - side / 2.0).max(0.0).floor() as u32;
    let y0 = (cy - side / 2.0).max(0.0).floor() as u32;
    let x1 = ((cx + side / 2.0).ceil() as u32).min(frame.width);
    let y1 = ((cy + side / 2.0).ceil() as u32).min(frame.height);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let cropped = imageops::crop_imm(&view, x0, y0, x1 - x0, y1 - y0).to_image();
    Some(imageops::resize(
        &cropped,
        RECOGNIZER_INPUT_SIZE,
        RECOGNIZER_INPUT_SIZE,
        FilterType::Triangle,
    ))
}
