//! The face-analysis boundary: frame in, detections with descriptors out.

use crate::detector::{DetectorError, DetectorVariant, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectionResult;
use std::path::Path;
use thiserror::Error;

/// Borrowed packed RGB24 frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    pub rgb: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> FrameRef<'a> {
    pub fn new(rgb: &'a [u8], width: u32, height: u32) -> Self {
        Self { rgb, width, height }
    }

    /// Verify the buffer holds `width * height` RGB pixels.
    /// On failure returns `(expected, actual)` byte counts.
    pub fn check(&self) -> Result<(), (usize, usize)> {
        let expected = self.width as usize * self.height as usize * 3;
        if self.rgb.len() < expected || expected == 0 {
            Err((expected, self.rgb.len()))
        } else {
            Ok(())
        }
    }
}

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Narrow interface over the face model runtime.
pub trait FaceAnalyzer {
    /// Every face in the frame, using the fast detector. For scanning.
    fn detect(&mut self, frame: FrameRef<'_>) -> Result<Vec<DetectionResult>, AnalyzerError>;

    /// The most confident face, using the accurate detector. For registration.
    fn detect_single(&mut self, frame: FrameRef<'_>)
        -> Result<Option<DetectionResult>, AnalyzerError>;
}

/// [`FaceAnalyzer`] backed by ONNX detector and descriptor models.
pub struct OnnxFaceAnalyzer {
    fast: FaceDetector,
    accurate: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    /// Load all three models from `model_dir`. Fails if any is missing.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        Ok(Self {
            fast: FaceDetector::load(model_dir, DetectorVariant::Fast)?,
            accurate: FaceDetector::load(model_dir, DetectorVariant::Accurate)?,
            recognizer: FaceRecognizer::load(model_dir)?,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect(&mut self, frame: FrameRef<'_>) -> Result<Vec<DetectionResult>, AnalyzerError> {
        let boxes = self.fast.detect(frame)?;
        let mut results = Vec::with_capacity(boxes.len());
        for bounding_box in boxes {
            match self.recognizer.extract(frame, &bounding_box) {
                Ok(descriptor) => results.push(DetectionResult {
                    bounding_box,
                    landmarks: None,
                    descriptor,
                }),
                Err(RecognizerError::EmptyCrop) => {
                    tracing::debug!(?bounding_box, "skipping face with empty crop");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(results)
    }

    fn detect_single(
        &mut self,
        frame: FrameRef<'_>,
    ) -> Result<Option<DetectionResult>, AnalyzerError> {
        let Some(bounding_box) = self.accurate.detect(frame)?.into_iter().next() else {
            return Ok(None);
        };
        let descriptor = self.recognizer.extract(frame, &bounding_box)?;
        Ok(Some(DetectionResult {
            bounding_box,
            landmarks: None,
            descriptor,
        }))
    }
}
