//! rollcall-core: Face matching and attendance decisions.
//!
//! Wraps the ONNX face detector and descriptor model behind
//! [`FaceAnalyzer`], resolves descriptors to registered identities and
//! turns recognition events into deduplicated attendance records.

pub mod analyzer;
pub mod decision;
pub mod detector;
pub mod matcher;
pub mod recognizer;
pub mod report;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, FrameRef, OnnxFaceAnalyzer};
pub use decision::{AttendanceSink, Decision, DecisionEngine};
pub use matcher::{EuclideanMatcher, IdentityMatcher, MatchOutcome, MATCH_THRESHOLD};
pub use types::{
    AttendanceRecord, AttendanceStatus, BoundingBox, Descriptor, DetectionResult, Identity,
    DESCRIPTOR_DIM,
};
