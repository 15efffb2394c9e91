//! rollcall-hw: Camera capture for registration and scanning sessions.
//!
//! Provides V4L2-based camera access and conversion of YUYV, MJPEG and
//! GREY buffers into packed RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
