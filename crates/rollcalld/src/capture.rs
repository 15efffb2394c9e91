//! Camera sessions: a capture thread per session publishing the latest frame.

use async_trait::async_trait;
use rollcall_hw::{Camera, CameraError, Frame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::watch;

/// A stream of frames for one scanning session.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame. `None` once the source has ended.
    async fn next_frame(&mut self) -> Option<Frame>;

    /// Stop capturing and release the device.
    async fn close(&mut self) {}
}

/// Access to the capture device, one session at a time.
pub trait CameraProvider: Send + Sync {
    /// Open the device for continuous scanning.
    fn open_stream(&self) -> Result<Box<dyn FrameSource>, CameraError>;

    /// Open the device, capture up to `count` usable frames, release it.
    /// Blocking.
    fn capture_burst(&self, count: usize) -> Result<Vec<Frame>, CameraError>;
}

/// [`CameraProvider`] for a V4L2 device path.
pub struct V4lCameraProvider {
    device: String,
    warmup_frames: usize,
}

impl V4lCameraProvider {
    pub fn new(device: impl Into<String>, warmup_frames: usize) -> Self {
        Self {
            device: device.into(),
            warmup_frames,
        }
    }
}

impl CameraProvider for V4lCameraProvider {
    fn open_stream(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        let camera = Camera::open(&self.device)?;
        Ok(Box::new(CaptureSession::start(camera, self.warmup_frames)?))
    }

    fn capture_burst(&self, count: usize) -> Result<Vec<Frame>, CameraError> {
        let camera = Camera::open(&self.device)?;
        for _ in 0..self.warmup_frames {
            let _ = camera.capture_frame();
        }
        let (frames, dark_skipped) = camera.capture_frames(count)?;
        tracing::debug!(captured = frames.len(), dark_skipped, "registration burst captured");
        Ok(frames)
    }
}

/// Owns a camera on a dedicated thread and publishes the most recent
/// non-dark frame. Older unread frames are overwritten.
pub struct CaptureSession {
    rx: watch::Receiver<Option<Frame>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureSession {
    pub fn start(camera: Camera, warmup_frames: usize) -> Result<Self, CameraError> {
        let (tx, rx) = watch::channel(None);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("rollcall-capture".into())
            .spawn(move || {
                let mut warmup_left = warmup_frames;
                let mut dark_skipped = 0u64;

                let result = camera.stream(|frame| {
                    if thread_stop.load(Ordering::Acquire) {
                        return false;
                    }
                    if warmup_left > 0 {
                        warmup_left -= 1;
                        return true;
                    }
                    if frame.is_dark {
                        dark_skipped += 1;
                        return true;
                    }
                    // Fails once every receiver is gone
                    tx.send(Some(frame)).is_ok()
                });

                match result {
                    Ok(delivered) => {
                        tracing::info!(delivered, dark_skipped, "capture stopped")
                    }
                    Err(e) => tracing::error!(error = %e, "capture failed"),
                }
                drop(camera);
            })
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

        Ok(Self {
            rx,
            stop,
            thread: Some(thread),
        })
    }
}

#[async_trait]
impl FrameSource for CaptureSession {
    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }

    async fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            // The thread exits at its next dequeued buffer
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => tracing::debug!("capture thread joined"),
                _ => tracing::warn!("capture thread panicked or could not be joined"),
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
