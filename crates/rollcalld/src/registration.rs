//! One-shot member registration from a short camera burst.

use crate::capture::CameraProvider;
use crate::engine::{EngineError, Inference};
use rollcall_core::{Descriptor, Identity, DESCRIPTOR_DIM};
use rollcall_hw::CameraError;
use rollcall_store::{Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ROLE: &str = "Member";

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("camera is in use by an active scan; stop scanning first")]
    CameraBusy,
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("no face detected; face the camera clearly and try again")]
    NoFaceDetected,
    #[error("descriptor has {actual} values, expected {expected}")]
    BadDescriptor { actual: usize, expected: usize },
    #[error("inference error: {0}")]
    Engine(#[from] EngineError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("capture task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Captures and stores new identities.
pub struct Registrar {
    cameras: Arc<dyn CameraProvider>,
    inference: Arc<dyn Inference>,
    store: Arc<Store>,
    frames: usize,
    settle: Duration,
}

impl Registrar {
    pub fn new(
        cameras: Arc<dyn CameraProvider>,
        inference: Arc<dyn Inference>,
        store: Arc<Store>,
        frames: usize,
        settle: Duration,
    ) -> Self {
        Self {
            cameras,
            inference,
            store,
            frames: frames.max(1),
            settle,
        }
    }

    /// Capture a face and persist a new identity named `name`.
    ///
    /// The camera is held only for the burst; it is released before
    /// inference runs. An empty `role` becomes [`DEFAULT_ROLE`].
    pub async fn register(&self, name: &str, role: &str) -> Result<Identity, RegistrationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        let role = match role.trim() {
            "" => DEFAULT_ROLE,
            r => r,
        };

        // Let exposure settle after the user positions themselves
        tokio::time::sleep(self.settle).await;

        let cameras = Arc::clone(&self.cameras);
        let count = self.frames;
        let frames = tokio::task::spawn_blocking(move || cameras.capture_burst(count)).await??;
        tracing::debug!(frames = frames.len(), "registration frames captured");
        if frames.is_empty() {
            return Err(RegistrationError::NoFaceDetected);
        }

        let best = self
            .inference
            .detect_best(frames)
            .await?
            .ok_or(RegistrationError::NoFaceDetected)?;
        let descriptor: Descriptor = best.descriptor;
        if descriptor.len() != DESCRIPTOR_DIM {
            return Err(RegistrationError::BadDescriptor {
                actual: descriptor.len(),
                expected: DESCRIPTOR_DIM,
            });
        }

        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: name.to_string(),
            role_label: role.to_string(),
            descriptor,
            registered_at_epoch_millis: chrono::Utc::now().timestamp_millis(),
        };
        self.store.add_identity(identity.clone())?;

        tracing::info!(
            id = %identity.id,
            name = %identity.display_name,
            confidence = best.bounding_box.confidence,
            "member registered"
        );
        Ok(identity)
    }
}
