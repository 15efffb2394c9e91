use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod app;
mod capture;
mod config;
mod dbus_interface;
mod engine;
mod registration;
mod scanner;
mod summarizer;

use app::{App, RegistrationSettings};
use capture::V4lCameraProvider;
use config::Config;
use dbus_interface::AttendanceService;
use rollcall_core::OnnxFaceAnalyzer;
use rollcall_store::Store;
use summarizer::Summarizer;

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::load()?;

    let analyzer = OnnxFaceAnalyzer::load(&config.model_dir).with_context(|| {
        format!("failed to load face models from {}", config.model_dir.display())
    })?;
    let engine = engine::spawn_engine(analyzer, config.detect_timeout())
        .context("failed to spawn inference thread")?;

    let store = Arc::new(Store::open(&config.db_path)?);
    tracing::info!(
        path = %config.db_path.display(),
        members = store.list_identities()?.len(),
        "store opened"
    );

    let summarizer = Summarizer::from_api_key(
        config.api_key.as_deref(),
        &config.report_model,
        config.report_timeout(),
    );
    let app = Arc::new(App::new(
        store,
        Arc::new(engine),
        Arc::new(V4lCameraProvider::new(
            config.camera_device.clone(),
            config.warmup_frames,
        )),
        RegistrationSettings {
            frames: config.registration_frames,
            settle: config.registration_settle(),
        },
        summarizer,
    ));

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceService::new(Arc::clone(&app)))?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, camera = %config.camera_device, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");
    if app.stop_scan().await {
        tracing::info!("active scan stopped");
    }

    Ok(())
}
