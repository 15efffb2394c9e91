//! Daemon state shared by the D-Bus methods.

use crate::capture::CameraProvider;
use crate::engine::Inference;
use crate::registration::{Registrar, RegistrationError};
use crate::scanner::{system_clock, CheckIn, Clock, ScanLoop, ScanStats};
use crate::summarizer::Summarizer;
use chrono::{Local, NaiveDate};
use rollcall_core::report::DashboardStats;
use rollcall_core::{AttendanceRecord, Identity};
use rollcall_hw::CameraError;
use rollcall_store::{Store, StoreError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("camera is in use by a registration; try again when it finishes")]
    CameraBusy,
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Reply to a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStarted {
    pub started: bool,
    pub active_members: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub version: &'static str,
    pub scanning: bool,
    pub active_members: usize,
    pub last_check_in: Option<CheckIn>,
}

/// An identity as listed to clients; the descriptor stays in the daemon.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub id: String,
    pub display_name: String,
    pub role_label: String,
    pub registered_at_epoch_millis: i64,
}

impl From<&Identity> for MemberSummary {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            role_label: identity.role_label.clone(),
            registered_at_epoch_millis: identity.registered_at_epoch_millis,
        }
    }
}

struct ActiveScan {
    cancel: watch::Sender<bool>,
    task: JoinHandle<ScanStats>,
    members: usize,
}

impl ActiveScan {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Registration's hold on the camera; released on drop, including when
/// the caller is cancelled.
struct CameraClaim<'a>(&'a AtomicBool);

impl<'a> CameraClaim<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CameraClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Registration tuning passed through from the config.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationSettings {
    pub frames: usize,
    pub settle: Duration,
}

pub struct App {
    store: Arc<Store>,
    inference: Arc<dyn Inference>,
    cameras: Arc<dyn CameraProvider>,
    registrar: Registrar,
    summarizer: Summarizer,
    clock: Clock,
    /// At most one session.
    scan: tokio::sync::Mutex<Option<ActiveScan>>,
    /// Set while a registration owns the camera. Checked under `scan`.
    registering: AtomicBool,
    last_check_in: Arc<Mutex<Option<CheckIn>>>,
}

impl App {
    pub fn new(
        store: Arc<Store>,
        inference: Arc<dyn Inference>,
        cameras: Arc<dyn CameraProvider>,
        registration: RegistrationSettings,
        summarizer: Summarizer,
    ) -> Self {
        let registrar = Registrar::new(
            Arc::clone(&cameras),
            Arc::clone(&inference),
            Arc::clone(&store),
            registration.frames,
            registration.settle,
        );
        Self {
            store,
            inference,
            cameras,
            registrar,
            summarizer,
            clock: system_clock(),
            scan: tokio::sync::Mutex::new(None),
            registering: AtomicBool::new(false),
            last_check_in: Arc::new(Mutex::new(None)),
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Start a scan session over the current roster.
    ///
    /// An empty roster opens no camera. Calling this while a session runs
    /// leaves it untouched.
    pub async fn start_scan(&self) -> Result<ScanStarted, ScanError> {
        let mut scan = self.scan.lock().await;
        if self.registering.load(Ordering::Acquire) {
            return Err(ScanError::CameraBusy);
        }
        if let Some(active) = scan.as_ref().filter(|a| a.is_running()) {
            return Ok(ScanStarted {
                started: true,
                active_members: active.members,
            });
        }
        if let Some(ended) = scan.take() {
            // The frame source ended on its own
            if let Ok(stats) = ended.task.await {
                tracing::info!(?stats, "reaped ended scan session");
            }
        }

        let roster = self.store.list_identities()?;
        if roster.is_empty() {
            tracing::info!("no registered members; scan not started");
            return Ok(ScanStarted {
                started: false,
                active_members: 0,
            });
        }

        let frames = self.cameras.open_stream()?;
        let members = roster.len();
        let (cancel, cancel_rx) = watch::channel(false);
        let scan_loop = ScanLoop::new(
            Arc::clone(&self.inference),
            Arc::clone(&self.store),
            roster,
            Arc::clone(&self.last_check_in),
            Arc::clone(&self.clock),
        );
        let task = tokio::spawn(scan_loop.run(frames, cancel_rx));

        *scan = Some(ActiveScan {
            cancel,
            task,
            members,
        });
        tracing::info!(members, "scan started");
        Ok(ScanStarted {
            started: true,
            active_members: members,
        })
    }

    /// Cancel the session and wait for it to release the camera.
    /// Returns whether a session was running.
    pub async fn stop_scan(&self) -> bool {
        let Some(active) = self.scan.lock().await.take() else {
            return false;
        };
        let was_running = active.is_running();
        let _ = active.cancel.send(true);
        match active.task.await {
            Ok(stats) => tracing::info!(?stats, "scan stopped"),
            Err(e) => tracing::warn!(error = %e, "scan task ended abnormally"),
        }
        was_running
    }

    pub async fn status(&self) -> Result<Status, StoreError> {
        let running = self
            .scan
            .lock()
            .await
            .as_ref()
            .filter(|a| a.is_running())
            .map(|a| a.members);
        let active_members = match running {
            Some(members) => members,
            None => self.store.list_identities()?.len(),
        };
        let last_check_in = self
            .last_check_in
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        Ok(Status {
            version: env!("CARGO_PKG_VERSION"),
            scanning: running.is_some(),
            active_members,
            last_check_in,
        })
    }

    /// Register a member. Refused while a scan holds the camera.
    pub async fn register(&self, name: &str, role: &str) -> Result<Identity, RegistrationError> {
        let _camera = {
            let scan = self.scan.lock().await;
            if scan.as_ref().is_some_and(|a| a.is_running()) {
                return Err(RegistrationError::CameraBusy);
            }
            CameraClaim::acquire(&self.registering).ok_or(RegistrationError::CameraBusy)?
        };
        self.registrar.register(name, role).await
    }

    pub fn list_identities(&self) -> Result<Vec<MemberSummary>, StoreError> {
        Ok(self
            .store
            .list_identities()?
            .iter()
            .map(MemberSummary::from)
            .collect())
    }

    pub fn list_attendance(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.store.list_attendance()
    }

    pub fn clear_attendance(&self) -> Result<(), StoreError> {
        self.store.clear_attendance()?;
        tracing::info!("attendance log cleared");
        Ok(())
    }

    /// Remove every member, stopping any scan first.
    pub async fn clear_identities(&self) -> Result<(), StoreError> {
        if self.stop_scan().await {
            tracing::info!("scan stopped before clearing members");
        }
        self.store.clear_identities()?;
        tracing::info!("members cleared");
        Ok(())
    }

    pub fn dashboard(&self, date: NaiveDate) -> Result<DashboardStats, StoreError> {
        let log = self.store.list_attendance()?;
        let roster = self.store.list_identities()?;
        Ok(DashboardStats::compute(&log, &roster, date, &Local))
    }

    pub async fn daily_report(&self, date: NaiveDate) -> Result<String, StoreError> {
        let log = self.store.list_attendance()?;
        let roster = self.store.list_identities()?;
        Ok(self.summarizer.daily_report(&log, &roster, date).await)
    }
}

/// `YYYY-MM-DD`, or today's local date when blank.
pub fn parse_day(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Local::now().date_naive());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::tests::FakeCameras;
    use crate::scanner::tests::{identity, FakeInference};
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;

    fn app(store: Arc<Store>, cameras: Arc<FakeCameras>) -> App {
        app_with(store, cameras, FakeInference::new())
    }

    fn app_with(store: Arc<Store>, cameras: Arc<FakeCameras>, inference: FakeInference) -> App {
        App::new(
            store,
            Arc::new(inference),
            cameras,
            RegistrationSettings {
                frames: 3,
                settle: Duration::ZERO,
            },
            Summarizer::new(None, Duration::from_secs(1)),
        )
    }

    async fn wait_for_records(store: &Store, count: usize) {
        for _ in 0..100 {
            if store.list_attendance().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} attendance records");
    }

    #[tokio::test]
    async fn test_empty_roster_opens_no_camera() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let cameras = Arc::new(FakeCameras::new(&[7]));
        let app = app(store, cameras.clone());

        let started = app.start_scan().await.unwrap();
        assert_eq!(
            started,
            ScanStarted {
                started: false,
                active_members: 0
            }
        );
        assert_eq!(cameras.opens.load(Ordering::SeqCst), 0);
        assert!(!app.status().await.unwrap().scanning);
    }

    #[tokio::test]
    async fn test_scan_records_and_stops() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_identity(identity("alice", "Alice", 7)).unwrap();
        let cameras = Arc::new(FakeCameras::new(&[7, 7]));
        let app = app(Arc::clone(&store), cameras.clone());

        let started = app.start_scan().await.unwrap();
        assert!(started.started);
        assert_eq!(started.active_members, 1);

        // Second start is a no-op
        assert!(app.start_scan().await.unwrap().started);
        assert_eq!(cameras.opens.load(Ordering::SeqCst), 1);

        wait_for_records(&store, 1).await;
        let status = app.status().await.unwrap();
        assert!(status.scanning);
        assert_eq!(status.last_check_in.unwrap().name, "Alice");

        assert!(app.stop_scan().await);
        assert!(!app.stop_scan().await);
        assert!(!app.status().await.unwrap().scanning);
        // Two frames within the window: one record
        assert_eq!(store.list_attendance().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_refused_while_scanning() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_identity(identity("alice", "Alice", 7)).unwrap();
        let app = app(Arc::clone(&store), Arc::new(FakeCameras::new(&[9])));

        app.start_scan().await.unwrap();
        assert!(matches!(
            app.register("Bob", "").await,
            Err(RegistrationError::CameraBusy)
        ));

        app.stop_scan().await;
        let bob = app.register("Bob", "").await.unwrap();
        assert_eq!(bob.display_name, "Bob");
        assert_eq!(app.list_identities().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_slow_registration_does_not_block_other_calls() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_identity(identity("alice", "Alice", 7)).unwrap();
        let inference = FakeInference {
            delay: Duration::from_millis(400),
            ..FakeInference::new()
        };
        let app = Arc::new(app_with(Arc::clone(&store), Arc::new(FakeCameras::new(&[9])), inference));

        let registering = {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.register("Bob", "").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let quick = Duration::from_millis(100);
        let status = tokio::time::timeout(quick, app.status()).await.unwrap().unwrap();
        assert!(!status.scanning);
        assert!(matches!(
            tokio::time::timeout(quick, app.start_scan()).await.unwrap(),
            Err(ScanError::CameraBusy)
        ));
        assert!(matches!(
            tokio::time::timeout(quick, app.register("Carol", "")).await.unwrap(),
            Err(RegistrationError::CameraBusy)
        ));
        assert!(!tokio::time::timeout(quick, app.stop_scan()).await.unwrap());

        let bob = registering.await.unwrap().unwrap();
        assert_eq!(bob.display_name, "Bob");
        // Camera is free again
        assert!(app.start_scan().await.unwrap().started);
        app.stop_scan().await;
    }

    #[tokio::test]
    async fn test_clear_identities_stops_scan() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_identity(identity("alice", "Alice", 7)).unwrap();
        let app = app(Arc::clone(&store), Arc::new(FakeCameras::new(&[])));

        app.start_scan().await.unwrap();
        assert!(app.status().await.unwrap().scanning);

        app.clear_identities().await.unwrap();
        let status = app.status().await.unwrap();
        assert!(!status.scanning);
        assert_eq!(status.active_members, 0);
        assert!(app.list_identities().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_camera_failure_surfaces() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_identity(identity("alice", "Alice", 7)).unwrap();
        let mut cameras = FakeCameras::new(&[7]);
        cameras.fail = true;
        let app = app(store, Arc::new(cameras));

        assert!(matches!(
            app.start_scan().await,
            Err(ScanError::Camera(CameraError::PermissionDenied(_)))
        ));
        assert!(!app.status().await.unwrap().scanning);
    }

    #[tokio::test]
    async fn test_dashboard_for_day() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.add_identity(identity("alice", "Alice", 7)).unwrap();
        store.add_identity(identity("bob", "Bob", 9)).unwrap();

        let morning = Local.with_ymd_and_hms(2026, 3, 10, 8, 30, 0).unwrap();
        let app = app(Arc::clone(&store), Arc::new(FakeCameras::new(&[7])))
            .with_clock(Arc::new(move || morning));
        app.start_scan().await.unwrap();
        wait_for_records(&store, 1).await;
        app.stop_scan().await;

        let stats = app.dashboard(morning.date_naive()).unwrap();
        assert_eq!(stats.total_members, 2);
        assert_eq!(stats.present_today, 1);
        assert_eq!(stats.attendance_rate, 50);
        assert_eq!(stats.on_time, 1);
        assert_eq!(stats.absent, 1);

        let other_day = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        assert_eq!(app.dashboard(other_day).unwrap().present_today, 0);
    }

    #[tokio::test]
    async fn test_report_without_key_degrades() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let app = app(store, Arc::new(FakeCameras::new(&[])));
        let report = app.daily_report(Local::now().date_naive()).await.unwrap();
        assert_eq!(report, crate::summarizer::REPORT_FAILED);
    }

    #[test]
    fn test_parse_day() {
        assert_eq!(
            parse_day("2026-03-10").unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
        );
        assert_eq!(parse_day("  ").unwrap(), Local::now().date_naive());
        assert!(parse_day("10/03/2026").is_err());
    }

    #[test]
    fn test_member_summary_omits_descriptor() {
        let json = serde_json::to_value(MemberSummary::from(&identity("alice", "Alice", 7))).unwrap();
        assert_eq!(json["displayName"], "Alice");
        assert!(json.get("descriptor").is_none());
    }
}
