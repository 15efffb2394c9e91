use crate::app::{parse_day, App, MemberSummary, ScanError};
use crate::registration::RegistrationError;
use serde::Serialize;
use std::sync::Arc;
use zbus::fdo;
use zbus::interface;

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Structured replies are JSON strings.
pub struct AttendanceService {
    app: Arc<App>,
}

impl AttendanceService {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }
}

fn failed(e: impl std::fmt::Display) -> fdo::Error {
    fdo::Error::Failed(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(failed)
}

fn day(raw: &str) -> fdo::Result<chrono::NaiveDate> {
    parse_day(raw).map_err(|e| fdo::Error::InvalidArgs(format!("invalid date {raw:?}: {e}")))
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Capture a face and register it under `name`.
    async fn register(&self, name: &str, role: &str) -> fdo::Result<String> {
        tracing::info!(name, role, "register requested");
        match self.app.register(name, role).await {
            Ok(identity) => to_json(&MemberSummary::from(&identity)),
            Err(e @ RegistrationError::CameraBusy) => Err(fdo::Error::LimitsExceeded(e.to_string())),
            Err(e @ RegistrationError::EmptyName) => Err(fdo::Error::InvalidArgs(e.to_string())),
            Err(e) => {
                tracing::warn!(error = %e, "registration failed");
                Err(failed(e))
            }
        }
    }

    /// Start scanning. `{started, activeMembers}`.
    async fn start_scan(&self) -> fdo::Result<String> {
        match self.app.start_scan().await {
            Ok(started) => to_json(&started),
            Err(e @ ScanError::CameraBusy) => Err(fdo::Error::LimitsExceeded(e.to_string())),
            Err(e) => {
                tracing::error!(error = %e, "failed to start scan");
                Err(failed(e))
            }
        }
    }

    /// Stop scanning. Returns whether a session was running.
    async fn stop_scan(&self) -> fdo::Result<bool> {
        Ok(self.app.stop_scan().await)
    }

    async fn status(&self) -> fdo::Result<String> {
        to_json(&self.app.status().await.map_err(failed)?)
    }

    async fn list_identities(&self) -> fdo::Result<String> {
        to_json(&self.app.list_identities().map_err(failed)?)
    }

    async fn list_attendance(&self) -> fdo::Result<String> {
        to_json(&self.app.list_attendance().map_err(failed)?)
    }

    async fn clear_attendance(&self) -> fdo::Result<()> {
        self.app.clear_attendance().map_err(failed)
    }

    async fn clear_identities(&self) -> fdo::Result<()> {
        self.app.clear_identities().await.map_err(failed)
    }

    /// Headline numbers for `date` (`YYYY-MM-DD`, empty for today).
    async fn dashboard(&self, date: &str) -> fdo::Result<String> {
        let date = day(date)?;
        to_json(&self.app.dashboard(date).map_err(failed)?)
    }

    /// Markdown report for `date` (`YYYY-MM-DD`, empty for today).
    async fn daily_report(&self, date: &str) -> fdo::Result<String> {
        let date = day(date)?;
        tracing::info!(%date, "daily report requested");
        self.app.daily_report(date).await.map_err(failed)
    }
}
