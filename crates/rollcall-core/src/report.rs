//! Per-day attendance summaries and dashboard statistics.

use crate::types::{AttendanceRecord, AttendanceStatus, Identity};
use chrono::{NaiveDate, TimeZone};
use serde::Serialize;
use std::collections::HashSet;

/// One check-in as presented in a daily summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRecord {
    pub name: String,
    /// Local wall-clock time, `HH:MM:SS`.
    pub time: String,
    pub status: AttendanceStatus,
}

/// Structured input for the narrative report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub total_users: usize,
    /// Distinct identities with at least one record that day.
    pub present_count: usize,
    pub records: Vec<SummaryRecord>,
    pub absent_users: Vec<String>,
}

fn local_date<Tz: TimeZone>(tz: &Tz, millis: i64) -> Option<NaiveDate> {
    tz.timestamp_millis_opt(millis).single().map(|dt| dt.date_naive())
}

fn records_on<'a, Tz: TimeZone>(
    log: &'a [AttendanceRecord],
    date: NaiveDate,
    tz: &Tz,
) -> Vec<&'a AttendanceRecord> {
    log.iter()
        .filter(|r| local_date(tz, r.timestamp_epoch_millis) == Some(date))
        .collect()
}

/// Summarize `date` (in `tz`) from the full log and roster.
pub fn summarize<Tz: TimeZone>(
    log: &[AttendanceRecord],
    roster: &[Identity],
    date: NaiveDate,
    tz: &Tz,
) -> DailySummary
where
    Tz::Offset: std::fmt::Display,
{
    let todays = records_on(log, date, tz);
    let present: HashSet<&str> = todays.iter().map(|r| r.identity_id.as_str()).collect();

    let records = todays
        .iter()
        .map(|r| SummaryRecord {
            name: r.identity_name.clone(),
            time: tz
                .timestamp_millis_opt(r.timestamp_epoch_millis)
                .single()
                .map(|dt| dt.format("%H:%M:%S").to_string())
                .unwrap_or_default(),
            status: r.status,
        })
        .collect();

    let absent_users = roster
        .iter()
        .filter(|identity| !present.contains(identity.id.as_str()))
        .map(|identity| identity.display_name.clone())
        .collect();

    DailySummary {
        total_users: roster.len(),
        present_count: present.len(),
        records,
        absent_users,
    }
}

/// Headline numbers for the dashboard view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_members: usize,
    pub present_today: usize,
    /// Rounded percentage of members present; 0 for an empty roster.
    pub attendance_rate: u32,
    pub on_time: usize,
    pub late: usize,
    pub absent: usize,
    /// Every record in the log, across all days.
    pub total_logs: usize,
}

impl DashboardStats {
    pub fn compute<Tz: TimeZone>(
        log: &[AttendanceRecord],
        roster: &[Identity],
        date: NaiveDate,
        tz: &Tz,
    ) -> Self {
        let todays = records_on(log, date, tz);
        let present = todays
            .iter()
            .map(|r| r.identity_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        let total = roster.len();
        let attendance_rate = if total > 0 {
            (present as f64 / total as f64 * 100.0).round() as u32
        } else {
            0
        };

        Self {
            total_members: total,
            present_today: present,
            attendance_rate,
            on_time: todays.iter().filter(|r| r.status == AttendanceStatus::OnTime).count(),
            late: todays.iter().filter(|r| r.status == AttendanceStatus::Late).count(),
            absent: total.saturating_sub(present),
            total_logs: log.len(),
        }
    }
}

/// Instruction prompt for the text-generation service.
pub fn build_prompt(summary: &DailySummary, date: NaiveDate) -> String {
    let data = serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string());
    let day = date.format("%a %b %d %Y");
    format!(
        "You are an attendance analyst system. Analyze the following attendance data for {day}.\n\
         \n\
         Data:\n\
         {data}\n\
         \n\
         Please provide a concise but insightful report in Markdown format.\n\
         Include:\n\
         1. Overall attendance percentage.\n\
         2. Who was on time vs late (09:00 is the cutoff for \"On Time\"; respect the 'status' field provided).\n\
         3. A list of absent users.\n\
         4. A brief \"Mood of the Day\" assessment based on punctuality (playful/professional).\n\
         \n\
         Keep it professional but engaging.\n"
    )
}
