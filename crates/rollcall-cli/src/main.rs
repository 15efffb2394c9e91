use anyhow::{bail, Context, Result};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use rollcall_hw::Camera;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face-recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new member from the camera
    Register {
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Role label (default: Member)
        #[arg(short, long, default_value = "")]
        role: String,
    },
    /// Start or stop scanning
    Scan {
        #[command(subcommand)]
        action: ScanAction,
    },
    /// Show daemon status
    Status,
    /// List registered members
    Members,
    /// Show the attendance log, newest first
    Log,
    /// Show attendance numbers for a day
    Stats {
        /// YYYY-MM-DD (default: today)
        #[arg(short, long, default_value = "")]
        date: String,
    },
    /// Generate the narrative daily report
    Report {
        /// YYYY-MM-DD (default: today)
        #[arg(short, long, default_value = "")]
        date: String,
    },
    /// Delete every attendance record
    ClearLog {
        #[arg(long)]
        yes: bool,
    },
    /// Delete every registered member
    ClearMembers {
        #[arg(long)]
        yes: bool,
    },
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// V4L2 device to capture from
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Save the captured frame as PNG
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ScanAction {
    Start,
    Stop,
}

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn register(&self, name: &str, role: &str) -> zbus::Result<String>;
    async fn start_scan(&self) -> zbus::Result<String>;
    async fn stop_scan(&self) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn list_attendance(&self) -> zbus::Result<String>;
    async fn clear_attendance(&self) -> zbus::Result<()>;
    async fn clear_identities(&self) -> zbus::Result<()>;
    async fn dashboard(&self, date: &str) -> zbus::Result<String>;
    async fn daily_report(&self, date: &str) -> zbus::Result<String>;
}

async fn connect() -> Result<AttendanceProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable; is the daemon running?")
}

fn parse(json: &str) -> Result<Value> {
    serde_json::from_str(json).context("daemon returned malformed JSON")
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("?")
}

fn local_time(millis: Option<i64>, fmt: &str) -> String {
    millis
        .and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .map(|dt| dt.format(fmt).to_string())
        .unwrap_or_else(|| "?".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Register { name, role } => {
            println!("Look at the camera...");
            let proxy = connect().await?;
            let member = parse(&proxy.register(&name, &role).await?)?;
            println!(
                "Registered {} ({}) as {}",
                str_field(&member, "displayName"),
                str_field(&member, "roleLabel"),
                str_field(&member, "id"),
            );
        }
        Commands::Scan { action: ScanAction::Start } => {
            let proxy = connect().await?;
            let reply = parse(&proxy.start_scan().await?)?;
            let members = reply["activeMembers"].as_u64().unwrap_or(0);
            if reply["started"].as_bool().unwrap_or(false) {
                println!("Scanning for {members} registered member(s)");
            } else {
                println!("No members registered. Run `rollcall register` first.");
            }
        }
        Commands::Scan { action: ScanAction::Stop } => {
            let proxy = connect().await?;
            if proxy.stop_scan().await? {
                println!("Scan stopped");
            } else {
                println!("No scan was running");
            }
        }
        Commands::Status => {
            let proxy = connect().await?;
            let status = parse(&proxy.status().await?)?;
            println!("rollcalld {}", str_field(&status, "version"));
            println!(
                "  scanning:       {}",
                status["scanning"].as_bool().unwrap_or(false)
            );
            println!(
                "  active members: {}",
                status["activeMembers"].as_u64().unwrap_or(0)
            );
            match status.get("lastCheckIn").filter(|v| !v.is_null()) {
                Some(last) => println!(
                    "  last check-in:  {} at {} ({})",
                    str_field(last, "name"),
                    local_time(last["timestampEpochMillis"].as_i64(), "%H:%M:%S"),
                    str_field(last, "status"),
                ),
                None => println!("  last check-in:  none"),
            }
        }
        Commands::Members => {
            let proxy = connect().await?;
            let members = parse(&proxy.list_identities().await?)?;
            let members = members.as_array().map(Vec::as_slice).unwrap_or_default();
            if members.is_empty() {
                println!("No members registered");
            }
            for m in members {
                println!(
                    "{:<36}  {:<24}  {:<12}  {}",
                    str_field(m, "id"),
                    str_field(m, "displayName"),
                    str_field(m, "roleLabel"),
                    local_time(m["registeredAtEpochMillis"].as_i64(), "%Y-%m-%d"),
                );
            }
        }
        Commands::Log => {
            let proxy = connect().await?;
            let log = parse(&proxy.list_attendance().await?)?;
            let log = log.as_array().map(Vec::as_slice).unwrap_or_default();
            if log.is_empty() {
                println!("No attendance recorded");
            }
            for r in log {
                println!(
                    "{}  {:<24}  {}",
                    local_time(r["timestampEpochMillis"].as_i64(), "%Y-%m-%d %H:%M:%S"),
                    str_field(r, "identityName"),
                    str_field(r, "status"),
                );
            }
        }
        Commands::Stats { date } => {
            let proxy = connect().await?;
            let stats = parse(&proxy.dashboard(&date).await?)?;
            let n = |key: &str| stats[key].as_u64().unwrap_or(0);
            println!("Members:       {}", n("totalMembers"));
            println!("Present:       {} ({}%)", n("presentToday"), n("attendanceRate"));
            println!("On time:       {}", n("onTime"));
            println!("Late:          {}", n("late"));
            println!("Absent:        {}", n("absent"));
            println!("Total logs:    {}", n("totalLogs"));
        }
        Commands::Report { date } => {
            println!("Generating report...");
            let proxy = connect().await?;
            println!("{}", proxy.daily_report(&date).await?);
        }
        Commands::ClearLog { yes } => {
            if !yes {
                bail!("this deletes every attendance record; pass --yes to confirm");
            }
            connect().await?.clear_attendance().await?;
            println!("Attendance log cleared");
        }
        Commands::ClearMembers { yes } => {
            if !yes {
                bail!("this deletes every registered member; pass --yes to confirm");
            }
            connect().await?.clear_identities().await?;
            println!("Members cleared");
        }
        Commands::Test { device, snapshot } => run_camera_test(&device, snapshot)?,
    }

    Ok(())
}

fn run_camera_test(device: &str, snapshot: Option<PathBuf>) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("  no V4L2 capture devices found");
    }
    for info in &devices {
        println!("  {}  {} ({}, {})", info.path, info.name, info.driver, info.bus);
    }

    let camera = Camera::open(device).with_context(|| format!("failed to open {device}"))?;
    let frame = camera.capture_frame().context("failed to capture a frame")?;
    println!(
        "Captured {}x{} frame #{} (brightness {:.1}{})",
        frame.width,
        frame.height,
        frame.sequence,
        frame.avg_brightness(),
        if frame.is_dark { ", dark" } else { "" },
    );

    if let Some(path) = snapshot {
        let image = image::RgbImage::from_raw(frame.width, frame.height, frame.data)
            .context("frame buffer does not match its dimensions")?;
        image
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Saved snapshot to {}", path.display());
    }

    Ok(())
}
