use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Resolved as defaults, then the TOML file, then `ROLLCALL_*` environment
/// variables. The match threshold, dedup window and on-time cutoff are
/// fixed policy and not configurable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the detector and descriptor ONNX files.
    pub model_dir: PathBuf,
    /// Path to the SQLite store.
    pub db_path: PathBuf,
    /// Frames discarded at the start of a session (camera AGC/AE settling).
    pub warmup_frames: usize,
    /// Frames captured per registration attempt.
    pub registration_frames: usize,
    /// Delay before the registration capture.
    pub registration_settle_ms: u64,
    /// Upper bound on a single inference request.
    pub detect_timeout_secs: u64,
    /// Upper bound on a report generation call.
    pub report_timeout_secs: u64,
    /// Text-generation model name.
    pub report_model: String,
    /// Text-generation API key. Environment only, never read from file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: data_dir.join("models"),
            db_path: data_dir.join("rollcall.db"),
            warmup_frames: 4,
            registration_frames: 3,
            registration_settle_ms: 500,
            detect_timeout_secs: 5,
            report_timeout_secs: 30,
            report_model: "gemini-2.5-flash".to_string(),
            api_key: None,
        }
    }
}

impl Config {
    /// Load from the config file (if present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"));

        let mut config = if path.exists() {
            tracing::info!(path = %path.display(), "loading config file");
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `ROLLCALL_*` overrides. Unparseable numbers keep the current value.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_REPORT_MODEL") {
            self.report_model = v;
        }
        parse_into(&lookup, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames);
        parse_into(&lookup, "ROLLCALL_REGISTRATION_FRAMES", &mut self.registration_frames);
        parse_into(&lookup, "ROLLCALL_REGISTRATION_SETTLE_MS", &mut self.registration_settle_ms);
        parse_into(&lookup, "ROLLCALL_DETECT_TIMEOUT_SECS", &mut self.detect_timeout_secs);
        parse_into(&lookup, "ROLLCALL_REPORT_TIMEOUT_SECS", &mut self.report_timeout_secs);

        let non_blank = |key: &str| lookup(key).filter(|k| !k.trim().is_empty());
        self.api_key = non_blank("GEMINI_API_KEY").or_else(|| non_blank("API_KEY"));
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_secs(self.detect_timeout_secs.max(1))
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_secs.max(1))
    }

    pub fn registration_settle(&self) -> Duration {
        Duration::from_millis(self.registration_settle_ms)
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
        }
    }
}

fn home() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".local/share"))
        .join("rollcall")
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
        .join("rollcall")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.registration_settle(), Duration::from_millis(500));
        assert_eq!(config.detect_timeout(), Duration::from_secs(5));
        assert!(config.db_path.ends_with("rollcall/rollcall.db"));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            camera_device = "/dev/video4"
            detect_timeout_secs = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.detect_timeout_secs, 2);
        assert_eq!(config.report_model, "gemini-2.5-flash");
    }

    #[test]
    fn test_unknown_toml_key_rejected() {
        assert!(toml::from_str::<Config>("match_threshold = 0.3").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("ROLLCALL_CAMERA_DEVICE", "/dev/video9"),
            ("ROLLCALL_WARMUP_FRAMES", "0"),
            ("ROLLCALL_REPORT_TIMEOUT_SECS", "not-a-number"),
            ("API_KEY", "fallback-key"),
        ]));
        assert_eq!(config.camera_device, "/dev/video9");
        assert_eq!(config.warmup_frames, 0);
        assert_eq!(config.report_timeout_secs, 30);
        assert_eq!(config.api_key.as_deref(), Some("fallback-key"));
    }

    #[test]
    fn test_gemini_key_preferred_and_blank_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[("GEMINI_API_KEY", "primary"), ("API_KEY", "fallback")]));
        assert_eq!(config.api_key.as_deref(), Some("primary"));

        config.apply_env(env(&[("GEMINI_API_KEY", "  ")]));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_blank_gemini_key_falls_back() {
        let mut config = Config::default();
        config.apply_env(env(&[("GEMINI_API_KEY", ""), ("API_KEY", "fallback")]));
        assert_eq!(config.api_key.as_deref(), Some("fallback"));
    }

    #[test]
    fn test_zero_timeout_is_clamped() {
        let mut config = Config::default();
        config.detect_timeout_secs = 0;
        assert_eq!(config.detect_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let path = std::env::temp_dir().join("rollcall-config-does-not-exist.toml");
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Read { .. })));
    }
}
