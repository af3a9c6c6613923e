use facegate_hw::{CaptureProfile, Resolution};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

/// Settings for one MJPEG preview stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Delay between chunks; `None` picks the capture profile's default.
    pub throttle_ms: Option<u64>,
    pub jpeg_quality: u8,
}

impl StreamConfig {
    fn with_quality(jpeg_quality: u8) -> Self {
        Self {
            throttle_ms: None,
            jpeg_quality,
        }
    }

    pub fn throttle(&self, profile: CaptureProfile) -> Duration {
        match (self.throttle_ms, profile) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, CaptureProfile::Fast) => Duration::from_millis(50),
            (None, CaptureProfile::Reduced) => Duration::from_millis(100),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::with_quality(80)
    }
}

/// Daemon configuration: optional TOML file, then `FACEGATE_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 index opened at startup (`/dev/video{index}`).
    pub camera_index: u32,
    pub resolution: Resolution,
    /// Capture profile; detected from the host when unset.
    pub profile: Option<CaptureProfile>,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Root of the per-identity sample directories.
    pub dataset_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Capture attempts per enrollment.
    pub enroll_samples: usize,
    pub enroll_delay_ms: u64,
    /// Frames are shrunk by this factor before recognition.
    pub recognition_downsample: u32,
    pub raw_stream: StreamConfig,
    pub processed_stream: StreamConfig,
    pub http_addr: String,
    pub bus: BusKind,
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            camera_index: 0,
            resolution: Resolution::default(),
            profile: None,
            model_dir: facegate_core::default_model_dir(),
            dataset_dir: data_dir.join("dataset"),
            db_path: data_dir.join("facegate.db"),
            enroll_samples: 5,
            enroll_delay_ms: 1000,
            recognition_downsample: 4,
            raw_stream: StreamConfig::with_quality(80),
            processed_stream: StreamConfig::with_quality(70),
            http_addr: "0.0.0.0:5000".to_string(),
            bus: BusKind::System,
        }
    }
}

impl Config {
    /// Load from `FACEGATE_CONFIG` (if set) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FACEGATE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
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

    /// Apply `FACEGATE_*` overrides; unparsable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let parsed = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = parsed("FACEGATE_CAMERA_INDEX") {
            self.camera_index = v as u32;
        }
        if let Some(v) = parsed("FACEGATE_FRAME_WIDTH") {
            self.resolution.width = v as u32;
        }
        if let Some(v) = parsed("FACEGATE_FRAME_HEIGHT") {
            self.resolution.height = v as u32;
        }
        match var("FACEGATE_PROFILE").as_deref().map(str::trim) {
            Some("fast") => self.profile = Some(CaptureProfile::Fast),
            Some("reduced") => self.profile = Some(CaptureProfile::Reduced),
            Some("auto") => self.profile = None,
            _ => {}
        }
        if let Some(v) = var("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEGATE_DATASET_DIR") {
            self.dataset_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEGATE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = parsed("FACEGATE_ENROLL_SAMPLES") {
            self.enroll_samples = v as usize;
        }
        if let Some(v) = parsed("FACEGATE_ENROLL_DELAY_MS") {
            self.enroll_delay_ms = v;
        }
        if let Some(v) = parsed("FACEGATE_DOWNSAMPLE") {
            self.recognition_downsample = v as u32;
        }
        if let Some(v) = parsed("FACEGATE_RAW_THROTTLE_MS") {
            self.raw_stream.throttle_ms = Some(v);
        }
        if let Some(v) = parsed("FACEGATE_PROCESSED_THROTTLE_MS") {
            self.processed_stream.throttle_ms = Some(v);
        }
        if let Some(v) = parsed("FACEGATE_RAW_JPEG_QUALITY") {
            self.raw_stream.jpeg_quality = v.clamp(1, 100) as u8;
        }
        if let Some(v) = parsed("FACEGATE_PROCESSED_JPEG_QUALITY") {
            self.processed_stream.jpeg_quality = v.clamp(1, 100) as u8;
        }
        if let Some(v) = var("FACEGATE_HTTP_ADDR") {
            self.http_addr = v;
        }
        match var("FACEGATE_BUS").as_deref().map(str::trim) {
            Some("system") => self.bus = BusKind::System,
            Some("session") => self.bus = BusKind::Session,
            _ => {}
        }
    }

    /// The configured profile, or the one detected for this host.
    pub fn capture_profile(&self) -> CaptureProfile {
        self.profile.unwrap_or_else(CaptureProfile::detect)
    }

    pub fn enroll_delay(&self) -> Duration {
        Duration::from_millis(self.enroll_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera_index, 0);
        assert_eq!(config.resolution, Resolution { width: 640, height: 480 });
        assert_eq!(config.enroll_samples, 5);
        assert_eq!(config.enroll_delay(), Duration::from_secs(1));
        assert_eq!(config.recognition_downsample, 4);
        assert_eq!(config.raw_stream.jpeg_quality, 80);
        assert_eq!(config.processed_stream.jpeg_quality, 70);
        assert_eq!(config.http_addr, "0.0.0.0:5000");
        assert_eq!(config.bus, BusKind::System);
        assert!(config.db_path.ends_with("facegate/facegate.db"));
    }

    #[test]
    fn test_stream_throttle_follows_profile() {
        let stream = StreamConfig::default();
        assert_eq!(stream.throttle(CaptureProfile::Fast), Duration::from_millis(50));
        assert_eq!(stream.throttle(CaptureProfile::Reduced), Duration::from_millis(100));

        let fixed = StreamConfig {
            throttle_ms: Some(30),
            jpeg_quality: 60,
        };
        assert_eq!(fixed.throttle(CaptureProfile::Reduced), Duration::from_millis(30));
    }

    #[test]
    fn test_toml_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facegated.toml");
        std::fs::write(
            &path,
            r#"
camera_index = 2
profile = "reduced"
bus = "session"

[resolution]
width = 320
height = 240

[processed_stream]
jpeg_quality = 50
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.camera_index, 2);
        assert_eq!(config.profile, Some(CaptureProfile::Reduced));
        assert_eq!(config.capture_profile(), CaptureProfile::Reduced);
        assert_eq!(config.bus, BusKind::Session);
        assert_eq!(config.resolution.width, 320);
        assert_eq!(config.processed_stream.jpeg_quality, 50);
        assert_eq!(config.processed_stream.throttle_ms, None);
        // Unspecified keys keep their defaults.
        assert_eq!(config.enroll_samples, 5);
        assert_eq!(config.raw_stream.jpeg_quality, 80);
    }

    #[test]
    fn test_invalid_toml_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "camera_index = \"two\"").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            Config::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FACEGATE_CAMERA_INDEX", "3"),
            ("FACEGATE_PROFILE", "fast"),
            ("FACEGATE_ENROLL_SAMPLES", "8"),
            ("FACEGATE_DOWNSAMPLE", "not-a-number"),
            ("FACEGATE_RAW_JPEG_QUALITY", "250"),
            ("FACEGATE_DB_PATH", "/var/lib/facegate/ids.db"),
            ("FACEGATE_BUS", "session"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.camera_index, 3);
        assert_eq!(config.profile, Some(CaptureProfile::Fast));
        assert_eq!(config.enroll_samples, 8);
        assert_eq!(config.recognition_downsample, 4);
        assert_eq!(config.raw_stream.jpeg_quality, 100);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/facegate/ids.db"));
        assert_eq!(config.bus, BusKind::Session);
    }
}
