use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Test mode: wider detection band and the test webhook, if one is set.
    #[serde(default)]
    pub testing: bool,
    pub stream: StreamConfig,
    #[serde(default)]
    pub frames: FramesConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub url: String,
    /// Frames per second sampled by the frame producer.
    #[serde(default = "default_sample_fps")]
    pub sample_fps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FramesConfig {
    #[serde(default = "default_frame_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,
    /// Sequence number of the first file the producer writes after a launch.
    #[serde(default = "default_first_seq")]
    pub first_seq: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_scale")]
    pub scale: u32,
    /// Per-pixel luminance difference (0-255) a pixel must exceed to count as changed.
    #[serde(default = "default_threshold")]
    pub threshold: u8,
    #[serde(default = "default_min_diff")]
    pub min_diff: f64,
    #[serde(default = "default_max_diff")]
    pub max_diff: f64,
    /// Upper bound of the band used instead of `max_diff` when `testing` is set.
    #[serde(default = "default_test_max_diff")]
    pub test_max_diff: f64,
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    /// Initial wait before relaunching a producer that died young. 0 disables backoff.
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
    #[serde(default = "default_max_restart_backoff_secs")]
    pub max_restart_backoff_secs: u64,
    /// A run at least this long resets the backoff.
    #[serde(default = "default_healthy_run_secs")]
    pub healthy_run_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub test_webhook_url: Option<String>,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_alert_message")]
    pub alert_message: String,
    #[serde(default = "default_startup_message")]
    pub startup_message: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Append-only operator log, one `<message>\t<timestamp>` line per event.
    #[serde(default = "default_event_log")]
    pub event_log: PathBuf,
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            dir: default_frame_dir(),
            poll_delay_ms: default_poll_delay_ms(),
            first_seq: default_first_seq(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            threshold: default_threshold(),
            min_diff: default_min_diff(),
            max_diff: default_max_diff(),
            test_max_diff: default_test_max_diff(),
            warmup_secs: default_warmup_secs(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            framerate: default_framerate(),
            output_path: default_output_path(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            restart_backoff_ms: default_restart_backoff_ms(),
            max_restart_backoff_secs: default_max_restart_backoff_secs(),
            healthy_run_secs: default_healthy_run_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            event_log: default_event_log(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.scale == 0 {
            return Err(ConfigError::Invalid("detection.scale must be at least 1".into()));
        }
        if !(self.stream.sample_fps > 0.0) {
            return Err(ConfigError::Invalid("stream.sample_fps must be positive".into()));
        }
        if self.recording.framerate == 0 {
            return Err(ConfigError::Invalid("recording.framerate must be positive".into()));
        }
        let max_diff = self.effective_max_diff();
        if !(self.detection.min_diff < max_diff) {
            return Err(ConfigError::Invalid(format!(
                "detection.min_diff ({}) must be below the max bound ({max_diff})",
                self.detection.min_diff
            )));
        }
        Ok(())
    }

    /// Upper bound of the detection band, widened in test mode.
    pub fn effective_max_diff(&self) -> f64 {
        if self.testing {
            self.detection.test_max_diff
        } else {
            self.detection.max_diff
        }
    }

    /// Webhook alerts go to. Test mode prefers the test hook when configured.
    pub fn webhook_url(&self) -> &str {
        match (&self.notify.test_webhook_url, self.testing) {
            (Some(url), true) => url,
            _ => &self.notify.webhook_url,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_sample_fps() -> f64 {
    1.0
}
fn default_frame_dir() -> PathBuf {
    PathBuf::from("frames")
}
fn default_poll_delay_ms() -> u64 {
    500
}
fn default_first_seq() -> u64 {
    1
}
fn default_scale() -> u32 {
    2
}
fn default_threshold() -> u8 {
    50
}
fn default_min_diff() -> f64 {
    0.02
}
fn default_max_diff() -> f64 {
    0.5
}
fn default_test_max_diff() -> f64 {
    1.0
}
fn default_warmup_secs() -> u64 {
    1
}
fn default_duration_secs() -> u64 {
    60
}
fn default_framerate() -> u32 {
    30
}
fn default_output_path() -> PathBuf {
    PathBuf::from("out_vid.mp4")
}
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("full_color.jpg")
}
fn default_ffmpeg() -> String {
    "ffmpeg".into()
}
fn default_restart_backoff_ms() -> u64 {
    1000
}
fn default_max_restart_backoff_secs() -> u64 {
    30
}
fn default_healthy_run_secs() -> u64 {
    10
}
fn default_username() -> String {
    "ulla".into()
}
fn default_alert_message() -> String {
    "bird spotted?".into()
}
fn default_startup_message() -> String {
    "motion detector started".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}
fn default_event_log() -> PathBuf {
    PathBuf::from("detector.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [stream]
        url = "rtsp://camera.local/live"

        [notify]
        webhook_url = "https://hooks.example.com/prod"
        test_webhook_url = "https://hooks.example.com/test"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert!(!config.testing);
        assert_eq!(config.stream.sample_fps, 1.0);
        assert_eq!(config.frames.dir, PathBuf::from("frames"));
        assert_eq!(config.frames.poll_delay_ms, 500);
        assert_eq!(config.frames.first_seq, 1);
        assert_eq!(config.detection.scale, 2);
        assert_eq!(config.detection.threshold, 50);
        assert_eq!(config.detection.min_diff, 0.02);
        assert_eq!(config.effective_max_diff(), 0.5);
        assert_eq!(config.recording.duration_secs, 60);
        assert_eq!(config.notify.alert_message, "bird spotted?");
        assert_eq!(config.logging.event_log, PathBuf::from("detector.log"));
        assert_eq!(config.webhook_url(), "https://hooks.example.com/prod");
    }

    #[test]
    fn testing_mode_widens_band_and_switches_hook() {
        let content = format!("testing = true\n{MINIMAL}");
        let config = Config::parse(&content).unwrap();
        assert_eq!(config.effective_max_diff(), 1.0);
        assert_eq!(config.webhook_url(), "https://hooks.example.com/test");
    }

    #[test]
    fn testing_mode_without_test_hook_falls_back() {
        let content = r#"
            testing = true
            [stream]
            url = "rtsp://camera.local/live"
            [notify]
            webhook_url = "https://hooks.example.com/prod"
        "#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.webhook_url(), "https://hooks.example.com/prod");
    }

    #[test]
    fn rejects_inverted_band() {
        let content = format!("{MINIMAL}\n[detection]\nmin_diff = 0.6\nmax_diff = 0.5\n");
        assert!(matches!(Config::parse(&content), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_scale() {
        let content = format!("{MINIMAL}\n[detection]\nscale = 0\n");
        assert!(matches!(Config::parse(&content), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_stream_is_parse_error() {
        let result = Config::parse("[notify]\nwebhook_url = \"x\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
