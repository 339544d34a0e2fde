use frame_sentry_common::config::{Config, RecordingConfig};
use frame_sentry_common::frame::frame_pattern;
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Program plus arguments for one of the external ffmpeg helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ExternalCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Frame producer: samples the stream into `<dir>/frame%05d.jpg` at `sample_fps`.
    pub fn frame_producer(config: &Config) -> Self {
        let pattern = frame_pattern(&config.frames.dir);
        Self::new(
            config.producer.ffmpeg.as_str(),
            [
                "-hide_banner".to_string(),
                "-loglevel".into(),
                "error".into(),
                "-y".into(),
                "-i".into(),
                config.stream.url.clone(),
                "-vf".into(),
                format!("fps={}", config.stream.sample_fps),
                pattern.display().to_string(),
            ],
        )
    }

    /// Clip recorder: captures `duration_secs` of the stream into `output_path`.
    pub fn clip_recorder(ffmpeg: &str, stream_url: &str, recording: &RecordingConfig) -> Self {
        Self::new(
            ffmpeg,
            [
                "-hide_banner".to_string(),
                "-loglevel".into(),
                "error".into(),
                "-y".into(),
                "-i".into(),
                stream_url.to_string(),
                "-r".into(),
                recording.framerate.to_string(),
                "-t".into(),
                recording.duration_secs.to_string(),
                recording.output_path.display().to_string(),
            ],
        )
    }

    /// Build a tokio command. Children are killed when their handle is dropped,
    /// so a shutdown does not leave ffmpeg running behind us.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Check whether ffmpeg is available. Logs a warning if not found.
pub async fn check_ffmpeg_available(ffmpeg: &str) {
    match Command::new(ffmpeg).arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!(ffmpeg, "ffmpeg is available");
        }
        Ok(_) => {
            warn!(ffmpeg, "ffmpeg returned non-zero for -version; frame capture may fail");
        }
        Err(e) => {
            warn!(
                ffmpeg,
                error = %e,
                "ffmpeg not found; neither frame capture nor clip recording will work"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::parse(
            r#"
            [stream]
            url = "rtsp://camera.local/live"
            [notify]
            webhook_url = "https://hooks.example.com/prod"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn producer_samples_into_numbered_files() {
        let cmd = ExternalCommand::frame_producer(&config());
        assert_eq!(
            cmd.to_string(),
            "ffmpeg -hide_banner -loglevel error -y -i rtsp://camera.local/live -vf fps=1 frames/frame%05d.jpg"
        );
    }

    #[test]
    fn recorder_uses_duration_and_framerate() {
        let config = config();
        let cmd = ExternalCommand::clip_recorder("ffmpeg", &config.stream.url, &config.recording);
        assert_eq!(
            cmd.args,
            vec![
                "-hide_banner",
                "-loglevel",
                "error",
                "-y",
                "-i",
                "rtsp://camera.local/live",
                "-r",
                "30",
                "-t",
                "60",
                "out_vid.mp4",
            ]
        );
    }

    #[test]
    fn fractional_sample_rate_is_kept() {
        let mut config = config();
        config.stream.sample_fps = 0.5;
        let cmd = ExternalCommand::frame_producer(&config);
        assert!(cmd.args.contains(&"fps=0.5".to_string()));
    }
}
