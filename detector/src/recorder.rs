use std::path::PathBuf;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::command::ExternalCommand;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("failed to spawn recorder: {0}")]
    Spawn(String),
    #[error("failed to wait for recorder: {0}")]
    Wait(String),
    #[error("recorder exited with non-zero status: {0}")]
    Failed(String),
    #[error("recorder produced no output at {0}")]
    MissingOutput(String),
}

/// A finished clip on disk.
#[derive(Debug, Clone)]
pub struct Clip {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Captures a fixed-length clip of the stream with an external process.
#[derive(Debug, Clone)]
pub struct ClipRecorder {
    command: ExternalCommand,
    output_path: PathBuf,
}

impl ClipRecorder {
    /// `command` must write its clip to `output_path`.
    pub fn new(command: ExternalCommand, output_path: impl Into<PathBuf>) -> Self {
        Self {
            command,
            output_path: output_path.into(),
        }
    }

    /// Run the recorder to completion and return the clip it wrote.
    pub async fn record(&self) -> Result<Clip, RecorderError> {
        // A leftover clip from an earlier run must not pass for this one.
        let _ = tokio::fs::remove_file(&self.output_path).await;

        let started = Instant::now();
        let child = self
            .command
            .to_command()
            .spawn()
            .map_err(|e| RecorderError::Spawn(e.to_string()))?;

        debug!(
            command = %self.command,
            output = self.output_path.display().to_string(),
            "recorder started"
        );

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RecorderError::Wait(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(status = %output.status, stderr = %stderr.trim(), "recorder exited with error");
            return Err(RecorderError::Failed(format!(
                "{}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let bytes = tokio::fs::metadata(&self.output_path)
            .await
            .map(|m| m.len())
            .map_err(|_| RecorderError::MissingOutput(self.output_path.display().to_string()))?;

        info!(
            path = self.output_path.display().to_string(),
            bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "clip recording complete"
        );

        Ok(Clip {
            path: self.output_path.clone(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{scratch_dir, sh};

    #[tokio::test]
    async fn returns_clip_written_by_command() {
        let dir = scratch_dir("recorder_ok");
        let out = dir.join("out_vid.mp4");
        let recorder = ClipRecorder::new(sh(&format!("printf clip > {}", out.display())), &out);

        let clip = recorder.record().await.unwrap();
        assert_eq!(clip.path, out);
        assert_eq!(clip.bytes, 4);
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let dir = scratch_dir("recorder_fail");
        let recorder = ClipRecorder::new(sh("echo boom >&2; exit 3"), dir.join("out_vid.mp4"));

        match recorder.record().await {
            Err(RecorderError::Failed(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_without_output_is_an_error() {
        let dir = scratch_dir("recorder_missing");
        let recorder = ClipRecorder::new(sh("exit 0"), dir.join("out_vid.mp4"));
        assert!(matches!(
            recorder.record().await,
            Err(RecorderError::MissingOutput(_))
        ));
    }
}
