use frame_sentry_common::frame::Frame;
use image::ImageFormat;
use std::io::Cursor;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::event_log::EventLog;
use crate::notify::Notifier;
use crate::recorder::ClipRecorder;
use crate::trigger::RecordingGuard;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to encode snapshot {0}: {1}")]
    Encode(String, image::ImageError),
    #[error("failed to write snapshot {0}: {1}")]
    Write(String, std::io::Error),
}

/// Delivers an alert: snapshot now, clip in the background.
pub struct AlertDispatcher {
    notifier: Notifier,
    recorder: ClipRecorder,
    snapshot_path: PathBuf,
    message: String,
    event_log: EventLog,
}

impl AlertDispatcher {
    pub fn new(
        notifier: Notifier,
        recorder: ClipRecorder,
        snapshot_path: impl Into<PathBuf>,
        message: impl Into<String>,
        event_log: EventLog,
    ) -> Self {
        Self {
            notifier,
            recorder,
            snapshot_path: snapshot_path.into(),
            message: message.into(),
            event_log,
        }
    }

    /// Post a plain message to the sink, logging failure.
    pub async fn announce(&self, msg: &str) {
        if let Err(e) = self.notifier.send_message(msg).await {
            warn!(error = %e, "failed to send message");
            self.event_log.record(&format!("failed to send message: {e}")).await;
        }
    }

    /// Save and send the snapshot, then start recording a clip.
    ///
    /// The snapshot upload is awaited; its failure is logged and does not stop
    /// the recording. The returned task owns `guard`, so the recording flag
    /// clears only after the clip has been recorded and sent.
    pub async fn dispatch(&self, frame: &Frame, guard: RecordingGuard) -> JoinHandle<()> {
        info!(seq = frame.seq, "alert: saving snapshot and starting recording");
        self.event_log.record(&format!("motion alert on frame {}", frame.seq)).await;

        match self.save_snapshot(frame).await {
            Ok(()) => {
                if let Err(e) = self
                    .notifier
                    .send_file(&self.snapshot_path, &self.message)
                    .await
                {
                    warn!(error = %e, "failed to send snapshot");
                    self.event_log.record(&format!("failed to send snapshot: {e}")).await;
                }
            }
            Err(e) => {
                error!(error = %e, "snapshot not sent");
                self.event_log.record(&e.to_string()).await;
            }
        }

        let recorder = self.recorder.clone();
        let notifier = self.notifier.clone();
        let message = self.message.clone();
        let event_log = self.event_log.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match recorder.record().await {
                Ok(clip) => {
                    info!(bytes = clip.bytes, "sending recorded clip");
                    if let Err(e) = notifier.send_file(&clip.path, &message).await {
                        warn!(error = %e, "failed to send clip");
                        event_log.record(&format!("failed to send clip: {e}")).await;
                    }
                }
                Err(e) => {
                    error!(error = %e, "recording failed");
                    event_log.record(&format!("recording failed: {e}")).await;
                }
            }
        })
    }

    async fn save_snapshot(&self, frame: &Frame) -> Result<(), DispatchError> {
        let name = || self.snapshot_path.display().to_string();
        let format = ImageFormat::from_path(&self.snapshot_path)
            .map_err(|e| DispatchError::Encode(name(), e))?;

        let mut buf = Cursor::new(Vec::new());
        frame
            .image
            .write_to(&mut buf, format)
            .map_err(|e| DispatchError::Encode(name(), e))?;
        tokio::fs::write(&self.snapshot_path, buf.into_inner())
            .await
            .map_err(|e| DispatchError::Write(name(), e))
    }
}
