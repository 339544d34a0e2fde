use frame_sentry_common::frame::{parse_frame_seq, FrameCursor};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::command::ExternalCommand;
use crate::event_log::EventLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerStatus {
    /// Never launched.
    Stopped,
    Running,
    /// The process ended, cleanly or not, or could not be started.
    Exited,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to reset frame directory {0}: {1}")]
    FrameDir(String, std::io::Error),
    #[error("failed to spawn frame producer: {0}")]
    Spawn(String),
}

/// Delay schedule for relaunching a producer that keeps dying young.
///
/// A run shorter than `healthy_run` doubles the delay up to `max`; a healthy
/// run resets it. An `initial` of zero disables the backoff entirely.
#[derive(Debug, Clone)]
pub struct RestartBackoff {
    initial: Duration,
    max: Duration,
    healthy_run: Duration,
    current: Duration,
}

impl RestartBackoff {
    pub fn new(initial: Duration, max: Duration, healthy_run: Duration) -> Self {
        Self {
            initial,
            max,
            healthy_run,
            current: initial,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the next launch, given how long the previous run lasted.
    /// `None` means there was no previous run.
    pub fn next_delay(&mut self, last_run: Option<Duration>) -> Duration {
        match last_run {
            None => Duration::ZERO,
            Some(run) if run >= self.healthy_run => {
                self.current = self.initial;
                Duration::ZERO
            }
            Some(_) => {
                let delay = self.current;
                self.current = (self.current * 2).min(self.max);
                delay
            }
        }
    }
}

/// Owns the frame producer process and restarts it from scratch when it dies.
pub struct ProducerSupervisor {
    command: ExternalCommand,
    frame_dir: PathBuf,
    status: watch::Receiver<ProducerStatus>,
    backoff: RestartBackoff,
    launched_at: Option<Instant>,
    restarts: u64,
    event_log: EventLog,
}

impl ProducerSupervisor {
    pub fn new(
        command: ExternalCommand,
        frame_dir: impl Into<PathBuf>,
        backoff: RestartBackoff,
        event_log: EventLog,
    ) -> Self {
        let (_tx, status) = watch::channel(ProducerStatus::Stopped);
        Self {
            command,
            frame_dir: frame_dir.into(),
            status,
            backoff,
            launched_at: None,
            restarts: 0,
            event_log,
        }
    }

    pub fn status(&self) -> ProducerStatus {
        *self.status.borrow()
    }

    pub fn is_alive(&self) -> bool {
        self.status() == ProducerStatus::Running
    }

    /// Number of launches so far, the initial one included.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Resolves once the producer is no longer running. Ready immediately if
    /// it was never started or has already exited.
    pub async fn exited(&mut self) {
        let _ = self
            .status
            .wait_for(|s| *s != ProducerStatus::Running)
            .await;
    }

    /// Wait owed before relaunching a producer that is down, zero when it is
    /// running or ran long enough. Advances the backoff schedule, so call it
    /// once per restart.
    pub fn restart_delay(&mut self) -> Duration {
        if self.is_alive() {
            return Duration::ZERO;
        }
        let last_run = self.launched_at.map(|t| t.elapsed());
        let delay = self.backoff.next_delay(last_run);
        if !delay.is_zero() {
            warn!(?delay, ?last_run, "frame producer died quickly, backing off");
        }
        delay
    }

    /// Restart the producer if it is not running. Returns whether a restart
    /// happened. Any backoff is the caller's to wait out first, see
    /// [`ProducerSupervisor::restart_delay`].
    pub async fn ensure_running(&mut self, cursor: &mut FrameCursor) -> bool {
        if self.is_alive() {
            return false;
        }
        if let Err(e) = self.restart(cursor).await {
            error!(error = %e, "frame producer restart failed");
            self.event_log.record(&format!("frame producer restart failed: {e}")).await;
        }
        true
    }

    /// Full restart: rewind the cursor, wipe and recreate the frame
    /// directory, launch a fresh producer.
    pub async fn restart(&mut self, cursor: &mut FrameCursor) -> Result<(), SupervisorError> {
        if self.launched_at.is_some() {
            self.event_log.record("restarting frame producer").await;
        }
        cursor.reset();
        reset_frame_dir(&self.frame_dir).await?;

        self.restarts += 1;
        self.launched_at = Some(Instant::now());
        info!(
            command = %self.command,
            launch = self.restarts,
            first_seq = cursor.expected(),
            "launching frame producer"
        );

        let child = match self.command.to_command().spawn() {
            Ok(child) => child,
            Err(e) => {
                let (_tx, status) = watch::channel(ProducerStatus::Exited);
                self.status = status;
                return Err(SupervisorError::Spawn(e.to_string()));
            }
        };

        let (tx, status) = watch::channel(ProducerStatus::Running);
        self.status = status;
        tokio::spawn(watch_producer(child, tx, self.event_log.clone()));
        Ok(())
    }
}

/// Wait for the producer to exit and publish it.
async fn watch_producer(child: Child, tx: watch::Sender<ProducerStatus>, event_log: EventLog) {
    let pid = child.id();
    match child.wait_with_output().await {
        Ok(output) if output.status.success() => {
            info!(pid, "frame producer exited");
            event_log.record("frame producer exited").await;
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(pid, status = %output.status, stderr = %stderr.trim(), "frame producer failed");
            event_log
                .record(&format!("frame producer failed ({}): {}", output.status, stderr.trim()))
                .await;
        }
        Err(e) => {
            error!(pid, error = %e, "failed to wait for frame producer");
            event_log.record(&format!("failed to wait for frame producer: {e}")).await;
        }
    }
    let _ = tx.send(ProducerStatus::Exited);
}

async fn reset_frame_dir(dir: &Path) -> Result<(), SupervisorError> {
    let dir_err = |e| SupervisorError::FrameDir(dir.display().to_string(), e);

    if tokio::fs::try_exists(dir).await.map_err(dir_err)? {
        let stale = count_frames(dir).await;
        if stale > 0 {
            debug!(stale, dir = dir.display().to_string(), "discarding unconsumed frames");
        }
        tokio::fs::remove_dir_all(dir).await.map_err(dir_err)?;
    }
    tokio::fs::create_dir_all(dir).await.map_err(dir_err)
}

async fn count_frames(dir: &Path) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    let mut count = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_str().and_then(parse_frame_seq).is_some() {
            count += 1;
        }
    }
    count
}
