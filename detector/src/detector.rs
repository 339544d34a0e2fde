use frame_sentry_common::config::Config;
use frame_sentry_common::frame::FrameCursor;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::ExternalCommand;
use crate::diff::difference;
use crate::dispatch::AlertDispatcher;
use crate::event_log::EventLog;
use crate::notify::{Notifier, NotifyError};
use crate::processor::FrameProcessor;
use crate::recorder::ClipRecorder;
use crate::supervisor::{ProducerSupervisor, RestartBackoff};
use crate::trigger::{Decision, RecordingFlag, TriggerPolicy};
use crate::watcher::{FrameHandle, FrameStore};
use crate::window::FrameWindow;

/// Tunables read by the loop on every iteration.
#[derive(Debug, Clone)]
pub struct DetectionParams {
    pub scale: u32,
    pub threshold: u8,
    pub poll_delay: Duration,
    pub min_diff: f64,
    pub max_diff: f64,
    pub warmup: Duration,
}

impl DetectionParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scale: config.detection.scale,
            threshold: config.detection.threshold,
            poll_delay: Duration::from_millis(config.frames.poll_delay_ms),
            min_diff: config.detection.min_diff,
            max_diff: config.effective_max_diff(),
            warmup: Duration::from_secs(config.detection.warmup_secs),
        }
    }

    pub fn policy(&self) -> TriggerPolicy {
        TriggerPolicy::new(self.min_diff, self.max_diff)
    }
}

/// Everything the loop mutates between iterations.
pub struct DetectorState {
    pub cursor: FrameCursor,
    pub window: FrameWindow,
    pub recording: RecordingFlag,
    pub params: DetectionParams,
}

/// What one consumed frame led to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// The frame could not be used.
    Skipped,
    /// Fewer than two frames windowed so far.
    Warming,
    /// Change ratio outside the band.
    Quiet(f64),
    /// In the band, but a recording is already running.
    Suppressed(f64),
    /// Alert dispatched.
    Alerted(f64),
}

/// The motion detection loop.
pub struct Detector {
    state: DetectorState,
    frame_dir: PathBuf,
    supervisor: ProducerSupervisor,
    dispatcher: AlertDispatcher,
    recording_task: Option<JoinHandle<()>>,
    event_log: EventLog,
}

impl Detector {
    pub fn new(
        params: DetectionParams,
        frame_dir: impl Into<PathBuf>,
        first_seq: u64,
        supervisor: ProducerSupervisor,
        dispatcher: AlertDispatcher,
        event_log: EventLog,
    ) -> Self {
        Self {
            state: DetectorState {
                cursor: FrameCursor::new(first_seq),
                window: FrameWindow::new(),
                recording: RecordingFlag::new(),
                params,
            },
            frame_dir: frame_dir.into(),
            supervisor,
            dispatcher,
            recording_task: None,
            event_log,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, NotifyError> {
        let event_log = EventLog::new(&config.logging.event_log);

        let backoff = if config.producer.restart_backoff_ms == 0 {
            RestartBackoff::disabled()
        } else {
            RestartBackoff::new(
                Duration::from_millis(config.producer.restart_backoff_ms),
                Duration::from_secs(config.producer.max_restart_backoff_secs),
                Duration::from_secs(config.producer.healthy_run_secs),
            )
        };
        let supervisor = ProducerSupervisor::new(
            ExternalCommand::frame_producer(config),
            &config.frames.dir,
            backoff,
            event_log.clone(),
        );

        let notifier = Notifier::new(
            config.webhook_url(),
            &config.notify.username,
            Duration::from_secs(config.notify.timeout_secs),
        )?;
        let recorder = ClipRecorder::new(
            ExternalCommand::clip_recorder(
                &config.producer.ffmpeg,
                &config.stream.url,
                &config.recording,
            ),
            &config.recording.output_path,
        );
        let dispatcher = AlertDispatcher::new(
            notifier,
            recorder,
            &config.recording.snapshot_path,
            &config.notify.alert_message,
            event_log.clone(),
        );

        Ok(Self::new(
            DetectionParams::from_config(config),
            &config.frames.dir,
            config.frames.first_seq,
            supervisor,
            dispatcher,
            event_log,
        ))
    }

    /// Send the startup message. Failure is logged only.
    pub async fn announce(&self, msg: &str) {
        self.dispatcher.announce(msg).await;
    }

    /// Run until `shutdown` resolves.
    ///
    /// Shutdown is honoured between iterations; an in-flight recording is
    /// not awaited.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        if !self.supervise(&mut shutdown).await {
            return;
        }
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted during warm-up");
                return;
            }
            _ = tokio::time::sleep(self.state.params.warmup) => {}
        }

        info!(dir = self.frame_dir.display().to_string(), "entering detection loop");
        loop {
            let store = FrameStore::new(&self.frame_dir, self.state.params.poll_delay);
            let seq = self.state.cursor.expected();
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("interrupt received, stopping detection loop");
                    break;
                }
                _ = self.supervisor.exited() => None,
                handle = store.await_frame(seq) => Some(handle),
            };

            if let Some(handle) = next {
                let outcome = self.process_frame(&handle).await;
                debug!(seq = handle.seq, ?outcome, "frame processed");
            }
            self.reap_recording().await;
            if !self.supervise(&mut shutdown).await {
                break;
            }
        }
    }

    /// Consume one frame: load it, diff it against the previous one, decide
    /// and possibly dispatch.
    pub async fn process_frame(&mut self, handle: &FrameHandle) -> StepOutcome {
        let params = &self.state.params;
        let processor = FrameProcessor::new(params.scale);
        let frame = match processor.load_and_scale(handle, &mut self.state.cursor).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "skipping frame");
                self.event_log.record(&format!("skipping frame: {e}")).await;
                return StepOutcome::Skipped;
            }
        };

        self.state.window.push(frame);
        let Some((prev, curr)) = self.state.window.pair() else {
            return StepOutcome::Warming;
        };

        let diff = match difference(prev, curr, params.threshold) {
            Ok(diff) => diff,
            Err(e) => {
                warn!(error = %e, "cannot compare frames");
                self.event_log.record(&format!("cannot compare frames: {e}")).await;
                return StepOutcome::Skipped;
            }
        };
        let ratio = diff.change_ratio;
        let policy = params.policy();
        info!(
            prev = prev.seq,
            seq = curr.seq,
            change = format!("{:.2}%", ratio * 100.0),
            state = ?policy.state(&self.state.recording),
            "frame compared"
        );

        match policy.decide(ratio, &self.state.recording) {
            Decision::Ignore => StepOutcome::Quiet(ratio),
            Decision::Suppressed => StepOutcome::Suppressed(ratio),
            Decision::Dispatch(guard) => {
                let task = self.dispatcher.dispatch(curr, guard).await;
                self.recording_task = Some(task);
                StepOutcome::Alerted(ratio)
            }
        }
    }

    /// Restart the producer if it is down. A restart rewinds the sequence,
    /// so the window is cleared with it. Returns `false` if `shutdown` fired
    /// during the restart backoff.
    async fn supervise<F>(&mut self, shutdown: &mut Pin<&mut F>) -> bool
    where
        F: Future<Output = ()>,
    {
        let delay = self.supervisor.restart_delay();
        if !delay.is_zero() {
            tokio::select! {
                _ = shutdown.as_mut() => {
                    info!("interrupt received during producer backoff");
                    return false;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if self.supervisor.ensure_running(&mut self.state.cursor).await {
            self.state.window.clear();
            debug!(
                launches = self.supervisor.restarts(),
                alive = self.supervisor.is_alive(),
                "frame producer supervised"
            );
        }
        true
    }

    async fn reap_recording(&mut self) {
        if !self.recording_task.as_ref().is_some_and(|t| t.is_finished()) {
            return;
        }
        if let Some(task) = self.recording_task.take() {
            match task.await {
                Ok(()) => info!("recording finished, alerts re-armed"),
                Err(e) => {
                    error!(error = %e, "recording task panicked");
                    self.event_log.record(&format!("recording task panicked: {e}")).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{scratch_dir, sh};
    use frame_sentry_common::frame::frame_path;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::path::Path;

    fn params() -> DetectionParams {
        DetectionParams {
            scale: 1,
            threshold: 50,
            poll_delay: Duration::from_millis(10),
            min_diff: 0.02,
            max_diff: 0.5,
            warmup: Duration::ZERO,
        }
    }

    async fn detector(dir: &Path, producer: &str, recorder: &str) -> Detector {
        detector_with_backoff(dir, producer, recorder, RestartBackoff::disabled()).await
    }

    async fn detector_with_backoff(
        dir: &Path,
        producer: &str,
        recorder: &str,
        backoff: RestartBackoff,
    ) -> Detector {
        let frames = dir.join("frames");
        std::fs::create_dir_all(&frames).unwrap();
        let log = EventLog::new(dir.join("detector.log"));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/webhook", listener.local_addr().unwrap());
        drop(listener);

        let supervisor =
            ProducerSupervisor::new(sh(producer), &frames, backoff, log.clone());
        let out = dir.join("out_vid.mp4");
        let recorder = ClipRecorder::new(
            sh(&recorder.replace("{out}", &out.display().to_string())),
            out,
        );
        let notifier = Notifier::new(&url, "ulla", Duration::from_secs(2)).unwrap();
        let dispatcher = AlertDispatcher::new(
            notifier,
            recorder,
            dir.join("full_color.jpg"),
            "bird spotted?",
            log.clone(),
        );
        Detector::new(params(), frames, 1, supervisor, dispatcher, log)
    }

    /// Write a 10x10 black frame with the first `white` pixels turned white.
    fn put_frame(dir: &Path, seq: u64, white: u32) -> FrameHandle {
        let mut img = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        for i in 0..white {
            img.put_pixel(i % 10, i / 10, Rgb([255, 255, 255]));
        }
        let path = frame_path(&dir.join("frames"), seq);
        img.save_with_format(&path, ImageFormat::Png).unwrap();
        FrameHandle { seq, path }
    }

    #[tokio::test]
    async fn identical_frames_are_quiet() {
        let dir = scratch_dir("detector_quiet");
        let mut det = detector(&dir, "sleep 5", "exit 0").await;

        let first = put_frame(&dir, 1, 0);
        assert_eq!(det.process_frame(&first).await, StepOutcome::Warming);
        let second = put_frame(&dir, 2, 0);
        assert_eq!(det.process_frame(&second).await, StepOutcome::Quiet(0.0));

        assert_eq!(det.state.cursor.expected(), 3);
        assert!(!det.state.recording.is_recording());
    }

    #[tokio::test]
    async fn corrupt_frame_is_skipped_and_window_bridges_gap() {
        let dir = scratch_dir("detector_gap");
        let mut det = detector(&dir, "sleep 5", "exit 0").await;

        let first = put_frame(&dir, 1, 0);
        assert_eq!(det.process_frame(&first).await, StepOutcome::Warming);

        let bad = frame_path(&dir.join("frames"), 2);
        std::fs::write(&bad, b"garbage").unwrap();
        let bad = FrameHandle { seq: 2, path: bad };
        assert_eq!(det.process_frame(&bad).await, StepOutcome::Skipped);
        assert_eq!(det.state.cursor.expected(), 3);

        let third = put_frame(&dir, 3, 100);
        assert_eq!(det.process_frame(&third).await, StepOutcome::Quiet(1.0));
        let (prev, curr) = det.state.window.pair().unwrap();
        assert_eq!((prev.seq, curr.seq), (1, 3));
    }

    #[tokio::test]
    async fn in_band_change_alerts_once_per_recording() {
        let dir = scratch_dir("detector_alert");
        let mut det = detector(&dir, "sleep 5", "sleep 0.3; printf clip > {out}").await;

        let first = put_frame(&dir, 1, 0);
        det.process_frame(&first).await;
        let second = put_frame(&dir, 2, 10);
        match det.process_frame(&second).await {
            StepOutcome::Alerted(r) => assert!((r - 0.10).abs() < 1e-12),
            other => panic!("expected alert, got {other:?}"),
        }
        assert!(det.state.recording.is_recording());
        assert!(dir.join("full_color.jpg").exists());

        let third = put_frame(&dir, 3, 20);
        assert!(matches!(
            det.process_frame(&third).await,
            StepOutcome::Suppressed(_)
        ));

        det.recording_task.take().unwrap().await.unwrap();
        assert!(!det.state.recording.is_recording());
    }

    #[tokio::test]
    async fn full_frame_change_is_ignored() {
        let dir = scratch_dir("detector_glitch");
        let mut det = detector(&dir, "sleep 5", "exit 0").await;

        det.process_frame(&put_frame(&dir, 1, 0)).await;
        assert_eq!(
            det.process_frame(&put_frame(&dir, 2, 100)).await,
            StepOutcome::Quiet(1.0)
        );
        assert!(!dir.join("full_color.jpg").exists());
    }

    #[tokio::test]
    async fn band_can_be_retuned_at_runtime() {
        let dir = scratch_dir("detector_retune");
        let mut det = detector(&dir, "sleep 5", "exit 0").await;
        det.state.params.min_diff = 0.2;

        det.process_frame(&put_frame(&dir, 1, 0)).await;
        assert_eq!(
            det.process_frame(&put_frame(&dir, 2, 10)).await,
            StepOutcome::Quiet(0.1)
        );
    }

    #[tokio::test]
    async fn run_launches_producer_and_consumes_its_frames() {
        let dir = scratch_dir("detector_run");
        let frames = dir.join("frames");
        let producer = format!(
            "printf x > {}; sleep 5",
            frame_path(&frames, 1).display()
        );
        let mut det = detector(&dir, &producer, "exit 0").await;

        det.run(tokio::time::sleep(Duration::from_millis(500))).await;

        assert_eq!(det.supervisor.restarts(), 1);
        assert!(det.supervisor.is_alive());
        assert!(!frame_path(&frames, 1).exists());
        assert_eq!(det.state.cursor.expected(), 2);
    }

    #[tokio::test]
    async fn dead_producer_is_restarted_from_first_frame() {
        let dir = scratch_dir("detector_crashloop");
        let mut det = detector(&dir, "exit 1", "exit 0").await;

        det.run(tokio::time::sleep(Duration::from_millis(300))).await;

        assert!(det.supervisor.restarts() > 1);
        assert_eq!(det.state.cursor.expected(), 1);
        assert!(dir.join("frames").is_dir());
        let log = std::fs::read_to_string(dir.join("detector.log")).unwrap();
        assert!(log.contains("restarting frame producer"));
    }

    #[tokio::test]
    async fn interrupt_cuts_restart_backoff_short() {
        let dir = scratch_dir("detector_backoff_interrupt");
        let backoff = RestartBackoff::new(
            Duration::from_secs(30),
            Duration::from_secs(30),
            Duration::from_secs(10),
        );
        let mut det = detector_with_backoff(&dir, "exit 1", "exit 0", backoff).await;

        let started = tokio::time::Instant::now();
        det.run(tokio::time::sleep(Duration::from_millis(300))).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(det.supervisor.restarts(), 1);
    }
}
