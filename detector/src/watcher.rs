use frame_sentry_common::frame::frame_path;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

/// A frame file that exists on disk and has not been consumed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHandle {
    pub seq: u64,
    pub path: PathBuf,
}

/// Watches the producer's output directory for sequentially numbered frames.
pub struct FrameStore {
    dir: PathBuf,
    poll_delay: Duration,
}

impl FrameStore {
    pub fn new(dir: impl Into<PathBuf>, poll_delay: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll_delay,
        }
    }

    /// Wait until the frame for `seq` exists and return a handle to it.
    ///
    /// Suspension point: sleeps `poll_delay` between probes and never gives
    /// up. Returns without sleeping if the file is already present. Callers
    /// that need to stop waiting race this future against another one.
    pub async fn await_frame(&self, seq: u64) -> FrameHandle {
        let mut probes: u64 = 0;
        loop {
            if let Some(handle) = self.check_for_frame(seq).await {
                if probes > 0 {
                    debug!(seq, probes, "frame arrived");
                }
                return handle;
            }
            probes += 1;
            trace!(seq, probes, "frame not ready, sleeping");
            tokio::time::sleep(self.poll_delay).await;
        }
    }

    /// Non-blocking probe for the frame with `seq`.
    pub async fn check_for_frame(&self, seq: u64) -> Option<FrameHandle> {
        let path = frame_path(&self.dir, seq);
        is_present(&path)
            .await
            .then_some(FrameHandle { seq, path })
    }
}

// Any error (missing directory included) counts as "not there yet".
async fn is_present(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file())
}
