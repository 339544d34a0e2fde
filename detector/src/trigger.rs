use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared "recording in progress" flag.
///
/// Read by the detection loop and cleared by the background recording task.
/// The only way to set it is [`RecordingFlag::try_acquire`], which checks and
/// sets in a single compare-and-swap.
#[derive(Debug, Clone, Default)]
pub struct RecordingFlag(Arc<AtomicBool>);

impl RecordingFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Claim the flag if no recording is running.
    pub fn try_acquire(&self) -> Option<RecordingGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RecordingGuard(Arc::clone(&self.0)))
    }
}

/// Proof that this holder owns the single recording slot. Dropping it clears
/// the flag.
#[derive(Debug)]
pub struct RecordingGuard(Arc<AtomicBool>);

impl Drop for RecordingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Recording,
}

/// Outcome of evaluating one change ratio.
#[derive(Debug)]
pub enum Decision {
    /// Ratio is outside the band.
    Ignore,
    /// Ratio is in the band but a recording is already running.
    Suppressed,
    /// Ratio is in the band and the recording slot was claimed.
    Dispatch(RecordingGuard),
}

/// Hysteresis band on the change ratio: only `min_diff < r < max_diff` is
/// interesting. Near-zero means a static scene; near-one is a lighting change
/// or a camera glitch.
#[derive(Debug, Clone, Copy)]
pub struct TriggerPolicy {
    pub min_diff: f64,
    pub max_diff: f64,
}

impl TriggerPolicy {
    pub fn new(min_diff: f64, max_diff: f64) -> Self {
        Self { min_diff, max_diff }
    }

    pub fn in_band(&self, ratio: f64) -> bool {
        self.min_diff < ratio && ratio < self.max_diff
    }

    pub fn state(&self, flag: &RecordingFlag) -> TriggerState {
        if flag.is_recording() {
            TriggerState::Recording
        } else {
            TriggerState::Idle
        }
    }

    pub fn decide(&self, ratio: f64, flag: &RecordingFlag) -> Decision {
        if !self.in_band(ratio) {
            return Decision::Ignore;
        }
        match flag.try_acquire() {
            Some(guard) => Decision::Dispatch(guard),
            None => {
                debug!(ratio, "change in band but a recording is in progress");
                Decision::Suppressed
            }
        }
    }
}
