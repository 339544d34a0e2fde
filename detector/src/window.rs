use frame_sentry_common::frame::Frame;
use std::collections::VecDeque;

const WINDOW_LEN: usize = 2;

/// The two most recently processed frames, oldest first.
#[derive(Debug, Default)]
pub struct FrameWindow {
    frames: VecDeque<Frame>,
}

impl FrameWindow {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::with_capacity(WINDOW_LEN),
        }
    }

    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() == WINDOW_LEN {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// `(previous, current)` once two frames have been seen.
    pub fn pair(&self) -> Option<(&Frame, &Frame)> {
        match (self.frames.front(), self.frames.back()) {
            (Some(prev), Some(curr)) if self.frames.len() == WINDOW_LEN => Some((prev, curr)),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
