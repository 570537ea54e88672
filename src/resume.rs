use crate::segment::SegmentIndex;
use std::time::Duration;

/// A single point on the timeline to pick up from: either `offset` into the
/// segment at `position_in_order`, or `offset` into the silence after it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeState {
    pub ordered_indices: Vec<SegmentIndex>,
    pub position_in_order: usize,
    pub offset: Duration,
    pub was_in_pause: bool,
}

impl ResumeState {
    pub fn segment_index(&self) -> Option<SegmentIndex> {
        self.ordered_indices.get(self.position_in_order).copied()
    }

    pub fn offset_seconds(&self) -> f64 {
        self.offset.as_secs_f64()
    }
}

/// Holds at most one resume point. Written on pause, taken on the next start.
#[derive(Debug, Default)]
pub struct ResumeController {
    saved: Option<ResumeState>,
}

impl ResumeController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the resume point, replacing any stale one.
    pub fn capture(&mut self, state: ResumeState) {
        self.saved = Some(state);
    }

    /// Take the stored resume point, leaving nothing behind.
    pub fn consume(&mut self) -> Option<ResumeState> {
        self.saved.take()
    }

    pub fn peek(&self) -> Option<&ResumeState> {
        self.saved.as_ref()
    }

    pub fn clear(&mut self) {
        self.saved = None;
    }
}
