//! Progress Tracker — maps "where are we" onto a single 0–100% figure.
//!
//! Percent is always recomputed from the cursor (active segment plus elapsed
//! offset), never accumulated, so skipped or failed segments cannot cause drift.

use crate::segment::SegmentIndex;
use crate::timeline::Timeline;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Current position on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cursor {
    /// `offset` into the audio of `index`.
    Segment { index: SegmentIndex, offset: Duration },
    /// `elapsed` into the silence that follows `index`.
    Silence { index: SegmentIndex, elapsed: Duration },
}

/// What the progress UI sees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub percent: f64,
    pub current_index: Option<SegmentIndex>,
    pub is_playing: bool,
    pub is_in_pause: bool,
}

impl ProgressSnapshot {
    pub fn idle(percent: f64) -> Self {
        ProgressSnapshot {
            percent,
            current_index: None,
            is_playing: false,
            is_in_pause: false,
        }
    }
}

/// Timeline position of `cursor` as a percentage of the total duration.
/// Unknown durations count as zero; a zero-length timeline reports 0%.
pub fn timeline_percent<T: Timeline + ?Sized>(timeline: &T, cursor: Cursor) -> f64 {
    let total = timeline.total_duration().as_secs_f64();
    if total <= 0.0 {
        return 0.0;
    }

    let known = |i: SegmentIndex| timeline.duration_of(i).unwrap_or(Duration::ZERO);
    let order = timeline.ordered_segment_indices();
    let (index, active) = match cursor {
        Cursor::Segment { index, offset } => (index, offset.min(known(index))),
        Cursor::Silence { index, elapsed } => {
            (index, known(index) + elapsed.min(timeline.effective_pause(index)))
        }
    };

    let completed: Duration = order
        .iter()
        .enumerate()
        .filter(|&(_, &i)| i < index)
        .map(|(pos, &i)| {
            let pause = if pos + 1 < order.len() {
                timeline.pause_after(i)
            } else {
                Duration::ZERO
            };
            known(i) + pause
        })
        .sum();

    let percent = (completed + active).as_secs_f64() / total * 100.0;
    percent.clamp(0.0, 100.0)
}

/// Fixed-interval tick that only runs while playback is active.
#[derive(Debug)]
pub struct ProgressTracker {
    interval: Duration,
    next_tick: Option<Instant>,
    last: ProgressSnapshot,
}

impl ProgressTracker {
    pub fn new(interval: Duration) -> Self {
        ProgressTracker {
            interval,
            next_tick: None,
            last: ProgressSnapshot::idle(0.0),
        }
    }

    /// Arm the tick when playback is running, disarm it otherwise.
    pub fn sync(&mut self, playing: bool, now: Instant) {
        match (playing, self.next_tick) {
            (true, None) => self.next_tick = Some(now + self.interval),
            (false, Some(_)) => self.next_tick = None,
            _ => {}
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.next_tick.is_some()
    }

    pub fn next_tick(&self) -> Option<Instant> {
        self.next_tick
    }

    /// True when a tick is due. Schedules the following tick relative to
    /// `now` so a stalled loop does not burst.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_tick {
            Some(at) if now >= at => {
                self.next_tick = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }

    pub fn record(&mut self, snapshot: ProgressSnapshot) {
        self.last = snapshot;
    }

    pub fn last(&self) -> ProgressSnapshot {
        self.last
    }
}
