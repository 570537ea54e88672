//! Read-only view of a story timeline: which segments can play, in what
//! order, and how much silence follows each one.

use crate::segment::{MediaHandle, SegmentIndex};
use std::time::Duration;

pub trait Timeline {
    /// Ascending indices that have a playable handle.
    fn ordered_segment_indices(&self) -> Vec<SegmentIndex>;

    fn handle_for(&self, index: SegmentIndex) -> Option<&MediaHandle>;

    /// Configured silence after `index`, whether or not a successor exists.
    fn pause_after(&self, index: SegmentIndex) -> Duration;

    fn duration_of(&self, index: SegmentIndex) -> Option<Duration>;

    /// First playable index strictly after `index`. `index` itself need not
    /// be playable any more.
    fn next_after(&self, index: SegmentIndex) -> Option<SegmentIndex> {
        self.ordered_segment_indices()
            .into_iter()
            .find(|&i| i > index)
    }

    /// The pause that actually applies after `index`: trailing pauses with no
    /// following segment are ignored.
    fn effective_pause(&self, index: SegmentIndex) -> Duration {
        if self.next_after(index).is_some() {
            self.pause_after(index)
        } else {
            Duration::ZERO
        }
    }

    /// Sum of known segment durations plus applicable pauses. Unknown
    /// durations count as zero.
    fn total_duration(&self) -> Duration {
        let order = self.ordered_segment_indices();
        order
            .iter()
            .enumerate()
            .map(|(pos, &i)| {
                let pause = if pos + 1 < order.len() {
                    self.pause_after(i)
                } else {
                    Duration::ZERO
                };
                self.duration_of(i).unwrap_or(Duration::ZERO) + pause
            })
            .sum()
    }
}
