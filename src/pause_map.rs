use crate::segment::SegmentIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Silence (in milliseconds) inserted after a segment finishes, before the
/// next one starts. Missing entries mean no pause.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PauseMap {
    pauses: BTreeMap<SegmentIndex, u32>,
}

impl PauseMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pause after `index`. A value of 0 removes the entry.
    pub fn set(&mut self, index: SegmentIndex, pause_ms: u32) {
        if pause_ms == 0 {
            self.pauses.remove(&index);
        } else {
            self.pauses.insert(index, pause_ms);
        }
    }

    pub fn clear(&mut self, index: SegmentIndex) -> Option<u32> {
        self.pauses.remove(&index)
    }

    pub fn pause_ms(&self, index: SegmentIndex) -> u32 {
        self.pauses.get(&index).copied().unwrap_or(0)
    }

    pub fn pause_after(&self, index: SegmentIndex) -> Duration {
        Duration::from_millis(self.pause_ms(index) as u64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SegmentIndex, u32)> + '_ {
        self.pauses.iter().map(|(&i, &ms)| (i, ms))
    }

    pub fn len(&self) -> usize {
        self.pauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pauses.is_empty()
    }
}
