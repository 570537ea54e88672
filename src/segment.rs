use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Logical position of a segment in the script. Not necessarily contiguous.
pub type SegmentIndex = u32;

/// Opaque handle to a decodable audio resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaHandle {
    path: PathBuf,
}

impl MediaHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        MediaHandle { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: SegmentIndex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<MediaHandle>,
    #[serde(default, with = "secs_serde", skip_serializing_if = "Option::is_none")]
    duration: Option<Duration>,
}

impl Segment {
    pub fn new(index: SegmentIndex, handle: Option<MediaHandle>) -> Self {
        Segment {
            index,
            handle,
            duration: None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn is_playable(&self) -> bool {
        self.handle.is_some()
    }

    /// Format duration as M:SS.s, or "--" while unknown.
    pub fn duration_display(&self) -> String {
        match self.duration {
            Some(d) => {
                // Round first so 119.97s reads 2:00.0, not 1:60.0.
                let tenths = (d.as_secs_f64() * 10.0).round() as u64;
                format!("{}:{:02}.{}", tenths / 600, tenths % 600 / 10, tenths % 10)
            }
            None => "--".to_string(),
        }
    }
}

/// Per-position audio handles and their observed durations, kept sorted by index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SegmentStore {
    segments: Vec<Segment>,
}

impl<'de> Deserialize<'de> for SegmentStore {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let mut segments = Vec::<Segment>::deserialize(d)?;
        segments.sort_by_key(|s| s.index);
        segments.dedup_by_key(|s| s.index);
        Ok(SegmentStore { segments })
    }
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, index: SegmentIndex) -> std::result::Result<usize, usize> {
        self.segments.binary_search_by_key(&index, |s| s.index)
    }

    pub fn get(&self, index: SegmentIndex) -> Option<&Segment> {
        self.position(index).ok().map(|pos| &self.segments[pos])
    }

    /// Attach generated audio to a script position. A new handle starts a new
    /// segment life, so any previously observed duration is dropped.
    pub fn set_handle(&mut self, index: SegmentIndex, handle: MediaHandle) {
        match self.position(index) {
            Ok(pos) => {
                let seg = &mut self.segments[pos];
                if seg.handle.as_ref() != Some(&handle) {
                    seg.handle = Some(handle);
                    seg.duration = None;
                }
            }
            Err(pos) => self.segments.insert(pos, Segment::new(index, Some(handle))),
        }
    }

    /// Drop the audio for a position but keep the position itself.
    pub fn clear_handle(&mut self, index: SegmentIndex) -> Result<()> {
        let pos = self
            .position(index)
            .map_err(|_| Error::SegmentNotFound(index))?;
        let seg = &mut self.segments[pos];
        seg.handle = None;
        seg.duration = None;
        Ok(())
    }

    pub fn remove(&mut self, index: SegmentIndex) -> Result<Segment> {
        let pos = self
            .position(index)
            .map_err(|_| Error::SegmentNotFound(index))?;
        Ok(self.segments.remove(pos))
    }

    /// Record an observed duration. Returns false when the segment is unknown,
    /// has no audio, already has a duration, or the value is zero.
    pub fn record_duration(&mut self, index: SegmentIndex, duration: Duration) -> bool {
        if duration.is_zero() {
            return false;
        }
        match self.position(index) {
            Ok(pos) => {
                let seg = &mut self.segments[pos];
                if seg.handle.is_none() || seg.duration.is_some() {
                    return false;
                }
                seg.duration = Some(duration);
                true
            }
            Err(_) => false,
        }
    }

    /// Ascending indices of segments that have a playable handle.
    pub fn ordered_indices(&self) -> Vec<SegmentIndex> {
        self.segments
            .iter()
            .filter(|s| s.is_playable())
            .map(|s| s.index)
            .collect()
    }

    pub fn handle_for(&self, index: SegmentIndex) -> Option<&MediaHandle> {
        self.get(index).and_then(|s| s.handle.as_ref())
    }

    pub fn duration_of(&self, index: SegmentIndex) -> Option<Duration> {
        self.get(index).and_then(|s| s.duration)
    }

    /// Playable segments whose duration has not been observed yet.
    pub fn unresolved(&self) -> Vec<(SegmentIndex, MediaHandle)> {
        self.segments
            .iter()
            .filter(|s| s.duration.is_none())
            .filter_map(|s| s.handle.clone().map(|h| (s.index, h)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

mod secs_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        dur.map(|d| d.as_secs_f64()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        Ok(secs
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok()))
    }
}
