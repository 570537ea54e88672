//! Duration Resolver — best-effort duration table for segment media.
//!
//! Metadata becomes available per handle, in no particular order. The
//! resolver polls until every handle reports a duration or the attempt budget
//! runs out, then returns whatever it has. Missing entries are never an error.

use crate::segment::{MediaHandle, SegmentIndex};
use lofty::file::AudioFile;
use std::collections::BTreeMap;
use std::time::Duration;

/// Source of media durations. `None` means "not known yet".
pub trait DurationProbe {
    fn probe(&self, handle: &MediaHandle) -> Option<Duration>;
}

/// Reads the duration from container metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyProbe;

impl DurationProbe for LoftyProbe {
    fn probe(&self, handle: &MediaHandle) -> Option<Duration> {
        match lofty::read_from_path(handle.path()) {
            Ok(tagged_file) => Some(tagged_file.properties().duration()),
            Err(e) => {
                tracing::debug!(path = %handle.path().display(), error = %e, "duration probe failed");
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DurationResolver<P> {
    probe: P,
    interval: Duration,
    max_attempts: u32,
}

impl<P: DurationProbe> DurationResolver<P> {
    pub fn new(probe: P, interval: Duration, max_attempts: u32) -> Self {
        DurationResolver {
            probe,
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Probe every handle, retrying the missing ones on a fixed interval.
    /// Blocks the calling thread for at most `interval * (max_attempts - 1)`.
    pub fn resolve_all(
        &self,
        handles: &[(SegmentIndex, MediaHandle)],
    ) -> BTreeMap<SegmentIndex, Duration> {
        let mut resolved = BTreeMap::new();
        let mut pending: Vec<&(SegmentIndex, MediaHandle)> = handles.iter().collect();

        for attempt in 1..=self.max_attempts {
            pending.retain(|(index, handle)| match self.probe.probe(handle) {
                Some(d) if !d.is_zero() => {
                    resolved.insert(*index, d);
                    false
                }
                _ => true,
            });

            if pending.is_empty() {
                break;
            }
            if attempt < self.max_attempts {
                std::thread::sleep(self.interval);
            }
        }

        if !pending.is_empty() {
            tracing::warn!(
                unresolved = pending.len(),
                resolved = resolved.len(),
                "some segment durations are still unknown, progress will be approximate"
            );
        }
        resolved
    }
}

impl Default for DurationResolver<LoftyProbe> {
    fn default() -> Self {
        DurationResolver::new(LoftyProbe, Duration::from_millis(100), 20)
    }
}
