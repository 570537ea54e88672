//! Build plan — the finalized timeline handed to the external renderer.
//!
//! The plan is the same data the sequencer plays (ordered segments plus the
//! pause after each), so no translation happens between playback and build.

use crate::error::{Error, Result};
use crate::segment::SegmentIndex;
use crate::timeline::Timeline;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSegment {
    pub index: SegmentIndex,
    pub path: PathBuf,
    pub duration_secs: Option<f64>,
    /// Silence to render after this segment. Always 0 for the last one.
    pub pause_after_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub segments: Vec<PlannedSegment>,
    /// Expected length of the rendered file, counting unknown durations as 0.
    pub total_secs: f64,
    pub has_unknown_durations: bool,
}

impl BuildPlan {
    pub fn from_timeline<T: Timeline + ?Sized>(timeline: &T) -> Self {
        let order = timeline.ordered_segment_indices();
        let segments: Vec<PlannedSegment> = order
            .iter()
            .enumerate()
            .filter_map(|(pos, &index)| {
                let handle = timeline.handle_for(index)?;
                let pause = if pos + 1 < order.len() {
                    timeline.pause_after(index)
                } else {
                    Duration::ZERO
                };
                Some(PlannedSegment {
                    index,
                    path: handle.path().to_path_buf(),
                    duration_secs: timeline.duration_of(index).map(|d| d.as_secs_f64()),
                    pause_after_ms: pause.as_millis().min(u32::MAX as u128) as u32,
                })
            })
            .collect();

        BuildPlan {
            has_unknown_durations: segments.iter().any(|s| s.duration_secs.is_none()),
            total_secs: timeline.total_duration().as_secs_f64(),
            segments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// The single file produced by a build.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedArtifact {
    pub path: PathBuf,
    pub duration: Duration,
}

/// External service that renders a plan to one audio file.
pub trait BuildCollaborator {
    fn render(&self, plan: &BuildPlan) -> Result<RenderedArtifact>;
}

/// Finalize the timeline and hand it to `collaborator`.
pub fn build<T, C>(timeline: &T, collaborator: &C) -> Result<RenderedArtifact>
where
    T: Timeline + ?Sized,
    C: BuildCollaborator + ?Sized,
{
    let plan = BuildPlan::from_timeline(timeline);
    if plan.is_empty() {
        return Err(Error::EmptyTimeline);
    }
    if plan.has_unknown_durations {
        tracing::warn!("building with unknown segment durations, expected length is a lower bound");
    }
    let artifact = collaborator.render(&plan)?;
    tracing::info!(
        path = %artifact.path.display(),
        secs = artifact.duration.as_secs_f64(),
        segments = plan.segments.len(),
        "build finished"
    );
    Ok(artifact)
}
