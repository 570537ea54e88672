use crate::error::Result;
use crate::pause_map::PauseMap;
use crate::segment::{MediaHandle, SegmentIndex, SegmentStore};
use crate::timeline::Timeline;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PROJECT_FILE: &str = "storyflow_project.json";

/// Default location of the project file, under the platform's local data dir.
pub fn default_project_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("storyflow").join(PROJECT_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_FILE))
}

/// Timing knobs for the scheduler runtime and duration resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Interval between progress publications while playing.
    pub tick_interval_ms: u64,
    /// How often the runtime checks the media output for natural completion.
    pub media_poll_ms: u64,
    /// Delay between duration probe attempts.
    pub resolve_interval_ms: u64,
    /// Probe attempts before giving up on unknown durations.
    pub resolve_attempts: u32,
}

impl SchedulerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn media_poll(&self) -> Duration {
        Duration::from_millis(self.media_poll_ms.max(1))
    }

    pub fn resolve_interval(&self) -> Duration {
        Duration::from_millis(self.resolve_interval_ms)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            tick_interval_ms: 100,
            media_poll_ms: 25,
            resolve_interval_ms: 100,
            resolve_attempts: 20,
        }
    }
}

/// A story being assembled: generated clips, the silences between them, and
/// how the scheduler should run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryProject {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub segments: SegmentStore,
    #[serde(default)]
    pub pauses: PauseMap,
    #[serde(default)]
    pub settings: SchedulerSettings,
}

impl StoryProject {
    pub fn new(name: impl Into<String>) -> Self {
        StoryProject {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load a project from JSON, or start a fresh one if the file is missing
    /// or unreadable.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str(&data) {
                    Ok(project) => return project,
                    Err(e) => tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "corrupt project file, starting fresh"
                    ),
                },
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "could not read project file"
                ),
            }
        }
        StoryProject::default()
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Attach audio to a script position.
    pub fn add_segment(&mut self, index: SegmentIndex, path: impl Into<PathBuf>) {
        self.segments.set_handle(index, MediaHandle::new(path));
    }
}

impl Timeline for StoryProject {
    fn ordered_segment_indices(&self) -> Vec<SegmentIndex> {
        self.segments.ordered_indices()
    }

    fn handle_for(&self, index: SegmentIndex) -> Option<&MediaHandle> {
        self.segments.handle_for(index)
    }

    fn pause_after(&self, index: SegmentIndex) -> Duration {
        self.pauses.pause_after(index)
    }

    fn duration_of(&self, index: SegmentIndex) -> Option<Duration> {
        self.segments.duration_of(index)
    }
}
