use crate::segment::SegmentIndex;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to open audio output: {0}")]
    Stream(#[from] rodio::StreamError),
    #[error("failed to create audio sink: {0}")]
    Sink(#[from] rodio::PlayError),
    #[error("cannot decode '{}': {source}", path.display())]
    Decode {
        path: PathBuf,
        source: rodio::decoder::DecoderError,
    },
    #[error("segment {0} not found")]
    SegmentNotFound(SegmentIndex),
    #[error("segment {0} has no generated audio")]
    NoAudio(SegmentIndex),
    #[error("nothing is playing")]
    NotPlaying,
    #[error("timeline has no playable segments")]
    EmptyTimeline,
    #[error("scheduler runtime is not running")]
    RuntimeClosed,
    #[error("render failed: {0}")]
    Render(String),
}

pub type Result<T> = std::result::Result<T, Error>;
