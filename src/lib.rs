//! storyFlow — Core library for the story timeline player.
//!
//! Segment store, pause map, sequencing, progress and resume logic live here.
//! The CLI consumes this crate.

pub mod build;
pub mod duration;
pub mod error;
pub mod pause_map;
pub mod player;
pub mod progress;
pub mod project;
pub mod resume;
pub mod runtime;
pub mod segment;
pub mod sequencer;
pub mod timeline;

pub use error::{Error, Result};
