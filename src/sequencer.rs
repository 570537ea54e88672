//! Sequencer — drives ordered playback of segments and the silences between them.
//!
//! All transitions take the current time explicitly and run on a single
//! execution context. Every wait (a playing segment, a silence timer) is tagged
//! with the [`Generation`] it was issued under; completion and timer callbacks
//! carrying an older generation are discarded.

use crate::error::{Error, Result};
use crate::player::MediaOutput;
use crate::progress::{self, Cursor, ProgressSnapshot};
use crate::resume::{ResumeController, ResumeState};
use crate::segment::SegmentIndex;
use crate::timeline::Timeline;
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// Token identifying one scheduled wait. Bumped on every state-altering transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

/// The asynchronous notification the sequencer is currently waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Natural completion of the playing segment.
    Segment(Generation),
    /// Expiry of the silence timer.
    Silence {
        generation: Generation,
        deadline: Instant,
    },
}

/// Transitions recorded for the runtime to publish.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SequencerEvent {
    SegmentStarted {
        index: SegmentIndex,
        offset: Duration,
    },
    SegmentFailed {
        index: SegmentIndex,
        reason: String,
    },
    SilenceStarted {
        index: SegmentIndex,
        remaining: Duration,
    },
    Paused {
        index: SegmentIndex,
        offset: Duration,
        in_pause: bool,
    },
    Stopped,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Halted,
    /// Playing audio that was started `offset` into the segment at `started_at`.
    Segment { started_at: Instant, offset: Duration },
    /// Waiting out `length` of silence, `elapsed` of which had passed at `started_at`.
    Silence {
        started_at: Instant,
        elapsed: Duration,
        length: Duration,
    },
}

/// Next thing the transition loop has to do.
enum Step {
    Play(SegmentIndex, Duration),
    /// Segment finished (or failed): apply its pause, then move on.
    Finished(SegmentIndex),
    /// Pause already served: go straight to the next segment.
    Advance(SegmentIndex),
}

/// Everything the sequencer knows, owned in one place and mutated only by
/// transition methods.
#[derive(Debug)]
pub struct SchedulerState {
    playback: PlaybackState,
    generation: Generation,
    order: Vec<SegmentIndex>,
    current: Option<SegmentIndex>,
    phase: Phase,
    resume: ResumeController,
    idle_percent: f64,
    events: Vec<SequencerEvent>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        SchedulerState {
            playback: PlaybackState::Idle,
            generation: Generation::default(),
            order: Vec::new(),
            current: None,
            phase: Phase::Halted,
            resume: ResumeController::new(),
            idle_percent: 0.0,
            events: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Sequencer {
    state: SchedulerState,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.state.playback
    }

    pub fn is_playing(&self) -> bool {
        self.state.playback == PlaybackState::Playing
    }

    pub fn current_index(&self) -> Option<SegmentIndex> {
        self.state.current
    }

    pub fn generation(&self) -> Generation {
        self.state.generation
    }

    pub fn resume_state(&self) -> Option<&ResumeState> {
        self.state.resume.peek()
    }

    pub fn is_in_pause(&self) -> bool {
        matches!(self.state.phase, Phase::Silence { .. })
    }

    /// The notification playback is blocked on, if any.
    pub fn pending_wait(&self) -> Option<Wait> {
        if !self.is_playing() {
            return None;
        }
        match self.state.phase {
            Phase::Segment { .. } => Some(Wait::Segment(self.state.generation)),
            Phase::Silence {
                started_at,
                elapsed,
                length,
            } => Some(Wait::Silence {
                generation: self.state.generation,
                deadline: started_at + length.saturating_sub(elapsed),
            }),
            Phase::Halted => None,
        }
    }

    pub fn drain_events(&mut self) -> Vec<SequencerEvent> {
        std::mem::take(&mut self.state.events)
    }

    /// Begin playback, or resume from the last pause point.
    pub fn start<T, M>(&mut self, timeline: &T, media: &mut M, now: Instant)
    where
        T: Timeline + ?Sized,
        M: MediaOutput + ?Sized,
    {
        if self.is_playing() {
            tracing::debug!("start ignored, already playing");
            return;
        }

        if let Some(resume) = self.state.resume.consume() {
            self.resume_from(resume, timeline, media, now);
            return;
        }

        let order = timeline.ordered_segment_indices();
        let Some(&first) = order.first() else {
            tracing::debug!("start ignored, no playable segments");
            return;
        };
        self.state.order = order;
        self.state.playback = PlaybackState::Playing;
        self.run(Step::Play(first, Duration::ZERO), timeline, media, now);
    }

    /// Halt playback and remember exactly where it stopped.
    pub fn pause<T, M>(&mut self, timeline: &T, media: &mut M, now: Instant) -> Result<()>
    where
        T: Timeline + ?Sized,
        M: MediaOutput + ?Sized,
    {
        if !self.is_playing() {
            return Err(Error::NotPlaying);
        }
        let Some(index) = self.state.current else {
            return Err(Error::NotPlaying);
        };

        let (offset, in_pause) = match self.state.phase {
            Phase::Segment { started_at, offset } => {
                (offset + now.saturating_duration_since(started_at), false)
            }
            Phase::Silence {
                started_at,
                elapsed,
                length,
            } => (
                (elapsed + now.saturating_duration_since(started_at)).min(length),
                true,
            ),
            Phase::Halted => (Duration::ZERO, false),
        };

        media.stop();
        self.bump();

        let mut ordered_indices = timeline.ordered_segment_indices();
        let position_in_order = match ordered_indices.iter().position(|&i| i == index) {
            Some(pos) => pos,
            None => {
                // Audio for the active segment was removed mid-play; keep its slot
                // so resume can skip past it.
                let pos = ordered_indices.partition_point(|&i| i < index);
                ordered_indices.insert(pos, index);
                pos
            }
        };
        self.state.resume.capture(ResumeState {
            ordered_indices,
            position_in_order,
            offset,
            was_in_pause: in_pause,
        });

        self.state.playback = PlaybackState::Paused;
        self.state.phase = Phase::Halted;
        self.state.current = None;
        self.state.events.push(SequencerEvent::Paused {
            index,
            offset,
            in_pause,
        });
        Ok(())
    }

    /// Halt playback and forget any resume point.
    pub fn stop<M: MediaOutput + ?Sized>(&mut self, media: &mut M) {
        media.stop();
        self.bump();
        self.state.resume.clear();
        self.state.playback = PlaybackState::Idle;
        self.state.phase = Phase::Halted;
        self.state.current = None;
        self.state.idle_percent = 0.0;
        self.state.events.push(SequencerEvent::Stopped);
    }

    /// The playing segment ran out of audio. Returns false if the
    /// notification was stale and ignored.
    pub fn on_segment_finished<T, M>(
        &mut self,
        generation: Generation,
        timeline: &T,
        media: &mut M,
        now: Instant,
    ) -> bool
    where
        T: Timeline + ?Sized,
        M: MediaOutput + ?Sized,
    {
        match (self.accepts(generation), self.state.phase, self.state.current) {
            (true, Phase::Segment { .. }, Some(index)) => {
                self.run(Step::Finished(index), timeline, media, now);
                true
            }
            _ => {
                tracing::debug!(?generation, current = ?self.state.generation, "discarding stale segment completion");
                false
            }
        }
    }

    /// The silence timer expired. Returns false if the timer was stale.
    pub fn on_silence_elapsed<T, M>(
        &mut self,
        generation: Generation,
        timeline: &T,
        media: &mut M,
        now: Instant,
    ) -> bool
    where
        T: Timeline + ?Sized,
        M: MediaOutput + ?Sized,
    {
        match (self.accepts(generation), self.state.phase, self.state.current) {
            (true, Phase::Silence { .. }, Some(index)) => {
                self.run(Step::Advance(index), timeline, media, now);
                true
            }
            _ => {
                tracing::debug!(?generation, current = ?self.state.generation, "discarding stale silence timer");
                false
            }
        }
    }

    /// Where playback is right now, if anywhere.
    pub fn cursor(&self, now: Instant) -> Option<Cursor> {
        match self.state.playback {
            PlaybackState::Playing => {
                let index = self.state.current?;
                match self.state.phase {
                    Phase::Segment { started_at, offset } => Some(Cursor::Segment {
                        index,
                        offset: offset + now.saturating_duration_since(started_at),
                    }),
                    Phase::Silence {
                        started_at,
                        elapsed,
                        length,
                    } => Some(Cursor::Silence {
                        index,
                        elapsed: (elapsed + now.saturating_duration_since(started_at)).min(length),
                    }),
                    Phase::Halted => None,
                }
            }
            PlaybackState::Paused => {
                let resume = self.state.resume.peek()?;
                let index = resume.segment_index()?;
                Some(if resume.was_in_pause {
                    Cursor::Silence {
                        index,
                        elapsed: resume.offset,
                    }
                } else {
                    Cursor::Segment {
                        index,
                        offset: resume.offset,
                    }
                })
            }
            PlaybackState::Idle => None,
        }
    }

    pub fn snapshot<T: Timeline + ?Sized>(&self, timeline: &T, now: Instant) -> ProgressSnapshot {
        let Some(cursor) = self.cursor(now) else {
            return ProgressSnapshot::idle(self.state.idle_percent);
        };
        let (index, in_pause) = match cursor {
            Cursor::Segment { index, .. } => (index, false),
            Cursor::Silence { index, .. } => (index, true),
        };
        ProgressSnapshot {
            percent: progress::timeline_percent(timeline, cursor),
            current_index: Some(index),
            is_playing: self.is_playing(),
            is_in_pause: in_pause,
        }
    }

    fn accepts(&self, generation: Generation) -> bool {
        self.is_playing() && generation == self.state.generation
    }

    fn bump(&mut self) {
        self.state.generation = self.state.generation.next();
    }

    fn resume_from<T, M>(&mut self, resume: ResumeState, timeline: &T, media: &mut M, now: Instant)
    where
        T: Timeline + ?Sized,
        M: MediaOutput + ?Sized,
    {
        let Some(index) = resume.segment_index() else {
            tracing::warn!("resume point is out of range, starting over");
            self.state.playback = PlaybackState::Idle;
            self.start(timeline, media, now);
            return;
        };

        self.state.order = timeline.ordered_segment_indices();
        self.state.playback = PlaybackState::Playing;

        if resume.was_in_pause {
            let length = timeline.effective_pause(index);
            if length.saturating_sub(resume.offset).is_zero() {
                self.run(Step::Advance(index), timeline, media, now);
            } else {
                self.enter_silence(index, length, resume.offset, now);
            }
        } else if timeline.handle_for(index).is_some() {
            self.run(Step::Play(index, resume.offset), timeline, media, now);
        } else {
            tracing::info!(index, "resume target no longer has audio, skipping ahead");
            self.run(Step::Advance(index), timeline, media, now);
        }
    }

    /// Apply steps until playback is waiting on something or has completed.
    fn run<T, M>(&mut self, mut step: Step, timeline: &T, media: &mut M, now: Instant)
    where
        T: Timeline + ?Sized,
        M: MediaOutput + ?Sized,
    {
        loop {
            step = match step {
                Step::Play(index, offset) => {
                    self.bump();
                    self.state.current = Some(index);
                    let started = match timeline.handle_for(index) {
                        Some(handle) => media.play(handle, offset),
                        None => Err(Error::NoAudio(index)),
                    };
                    match started {
                        Ok(()) => {
                            self.state.phase = Phase::Segment {
                                started_at: now,
                                offset,
                            };
                            self.state
                                .events
                                .push(SequencerEvent::SegmentStarted { index, offset });
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(index, error = %e, "segment failed to start, skipping");
                            self.state.events.push(SequencerEvent::SegmentFailed {
                                index,
                                reason: e.to_string(),
                            });
                            Step::Finished(index)
                        }
                    }
                }
                Step::Finished(index) => {
                    let pause = timeline.effective_pause(index);
                    if pause.is_zero() {
                        Step::Advance(index)
                    } else {
                        self.enter_silence(index, pause, Duration::ZERO, now);
                        return;
                    }
                }
                Step::Advance(index) => {
                    self.state.order = timeline.ordered_segment_indices();
                    match self.state.order.iter().copied().find(|&i| i > index) {
                        Some(next) => Step::Play(next, Duration::ZERO),
                        None => {
                            self.complete();
                            return;
                        }
                    }
                }
            };
        }
    }

    fn enter_silence(&mut self, index: SegmentIndex, length: Duration, elapsed: Duration, now: Instant) {
        self.bump();
        self.state.current = Some(index);
        self.state.phase = Phase::Silence {
            started_at: now,
            elapsed,
            length,
        };
        self.state.events.push(SequencerEvent::SilenceStarted {
            index,
            remaining: length.saturating_sub(elapsed),
        });
    }

    fn complete(&mut self) {
        self.bump();
        self.state.playback = PlaybackState::Idle;
        self.state.phase = Phase::Halted;
        self.state.current = None;
        self.state.idle_percent = 100.0;
        self.state.events.push(SequencerEvent::Completed);
        tracing::info!("timeline finished");
    }
}
