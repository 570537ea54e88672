//! Scheduler runtime — dedicated thread with channel-based command dispatch.
//!
//! The thread owns the project, the [`Sequencer`] and the media output, so
//! user commands, media completion, silence timers, progress ticks and
//! resolver results are all handled on one execution context. External code
//! talks to it through [`SchedulerHandle`], which wraps an `mpsc::Sender`.

use crate::duration::{DurationProbe, DurationResolver};
use crate::error::{Error, Result};
use crate::player::MediaOutput;
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::project::StoryProject;
use crate::segment::{MediaHandle, SegmentIndex};
use crate::sequencer::{Sequencer, SequencerEvent, Wait};
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// How often an idle runtime wakes up to merge late duration results.
const IDLE_POLL: Duration = Duration::from_millis(250);

// ── Commands & Events ────────────────────────────────────────────────────────

/// Commands sent to the scheduler thread.
#[derive(Debug)]
pub enum SchedulerCmd {
    Start,
    Pause,
    Stop,
    /// Play one clip directly, outside the sequencer.
    Preview {
        index: SegmentIndex,
        offset: Duration,
    },
    StopPreview,
    SetPause {
        index: SegmentIndex,
        pause_ms: u32,
    },
    SetHandle {
        index: SegmentIndex,
        handle: MediaHandle,
    },
    ClearHandle(SegmentIndex),
    Shutdown,
}

/// Events emitted by the scheduler thread.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Progress(ProgressSnapshot),
    Transition(SequencerEvent),
    PlayError(String),
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Thread-safe handle for sending commands to the scheduler runtime.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCmd>,
}

impl SchedulerHandle {
    pub fn send(&self, cmd: SchedulerCmd) -> Result<()> {
        self.tx.send(cmd).map_err(|_| Error::RuntimeClosed)
    }

    pub fn start(&self) -> Result<()> {
        self.send(SchedulerCmd::Start)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(SchedulerCmd::Pause)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(SchedulerCmd::Stop)
    }

    pub fn preview(&self, index: SegmentIndex, offset: Duration) -> Result<()> {
        self.send(SchedulerCmd::Preview { index, offset })
    }

    pub fn set_pause(&self, index: SegmentIndex, pause_ms: u32) -> Result<()> {
        self.send(SchedulerCmd::SetPause { index, pause_ms })
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(SchedulerCmd::Shutdown);
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────────

/// Spawn the scheduler on a dedicated thread.
///
/// `make_output` runs on the new thread the first time audio is needed, so
/// outputs that are not `Send` (rodio's stream) work. `on_event` is called
/// from the scheduler thread for every transition and progress tick.
pub fn spawn_scheduler<O, M, P, F>(
    project: StoryProject,
    make_output: O,
    resolver: DurationResolver<P>,
    on_event: F,
) -> SchedulerHandle
where
    O: FnMut() -> Result<M> + Send + 'static,
    M: MediaOutput,
    P: DurationProbe + Clone + Send + 'static,
    F: Fn(SchedulerEvent) + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<SchedulerCmd>();

    std::thread::Builder::new()
        .name("story-scheduler".into())
        .spawn(move || {
            let mut runtime = Runtime {
                tracker: ProgressTracker::new(project.settings.tick_interval()),
                project,
                sequencer: Sequencer::new(),
                output: None,
                make_output,
                resolver,
                resolving: None,
                reprobe: false,
                on_event,
            };
            runtime.run(rx);
        })
        .expect("failed to spawn story-scheduler thread");

    SchedulerHandle { tx }
}

/// Stand-in used when a command needs an output that was never opened.
struct Unopened;

impl MediaOutput for Unopened {
    fn play(&mut self, _handle: &MediaHandle, _offset: Duration) -> Result<()> {
        Err(Error::NotPlaying)
    }
    fn stop(&mut self) {}
    fn is_finished(&self) -> bool {
        false
    }
    fn preview(&mut self, _handle: &MediaHandle, _offset: Duration) -> Result<()> {
        Err(Error::NotPlaying)
    }
    fn stop_preview(&mut self) {}
}

struct Runtime<O, M, P, F> {
    project: StoryProject,
    sequencer: Sequencer,
    tracker: ProgressTracker,
    output: Option<M>,
    make_output: O,
    resolver: DurationResolver<P>,
    resolving: Option<Resolving>,
    /// A handle changed while a probe was in flight.
    reprobe: bool,
    on_event: F,
}

/// An in-flight duration probe and the handles it was asked about.
struct Resolving {
    rx: mpsc::Receiver<BTreeMap<SegmentIndex, Duration>>,
    pending: Vec<(SegmentIndex, MediaHandle)>,
}

impl<O, M, P, F> Runtime<O, M, P, F>
where
    O: FnMut() -> Result<M>,
    M: MediaOutput,
    P: DurationProbe + Clone + Send + 'static,
    F: Fn(SchedulerEvent),
{
    fn run(&mut self, rx: mpsc::Receiver<SchedulerCmd>) {
        loop {
            let now = Instant::now();
            let timeout = self.next_wake(now).saturating_duration_since(now);

            match rx.recv_timeout(timeout) {
                Ok(SchedulerCmd::Shutdown) => {
                    if let Some(output) = self.output.as_mut() {
                        output.stop();
                        output.stop_preview();
                    }
                    break;
                }
                Ok(cmd) => self.handle(cmd),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            self.merge_resolved();
            self.poll_waits();
            self.publish_tick();
        }
    }

    /// Earliest of: progress tick, silence deadline, media poll.
    fn next_wake(&self, now: Instant) -> Instant {
        let mut wake = now + IDLE_POLL;
        if let Some(tick) = self.tracker.next_tick() {
            wake = wake.min(tick);
        }
        match self.sequencer.pending_wait() {
            Some(Wait::Silence { deadline, .. }) => wake = wake.min(deadline),
            Some(Wait::Segment(_)) => wake = wake.min(now + self.project.settings.media_poll()),
            None => {}
        }
        wake
    }

    fn handle(&mut self, cmd: SchedulerCmd) {
        match cmd {
            SchedulerCmd::Start => {
                if self.sequencer.is_playing() || !self.ensure_output() {
                    return;
                }
                self.spawn_resolver();
                if let Some(output) = self.output.as_mut() {
                    self.sequencer.start(&self.project, output, Instant::now());
                }
                self.after_transition();
            }

            SchedulerCmd::Pause => {
                let Some(output) = self.output.as_mut() else {
                    return;
                };
                match self.sequencer.pause(&self.project, output, Instant::now()) {
                    Ok(()) => self.after_transition(),
                    Err(e) => tracing::debug!(error = %e, "pause ignored"),
                }
            }

            SchedulerCmd::Stop => {
                match self.output.as_mut() {
                    Some(output) => self.sequencer.stop(output),
                    // Output never opened: nothing is sounding, but the stop still
                    // has to be reported.
                    None => self.sequencer.stop(&mut Unopened),
                }
                self.after_transition();
            }

            SchedulerCmd::Preview { index, offset } => {
                let Some(handle) = self.project.segments.handle_for(index).cloned() else {
                    (self.on_event)(SchedulerEvent::PlayError(
                        Error::NoAudio(index).to_string(),
                    ));
                    return;
                };
                if !self.ensure_output() {
                    return;
                }
                let result = match self.output.as_mut() {
                    Some(output) => output.preview(&handle, offset),
                    None => return,
                };
                if let Err(e) = result {
                    (self.on_event)(SchedulerEvent::PlayError(e.to_string()));
                }
            }

            SchedulerCmd::StopPreview => {
                if let Some(output) = self.output.as_mut() {
                    output.stop_preview();
                }
            }

            SchedulerCmd::SetPause { index, pause_ms } => {
                self.project.pauses.set(index, pause_ms);
            }

            SchedulerCmd::SetHandle { index, handle } => {
                self.project.segments.set_handle(index, handle);
                if self.resolving.is_some() {
                    self.reprobe = true;
                } else {
                    self.spawn_resolver();
                }
            }

            SchedulerCmd::ClearHandle(index) => {
                if let Err(e) = self.project.segments.clear_handle(index) {
                    tracing::debug!(error = %e, "clear ignored");
                }
            }

            SchedulerCmd::Shutdown => {}
        }
    }

    /// Lazily create the media output on this thread. Returns false if it
    /// could not be opened.
    fn ensure_output(&mut self) -> bool {
        if self.output.is_some() {
            return true;
        }
        match (self.make_output)() {
            Ok(output) => {
                self.output = Some(output);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "audio output unavailable");
                (self.on_event)(SchedulerEvent::PlayError(e.to_string()));
                false
            }
        }
    }

    /// Probe unknown durations off-thread; results come back through a channel.
    fn spawn_resolver(&mut self) {
        let pending = self.project.segments.unresolved();
        if pending.is_empty() || self.resolving.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel();
        let resolver = self.resolver.clone();
        let probed = pending.clone();
        let spawned = std::thread::Builder::new()
            .name("duration-resolver".into())
            .spawn(move || {
                let _ = tx.send(resolver.resolve_all(&probed));
            });
        match spawned {
            Ok(_) => self.resolving = Some(Resolving { rx, pending }),
            Err(e) => tracing::warn!(error = %e, "could not spawn duration resolver"),
        }
    }

    fn merge_resolved(&mut self) {
        let Some(resolving) = &self.resolving else {
            return;
        };
        let table = match resolving.rx.try_recv() {
            Ok(table) => table,
            Err(mpsc::TryRecvError::Empty) => return,
            Err(mpsc::TryRecvError::Disconnected) => BTreeMap::new(),
        };
        let Some(Resolving { pending, .. }) = self.resolving.take() else {
            return;
        };
        for (index, handle) in pending {
            let Some(&duration) = table.get(&index) else {
                continue;
            };
            // Audio replaced while probing: the measurement belongs to the old clip.
            if self.project.segments.handle_for(index) == Some(&handle) {
                self.project.segments.record_duration(index, duration);
            }
        }
        if std::mem::take(&mut self.reprobe) {
            self.spawn_resolver();
        }
    }

    /// Deliver media completion and silence expiry to the sequencer.
    fn poll_waits(&mut self) {
        let now = Instant::now();
        let Some(output) = self.output.as_mut() else {
            return;
        };
        let fired = match self.sequencer.pending_wait() {
            Some(Wait::Segment(generation)) if output.is_finished() => {
                self.sequencer
                    .on_segment_finished(generation, &self.project, output, now)
            }
            Some(Wait::Silence {
                generation,
                deadline,
            }) if now >= deadline => {
                self.sequencer
                    .on_silence_elapsed(generation, &self.project, output, now)
            }
            _ => false,
        };
        if fired {
            self.after_transition();
        }
    }

    fn publish_tick(&mut self) {
        let now = Instant::now();
        if self.tracker.poll(now) {
            self.publish_progress(now);
        }
    }

    fn after_transition(&mut self) {
        let now = Instant::now();
        for event in self.sequencer.drain_events() {
            let failure = match &event {
                SequencerEvent::SegmentFailed { reason, .. } => Some(reason.clone()),
                _ => None,
            };
            (self.on_event)(SchedulerEvent::Transition(event));
            if let Some(reason) = failure {
                (self.on_event)(SchedulerEvent::PlayError(reason));
            }
        }
        self.tracker.sync(self.sequencer.is_playing(), now);
        self.publish_progress(now);
    }

    fn publish_progress(&mut self, now: Instant) {
        let snapshot = self.sequencer.snapshot(&self.project, now);
        self.tracker.record(snapshot);
        (self.on_event)(SchedulerEvent::Progress(snapshot));
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
