//! Headless integration tests for storyFlow.
//!
//! The sequencer is driven on a simulated clock so whole stories can be played
//! in microseconds with exact timing. One runtime test at the end uses the
//! real scheduler thread with a wall-clock fake output.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use story_flow::duration::{DurationResolver, LoftyProbe};
use story_flow::player::MediaOutput;
use story_flow::project::StoryProject;
use story_flow::runtime::{spawn_scheduler, SchedulerEvent};
use story_flow::segment::{MediaHandle, SegmentIndex};
use story_flow::sequencer::{PlaybackState, Sequencer, SequencerEvent, Wait};
use story_flow::Result;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn story(clips: &[(SegmentIndex, u64)], pauses: &[(SegmentIndex, u32)]) -> StoryProject {
    let mut project = StoryProject::new("headless");
    for &(index, len) in clips {
        project.add_segment(index, format!("seg{}.mp3", index));
        project.segments.record_duration(index, ms(len));
    }
    for &(index, pause) in pauses {
        project.pauses.set(index, pause);
    }
    project
}

// ── Simulated clock driver ────────────────────────────────────────────────

/// Output whose clips end exactly when the simulated clock says so.
struct SimMedia {
    clock: Rc<Cell<Duration>>,
    lengths: HashMap<PathBuf, Duration>,
    ends_at: Option<Duration>,
    /// (clip, clock time it started, offset it started at)
    started: Vec<(PathBuf, Duration, Duration)>,
}

impl MediaOutput for SimMedia {
    fn play(&mut self, handle: &MediaHandle, offset: Duration) -> Result<()> {
        let len = self.lengths.get(handle.path()).copied().unwrap_or_default();
        let now = self.clock.get();
        self.ends_at = Some(now + len.saturating_sub(offset));
        self.started.push((handle.path().to_path_buf(), now, offset));
        Ok(())
    }

    fn stop(&mut self) {
        self.ends_at = None;
    }

    fn is_finished(&self) -> bool {
        self.ends_at.is_some_and(|end| self.clock.get() >= end)
    }

    fn preview(&mut self, _handle: &MediaHandle, _offset: Duration) -> Result<()> {
        Ok(())
    }

    fn stop_preview(&mut self) {}
}

struct Sim {
    project: StoryProject,
    seq: Sequencer,
    media: SimMedia,
    clock: Rc<Cell<Duration>>,
    base: Instant,
}

impl Sim {
    fn new(project: StoryProject) -> Self {
        let clock = Rc::new(Cell::new(Duration::ZERO));
        let lengths = project
            .segments
            .iter()
            .filter_map(|s| Some((s.handle.as_ref()?.path().to_path_buf(), s.duration()?)))
            .collect();
        Sim {
            project,
            seq: Sequencer::new(),
            media: SimMedia {
                clock: clock.clone(),
                lengths,
                ends_at: None,
                started: Vec::new(),
            },
            clock,
            base: Instant::now(),
        }
    }

    fn now(&self) -> Instant {
        self.base + self.clock.get()
    }

    fn elapsed(&self) -> Duration {
        self.clock.get()
    }

    fn start(&mut self) {
        let now = self.now();
        self.seq.start(&self.project, &mut self.media, now);
    }

    fn pause(&mut self) {
        let now = self.now();
        self.seq
            .pause(&self.project, &mut self.media, now)
            .expect("pause while playing");
    }

    fn percent(&self) -> f64 {
        self.seq.snapshot(&self.project, self.now()).percent
    }

    /// Clock time of the next notification the sequencer is waiting on.
    fn next_due(&self) -> Option<Duration> {
        match self.seq.pending_wait()? {
            Wait::Segment(_) => self.media.ends_at,
            Wait::Silence { deadline, .. } => Some(deadline.saturating_duration_since(self.base)),
        }
    }

    fn fire(&mut self) {
        let now = self.now();
        match self.seq.pending_wait() {
            Some(Wait::Segment(generation)) => {
                assert!(self.media.is_finished());
                self.seq
                    .on_segment_finished(generation, &self.project, &mut self.media, now);
            }
            Some(Wait::Silence { generation, .. }) => {
                self.seq
                    .on_silence_elapsed(generation, &self.project, &mut self.media, now);
            }
            None => {}
        }
    }

    /// Move the clock forward, delivering every notification that falls due.
    fn advance(&mut self, by: Duration) {
        let target = self.clock.get() + by;
        while let Some(due) = self.next_due() {
            if due > target {
                break;
            }
            self.clock.set(due.max(self.clock.get()));
            self.fire();
        }
        self.clock.set(target);
    }

    /// Play until nothing is pending; returns the clock time at the end.
    fn run_to_end(&mut self) -> Duration {
        while let Some(due) = self.next_due() {
            self.clock.set(due.max(self.clock.get()));
            self.fire();
        }
        self.clock.get()
    }

    fn start_time_of(&self, index: SegmentIndex) -> Option<Duration> {
        let path = PathBuf::from(format!("seg{}.mp3", index));
        self.media
            .started
            .iter()
            .rev()
            .find(|(p, _, _)| *p == path)
            .map(|&(_, at, _)| at)
    }
}

// ── Timing ────────────────────────────────────────────────────────────────

#[test]
fn completes_after_durations_plus_pauses() {
    let project = story(
        &[(0, 3000), (1, 2000), (2, 1000)],
        &[(0, 500), (1, 250), (2, 900)],
    );
    let mut sim = Sim::new(project);
    sim.start();

    let end = sim.run_to_end();

    // The 900ms after the last segment is never served.
    assert_eq!(end, ms(6750));
    assert_eq!(sim.seq.playback_state(), PlaybackState::Idle);
    assert_eq!(sim.percent(), 100.0);
    assert_eq!(sim.seq.drain_events().last(), Some(&SequencerEvent::Completed));
}

#[test]
fn zero_pause_segments_are_contiguous() {
    let mut sim = Sim::new(story(&[(0, 1200), (1, 800), (2, 500)], &[(1, 300)]));
    sim.start();
    sim.run_to_end();

    assert_eq!(sim.start_time_of(0), Some(Duration::ZERO));
    assert_eq!(sim.start_time_of(1), Some(ms(1200)));
    assert_eq!(sim.start_time_of(2), Some(ms(2300)));
}

#[test]
fn gaps_in_script_order_are_skipped() {
    let mut project = story(&[(0, 1000), (4, 1000), (9, 1000)], &[(0, 200)]);
    project.segments.set_handle(2, MediaHandle::new("unused.mp3"));
    project.segments.clear_handle(2).unwrap();
    let mut sim = Sim::new(project);
    sim.start();
    let end = sim.run_to_end();

    let order: Vec<PathBuf> = sim.media.started.iter().map(|(p, _, _)| p.clone()).collect();
    assert_eq!(
        order,
        vec![
            PathBuf::from("seg0.mp3"),
            PathBuf::from("seg4.mp3"),
            PathBuf::from("seg9.mp3")
        ]
    );
    assert_eq!(end, ms(3200));
}

// ── Progress ──────────────────────────────────────────────────────────────

#[test]
fn progress_at_start_of_second_segment() {
    // [A:3s, B:2s] with 500ms after A: 3.5 / 5.5 of the way through.
    let mut sim = Sim::new(story(&[(0, 3000), (1, 2000)], &[(0, 500)]));
    sim.start();
    sim.advance(ms(3500));

    let snap = sim.seq.snapshot(&sim.project, sim.now());
    assert_eq!(snap.current_index, Some(1));
    assert!(!snap.is_in_pause);
    assert!((snap.percent - 63.636).abs() < 0.01, "got {}", snap.percent);
}

#[test]
fn progress_never_goes_backwards() {
    let mut sim = Sim::new(story(
        &[(0, 900), (1, 1300), (2, 700)],
        &[(0, 400), (1, 600)],
    ));
    sim.start();

    let mut last = 0.0;
    let mut ticks = 0;
    while sim.seq.playback_state() != PlaybackState::Idle {
        sim.advance(ms(100));
        ticks += 1;
        if ticks == 12 {
            sim.pause();
            sim.advance(ms(2000));
            assert!(sim.percent() >= last);
            sim.start();
        }
        let p = sim.percent();
        assert!((0.0..=100.0).contains(&p));
        assert!(p >= last, "percent dropped from {} to {} at tick {}", last, p, ticks);
        last = p;
        assert!(ticks < 200, "story never finished");
    }
    assert_eq!(last, 100.0);
}

#[test]
fn paused_progress_is_frozen() {
    let mut sim = Sim::new(story(&[(0, 2000), (1, 2000)], &[]));
    sim.start();
    sim.advance(ms(1000));
    sim.pause();
    let frozen = sim.seq.snapshot(&sim.project, sim.now());
    sim.advance(ms(5000));
    let later = sim.seq.snapshot(&sim.project, sim.now());

    assert_eq!(frozen, later);
    assert!(!later.is_playing);
    assert_eq!(later.percent, 25.0);
}

// ── Pause / resume ────────────────────────────────────────────────────────

#[test]
fn pause_and_resume_only_shifts_completion_by_paused_time() {
    let project = story(&[(0, 3000), (1, 2000)], &[(0, 500)]);

    let mut straight = Sim::new(project.clone());
    straight.start();
    let uninterrupted = straight.run_to_end();

    let mut interrupted = Sim::new(project);
    interrupted.start();
    interrupted.advance(ms(1200));
    interrupted.pause();
    interrupted.advance(ms(10_000));
    interrupted.start();
    let end = interrupted.run_to_end();

    assert_eq!(uninterrupted, ms(5500));
    assert_eq!(end, uninterrupted + ms(10_000));
    let resumed = interrupted.media.started.last().unwrap();
    assert_eq!(resumed.2, Duration::ZERO, "last start is segment 1 from the top");
    assert!(
        interrupted
            .media
            .started
            .iter()
            .any(|(p, _, offset)| p == &PathBuf::from("seg0.mp3") && *offset == ms(1200))
    );
}

#[test]
fn pause_inside_silence_waits_only_the_remainder() {
    // 1000ms silence, paused 400ms into it: 600ms remain after resume.
    let mut sim = Sim::new(story(&[(0, 1000), (1, 1000)], &[(0, 1000)]));
    sim.start();
    sim.advance(ms(1400));
    assert!(sim.seq.is_in_pause());
    sim.pause();

    let resume = sim.seq.resume_state().unwrap();
    assert!(resume.was_in_pause);
    assert_eq!(resume.offset, ms(400));

    sim.advance(ms(3600));
    sim.start();
    sim.run_to_end();

    assert_eq!(sim.start_time_of(1), Some(ms(5600)));
    assert_eq!(sim.elapsed(), ms(6600));
}

#[test]
fn repeated_pauses_accumulate_offset() {
    let mut sim = Sim::new(story(&[(0, 4000)], &[]));
    sim.start();
    sim.advance(ms(1000));
    sim.pause();
    sim.advance(ms(300));
    sim.start();
    sim.advance(ms(1500));
    sim.pause();

    assert_eq!(sim.seq.resume_state().unwrap().offset, ms(2500));
    sim.start();
    assert_eq!(sim.run_to_end(), ms(4300));
}

#[test]
fn stale_completion_from_before_pause_is_ignored() {
    let mut sim = Sim::new(story(&[(0, 3000), (1, 2000)], &[]));
    sim.start();
    let old = sim.seq.generation();
    sim.advance(ms(500));
    sim.pause();
    sim.start();

    let now = sim.now();
    let accepted = sim
        .seq
        .on_segment_finished(old, &sim.project, &mut sim.media, now);
    assert!(!accepted);
    assert_eq!(sim.seq.current_index(), Some(0));
    assert!(!sim.seq.is_in_pause());
}

#[test]
fn stop_then_start_plays_from_the_top() {
    let mut sim = Sim::new(story(&[(0, 1000), (1, 1000)], &[(0, 250)]));
    sim.start();
    sim.advance(ms(1100));
    sim.pause();
    let now = sim.now();
    sim.seq.stop(&mut sim.media);
    assert!(sim.seq.resume_state().is_none());
    assert_eq!(sim.seq.snapshot(&sim.project, now).percent, 0.0);

    sim.start();
    let (first, _, offset) = sim.media.started.last().unwrap().clone();
    assert_eq!(first, PathBuf::from("seg0.mp3"));
    assert_eq!(offset, Duration::ZERO);
}

// ── Runtime thread ────────────────────────────────────────────────────────

/// Fake output that "plays" each clip for a fixed wall-clock time.
struct TimedOutput {
    clip: Duration,
    ends_at: Option<Instant>,
}

impl MediaOutput for TimedOutput {
    fn play(&mut self, _handle: &MediaHandle, offset: Duration) -> Result<()> {
        self.ends_at = Some(Instant::now() + self.clip.saturating_sub(offset));
        Ok(())
    }

    fn stop(&mut self) {
        self.ends_at = None;
    }

    fn is_finished(&self) -> bool {
        self.ends_at.is_some_and(|end| Instant::now() >= end)
    }

    fn preview(&mut self, _handle: &MediaHandle, _offset: Duration) -> Result<()> {
        Ok(())
    }

    fn stop_preview(&mut self) {}
}

#[test]
fn runtime_plays_story_to_completion() {
    let mut project = story(&[(0, 150), (1, 150)], &[(0, 100)]);
    project.settings.tick_interval_ms = 20;
    project.settings.media_poll_ms = 5;

    let events: Arc<Mutex<Vec<SchedulerEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let handle = spawn_scheduler(
        project,
        || {
            Ok(TimedOutput {
                clip: ms(150),
                ends_at: None,
            })
        },
        DurationResolver::new(LoftyProbe, Duration::ZERO, 1),
        move |evt| sink.lock().unwrap().push(evt),
    );
    handle.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let done = {
            let evts = events.lock().unwrap();
            let completed = evts
                .iter()
                .any(|e| *e == SchedulerEvent::Transition(SequencerEvent::Completed));
            // The final progress report follows the transition.
            completed
                && matches!(evts.last(), Some(SchedulerEvent::Progress(p)) if p.percent == 100.0)
        };
        if done {
            break;
        }
        assert!(Instant::now() < deadline, "story did not complete in time");
        std::thread::sleep(ms(20));
    }
    handle.shutdown();

    let evts = events.lock().unwrap();
    let transitions: Vec<&SequencerEvent> = evts
        .iter()
        .filter_map(|e| match e {
            SchedulerEvent::Transition(t) => Some(t),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            &SequencerEvent::SegmentStarted {
                index: 0,
                offset: Duration::ZERO
            },
            &SequencerEvent::SilenceStarted {
                index: 0,
                remaining: ms(100)
            },
            &SequencerEvent::SegmentStarted {
                index: 1,
                offset: Duration::ZERO
            },
            &SequencerEvent::Completed,
        ]
    );

    let percents: Vec<f64> = evts
        .iter()
        .filter_map(|e| match e {
            SchedulerEvent::Progress(p) => Some(p.percent),
            _ => None,
        })
        .collect();
    assert!(percents.windows(2).all(|w| w[1] >= w[0]), "{:?}", percents);
    assert_eq!(percents.last(), Some(&100.0));
    assert!(
        !evts
            .iter()
            .any(|e| matches!(e, SchedulerEvent::PlayError(_)))
    );
}
