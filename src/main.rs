use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use story_flow::build::BuildPlan;
use story_flow::duration::{DurationProbe, DurationResolver, LoftyProbe};
use story_flow::player::Player;
use story_flow::project::{default_project_path, StoryProject};
use story_flow::runtime::{spawn_scheduler, SchedulerEvent};
use story_flow::segment::{MediaHandle, SegmentIndex};
use story_flow::sequencer::SequencerEvent;
use story_flow::timeline::Timeline;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "storyflow", about = "Multi-speaker story timeline player")]
struct Cli {
    /// Project file (defaults to the platform data directory)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show project status
    Status,
    /// Segment management
    Segment {
        #[command(subcommand)]
        action: SegmentCmd,
    },
    /// Silence between segments
    Pause {
        #[command(subcommand)]
        action: PauseCmd,
    },
    /// Print the build plan handed to the renderer, as JSON
    Plan,
    /// Play the timeline (p = pause, r = resume, s = stop)
    Play {
        /// Progress tick interval in milliseconds (overrides project settings)
        #[arg(long)]
        tick_ms: Option<u64>,
    },
}

#[derive(Subcommand)]
enum SegmentCmd {
    /// Attach an audio file to a script position
    Add { index: SegmentIndex, file: PathBuf },
    /// Drop the audio for a position but keep the position
    Clear { index: SegmentIndex },
    /// Remove a position entirely
    Remove { index: SegmentIndex },
    /// List segments, durations and pauses
    List,
}

#[derive(Subcommand)]
enum PauseCmd {
    /// Set the silence after a segment, in milliseconds
    Set { index: SegmentIndex, ms: u32 },
    /// Remove the silence after a segment
    Clear { index: SegmentIndex },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let path = cli.project.unwrap_or_else(default_project_path);
    let mut project = StoryProject::load_from(&path);

    match cli.command {
        Commands::Status => {
            println!("storyFlow v{}", env!("CARGO_PKG_VERSION"));
            println!("Project: {}", path.display());
            let unknown = project
                .ordered_segment_indices()
                .iter()
                .filter(|&&i| project.duration_of(i).is_none())
                .count();
            println!(
                "Segments: {} ({} playable, {} without duration) | Pauses: {} | Length: {:.1}s",
                project.segments.len(),
                project.ordered_segment_indices().len(),
                unknown,
                project.pauses.len(),
                project.total_duration().as_secs_f64()
            );
        }
        Commands::Segment { action } => match action {
            SegmentCmd::Add { index, file } => {
                if !file.exists() {
                    eprintln!("Error: file '{}' not found", file.display());
                    std::process::exit(1);
                }
                let file = file.canonicalize().unwrap_or(file);
                project.add_segment(index, file.clone());
                if let Some(d) = LoftyProbe.probe(&MediaHandle::new(&file)) {
                    project.segments.record_duration(index, d);
                }
                save(&project, &path);
                let seg_duration = project
                    .segments
                    .get(index)
                    .map(|s| s.duration_display())
                    .unwrap_or_default();
                println!("Segment {} -> {} ({})", index, file.display(), seg_duration);
            }
            SegmentCmd::Clear { index } => {
                if let Err(e) = project.segments.clear_handle(index) {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
                save(&project, &path);
                println!("Cleared audio for segment {}.", index);
            }
            SegmentCmd::Remove { index } => {
                if let Err(e) = project.segments.remove(index) {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
                project.pauses.clear(index);
                save(&project, &path);
                println!("Removed segment {}.", index);
            }
            SegmentCmd::List => {
                if project.segments.is_empty() {
                    println!("No segments.");
                }
                for seg in project.segments.iter() {
                    let file = seg
                        .handle
                        .as_ref()
                        .map(|h| h.path().display().to_string())
                        .unwrap_or_else(|| "(no audio)".to_string());
                    let pause = project.pauses.pause_ms(seg.index);
                    if pause > 0 {
                        println!(
                            "{:>4}  {:>7}  {}  (+{}ms)",
                            seg.index,
                            seg.duration_display(),
                            file,
                            pause
                        );
                    } else {
                        println!("{:>4}  {:>7}  {}", seg.index, seg.duration_display(), file);
                    }
                }
            }
        },
        Commands::Pause { action } => match action {
            PauseCmd::Set { index, ms } => {
                if project.segments.get(index).is_none() {
                    eprintln!("Error: segment {} not found", index);
                    std::process::exit(1);
                }
                project.pauses.set(index, ms);
                save(&project, &path);
                println!("Pause after segment {} set to {}ms.", index, ms);
            }
            PauseCmd::Clear { index } => {
                project.pauses.clear(index);
                save(&project, &path);
                println!("Pause after segment {} cleared.", index);
            }
        },
        Commands::Plan => match BuildPlan::from_timeline(&project).to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Play { tick_ms } => {
            if project.ordered_segment_indices().is_empty() {
                eprintln!("Error: project has no playable segments.");
                std::process::exit(1);
            }
            if let Some(ms) = tick_ms {
                project.settings.tick_interval_ms = ms;
            }
            play(project);
        }
    }
}

fn save(project: &StoryProject, path: &Path) {
    if let Err(e) = project.save_to(path) {
        eprintln!("Error: failed to save project: {}", e);
        std::process::exit(1);
    }
}

/// Run the timeline until it finishes or the user stops it.
fn play(project: StoryProject) {
    let settings = project.settings;
    let resolver = DurationResolver::new(
        LoftyProbe,
        settings.resolve_interval(),
        settings.resolve_attempts,
    );
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let started = AtomicBool::new(false);

    let handle = spawn_scheduler(project, Player::new, resolver, move |event| match event {
        SchedulerEvent::Progress(p) => {
            let position = match (p.current_index, p.is_in_pause) {
                (Some(i), true) => format!("after segment {} (silence)", i),
                (Some(i), false) => format!("segment {}", i),
                (None, _) => "-".to_string(),
            };
            let state = if p.is_playing { "playing" } else { "paused" };
            println!("[{:>5.1}%] {} | {}", p.percent, state, position);
        }
        SchedulerEvent::Transition(SequencerEvent::Completed) => {
            println!("Timeline finished.");
            let _ = done_tx.send(());
        }
        SchedulerEvent::Transition(SequencerEvent::Stopped) => {
            println!("Stopped.");
            let _ = done_tx.send(());
        }
        SchedulerEvent::Transition(_) => started.store(true, Ordering::Relaxed),
        SchedulerEvent::PlayError(e) => {
            eprintln!("  Error: {}", e);
            // Nothing ever started playing, e.g. no audio device.
            if !started.load(Ordering::Relaxed) {
                let _ = done_tx.send(());
            }
        }
    });

    let input = handle.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let sent = match line.trim() {
                "p" | "pause" => input.pause(),
                "r" | "resume" => input.start(),
                "s" | "stop" | "q" => input.stop(),
                "" => continue,
                other => {
                    eprintln!("Unknown command '{}' (p = pause, r = resume, s = stop)", other);
                    continue;
                }
            };
            if sent.is_err() {
                break;
            }
        }
    });

    if let Err(e) = handle.start() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    let _ = done_rx.recv();
    handle.shutdown();
    std::thread::sleep(Duration::from_millis(50));
}
