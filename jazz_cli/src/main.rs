//! Infinite Jazz CLI: argument parsing, session-settings persistence,
//! logging, and the REPL control surface wiring `jazz_core`/`jazz_audio`/
//! `jazz_ai` together into a runnable program.
//!
//! Grounded in `harmonium_cli`'s dependency choices (`clap`, `rustyline`,
//! `colored`, `anyhow`, `dirs`, `toml`) even though that crate's own
//! `src/` was never filled in by the teacher — the `Cargo.toml` is the
//! grounding source here, not a sibling source file.

mod adapter;
mod settings;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use jazz_ai::{GenerationLoop, LlmClient};
use jazz_audio::{Clock, PlaybackBackend, Scheduler, SystemClock};
use jazz_core::config::{Config, ConfigBuilder, Instrument, TimeSignature};
use jazz_core::log;
use jazz_core::smf;
use jazz_core::tracker::ParsedTrack;

use adapter::BackendAdapter;
use settings::{BackendKind, Settings};

#[derive(Parser, Debug)]
#[command(name = "jazz_cli", about = "Infinite Jazz — a continuously improvised LLM-driven quartet")]
struct Args {
    /// OpenAI-compatible chat-completions base URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Model name sent in the chat-completion request.
    #[arg(long)]
    model: Option<String>,

    /// Bearer token for the LLM endpoint.
    #[arg(long)]
    api_key: Option<String>,

    /// Tempo in BPM.
    #[arg(long)]
    tempo: Option<f64>,

    /// Bars per generation (one LLM call's worth of tracker lines).
    #[arg(long)]
    bars: Option<u32>,

    /// Swing ratio in [0.5, 1).
    #[arg(long)]
    swing_ratio: Option<f64>,

    /// Disable swing (even eighth/sixteenth placement).
    #[arg(long)]
    no_swing: bool,

    /// Preferred playback backend.
    #[arg(long, value_enum)]
    backend: Option<CliBackend>,

    /// Steering text appended to every prompt.
    #[arg(long)]
    direction: Option<String>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliBackend {
    Soundfont,
    Midi,
}

impl From<CliBackend> for BackendKind {
    fn from(value: CliBackend) -> Self {
        match value {
            CliBackend::Soundfont => BackendKind::Soundfont,
            CliBackend::Midi => BackendKind::Midi,
        }
    }
}

fn apply_args(mut settings: Settings, args: &Args) -> Settings {
    if let Some(base_url) = &args.base_url {
        settings.base_url = base_url.clone();
    }
    if let Some(model) = &args.model {
        settings.model = model.clone();
    }
    if args.api_key.is_some() {
        settings.api_key = args.api_key.clone();
    }
    if let Some(tempo) = args.tempo {
        settings.tempo = tempo;
    }
    if let Some(bars) = args.bars {
        settings.bars_per_generation = bars;
    }
    if let Some(ratio) = args.swing_ratio {
        settings.swing_ratio = ratio;
    }
    if args.no_swing {
        settings.swing_enabled = false;
    }
    if let Some(backend) = args.backend {
        settings.backend = backend.into();
    }
    if let Some(direction) = &args.direction {
        settings.direction = direction.clone();
    }
    settings
}

fn config_from_settings(settings: &Settings) -> Config {
    let mut builder = ConfigBuilder::default();
    builder.tempo = settings.tempo;
    builder.swing_enabled = settings.swing_enabled;
    builder.swing_ratio = settings.swing_ratio;
    builder.bars_per_generation = settings.bars_per_generation;
    builder.time_signature = TimeSignature::default();
    Config::new(builder)
}

/// Selects the active playback backend with fallback, per spec.md §4.6.
/// Returns the boxed backend, whether the preferred sink was used, and the
/// `cpal::Stream` to keep alive if the soundfont sink won (dropping it
/// stops audio output).
fn select_backend(
    preferred: BackendKind,
    config: &Config,
    scheduler: &mut Scheduler,
    now: f64,
) -> Result<(Box<dyn PlaybackBackend>, bool, Option<cpal::Stream>)> {
    let (sf_sink, sf_stream) = jazz_audio::soundfont_backend(None);
    let midi_sink = jazz_audio::midi_out_backend("infinite-jazz");

    let (mut primary, mut secondary): (Box<dyn PlaybackBackend>, Box<dyn PlaybackBackend>) =
        match preferred {
            BackendKind::Soundfont => (Box::new(sf_sink), Box::new(midi_sink)),
            BackendKind::Midi => (Box::new(midi_sink), Box::new(sf_sink)),
        };

    let primary_ok = jazz_audio::prepare_with_fallback(&mut *primary, &mut *secondary, config, scheduler, now)
        .context("no playback backend is available")?;

    let stream = if primary_ok == matches!(preferred, BackendKind::Soundfont) { sf_stream } else { None };
    let active = if primary_ok { primary } else { secondary };
    Ok((active, primary_ok, stream))
}

/// Continuously flushes the scheduler's due events. Sleeps outside the lock
/// so the generation task's `enqueue_step` calls are never blocked for the
/// whole wait (spec.md §4.4: single armed timer, idempotent rearm).
async fn pump_scheduler(scheduler: Arc<Mutex<Scheduler>>, running: Arc<std::sync::atomic::AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        let wait = scheduler.lock().unwrap().wait_duration();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        scheduler.lock().unwrap().flush();
    }
}

fn print_status(label: &str, detail: &str) {
    println!("{} {}", label.bold().cyan(), detail);
}

fn print_error(kind: &str, cause: &str) {
    println!("{} {}: {}", "ERROR".bold().red(), kind, cause);
}

struct Session {
    running: Arc<std::sync::atomic::AtomicBool>,
    archive: Arc<Mutex<String>>,
    handle: tokio::task::JoinHandle<()>,
    pump_handle: tokio::task::JoinHandle<()>,
    config: Arc<Config>,
    // Dropping this stops audio output; kept alive for the session's
    // lifetime even though nothing else reads from it.
    _stream: Option<cpal::Stream>,
}

fn start_session(settings: &Settings) -> Result<Session> {
    let config = Arc::new(config_from_settings(settings));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let mut scheduler = Scheduler::new(clock.clone());
    let now = clock.now();

    let (backend, used_preferred, stream) =
        select_backend(settings.backend, &config, &mut scheduler, now)?;
    if !used_preferred {
        print_status(
            "STATUS",
            &format!("preferred backend unavailable; degraded to fallback ({:?})", other_backend(settings.backend)),
        );
    }

    let scheduler = Arc::new(Mutex::new(scheduler));
    let adapter = BackendAdapter::new(config.clone(), backend, scheduler.clone(), clock);

    let mut client = LlmClient::new(settings.base_url.clone(), settings.model.clone());
    if let Some(key) = &settings.api_key {
        client = client.with_api_key(key.clone());
    }

    let mut generation = GenerationLoop::new(config.clone(), client, adapter, settings.prompt_template.clone());
    let running = generation.running_flag();
    let archive = generation.archive_handle();
    let direction = settings.direction.clone();

    let pump_handle = tokio::task::spawn_local(pump_scheduler(scheduler, running.clone()));
    let handle = tokio::task::spawn_local(async move {
        match generation.run(&direction).await {
            jazz_ai::GenerationOutcome::Aborted => log::info("generation stopped"),
            jazz_ai::GenerationOutcome::Failed(err) => print_error("TransportError", &err.to_string()),
        }
    });

    Ok(Session { running, archive, handle, pump_handle, config, _stream: stream })
}

fn other_backend(kind: BackendKind) -> BackendKind {
    match kind {
        BackendKind::Soundfont => BackendKind::Midi,
        BackendKind::Midi => BackendKind::Soundfont,
    }
}

fn export_archive(archive_text: &str, config: &Config, path: &str) -> Result<()> {
    let mut tracks: Vec<ParsedTrack> = Instrument::ALL
        .iter()
        .map(|&instrument| ParsedTrack { instrument, steps: Vec::new() })
        .collect();

    let mut parser = jazz_core::parser::StreamParser::new(config);
    parser.append_chunk(archive_text);
    parser.finalize();
    for event in parser.drain_events() {
        let track = tracks.iter_mut().find(|t| t.instrument == event.instrument).unwrap();
        track.steps.push(event.step);
    }

    let mut file = std::fs::File::create(path).with_context(|| format!("creating {path}"))?;
    smf::encode_to_writer(config, &tracks, &mut file).with_context(|| format!("writing {path}"))?;
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  start                  begin streaming generation + playback");
    println!("  stop                   stop playback and the active generation");
    println!("  tempo <bpm>            set tempo (applies to the next start)");
    println!("  bars <n>               set bars per generation");
    println!("  swing on|off           toggle swing");
    println!("  swing-ratio <r>        set swing ratio in [0.5, 1)");
    println!("  direction <text>       set the steering text appended to every prompt");
    println!("  backend soundfont|midi set the preferred playback backend");
    println!("  export <path.mid>      write the accumulated tracker archive as a Standard MIDI File");
    println!("  quit                   exit");
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = Settings::load().unwrap_or_default();
    settings = apply_args(settings, &args);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("building the cooperative runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async_main(settings))
}

/// Runs rustyline's blocking `readline` loop on its own OS thread and
/// forwards completed lines over a channel, so the async REPL loop never
/// blocks the pump/generation tasks sharing this cooperative runtime while
/// waiting on terminal input.
fn spawn_line_reader() -> tokio::sync::mpsc::UnboundedReceiver<String> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(err) => {
                print_error("ReadlineError", &err.to_string());
                return;
            }
        };
        loop {
            match editor.readline("jazz> ") {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    if tx.send(line).is_err() {
                        return;
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => return,
                Err(err) => {
                    print_error("ReadlineError", &err.to_string());
                    return;
                }
            }
        }
    });
    rx
}

async fn async_main(mut settings: Settings) -> Result<()> {
    log::info("Infinite Jazz");
    print_status("READY", "type 'help' for commands");

    let mut session: Option<Session> = None;
    let mut lines = spawn_line_reader();

    while let Some(line) = lines.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ' ');
        let command = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();

        match command {
            "start" => {
                if session.is_some() {
                    print_status("STATUS", "already running; 'stop' first");
                } else {
                    match start_session(&settings) {
                        Ok(s) => {
                            print_status("STATUS", "generation started");
                            session = Some(s);
                        }
                        Err(err) => print_error("PlaybackUnavailable", &err.to_string()),
                    }
                }
            }
            "stop" => {
                if let Some(s) = session.take() {
                    s.running.store(false, Ordering::SeqCst);
                    s.handle.abort();
                    s.pump_handle.abort();
                    print_status("STATUS", "stopped");
                } else {
                    print_status("STATUS", "nothing running");
                }
            }
            "tempo" => match rest.parse::<f64>() {
                Ok(bpm) if bpm > 0.0 => {
                    settings.tempo = bpm;
                    settings.save().ok();
                    print_status("STATUS", &format!("tempo set to {bpm} (applies on next start)"));
                }
                _ => print_error("InvalidArgument", "usage: tempo <positive bpm>"),
            },
            "bars" => match rest.parse::<u32>() {
                Ok(n) if n > 0 => {
                    settings.bars_per_generation = n;
                    settings.save().ok();
                    print_status("STATUS", &format!("bars per generation set to {n}"));
                }
                _ => print_error("InvalidArgument", "usage: bars <positive integer>"),
            },
            "swing" => match rest {
                "on" => {
                    settings.swing_enabled = true;
                    settings.save().ok();
                    print_status("STATUS", "swing enabled");
                }
                "off" => {
                    settings.swing_enabled = false;
                    settings.save().ok();
                    print_status("STATUS", "swing disabled");
                }
                _ => print_error("InvalidArgument", "usage: swing on|off"),
            },
            "swing-ratio" => match rest.parse::<f64>() {
                Ok(ratio) => {
                    settings.swing_ratio = ratio;
                    settings.save().ok();
                    print_status("STATUS", &format!("swing ratio set to {ratio} (clamped at next start)"));
                }
                Err(_) => print_error("InvalidArgument", "usage: swing-ratio <0.5..1.0>"),
            },
            "direction" => {
                settings.direction = rest.to_string();
                settings.save().ok();
                print_status("STATUS", "direction updated");
            }
            "backend" => match rest {
                "soundfont" => {
                    settings.backend = BackendKind::Soundfont;
                    settings.save().ok();
                    print_status("STATUS", "preferred backend set to soundfont");
                }
                "midi" => {
                    settings.backend = BackendKind::Midi;
                    settings.save().ok();
                    print_status("STATUS", "preferred backend set to midi");
                }
                _ => print_error("InvalidArgument", "usage: backend soundfont|midi"),
            },
            "export" => {
                if rest.is_empty() {
                    print_error("InvalidArgument", "usage: export <path.mid>");
                } else {
                    let config = session.as_ref().map_or_else(
                        || Arc::new(config_from_settings(&settings)),
                        |s| s.config.clone(),
                    );
                    let text = session
                        .as_ref()
                        .map(|s| s.archive.lock().unwrap().clone())
                        .unwrap_or_default();
                    match export_archive(&text, &config, rest) {
                        Ok(()) => print_status("STATUS", &format!("wrote {rest}")),
                        Err(err) => print_error("ExportFailed", &err.to_string()),
                    }
                }
            }
            "help" => print_help(),
            "quit" | "exit" => {
                if let Some(s) = session.take() {
                    s.running.store(false, Ordering::SeqCst);
                    s.handle.abort();
                    s.pump_handle.abort();
                }
                break;
            }
            other => print_error("UnknownCommand", other),
        }
    }

    Ok(())
}
