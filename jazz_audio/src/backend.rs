//! Playback backends: a capability set (`PlaybackBackend`), not a class
//! hierarchy — both sinks plug the same dispatch logic via the `Sink` trait,
//! mirroring the teacher's `AudioRenderer` seam in
//! `harmonium_audio::backend`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use jazz_core::config::{Config, Instrument};
use jazz_core::tracker::TrackerStep;

use crate::scheduler::{Handle, Scheduler};
use crate::section::SectionCoordinator;

/// Lead time added on top of the sink-specific buffer lead before the first
/// note of a fresh session, giving the sink time to spin up.
const INITIAL_LOOKAHEAD: f64 = 0.1;

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("no playback sink is available")]
    PlaybackUnavailable,
    #[error("playback backend degraded: {0}")]
    BackendDegraded(String),
}

/// Minimal channel-level surface both sinks expose. `ready` lets `prepare`
/// fail over to the other sink instead of panicking into a dead device.
pub trait Sink: Send {
    fn ready(&self) -> bool;
    fn note_on(&mut self, channel: u8, pitch: u8, velocity: u8);
    fn note_off(&mut self, channel: u8, pitch: u8);
    fn program_change(&mut self, channel: u8, program: u8);
    fn control_change(&mut self, channel: u8, controller: u8, value: u8);
}

pub enum BufferLead {
    SectionMultiple(f64),
    FixedSeconds(f64),
}

struct ScheduledNote {
    pitch: u8,
    end_time: f64,
    off_handle: Handle,
}

/// Shared implementation of the §4.5/§4.6 dispatch rules, generic over the
/// sink so the soundfont and external-MIDI backends differ only in how a
/// note-on/off actually reaches hardware.
pub struct GenericBackend<S: Sink> {
    sink: Arc<Mutex<S>>,
    buffer_lead: BufferLead,
    coordinator: Option<SectionCoordinator>,
    voices: HashMap<Instrument, Vec<ScheduledNote>>,
    /// Set by `prepare`; lets `stop_all`/`shutdown` reach every instrument's
    /// actual channel rather than assuming the default map.
    config: Option<Config>,
}

impl<S: Sink + 'static> GenericBackend<S> {
    pub fn new(sink: S, buffer_lead: BufferLead) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            buffer_lead,
            coordinator: None,
            voices: HashMap::new(),
            config: None,
        }
    }

    fn schedule_on(&self, scheduler: &mut Scheduler, at: f64, priority: i32, channel: u8, pitch: u8, velocity: u8) -> Handle {
        let sink = self.sink.clone();
        scheduler.schedule(at, priority, move || sink.lock().unwrap().note_on(channel, pitch, velocity))
    }

    fn schedule_off(&self, scheduler: &mut Scheduler, at: f64, priority: i32, channel: u8, pitch: u8) -> Handle {
        let sink = self.sink.clone();
        scheduler.schedule(at, priority, move || sink.lock().unwrap().note_off(channel, pitch))
    }

    pub fn prepare(
        &mut self,
        config: &Config,
        scheduler: &mut Scheduler,
        now: f64,
    ) -> Result<(), PlaybackError> {
        if !self.sink.lock().unwrap().ready() {
            return Err(PlaybackError::PlaybackUnavailable);
        }
        scheduler.clear();
        self.voices.clear();
        let coordinator = SectionCoordinator::new(config);
        let section_duration = coordinator.section_duration();
        let lead = match self.buffer_lead {
            BufferLead::SectionMultiple(factor) => factor * section_duration,
            BufferLead::FixedSeconds(seconds) => seconds,
        };
        let start_time = now + lead + INITIAL_LOOKAHEAD;

        {
            let mut sink = self.sink.lock().unwrap();
            for instrument in Instrument::ALL {
                if instrument == Instrument::Drums {
                    continue;
                }
                sink.program_change(config.channel_for(instrument), config.program_for(instrument));
            }
        }

        let mut coordinator = coordinator;
        coordinator.reset(start_time);
        self.coordinator = Some(coordinator);
        self.config = Some(config.clone());
        Ok(())
    }

    #[must_use]
    pub fn get_section_duration(&self) -> f64 {
        self.coordinator.as_ref().map_or(0.0, SectionCoordinator::section_duration)
    }

    #[must_use]
    pub fn get_lead_seconds(&self, now: f64) -> f64 {
        self.coordinator.as_ref().map_or(0.0, |c| c.lead_seconds(now))
    }

    pub fn enqueue_step(
        &mut self,
        config: &Config,
        instrument: Instrument,
        step_index: u32,
        step: TrackerStep,
        scheduler: &mut Scheduler,
        now: f64,
    ) -> Result<(), PlaybackError> {
        let (target_time, step_duration, steps) = {
            let coordinator = self
                .coordinator
                .as_mut()
                .ok_or_else(|| PlaybackError::BackendDegraded("prepare was never called".into()))?;
            let Some(combined) = coordinator.on_step(instrument, step_index, step, now) else {
                return Ok(());
            };
            let step_duration = coordinator.step_duration(combined.step_index).max(0.05);
            (combined.target_time, step_duration, combined.steps)
        };
        self.dispatch_combined(config, target_time, step_duration, steps, scheduler);
        Ok(())
    }

    fn dispatch_combined(
        &mut self,
        config: &Config,
        start: f64,
        step_duration: f64,
        steps: HashMap<Instrument, TrackerStep>,
        scheduler: &mut Scheduler,
    ) {
        for (instrument, step) in steps {
            let channel = config.channel_for(instrument);
            if instrument == Instrument::Drums {
                if let TrackerStep::Notes(notes) = step {
                    for note in notes {
                        let velocity = note.velocity.max(1);
                        self.schedule_on(scheduler, start, 1, channel, note.pitch, velocity);
                        self.schedule_off(scheduler, start + 0.120, 1, channel, note.pitch);
                    }
                }
                continue;
            }

            match step {
                TrackerStep::Rest => self.release_voices_now(instrument, channel, start, scheduler),
                TrackerStep::Tie => {
                    self.extend_voices(instrument, channel, start, step_duration, scheduler)
                }
                TrackerStep::Notes(notes) => {
                    self.release_voices_now(instrument, channel, start, scheduler);
                    for note in notes {
                        let velocity = note.velocity.max(1);
                        self.schedule_on(scheduler, start, 1, channel, note.pitch, velocity);
                        let off_handle =
                            self.schedule_off(scheduler, start + step_duration, 1, channel, note.pitch);
                        self.voices.entry(instrument).or_default().push(ScheduledNote {
                            pitch: note.pitch,
                            end_time: start + step_duration,
                            off_handle,
                        });
                    }
                }
            }
        }
    }

    fn release_voices_now(
        &mut self,
        instrument: Instrument,
        channel: u8,
        at: f64,
        scheduler: &mut Scheduler,
    ) {
        let Some(voices) = self.voices.get_mut(&instrument) else { return };
        let drained: Vec<u8> = voices.drain(..).map(|v| { v.off_handle.cancel(); v.pitch }).collect();
        for pitch in drained {
            self.schedule_off(scheduler, at, -1, channel, pitch);
        }
    }

    fn extend_voices(
        &mut self,
        instrument: Instrument,
        channel: u8,
        start: f64,
        step_duration: f64,
        scheduler: &mut Scheduler,
    ) {
        let new_end = start + step_duration;
        let pitches: Vec<u8> = match self.voices.get(&instrument) {
            Some(voices) => voices.iter().filter(|v| v.end_time >= start).map(|v| v.pitch).collect(),
            None => return,
        };
        if let Some(voices) = self.voices.get_mut(&instrument) {
            for voice in voices.iter_mut().filter(|v| pitches.contains(&v.pitch)) {
                voice.off_handle.cancel();
                voice.end_time = new_end;
            }
        }
        for pitch in pitches {
            let off_handle = self.schedule_off(scheduler, new_end, 1, channel, pitch);
            if let Some(voices) = self.voices.get_mut(&instrument) {
                if let Some(voice) = voices.iter_mut().find(|v| v.pitch == pitch) {
                    voice.off_handle = off_handle;
                }
            }
        }
    }

    pub fn stop_all(&mut self, scheduler: &mut Scheduler) {
        scheduler.clear();
        self.voices.clear();
        let config = self.config.clone();
        let mut sink = self.sink.lock().unwrap();
        for instrument in Instrument::ALL {
            let channel = config.as_ref().map_or_else(
                || if instrument == Instrument::Drums { 9 } else { 0 },
                |c| c.channel_for(instrument),
            );
            sink.control_change(channel, 120, 0);
            sink.control_change(channel, 123, 0);
        }
    }

    pub fn shutdown(&mut self, scheduler: &mut Scheduler) {
        self.stop_all(scheduler);
    }
}

/// Capability set exposed by both sinks, used by the CLI/generation loop as
/// `Box<dyn PlaybackBackend>` so the two sinks are interchangeable at
/// runtime.
pub trait PlaybackBackend: Send {
    fn prepare(&mut self, config: &Config, scheduler: &mut Scheduler, now: f64) -> Result<(), PlaybackError>;
    fn enqueue_step(
        &mut self,
        config: &Config,
        instrument: Instrument,
        step_index: u32,
        step: TrackerStep,
        scheduler: &mut Scheduler,
        now: f64,
    ) -> Result<(), PlaybackError>;
    fn stop_all(&mut self, scheduler: &mut Scheduler);
    fn shutdown(&mut self, scheduler: &mut Scheduler);
    fn get_lead_seconds(&self, now: f64) -> f64;
    fn get_section_duration(&self) -> f64;
}

impl<S: Sink + 'static> PlaybackBackend for GenericBackend<S> {
    fn prepare(&mut self, config: &Config, scheduler: &mut Scheduler, now: f64) -> Result<(), PlaybackError> {
        GenericBackend::prepare(self, config, scheduler, now)
    }

    fn enqueue_step(
        &mut self,
        config: &Config,
        instrument: Instrument,
        step_index: u32,
        step: TrackerStep,
        scheduler: &mut Scheduler,
        now: f64,
    ) -> Result<(), PlaybackError> {
        GenericBackend::enqueue_step(self, config, instrument, step_index, step, scheduler, now)
    }

    fn stop_all(&mut self, scheduler: &mut Scheduler) {
        GenericBackend::stop_all(self, scheduler);
    }

    fn shutdown(&mut self, scheduler: &mut Scheduler) {
        GenericBackend::shutdown(self, scheduler);
    }

    fn get_lead_seconds(&self, now: f64) -> f64 {
        GenericBackend::get_lead_seconds(self, now)
    }

    fn get_section_duration(&self) -> f64 {
        GenericBackend::get_section_duration(self)
    }
}

/// Tries `primary`, falling back to `secondary` if `prepare` reports the
/// sink unavailable. Fails with `PlaybackUnavailable` only if both do.
pub fn prepare_with_fallback(
    primary: &mut dyn PlaybackBackend,
    secondary: &mut dyn PlaybackBackend,
    config: &Config,
    scheduler: &mut Scheduler,
    now: f64,
) -> Result<bool, PlaybackError> {
    match primary.prepare(config, scheduler, now) {
        Ok(()) => Ok(true),
        Err(_) => {
            secondary.prepare(config, scheduler, now)?;
            Ok(false)
        }
    }
}
