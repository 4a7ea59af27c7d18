//! Bridges `jazz_audio`'s `PlaybackBackend` + `Scheduler` to the
//! `PlaybackSink` capability `jazz_ai::GenerationLoop` actually needs,
//! keeping `jazz_ai` free of a dependency on `jazz_audio`.

use std::sync::{Arc, Mutex};

use jazz_audio::{Clock, PlaybackBackend};
use jazz_core::config::{Config, Instrument};
use jazz_core::tracker::TrackerStep;
use jazz_ai::PlaybackSink;

pub struct BackendAdapter {
    config: Arc<Config>,
    backend: Box<dyn PlaybackBackend>,
    scheduler: Arc<Mutex<jazz_audio::Scheduler>>,
    clock: Arc<dyn Clock>,
}

impl BackendAdapter {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        backend: Box<dyn PlaybackBackend>,
        scheduler: Arc<Mutex<jazz_audio::Scheduler>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { config, backend, scheduler, clock }
    }

    pub fn prepare(&mut self) -> Result<(), jazz_audio::PlaybackError> {
        let now = self.clock.now();
        let mut scheduler = self.scheduler.lock().unwrap();
        self.backend.prepare(&self.config, &mut scheduler, now)
    }

    #[must_use]
    pub fn lead_seconds(&self) -> f64 {
        self.backend.get_lead_seconds(self.clock.now())
    }

    #[must_use]
    pub fn section_duration(&self) -> f64 {
        self.backend.get_section_duration()
    }

    pub fn shutdown(&mut self) {
        let mut scheduler = self.scheduler.lock().unwrap();
        self.backend.shutdown(&mut scheduler);
    }
}

impl PlaybackSink for BackendAdapter {
    fn enqueue_step(
        &mut self,
        instrument: Instrument,
        step_index: u32,
        step: TrackerStep,
    ) -> Result<(), String> {
        let now = self.clock.now();
        let mut scheduler = self.scheduler.lock().unwrap();
        self.backend
            .enqueue_step(&self.config, instrument, step_index, step, &mut scheduler, now)
            .map_err(|e| e.to_string())
    }

    fn stop_all(&mut self) {
        let mut scheduler = self.scheduler.lock().unwrap();
        self.backend.stop_all(&mut scheduler);
    }
}

// `BackendAdapter` is auto-`Send`: `PlaybackBackend: Send`, `Scheduler`'s
// callbacks are `Send`, and `Clock: Send + Sync` — no unsafe impl needed.
