//! Section coordinator: synchronises four independently-streamed instrument
//! timelines into shared, monotonically increasing section start times, and
//! holds a step until all four instruments have reported it.

use std::collections::HashMap;

use jazz_core::config::{Config, Instrument};
use jazz_core::tracker::TrackerStep;

/// Minimum lead time a newly computed section start or step target must sit
/// ahead of `now` before it's considered schedulable.
pub const SECTION_LOOKAHEAD: f64 = 0.25;

/// A step that has now been reported by all four instruments and is ready
/// to hand to the scheduler.
pub struct CombinedStep {
    pub section: u32,
    pub step_index: u32,
    pub target_time: f64,
    pub steps: HashMap<Instrument, TrackerStep>,
}

/// Same swing law as [`jazz_core::smf::step_tick`], expressed in wall-clock
/// seconds rather than MIDI ticks: `base` is one sixteenth-note's nominal
/// duration (`quarter / 4`).
#[must_use]
pub fn step_offset_seconds(step_index: u32, base: f64, swing_enabled: bool, swing_ratio: f64) -> f64 {
    let pair_index = step_index / 2;
    let pair_start = f64::from(pair_index) * 2.0 * base;
    if step_index % 2 == 0 {
        pair_start
    } else if swing_enabled {
        pair_start + 2.0 * base * swing_ratio
    } else {
        pair_start + base
    }
}

pub struct SectionCoordinator {
    base: f64,
    swing_enabled: bool,
    swing_ratio: f64,
    total_steps: u32,
    section_duration: f64,
    last_step_index: HashMap<Instrument, i32>,
    section_index: HashMap<Instrument, u32>,
    section_start_times: HashMap<u32, f64>,
    max_section_start: f64,
    pending: HashMap<(u32, u32), HashMap<Instrument, TrackerStep>>,
}

impl SectionCoordinator {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let base = (60.0 / config.tempo) / 4.0;
        let section_duration = step_offset_seconds(
            config.total_steps,
            base,
            config.swing_enabled,
            config.swing_ratio(),
        );
        Self {
            base,
            swing_enabled: config.swing_enabled,
            swing_ratio: config.swing_ratio(),
            total_steps: config.total_steps,
            section_duration,
            last_step_index: HashMap::new(),
            section_index: HashMap::new(),
            section_start_times: HashMap::new(),
            max_section_start: 0.0,
            pending: HashMap::new(),
        }
    }

    #[must_use]
    pub fn section_duration(&self) -> f64 {
        self.section_duration
    }

    #[must_use]
    pub fn lead_seconds(&self, now: f64) -> f64 {
        (self.max_section_start - now).max(0.0)
    }

    /// Seed section 0's start time; called once from `prepare`.
    pub fn reset(&mut self, start_time: f64) {
        self.last_step_index.clear();
        self.section_index.clear();
        self.section_start_times.clear();
        self.pending.clear();
        self.section_start_times.insert(0, start_time);
        self.max_section_start = start_time;
    }

    fn step_offset(&self, step_index: u32) -> f64 {
        step_offset_seconds(step_index, self.base, self.swing_enabled, self.swing_ratio)
    }

    /// Wall-clock gap until the next step, used as note duration for
    /// sustained voices. Floored to 50 ms by callers per the spec.
    #[must_use]
    pub fn step_duration(&self, step_index: u32) -> f64 {
        self.step_offset(step_index + 1) - self.step_offset(step_index)
    }

    /// Record a step for `instrument`. Returns the combined step once every
    /// instrument has reported the same `(section, stepIndex)`.
    pub fn on_step(
        &mut self,
        instrument: Instrument,
        step_index: u32,
        step: TrackerStep,
        now: f64,
    ) -> Option<CombinedStep> {
        let last = *self.last_step_index.get(&instrument).unwrap_or(&-1);
        if last >= 0 && step_index < last as u32 {
            *self.section_index.entry(instrument).or_insert(0) += 1;
        }
        self.last_step_index.insert(instrument, step_index as i32);
        let section = *self.section_index.entry(instrument).or_insert(0);

        if !self.section_start_times.contains_key(&section) {
            let prev_start =
                self.section_start_times.get(&(section.wrapping_sub(1))).copied().unwrap_or(now);
            let candidate = (prev_start + self.section_duration).max(now + SECTION_LOOKAHEAD);
            self.section_start_times.insert(section, candidate);
        }

        let target = self.section_start_times[&section] + self.step_offset(step_index);
        if target < now + SECTION_LOOKAHEAD {
            let deficit = (now + SECTION_LOOKAHEAD) - target;
            for (&idx, start) in self.section_start_times.iter_mut() {
                if idx >= section {
                    *start += deficit;
                }
            }
        }

        self.max_section_start = self
            .section_start_times
            .values()
            .copied()
            .fold(self.max_section_start, f64::max);

        let slot = self.pending.entry((section, step_index)).or_default();
        slot.insert(instrument, step);
        if slot.len() < Instrument::ALL.len() {
            return None;
        }

        let steps = self.pending.remove(&(section, step_index)).unwrap();
        let target_time = self.section_start_times[&section] + self.step_offset(step_index);
        Some(CombinedStep { section, step_index, target_time, steps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jazz_core::config::{Config, ConfigBuilder};

    fn config() -> Config {
        let mut builder = ConfigBuilder::default();
        builder.bars_per_generation = 1;
        Config::new(builder)
    }

    fn feed_all(coord: &mut SectionCoordinator, step_index: u32, now: f64) -> Option<CombinedStep> {
        let mut last = None;
        for instrument in Instrument::ALL {
            last = coord.on_step(instrument, step_index, TrackerStep::Rest, now);
        }
        last
    }

    #[test]
    fn dispatches_only_once_all_four_instruments_report() {
        let config = config();
        let mut coord = SectionCoordinator::new(&config);
        coord.reset(10.0);
        assert!(coord.on_step(Instrument::Bass, 0, TrackerStep::Rest, 0.0).is_none());
        assert!(coord.on_step(Instrument::Drums, 0, TrackerStep::Rest, 0.0).is_none());
        assert!(coord.on_step(Instrument::Piano, 0, TrackerStep::Rest, 0.0).is_none());
        let combined = coord.on_step(Instrument::Sax, 0, TrackerStep::Rest, 0.0).unwrap();
        assert_eq!(combined.section, 0);
        assert_eq!(combined.step_index, 0);
        assert_eq!(combined.steps.len(), 4);
    }

    #[test]
    fn section_start_times_stay_monotonic_under_wraparound() {
        let config = config();
        let mut coord = SectionCoordinator::new(&config);
        coord.reset(0.0);
        let total = config.total_steps;
        for step in 0..total {
            feed_all(&mut coord, step, 0.0);
        }
        // wrap: indices go back down, section index must bump for every instrument
        let combined = feed_all(&mut coord, 0, 0.0).unwrap();
        assert_eq!(combined.section, 1);
        let start0 = coord.section_start_times[&0];
        let start1 = coord.section_start_times[&1];
        assert!(start1 >= start0 + coord.section_duration() - 1e-9);
    }

    #[test]
    fn late_arrival_shifts_section_and_all_later_sections_forward() {
        let config = config();
        let mut coord = SectionCoordinator::new(&config);
        coord.reset(0.0);
        // Pre-seed a later section so we can observe it being pulled forward too.
        coord.section_start_times.insert(1, 0.05);
        let now = 10.0; // far past both seeded starts
        let combined = feed_all(&mut coord, 0, now).unwrap();
        assert!(combined.target_time >= now + SECTION_LOOKAHEAD - 1e-9);
        assert!(coord.section_start_times[&1] >= coord.section_start_times[&0]);
    }

    #[test]
    fn step_offset_matches_swing_law_in_seconds() {
        let base = 0.25; // arbitrary quarter/4
        let offsets: Vec<f64> = (0..=4).map(|i| step_offset_seconds(i, base, true, 0.67)).collect();
        assert!((offsets[0] - 0.0).abs() < 1e-9);
        assert!((offsets[1] - 2.0 * base * 0.67).abs() < 1e-9);
        assert!((offsets[2] - 2.0 * base).abs() < 1e-9);
    }
}
