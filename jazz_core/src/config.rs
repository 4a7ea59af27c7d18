//! Immutable runtime configuration.
//!
//! `Config` is created once per session and replaced, never mutated, when the
//! user changes a field — the same "derive once, swap the whole record"
//! discipline the teacher applies to `MusicalParams`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum Instrument {
    Bass,
    Drums,
    Piano,
    Sax,
}

impl Instrument {
    pub const ALL: [Instrument; 4] =
        [Instrument::Bass, Instrument::Drums, Instrument::Piano, Instrument::Sax];

    #[must_use]
    pub fn header_name(self) -> &'static str {
        match self {
            Instrument::Bass => "BASS",
            Instrument::Drums => "DRUMS",
            Instrument::Piano => "PIANO",
            Instrument::Sax => "SAX",
        }
    }

    #[must_use]
    pub fn from_header(line: &str) -> Option<Self> {
        match line {
            "BASS" => Some(Instrument::Bass),
            "DRUMS" => Some(Instrument::Drums),
            "PIANO" => Some(Instrument::Piano),
            "SAX" => Some(Instrument::Sax),
            _ => None,
        }
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.header_name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { numerator: 4, denominator: 4 }
    }
}

/// Immutable record of all tempo/swing/channel-map parameters plus the
/// values derived from them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub tempo: f64,
    pub swing_enabled: bool,
    swing_ratio: f64,
    pub ticks_per_beat: u32,
    pub bars_per_generation: u32,
    pub time_signature: TimeSignature,
    pub channels: HashMap<String, u8>,
    pub gm_programs: HashMap<String, u8>,
    pub gm_drums: HashMap<String, u8>,

    // Derived, computed once at construction.
    pub steps_per_bar: u32,
    pub total_steps: u32,
    pub ticks_per_step: u32,
}

impl Config {
    /// # Panics
    /// Panics if `tempo` is not positive, or `ticks_per_beat`/
    /// `bars_per_generation` is zero — these are programmer errors at the
    /// construction site, not recoverable runtime conditions.
    #[must_use]
    pub fn new(builder: ConfigBuilder) -> Self {
        assert!(builder.tempo > 0.0, "tempo must be positive");
        assert!(builder.ticks_per_beat > 0, "ticks_per_beat must be positive");
        assert!(builder.bars_per_generation > 0, "bars_per_generation must be positive");

        let swing_ratio = if builder.swing_ratio < 0.5 || builder.swing_ratio >= 1.0 {
            let clamped = builder.swing_ratio.clamp(0.5, 0.999_999);
            crate::log::warn(&format!(
                "swing_ratio {} outside musically meaningful [0.5, 1); clamped to {}",
                builder.swing_ratio, clamped
            ));
            clamped
        } else {
            builder.swing_ratio
        };

        let steps_per_bar = u32::from(builder.time_signature.numerator) * 4;
        let total_steps = steps_per_bar * builder.bars_per_generation;
        let ticks_per_step = builder.ticks_per_beat / 4;

        let mut channels = builder.channels;
        channels.insert("DRUMS".to_string(), 9);

        Self {
            tempo: builder.tempo,
            swing_enabled: builder.swing_enabled,
            swing_ratio,
            ticks_per_beat: builder.ticks_per_beat,
            bars_per_generation: builder.bars_per_generation,
            time_signature: builder.time_signature,
            channels,
            gm_programs: builder.gm_programs,
            gm_drums: builder.gm_drums,
            steps_per_bar,
            total_steps,
            ticks_per_step,
        }
    }

    #[must_use]
    pub fn swing_ratio(&self) -> f64 {
        self.swing_ratio
    }

    #[must_use]
    pub fn channel_for(&self, instrument: Instrument) -> u8 {
        if instrument == Instrument::Drums {
            return 9;
        }
        *self.channels.get(instrument.header_name()).unwrap_or(&0)
    }

    #[must_use]
    pub fn program_for(&self, instrument: Instrument) -> u8 {
        *self.gm_programs.get(instrument.header_name()).unwrap_or(&0)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(ConfigBuilder::default())
    }
}

/// Builder for the fields a user can change; `Config::new` derives the rest.
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    pub tempo: f64,
    pub swing_enabled: bool,
    pub swing_ratio: f64,
    pub ticks_per_beat: u32,
    pub bars_per_generation: u32,
    pub time_signature: TimeSignature,
    pub channels: HashMap<String, u8>,
    pub gm_programs: HashMap<String, u8>,
    pub gm_drums: HashMap<String, u8>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        let mut channels = HashMap::new();
        channels.insert("BASS".to_string(), 0);
        channels.insert("PIANO".to_string(), 1);
        channels.insert("SAX".to_string(), 2);
        channels.insert("DRUMS".to_string(), 9);

        let mut gm_programs = HashMap::new();
        gm_programs.insert("BASS".to_string(), 32); // Acoustic Bass
        gm_programs.insert("PIANO".to_string(), 0); // Acoustic Grand Piano
        gm_programs.insert("SAX".to_string(), 65); // Alto Sax

        let mut gm_drums = HashMap::new();
        gm_drums.insert("KICK".to_string(), 36);
        gm_drums.insert("SNARE".to_string(), 38);
        gm_drums.insert("HAT".to_string(), 42);
        gm_drums.insert("RIDE".to_string(), 51);

        Self {
            tempo: 120.0,
            swing_enabled: true,
            swing_ratio: 0.67,
            ticks_per_beat: 480,
            bars_per_generation: 8,
            time_signature: TimeSignature::default(),
            channels,
            gm_programs,
            gm_drums,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_step_counts() {
        let config = Config::default();
        assert_eq!(config.steps_per_bar, 16);
        assert_eq!(config.total_steps, 128);
        assert_eq!(config.ticks_per_step, 120);
    }

    #[test]
    fn drums_always_channel_nine() {
        let mut builder = ConfigBuilder::default();
        builder.channels.insert("DRUMS".to_string(), 4);
        let config = Config::new(builder);
        assert_eq!(config.channel_for(Instrument::Drums), 9);
    }

    #[test]
    fn clamps_swing_ratio_below_half() {
        let mut builder = ConfigBuilder::default();
        builder.swing_ratio = 0.2;
        let config = Config::new(builder);
        assert!((config.swing_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn clamps_swing_ratio_above_one() {
        let mut builder = ConfigBuilder::default();
        builder.swing_ratio = 1.5;
        let config = Config::new(builder);
        assert!(config.swing_ratio() < 1.0);
    }

    #[test]
    #[should_panic(expected = "tempo must be positive")]
    fn rejects_nonpositive_tempo() {
        let mut builder = ConfigBuilder::default();
        builder.tempo = 0.0;
        let _ = Config::new(builder);
    }
}
