pub mod config;
pub mod context;
pub mod error;
pub mod log;
pub mod notecodec;
pub mod parser;
pub mod smf;
pub mod tracker;

pub use config::{Config, ConfigBuilder, Instrument, TimeSignature};
pub use context::ContextBuffer;
pub use notecodec::{midi_to_frequency, midi_to_name, note_to_midi, NoteCodecError, NoteEvent};
pub use parser::StreamParser;
pub use tracker::{ParsedTrack, TrackerLineEvent, TrackerStep};
