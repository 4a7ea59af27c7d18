pub mod backend;
pub mod clock;
pub mod midi_out;
pub mod recorder;
pub mod scheduler;
pub mod section;
pub mod soundfont;

pub use backend::{prepare_with_fallback, BufferLead, GenericBackend, PlaybackBackend, PlaybackError, Sink};
pub use clock::{Clock, FakeClock, SystemClock};
pub use midi_out::MidiOutSink;
pub use scheduler::{Handle, Scheduler};
pub use section::{CombinedStep, SectionCoordinator};
pub use recorder::WavCapture;
pub use soundfont::SoundfontSink;

/// Convenience constructors matching the two sinks named in the spec's
/// playback backend section.
pub type SoundfontBackend = GenericBackend<SoundfontSink>;
pub type MidiOutBackend = GenericBackend<MidiOutSink>;

#[must_use]
pub fn soundfont_backend(sf2_bytes: Option<&[u8]>) -> (SoundfontBackend, Option<cpal::Stream>) {
    let (sink, stream) = soundfont::build(sf2_bytes);
    (GenericBackend::new(sink, BufferLead::SectionMultiple(4.0)), stream)
}

#[must_use]
pub fn midi_out_backend(port_name_hint: &str) -> MidiOutBackend {
    GenericBackend::new(MidiOutSink::new(port_name_hint), BufferLead::FixedSeconds(0.2))
}
