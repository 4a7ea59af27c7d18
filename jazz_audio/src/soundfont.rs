//! Soundfont playback sink: an `oxisynth::Synth` owned entirely by the
//! `cpal` render thread, fed through an `rtrb` lock-free queue so `Sink`
//! calls from the cooperative task never block on or compete with the
//! audio callback — the same split the teacher uses for
//! `rtrb::Producer<HarmonyState>` / `Consumer` in `harmonium_host::audio`.
//!
//! `cpal::Stream` is not reliably `Send` across every host backend, so it
//! is handed back to the caller separately rather than stored on
//! `SoundfontSink` itself, which only needs to own the `Send` producer
//! half of the queue to satisfy `Sink: Send`.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use jazz_core::log;
use oxisynth::{MidiEvent, SoundFont, Synth};

use crate::backend::Sink;

enum SynthCommand {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8 },
    ProgramChange { channel: u8, program: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
}

const QUEUE_CAPACITY: usize = 1024;

pub struct SoundfontSink {
    producer: rtrb::Producer<SynthCommand>,
    ready: bool,
}

/// Spins up the default output device and returns the `Sink` half plus the
/// live `cpal::Stream` the caller must keep alive for as long as playback
/// should continue (dropping it stops the audio).
#[must_use]
pub fn build(sf2_bytes: Option<&[u8]>) -> (SoundfontSink, Option<cpal::Stream>) {
    let (producer, mut consumer) = rtrb::RingBuffer::<SynthCommand>::new(QUEUE_CAPACITY);

    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        log::warn("no default output device; soundfont sink unavailable");
        return (SoundfontSink { producer, ready: false }, None);
    };

    let config = match device.default_output_config() {
        Ok(c) => c,
        Err(err) => {
            log::warn(&format!("no usable output config: {err}"));
            return (SoundfontSink { producer, ready: false }, None);
        }
    };

    let mut synth = Synth::default();
    synth.set_sample_rate(config.sample_rate().0 as f32);
    if let Some(bytes) = sf2_bytes {
        let mut cursor = std::io::Cursor::new(bytes);
        match SoundFont::load(&mut cursor) {
            Ok(font) => {
                synth.add_font(font, true);
            }
            Err(err) => log::warn(&format!("failed to parse soundfont: {err:?}")),
        }
    }

    let channels = config.channels() as usize;
    let err_fn = |err| log::error(&format!("soundfont output stream error: {err}"));

    let stream = device.build_output_stream(
        &config.into(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            while let Ok(cmd) = consumer.pop() {
                let event = match cmd {
                    SynthCommand::NoteOn { channel, pitch, velocity } => {
                        MidiEvent::NoteOn { channel, key: pitch, vel: velocity }
                    }
                    SynthCommand::NoteOff { channel, pitch } => {
                        MidiEvent::NoteOff { channel, key: pitch }
                    }
                    SynthCommand::ProgramChange { channel, program } => {
                        MidiEvent::ProgramChange { channel, program_id: program }
                    }
                    SynthCommand::ControlChange { channel, controller, value } => {
                        MidiEvent::ControlChange { channel, ctrl: controller, value }
                    }
                };
                let _ = synth.send_event(event);
            }
            if channels == 2 {
                synth.write(data);
            } else {
                let mut stereo = vec![0.0_f32; (data.len() / channels) * 2];
                synth.write(&mut stereo[..]);
                for (frame, out) in stereo.chunks_exact(2).zip(data.chunks_mut(channels)) {
                    for sample in out.iter_mut() {
                        *sample = frame[0];
                    }
                }
            }
        },
        err_fn,
        None,
    );

    match stream {
        Ok(stream) => match stream.play() {
            Ok(()) => (SoundfontSink { producer, ready: true }, Some(stream)),
            Err(err) => {
                log::warn(&format!("failed to start soundfont stream: {err}"));
                (SoundfontSink { producer, ready: false }, None)
            }
        },
        Err(err) => {
            log::warn(&format!("failed to build soundfont stream: {err}"));
            (SoundfontSink { producer, ready: false }, None)
        }
    }
}

impl SoundfontSink {
    fn push(&mut self, cmd: SynthCommand) {
        if self.producer.push(cmd).is_err() {
            log::warn("soundfont command queue full; dropping event");
        }
    }
}

impl Sink for SoundfontSink {
    fn ready(&self) -> bool {
        self.ready
    }

    fn note_on(&mut self, channel: u8, pitch: u8, velocity: u8) {
        self.push(SynthCommand::NoteOn { channel, pitch, velocity });
    }

    fn note_off(&mut self, channel: u8, pitch: u8) {
        self.push(SynthCommand::NoteOff { channel, pitch });
    }

    fn program_change(&mut self, channel: u8, program: u8) {
        self.push(SynthCommand::ProgramChange { channel, program });
    }

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        self.push(SynthCommand::ControlChange { channel, controller, value });
    }
}
