//! External MIDI output sink: raw note-on/off over the first available
//! `midir` output port, generalising the teacher's `midi_backend.rs`
//! (which writes the same three message kinds into an in-memory
//! `midly::Track`) to a live connection.

use jazz_core::log;

use crate::backend::Sink;

pub struct MidiOutSink {
    connection: Option<midir::MidiOutputConnection>,
}

impl MidiOutSink {
    #[must_use]
    pub fn new(port_name_hint: &str) -> Self {
        let output = match midir::MidiOutput::new("jazz_audio") {
            Ok(output) => output,
            Err(err) => {
                log::warn(&format!("failed to open MIDI output: {err}"));
                return Self { connection: None };
            }
        };
        let ports = output.ports();
        let Some(port) = ports.first() else {
            log::warn("no MIDI output ports available");
            return Self { connection: None };
        };
        match output.connect(port, port_name_hint) {
            Ok(connection) => Self { connection: Some(connection) },
            Err(err) => {
                log::warn(&format!("failed to connect to MIDI output: {err}"));
                Self { connection: None }
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) {
        let Some(connection) = self.connection.as_mut() else { return };
        if let Err(err) = connection.send(bytes) {
            log::warn(&format!("MIDI send failed: {err}"));
        }
    }
}

impl Sink for MidiOutSink {
    fn ready(&self) -> bool {
        self.connection.is_some()
    }

    fn note_on(&mut self, channel: u8, pitch: u8, velocity: u8) {
        self.send(&[0x90 | (channel & 0x0F), pitch, velocity]);
    }

    fn note_off(&mut self, channel: u8, pitch: u8) {
        self.send(&[0x80 | (channel & 0x0F), pitch, 0]);
    }

    fn program_change(&mut self, channel: u8, program: u8) {
        self.send(&[0xC0 | (channel & 0x0F), program]);
    }

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        self.send(&[0xB0 | (channel & 0x0F), controller, value]);
    }
}
