//! Incremental stream parser: turns arriving text into typed tracker steps.
//!
//! Mirrors the teacher's pull-based `Sequencer::tick() -> Trigger` pattern
//! rather than a push/callback model: events accumulate internally and the
//! caller drains them between `append_chunk` calls.

use std::collections::HashMap;

use crate::config::{Config, Instrument};
use crate::error::MalformedStep;
use crate::notecodec::{note_to_midi, NoteEvent};
use crate::tracker::{TrackerLineEvent, TrackerStep};

pub struct StreamParser {
    total_steps: usize,
    partial_line: String,
    current_instrument: Option<Instrument>,
    current_step_counts: HashMap<Instrument, usize>,
    events: Vec<TrackerLineEvent>,
    archive: String,
}

impl StreamParser {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            total_steps: config.total_steps as usize,
            partial_line: String::new(),
            current_instrument: None,
            current_step_counts: HashMap::new(),
            events: Vec::new(),
            archive: String::new(),
        }
    }

    /// Append a chunk of freshly-arrived text. Complete lines are processed
    /// immediately; any trailing partial line is carried to the next call.
    pub fn append_chunk(&mut self, chunk: &str) {
        self.partial_line.push_str(chunk);
        let mut lines: Vec<String> =
            self.partial_line.split('\n').map(str::to_string).collect();
        // The last entry is either a complete trailing newline's empty string
        // or a genuine partial line; either way it becomes the new carry.
        let carry = lines.pop().unwrap_or_default();
        for line in lines {
            self.process_line(&line);
        }
        self.partial_line = carry;
    }

    /// Process any remaining partial line, then clear it.
    pub fn finalize(&mut self) {
        if !self.partial_line.is_empty() {
            let line = std::mem::take(&mut self.partial_line);
            self.process_line(&line);
        }
        self.partial_line.clear();
    }

    /// Drain all tracker line events accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<TrackerLineEvent> {
        std::mem::take(&mut self.events)
    }

    /// The raw, trimmed, line-number-stripped reproduction of everything
    /// successfully parsed so far (used for archival and SMF round-trips).
    #[must_use]
    pub fn archive_text(&self) -> &str {
        &self.archive
    }

    fn process_line(&mut self, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }

        if let Some(instrument) = Instrument::from_header(trimmed) {
            self.current_instrument = Some(instrument);
            self.archive.push_str(trimmed);
            self.archive.push('\n');
            return;
        }

        let Some(instrument) = self.current_instrument else { return };
        let count = *self.current_step_counts.get(&instrument).unwrap_or(&0);
        if count >= self.total_steps {
            return;
        }

        let body = strip_line_number(trimmed);
        match parse_note_entry(body) {
            Ok(step) => {
                self.archive.push_str(trimmed);
                self.archive.push('\n');
                self.events.push(TrackerLineEvent {
                    instrument,
                    step_index: count,
                    step,
                    line: body.to_string(),
                });
                self.current_step_counts.insert(instrument, count + 1);
            }
            Err(e) => {
                crate::log::warn(&format!(
                    "malformed step for {instrument} at line {count}: {e} (line={trimmed:?})"
                ));
            }
        }
    }
}

/// Strip a leading "N." or "N " line-number prefix, if present.
#[must_use]
pub fn strip_line_number(line: &str) -> &str {
    let mut chars = line.char_indices();
    let mut digit_end = 0;
    for (i, c) in chars.by_ref() {
        if c.is_ascii_digit() {
            digit_end = i + c.len_utf8();
        } else {
            break;
        }
    }
    if digit_end == 0 {
        return line;
    }
    let rest = &line[digit_end..];
    if let Some(stripped) = rest.strip_prefix('.') {
        return stripped.trim_start();
    }
    if let Some(stripped) = rest.strip_prefix(' ') {
        return stripped.trim_start();
    }
    line
}

/// Parse one step body: `.` (rest), `^` (tie), or comma-separated
/// `PITCH:VELOCITY` entries.
///
/// # Errors
/// Returns [`MalformedStep`] on a missing `:` or missing velocity digits.
/// Callers are expected to log and skip the line on error, per spec.
pub fn parse_note_entry(body: &str) -> Result<TrackerStep, MalformedStep> {
    if body.is_empty() || body == "." {
        return Ok(TrackerStep::Rest);
    }
    if body == "^" {
        return Ok(TrackerStep::Tie);
    }

    let mut notes = Vec::new();
    for part in body.split(',') {
        let part = part.trim().trim_end_matches(['.', ',', ';']);
        if part.is_empty() {
            continue;
        }
        let Some((pitch_str, velocity_str)) = part.split_once(':') else {
            return Err(MalformedStep::MissingColon(part.to_string()));
        };

        let digits: String = velocity_str.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(MalformedStep::NoVelocityDigits(part.to_string()));
        }
        let velocity: u32 = digits.parse().unwrap_or(127);
        let velocity = velocity.min(127) as u8;

        let pitch = note_to_midi(pitch_str.trim())
            .map_err(|e| MalformedStep::InvalidNote(part.to_string(), e))?;
        notes.push(NoteEvent::new(pitch, velocity));
    }

    if notes.is_empty() {
        return Ok(TrackerStep::Rest);
    }
    Ok(TrackerStep::Notes(notes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    fn small_config(total_steps: u32) -> Config {
        let mut builder = ConfigBuilder::default();
        builder.bars_per_generation = total_steps / 16 + 1;
        Config::new(builder)
    }

    #[test]
    fn rest_tie_and_note_sequence() {
        let config = small_config(4);
        let mut parser = StreamParser::new(&config);
        parser.append_chunk("BASS\n1 C2:80\n2 ^\n3 .\n4 E2:75\n");
        let events = parser.drain_events();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0].step, TrackerStep::Notes(_)));
        assert!(events[1].step.is_tie());
        assert!(events[2].step.is_rest());
        assert!(matches!(events[3].step, TrackerStep::Notes(_)));
    }

    #[test]
    fn chord_parses_multiple_notes() {
        let config = small_config(2);
        let mut parser = StreamParser::new(&config);
        parser.append_chunk("PIANO\n1 C3:65,E3:60,G3:62\n2 .\n");
        let events = parser.drain_events();
        assert_eq!(events.len(), 2);
        match &events[0].step {
            TrackerStep::Notes(notes) => assert_eq!(notes.len(), 3),
            other => panic!("expected chord, got {other:?}"),
        }
    }

    #[test]
    fn chunk_boundary_splits_mid_token() {
        let config = small_config(2);
        let mut parser = StreamParser::new(&config);
        parser.append_chunk("BASS\n1 C2");
        parser.append_chunk(":80\n2 .\n");
        let events = parser.drain_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].step, TrackerStep::Notes(_)));
        assert_eq!(events[0].step_index, 0);
        assert!(events[1].step.is_rest());
        assert_eq!(events[1].step_index, 1);
    }

    #[test]
    fn malformed_velocity_skips_without_consuming_index() {
        let config = small_config(2);
        let mut parser = StreamParser::new(&config);
        parser.append_chunk("BASS\n1 C2:abc\n2 D2:80\n");
        let events = parser.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].step_index, 0);
        match &events[0].step {
            TrackerStep::Notes(notes) => assert_eq!(notes[0].pitch, note_to_midi("D2").unwrap()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn step_cap_enforced() {
        let config = small_config(2);
        let mut parser = StreamParser::new(&config);
        parser.append_chunk("BASS\n1 C2:80\n2 D2:80\n3 E2:80\n4 F2:80\n");
        let events = parser.drain_events();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let config = small_config(2);
        let mut parser = StreamParser::new(&config);
        parser.append_chunk("# metadata\nBASS\n\n1 C2:80\n# more\n2 .\n");
        let events = parser.drain_events();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn finalize_processes_trailing_partial_line() {
        let config = small_config(1);
        let mut parser = StreamParser::new(&config);
        parser.append_chunk("BASS\n1 C2:80");
        assert!(parser.drain_events().is_empty());
        parser.finalize();
        let events = parser.drain_events();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn strip_line_number_variants() {
        assert_eq!(strip_line_number("1 C2:80"), "C2:80");
        assert_eq!(strip_line_number("12.C2:80"), "C2:80");
        assert_eq!(strip_line_number("C2:80"), "C2:80");
    }
}
