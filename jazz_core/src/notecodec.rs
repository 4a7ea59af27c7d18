//! Note-name <-> MIDI number conversion and velocity clamping.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NoteCodecError {
    #[error("invalid note name: {0:?}")]
    InvalidNote(String),
}

/// A single sounding note: MIDI pitch and velocity, both clamped to `0..=127`
/// at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
}

impl NoteEvent {
    #[must_use]
    pub fn new(pitch: u8, velocity: u8) -> Self {
        Self { pitch: pitch.min(127), velocity: velocity.clamp(0, 127) }
    }
}

fn normalize_accidentals(s: &str) -> String {
    s.chars()
        .filter_map(|c| match c {
            '♯' => Some('#'),
            '♭' => Some('b'),
            '♮' => None,
            other => Some(other),
        })
        .collect()
}

/// Parse a note name of the shape `[A-G][#|b]?-?\d+` into a MIDI number.
///
/// Handles the `Cb` (one octave down) and `B#` (one octave up) enharmonic
/// edge cases explicitly.
///
/// # Errors
/// Returns [`NoteCodecError::InvalidNote`] for an unparseable shape, an
/// unknown letter/accidental pair, or a result outside `0..=127`.
pub fn note_to_midi(name: &str) -> Result<u8, NoteCodecError> {
    let normalized = normalize_accidentals(name.trim());
    let mut chars = normalized.chars().peekable();

    let letter = chars.next().ok_or_else(|| NoteCodecError::InvalidNote(name.to_string()))?;
    let base = match letter.to_ascii_uppercase() {
        'C' => 0i32,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(NoteCodecError::InvalidNote(name.to_string())),
    };

    let mut offset = base;
    let mut octave_shift = 0i32;
    if let Some(&accidental) = chars.peek() {
        match accidental {
            '#' => {
                offset += 1;
                chars.next();
            }
            'b' => {
                offset -= 1;
                chars.next();
            }
            _ => {}
        }
    }

    // Cb => B of the octave below; B# => C of the octave above.
    if letter.eq_ignore_ascii_case(&'C') && offset == base - 1 {
        offset += 12;
        octave_shift = -1;
    } else if letter.eq_ignore_ascii_case(&'B') && offset == base + 1 {
        offset -= 12;
        octave_shift = 1;
    }

    let rest: String = chars.collect();
    if rest.is_empty() {
        return Err(NoteCodecError::InvalidNote(name.to_string()));
    }
    let octave: i32 =
        rest.parse().map_err(|_| NoteCodecError::InvalidNote(name.to_string()))?;

    let midi = (octave + octave_shift + 1) * 12 + offset;
    if !(0..=127).contains(&midi) {
        return Err(NoteCodecError::InvalidNote(name.to_string()));
    }
    Ok(midi as u8)
}

/// Inverse of [`note_to_midi`], used for archive round-trips and logging.
/// Always renders sharps, never flats.
#[must_use]
pub fn midi_to_name(midi: u8) -> String {
    const NAMES: [&str; 12] =
        ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = i32::from(midi) / 12 - 1;
    let pc = usize::from(midi % 12);
    format!("{}{}", NAMES[pc], octave)
}

#[must_use]
pub fn midi_to_frequency(n: u8) -> f64 {
    440.0 * 2f64.powf((f64::from(n) - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_notes() {
        assert_eq!(note_to_midi("C4").unwrap(), 60);
        assert_eq!(note_to_midi("A4").unwrap(), 69);
        assert_eq!(note_to_midi("C-1").unwrap(), 0);
        assert_eq!(note_to_midi("G9").unwrap(), 127);
    }

    #[test]
    fn parses_accidentals() {
        assert_eq!(note_to_midi("C#4").unwrap(), 61);
        assert_eq!(note_to_midi("Db4").unwrap(), 61);
    }

    #[test]
    fn unicode_accidentals_normalize() {
        assert_eq!(note_to_midi("C♯4").unwrap(), 61);
        assert_eq!(note_to_midi("D♭4").unwrap(), 61);
    }

    #[test]
    fn enharmonic_edge_cases() {
        // Cb4 == B3
        assert_eq!(note_to_midi("Cb4").unwrap(), note_to_midi("B3").unwrap());
        // B#3 == C4
        assert_eq!(note_to_midi("B#3").unwrap(), note_to_midi("C4").unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(note_to_midi("").is_err());
        assert!(note_to_midi("H4").is_err());
        assert!(note_to_midi("C").is_err());
        assert!(note_to_midi("Czz4").is_err());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(note_to_midi("C10").is_err());
        assert!(note_to_midi("C-2").is_err());
    }

    #[test]
    fn midi_to_name_round_trips_sharps() {
        assert_eq!(midi_to_name(60), "C4");
        assert_eq!(midi_to_name(61), "C#4");
    }

    #[test]
    fn frequency_of_a440() {
        assert!((midi_to_frequency(69) - 440.0).abs() < 1e-9);
    }

    #[test]
    fn velocity_clamps() {
        let n = NoteEvent::new(200, 200);
        assert_eq!(n.pitch, 127);
        assert_eq!(n.velocity, 127);
    }
}
