//! Rolling per-instrument history used to prime the next LLM call.

use std::collections::{HashMap, VecDeque};

use crate::config::Instrument;
use crate::parser::strip_line_number;

pub const DEFAULT_CAPACITY: usize = 32;

struct InstrumentRing {
    lines: VecDeque<String>,
    capacity: usize,
    trimmed: bool,
}

impl InstrumentRing {
    fn new(capacity: usize) -> Self {
        Self { lines: VecDeque::with_capacity(capacity), capacity, trimmed: false }
    }

    fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.trimmed = true;
        }
        self.lines.push_back(line);
    }
}

/// Rolling window of the N most recent tracker lines per instrument.
pub struct ContextBuffer {
    capacity: usize,
    rings: HashMap<Instrument, InstrumentRing>,
}

impl ContextBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, rings: HashMap::new() }
    }

    /// Partition raw tracker text into per-instrument sections (by header
    /// lines) and append each stripped line to that instrument's ring.
    pub fn incorporate(&mut self, tracker_text: &str) {
        let mut current: Option<Instrument> = None;
        for raw in tracker_text.lines() {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some(instrument) = Instrument::from_header(trimmed) {
                current = Some(instrument);
                continue;
            }
            let Some(instrument) = current else { continue };
            let body = strip_line_number(trimmed);
            let ring =
                self.rings.entry(instrument).or_insert_with(|| InstrumentRing::new(self.capacity));
            ring.push(body.to_string());
        }
    }

    /// Build the prompt chunk fed to the next LLM call: one block per
    /// instrument that has history, `[...]` prefixed iff the ring trimmed.
    #[must_use]
    pub fn build_prompt_chunk(&self) -> String {
        let mut out = String::new();
        for instrument in Instrument::ALL {
            let Some(ring) = self.rings.get(&instrument) else { continue };
            if ring.lines.is_empty() {
                continue;
            }
            out.push_str(instrument.header_name());
            out.push_str(" (recent):\n");
            if ring.trimmed {
                out.push_str("[...]\n");
            }
            for line in &ring.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    pub fn reset(&mut self) {
        self.rings.clear();
    }
}

impl Default for ContextBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_by_header() {
        let mut ctx = ContextBuffer::new(32);
        ctx.incorporate("BASS\n1 C2:80\n2 .\nDRUMS\n1 C2:90\n");
        let chunk = ctx.build_prompt_chunk();
        assert!(chunk.contains("BASS (recent):"));
        assert!(chunk.contains("DRUMS (recent):"));
        assert!(chunk.contains("C2:80"));
    }

    #[test]
    fn marks_trimmed_past_capacity() {
        let mut ctx = ContextBuffer::new(2);
        ctx.incorporate("BASS\n1 C2:80\n2 D2:80\n3 E2:80\n");
        let chunk = ctx.build_prompt_chunk();
        assert!(chunk.contains("[...]"));
        assert!(!chunk.contains("C2:80"));
        assert!(chunk.contains("D2:80"));
        assert!(chunk.contains("E2:80"));
    }

    #[test]
    fn reset_clears_everything() {
        let mut ctx = ContextBuffer::new(32);
        ctx.incorporate("BASS\n1 C2:80\n");
        ctx.reset();
        assert_eq!(ctx.build_prompt_chunk(), "");
    }
}
