//! Tracker step types shared by the parser, SMF encoder, and context buffer.

use crate::config::Instrument;
use crate::notecodec::NoteEvent;
use serde::{Deserialize, Serialize};

/// One step of one instrument's tracker line — exactly one of the three
/// shapes described in the spec; the Rust enum makes that structural rather
/// than a runtime invariant to check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TrackerStep {
    Notes(Vec<NoteEvent>),
    Rest,
    Tie,
}

impl TrackerStep {
    #[must_use]
    pub fn is_rest(&self) -> bool {
        matches!(self, TrackerStep::Rest)
    }

    #[must_use]
    pub fn is_tie(&self) -> bool {
        matches!(self, TrackerStep::Tie)
    }

    #[must_use]
    pub fn notes(&self) -> &[NoteEvent] {
        match self {
            TrackerStep::Notes(notes) => notes,
            _ => &[],
        }
    }
}

/// Emitted by the stream parser for every completed step.
#[derive(Clone, Debug)]
pub struct TrackerLineEvent {
    pub instrument: Instrument,
    pub step_index: usize,
    pub step: TrackerStep,
    pub line: String,
}

/// A fully parsed track, ready for the SMF encoder.
#[derive(Clone, Debug)]
pub struct ParsedTrack {
    pub instrument: Instrument,
    pub steps: Vec<TrackerStep>,
}
