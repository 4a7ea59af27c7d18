//! Error types shared by the core crate. Transport/backend errors live in
//! their respective crates; these two are purely parse-local and are always
//! recovered (logged and skipped), never propagated.

use thiserror::Error;

pub use crate::notecodec::NoteCodecError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedStep {
    #[error("step {0:?} is missing ':' between pitch and velocity")]
    MissingColon(String),
    #[error("step {0:?} has no velocity digits")]
    NoVelocityDigits(String),
    #[error("step {0:?} has an invalid note name: {1}")]
    InvalidNote(String, NoteCodecError),
}
