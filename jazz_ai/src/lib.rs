pub mod client;
pub mod generation;

pub use client::{AbortHandle, ChatMessage, ChatStream, LlmClient, TransportError};
pub use generation::{build_prompt, GenerationLoop, GenerationOutcome, PlaybackSink};
