//! The continuous generation loop: pipelines repeated LLM calls ahead of
//! playback, threading context forward between sections.
//!
//! `jazz_ai` never depends on `jazz_audio` directly — `PlaybackSink` is the
//! capability the loop actually needs (spec.md §9's "sum types / capability
//! sets, not hierarchies" applied at the crate boundary too), so the binary
//! crate can hand it an adapter wrapping `jazz_audio::GenericBackend` plus
//! its own `Scheduler` and `Clock` without a dependency cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use jazz_core::config::{Config, Instrument};
use jazz_core::context::ContextBuffer;
use jazz_core::log;
use jazz_core::parser::StreamParser;
use jazz_core::tracker::{TrackerLineEvent, TrackerStep};

use crate::client::{AbortHandle, ChatMessage, LlmClient, TransportError};

/// What the generation loop needs from playback: enqueue a parsed step, and
/// stop everything on abort. Implemented by an adapter in the binary crate.
pub trait PlaybackSink: Send {
    /// # Errors
    /// Returns a short message if the step could not be dispatched (e.g. the
    /// backend was never prepared); the loop logs and continues rather than
    /// aborting the whole session over one dropped step.
    fn enqueue_step(
        &mut self,
        instrument: Instrument,
        step_index: u32,
        step: TrackerStep,
    ) -> Result<(), String>;

    fn stop_all(&mut self);
}

/// Result of one call to [`GenerationLoop::run`]. Matches spec.md §7's two
/// documented exits: an explicit stop/abort, or a transport failure.
#[derive(Debug)]
pub enum GenerationOutcome {
    /// `running_flag()` was cleared (the CLI's `Stop` command, or
    /// `abort()`). Sentinel result per spec.md §7 ("`{aborted: true}`, not
    /// an error") — `stop_all` has already been called.
    Aborted,
    /// The transport failed; the loop has already exited. Scheduled
    /// playback is left to drain rather than being stopped.
    Failed(TransportError),
}

/// Assembles the prompt handed to the LLM: template, then recent history,
/// then any user steering text — exactly spec.md §4.7 step 1.
#[must_use]
pub fn build_prompt(template: &str, context_chunk: &str, direction: &str) -> String {
    let mut prompt = String::from(template);
    if !context_chunk.is_empty() {
        prompt.push('\n');
        prompt.push_str(context_chunk);
    }
    if !direction.is_empty() {
        prompt.push('\n');
        prompt.push_str(direction);
    }
    prompt
}

/// Hands every event accumulated since the last drain to `sink`, in order.
/// Failures are logged and skipped — a single bad dispatch never aborts the
/// generation (spec.md §7: only transport/backend-init failures terminate a
/// session).
fn dispatch_events(events: Vec<TrackerLineEvent>, sink: &mut dyn PlaybackSink) {
    for event in events {
        if let Err(err) = sink.enqueue_step(event.instrument, event.step_index as u32, event.step) {
            log::warn(&format!(
                "failed to enqueue step for {} at {}: {err}",
                event.instrument, event.step_index
            ));
        }
    }
}

pub struct GenerationLoop<S: PlaybackSink> {
    config: Arc<Config>,
    client: LlmClient,
    sink: S,
    context: ContextBuffer,
    prompt_template: String,
    running: Arc<AtomicBool>,
    active_abort: Option<AbortHandle>,
    /// Everything successfully parsed this session, truncated per instrument
    /// to `total_steps` per spec.md §9's open-question resolution. Readable
    /// from another task at any time (including mid-stream or after an
    /// abort) so "download and copy actions remain available" per spec.md §7.
    full_archive: Arc<Mutex<String>>,
}

impl<S: PlaybackSink> GenerationLoop<S> {
    #[must_use]
    pub fn new(config: Arc<Config>, client: LlmClient, sink: S, prompt_template: impl Into<String>) -> Self {
        Self {
            config,
            client,
            sink,
            context: ContextBuffer::default(),
            prompt_template: prompt_template.into(),
            running: Arc::new(AtomicBool::new(true)),
            active_abort: None,
            full_archive: Arc::new(Mutex::new(String::new())),
        }
    }

    /// A cancellable flag the caller can flip from another task (e.g. the
    /// CLI's `Stop` command) to end the loop after the current section.
    #[must_use]
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// A handle to the accumulated tracker-text archive, readable from
    /// another task (e.g. the CLI's `export` command) at any time.
    #[must_use]
    pub fn archive_handle(&self) -> Arc<Mutex<String>> {
        self.full_archive.clone()
    }

    /// Abort the in-flight generation immediately: cancels the active
    /// transport, drops the current section's parser state, and stops all
    /// playback. Idempotent.
    pub fn abort(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.active_abort.take() {
            handle.abort();
        }
        self.sink.stop_all();
    }

    /// Run the loop until `running_flag()` is cleared, the transport fails,
    /// or `abort()` is called. Matches spec.md §4.7 verbatim.
    ///
    /// # Errors
    /// This function does not return `Result` — transport failure is a
    /// variant of [`GenerationOutcome`], not a propagated error, per
    /// spec.md §7 ("surfaced to the caller with the status and body").
    pub async fn run(&mut self, direction: &str) -> GenerationOutcome {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                self.sink.stop_all();
                return GenerationOutcome::Aborted;
            }

            let prompt = build_prompt(&self.prompt_template, &self.context.build_prompt_chunk(), direction);
            let messages = vec![ChatMessage::system(prompt), ChatMessage::user(direction)];

            let (mut stream, abort_handle) = match self.client.stream_chat(messages).await {
                Ok(pair) => pair,
                Err(err) => {
                    self.running.store(false, Ordering::SeqCst);
                    return GenerationOutcome::Failed(err);
                }
            };
            self.active_abort = Some(abort_handle);

            let mut parser = StreamParser::new(&self.config);
            let mut aborted = false;
            loop {
                if !self.running.load(Ordering::SeqCst) {
                    if let Some(handle) = self.active_abort.take() {
                        handle.abort();
                    }
                    aborted = true;
                    break;
                }
                match stream.next_delta().await {
                    Ok(Some(delta)) => {
                        parser.append_chunk(&delta);
                        dispatch_events(parser.drain_events(), &mut self.sink);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        self.running.store(false, Ordering::SeqCst);
                        return GenerationOutcome::Failed(err);
                    }
                }
            }
            self.active_abort = None;

            if aborted {
                // Per spec.md §5: "any enqueued scheduler events fire
                // normally unless stopAll() is also invoked (it is, from
                // the Stop command)" — the partial section's parser state
                // is abandoned, not finalised into the archive or context.
                self.sink.stop_all();
                return GenerationOutcome::Aborted;
            }

            parser.finalize();
            dispatch_events(parser.drain_events(), &mut self.sink);
            self.context.incorporate(parser.archive_text());
            self.full_archive.lock().unwrap().push_str(parser.archive_text());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jazz_core::notecodec::NoteEvent;

    #[test]
    fn build_prompt_concatenates_in_order() {
        let prompt = build_prompt("TEMPLATE", "BASS (recent):\n1 C2:80\n", "play faster");
        assert!(prompt.starts_with("TEMPLATE"));
        assert!(prompt.contains("BASS (recent):"));
        assert!(prompt.ends_with("play faster"));
    }

    #[test]
    fn build_prompt_tolerates_empty_sections() {
        let prompt = build_prompt("TEMPLATE", "", "");
        assert_eq!(prompt, "TEMPLATE");
    }

    struct RecordingSink {
        received: Vec<(Instrument, u32, TrackerStep)>,
        stopped: bool,
    }

    impl PlaybackSink for RecordingSink {
        fn enqueue_step(
            &mut self,
            instrument: Instrument,
            step_index: u32,
            step: TrackerStep,
        ) -> Result<(), String> {
            self.received.push((instrument, step_index, step));
            Ok(())
        }

        fn stop_all(&mut self) {
            self.stopped = true;
        }
    }

    #[test]
    fn dispatch_events_forwards_every_event_in_order() {
        let mut sink = RecordingSink { received: Vec::new(), stopped: false };
        let events = vec![
            TrackerLineEvent {
                instrument: Instrument::Bass,
                step_index: 0,
                step: TrackerStep::Notes(vec![NoteEvent::new(36, 80)]),
                line: "C2:80".to_string(),
            },
            TrackerLineEvent {
                instrument: Instrument::Bass,
                step_index: 1,
                step: TrackerStep::Rest,
                line: ".".to_string(),
            },
        ];
        dispatch_events(events, &mut sink);
        assert_eq!(sink.received.len(), 2);
        assert_eq!(sink.received[0].1, 0);
        assert_eq!(sink.received[1].1, 1);
    }

    struct FailingSink;
    impl PlaybackSink for FailingSink {
        fn enqueue_step(&mut self, _: Instrument, _: u32, _: TrackerStep) -> Result<(), String> {
            Err("backend not ready".to_string())
        }
        fn stop_all(&mut self) {}
    }

    #[test]
    fn a_failing_dispatch_is_logged_and_skipped_not_fatal() {
        let mut sink = FailingSink;
        let events = vec![TrackerLineEvent {
            instrument: Instrument::Sax,
            step_index: 0,
            step: TrackerStep::Rest,
            line: ".".to_string(),
        }];
        dispatch_events(events, &mut sink);
    }

    #[tokio::test]
    async fn run_exits_as_aborted_without_touching_the_network_when_already_stopped() {
        let config = Arc::new(Config::default());
        let client = LlmClient::new("http://127.0.0.1:0", "test-model");
        let sink = RecordingSink { received: Vec::new(), stopped: false };
        let mut generation = GenerationLoop::new(config, client, sink, "TEMPLATE");
        generation.running_flag().store(false, Ordering::SeqCst);

        let outcome = generation.run("").await;
        assert!(matches!(outcome, GenerationOutcome::Aborted));
    }
}
