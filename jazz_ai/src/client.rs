//! OpenAI-compatible chat-completions client with streaming SSE decode.
//!
//! Generalises the teacher's `harmonium_lab::agent::claude::ClaudeAgent` —
//! same `reqwest::Client` ownership, same builder-style configuration, same
//! blocking/async split where it matters — to an arbitrary
//! `POST {base_url}/v1/chat/completions` endpoint that may answer either
//! as one JSON document or as a `text/event-stream`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jazz_core::log;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    RequestFailed(String),
    #[error("failed to parse response: {0}")]
    ParseError(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    stream: bool,
    temperature: f64,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct NonStreamingResponse {
    choices: Vec<NonStreamingChoice>,
}

#[derive(Deserialize)]
struct NonStreamingChoice {
    message: NonStreamingMessage,
}

#[derive(Deserialize)]
struct NonStreamingMessage {
    content: String,
}

#[derive(Serialize, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Serialize, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Serialize, Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

/// Signals an in-flight [`ChatStream`] to stop yielding further deltas.
#[derive(Clone)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug)]
pub struct LlmClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    client: reqwest::Client,
}

impl LlmClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            temperature: 0.9,
            client: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    fn request(&self, stream: bool, messages: Vec<ChatMessage>) -> reqwest::RequestBuilder {
        let body = ChatRequest { model: self.model.clone(), stream, temperature: self.temperature, messages };
        let mut request = self.client.post(format!("{}/v1/chat/completions", self.base_url)).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        request
    }

    /// Open a streaming chat completion. Returns the decoder plus an
    /// [`AbortHandle`] the caller can use to stop mid-stream.
    ///
    /// # Errors
    /// Returns [`TransportError`] if the request itself fails to send or
    /// the server responds with a non-success status.
    pub async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<(ChatStream, AbortHandle), TransportError> {
        let response = self.request(true, messages).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::RequestFailed(format!("HTTP {status}: {body}")));
        }
        let aborted = Arc::new(AtomicBool::new(false));
        let handle = AbortHandle { aborted: aborted.clone() };
        Ok((ChatStream { response, buffer: String::new(), done: false, aborted }, handle))
    }

    /// Non-streaming completion; accepts the `{choices:[{message:{content}}]}`
    /// shape the spec requires as a fallback.
    ///
    /// # Errors
    /// Returns [`TransportError`] on transport failure or an unparsable body.
    pub async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, TransportError> {
        let response = self.request(false, messages).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::RequestFailed(format!("HTTP {status}: {body}")));
        }
        let parsed: NonStreamingResponse =
            response.json().await.map_err(|e| TransportError::ParseError(e.to_string()))?;
        Ok(parsed.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default())
    }
}

/// Pull-based decoder over a `text/event-stream` response body. Call
/// [`ChatStream::next_delta`] in a loop; `Ok(None)` means the stream ended
/// (terminal `data: [DONE]` frame, abort, or connection close).
pub struct ChatStream {
    response: reqwest::Response,
    buffer: String,
    done: bool,
    aborted: Arc<AtomicBool>,
}

impl ChatStream {
    /// # Errors
    /// Returns [`TransportError`] if reading the next chunk off the wire
    /// fails.
    pub async fn next_delta(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            if self.done || self.aborted.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if let Some(frame_end) = self.buffer.find("\n\n") {
                let frame = self.buffer[..frame_end].to_string();
                self.buffer.drain(..=frame_end + 1);
                if let Some(delta) = decode_frame(&frame, &mut self.done) {
                    return Ok(Some(delta));
                }
                continue;
            }
            match self.response.chunk().await? {
                Some(bytes) => self.buffer.push_str(&String::from_utf8_lossy(&bytes)),
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }
}

/// Decodes one `data: ...` SSE frame. Sets `*done` on the terminal
/// `[DONE]` sentinel; logs and skips (returning `None`) any payload that
/// isn't valid JSON rather than failing the whole stream.
fn decode_frame(frame: &str, done: &mut bool) -> Option<String> {
    let line = frame.trim();
    let payload = line.strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        *done = true;
        return None;
    }
    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => chunk.choices.into_iter().next().and_then(|c| c.delta.content),
        Err(err) => {
            log::warn(&format!("skipping non-JSON SSE frame: {err}"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_of(content: &str) -> ChatCompletionChunk {
        ChatCompletionChunk { choices: vec![ChunkChoice { delta: ChunkDelta { content: Some(content.to_string()) } }] }
    }

    #[test]
    fn decode_frame_extracts_delta_content() {
        let mut done = false;
        let json = serde_json::to_string(&chunk_of("hello")).unwrap();
        let frame = format!("data: {json}");
        assert_eq!(decode_frame(&frame, &mut done), Some("hello".to_string()));
        assert!(!done);
    }

    #[test]
    fn decode_frame_recognises_terminal_done() {
        let mut done = false;
        assert_eq!(decode_frame("data: [DONE]", &mut done), None);
        assert!(done);
    }

    #[test]
    fn decode_frame_skips_non_json_payload_without_panicking() {
        let mut done = false;
        assert_eq!(decode_frame("data: not json at all", &mut done), None);
        assert!(!done);
    }

    #[test]
    fn abort_handle_stops_further_deltas() {
        let aborted = Arc::new(AtomicBool::new(false));
        let handle = AbortHandle { aborted: aborted.clone() };
        handle.abort();
        assert!(aborted.load(Ordering::SeqCst));
    }
}
