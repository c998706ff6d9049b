//! Parses SSE-framed completion text into structured events.
//!
//! Framing is line-oriented: only complete lines are parsed and the trailing
//! partial line is buffered until the next call, so frames split across
//! network chunks reassemble cleanly. A malformed frame is skipped without
//! aborting the stream.

use crate::types::CompletionEvent;
use serde::Deserialize;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// One decoded JSON frame. Field presence varies by dialect and server
/// version; unknown frame types deserialize fine and are ignored.
#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: Option<String>,
    /// Native dialect: completion text (cumulative or incremental).
    completion: Option<String>,
    /// Anthropic-style dialect: delta carried by `content_block_delta`.
    delta: Option<FrameDelta>,
}

#[derive(Debug, Deserialize)]
struct FrameDelta {
    text: Option<String>,
}

/// Incremental event parser. Owned by exactly one in-flight request; never
/// re-emits an event it has already returned.
#[derive(Debug, Default)]
pub struct EventParser {
    /// Decoded text that does not yet end in a newline.
    buffer: String,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed decoded text and return the events carried by every complete
    /// line. The last, possibly-partial, line stays buffered.
    pub fn feed(&mut self, text: &str) -> Vec<CompletionEvent> {
        self.buffer.push_str(text);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            Self::parse_line(line, &mut events);
        }

        events
    }

    fn parse_line(line: &str, events: &mut Vec<CompletionEvent>) {
        // `event:` lines, comments and blank separators carry no payload.
        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };

        if data == DONE_MARKER {
            events.push(CompletionEvent::Done);
            return;
        }

        let frame: Frame = match serde_json::from_str(data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed completion frame");
                return;
            }
        };

        match frame.kind.as_deref() {
            Some("done") | Some("message_stop") => {
                events.push(CompletionEvent::Done);
                return;
            }
            _ => {}
        }

        if let Some(text) = frame.completion {
            events.push(CompletionEvent::Completion { text });
        } else if let Some(text) = frame.delta.and_then(|d| d.text) {
            events.push(CompletionEvent::Completion { text });
        } else {
            // Unknown frame type (e.g. ping, message_start): ignored for
            // forward compatibility.
            tracing::debug!(kind = ?frame.kind, "ignoring unrecognized completion frame");
        }
    }

    /// Whether a partial line is buffered.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// The buffered partial line, for diagnostics.
    pub fn remaining(&self) -> &str {
        &self.buffer
    }
}
