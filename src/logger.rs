//! Optional request-lifecycle logger.
//!
//! Implementations record requests and streamed events for replay and
//! debugging. Hooks are called synchronously on the data path, so they must
//! return quickly; anything slow belongs on the implementor's own channel.

use crate::types::{CompletionEvent, CompletionParameters};

pub trait CompletionLogger: Send + Sync {
    /// A request is about to be transmitted to `url`.
    fn on_request(&self, url: &str, params: &CompletionParameters) {
        let _ = (url, params);
    }

    /// A batch of events was parsed from the stream.
    fn on_events(&self, events: &[CompletionEvent]) {
        let _ = events;
    }

    /// The turn failed. `message` is the classified error rendering.
    fn on_error(&self, message: &str) {
        let _ = message;
    }

    /// The turn completed cleanly.
    fn on_complete(&self) {}
}

/// Logger that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl CompletionLogger for NoopLogger {}
