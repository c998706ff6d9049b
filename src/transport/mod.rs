//! Transport selection and the shared streaming machinery.
//!
//! Each backend dialect gets its own transport implementation; everything
//! dialect-neutral (terminal-callback guarding, stream pumping, frame
//! accumulation) lives here so the wire-format code stays small and
//! independently testable.

mod anthropic;
mod native;

pub use anthropic::AnthropicTransport;
pub use native::NativeTransport;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::http::{EventParser, Utf8Decoder};
use crate::logger::CompletionLogger;
use crate::trace::TraceContext;
use crate::types::{CompletionEvent, CompletionParameters, RequestOptions, TurnEvent};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Everything a transport needs for one turn. Owned by the turn; nothing in
/// here is shared with a concurrent request.
pub struct TurnRequest {
    pub params: CompletionParameters,
    pub request: RequestOptions,
    pub config: ClientConfig,
    pub trace: TraceContext,
    pub logger: Arc<dyn CompletionLogger>,
}

/// A backend dialect. All outcomes, success or failure, are delivered
/// through the sink; implementations never panic the turn.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Drive a streaming request to its terminal state.
    async fn stream(&self, req: TurnRequest, sink: &mut EventSink, token: CancellationToken);

    /// Non-streaming fallback: one POST, one JSON body.
    async fn fetch(&self, req: TurnRequest, sink: &mut EventSink, token: CancellationToken);
}

/// Delivers turn events to the consumer and enforces the exactly-once
/// terminal contract: after `complete` or `error` fires, every further
/// terminal call is dropped, even when failure sources race.
pub struct EventSink {
    tx: mpsc::Sender<TurnEvent>,
    terminated: bool,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self {
            tx,
            terminated: false,
        }
    }

    pub async fn change(&mut self, text: &str) {
        if self.terminated {
            return;
        }
        let _ = self.tx.send(TurnEvent::Change(text.to_string())).await;
    }

    pub async fn complete(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        let _ = self.tx.send(TurnEvent::Complete).await;
    }

    pub async fn error(&mut self, error: Error) {
        if self.terminated {
            tracing::debug!(error = %error, "dropping error after terminal callback");
            return;
        }
        self.terminated = true;
        let _ = self.tx.send(TurnEvent::Error(error)).await;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

/// How streamed text frames combine into the cumulative completion.
#[derive(Debug)]
pub(crate) enum CompletionAccumulator {
    /// Each frame replaces the whole completion (native dialect, protocol
    /// version 0).
    Cumulative(String),
    /// Each frame appends to the completion.
    Incremental(String),
}

impl CompletionAccumulator {
    pub(crate) fn for_api_version(version: u32) -> Self {
        if version >= 1 {
            Self::Incremental(String::new())
        } else {
            Self::Cumulative(String::new())
        }
    }

    pub(crate) fn incremental() -> Self {
        Self::Incremental(String::new())
    }

    /// Fold in one frame and return the cumulative text so far.
    pub(crate) fn push(&mut self, text: &str) -> &str {
        match self {
            Self::Cumulative(full) => {
                full.clear();
                full.push_str(text);
                full
            }
            Self::Incremental(full) => {
                full.push_str(text);
                full
            }
        }
    }
}

/// Pump a 2xx response body through the decoder and parser until the stream
/// terminates, feeding the sink.
///
/// Cancellation is checked before every chunk (biased select), so once the
/// token fires no buffered byte reaches the parser and no terminal callback
/// is sent. A connection that closes with zero parsed events and no prior
/// error is reported as an error, never as a silent completion.
pub(crate) async fn drive_stream<S, E>(
    body: S,
    mut accumulator: CompletionAccumulator,
    sink: &mut EventSink,
    token: &CancellationToken,
    logger: &dyn CompletionLogger,
) where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    pin_mut!(body);
    let mut decoder = Utf8Decoder::new();
    let mut parser = EventParser::new();
    let mut received_any = false;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("completion stream cancelled");
                return;
            }
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                let text = decoder.feed(&bytes);
                let events = parser.feed(&text);
                if !events.is_empty() {
                    received_any = true;
                    logger.on_events(&events);
                }
                for event in events {
                    match event {
                        CompletionEvent::Completion { text } => {
                            sink.change(accumulator.push(&text)).await;
                        }
                        CompletionEvent::Done => {
                            logger.on_complete();
                            sink.complete().await;
                            return;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                let error = Error::Connection(e.to_string());
                logger.on_error(&error.to_string());
                sink.error(error).await;
                return;
            }
            None => break,
        }
    }

    // Stream ended without a terminal frame.
    if received_any {
        logger.on_complete();
        sink.complete().await;
    } else {
        let error = Error::Connection("connection closed without receiving any events".into());
        logger.on_error(&error.to_string());
        sink.error(error).await;
    }
}

/// Picks the transport servicing a request. Selection is a pure function of
/// the endpoint: the reserved vendor host routes to the Anthropic-style
/// dialect, everything else to the native dialect. Nothing is cached, so a
/// configuration change takes effect on the very next call.
pub struct Router {
    native: Arc<dyn Transport>,
    anthropic: Arc<dyn Transport>,
}

/// Host of the reserved endpoint that selects the Anthropic-style dialect.
pub const ANTHROPIC_API_HOST: &str = "api.anthropic.com";

impl Router {
    pub fn new() -> Self {
        Self {
            native: Arc::new(NativeTransport::new()),
            anthropic: Arc::new(AnthropicTransport::new()),
        }
    }

    /// Swap in alternative transports, for tests.
    pub fn with_transports(native: Arc<dyn Transport>, anthropic: Arc<dyn Transport>) -> Self {
        Self { native, anthropic }
    }

    pub fn select(&self, endpoint: &str) -> Arc<dyn Transport> {
        if is_anthropic_endpoint(endpoint) {
            Arc::clone(&self.anthropic)
        } else {
            Arc::clone(&self.native)
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn is_anthropic_endpoint(endpoint: &str) -> bool {
    Url::parse(endpoint)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(ANTHROPIC_API_HOST)))
        .unwrap_or(false)
}
