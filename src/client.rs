//! Completion client façade.
//!
//! Every call re-resolves configuration and re-selects a transport, so auth,
//! endpoint or capability changes apply on the very next request. A turn runs
//! on its own spawned task and delivers events over a bounded channel; the
//! callback API is a thin adapter draining the same channel.

use crate::config::{ClientConfig, ConfigSource};
use crate::logger::{CompletionLogger, NoopLogger};
use crate::trace::TraceContext;
use crate::transport::{EventSink, Router, TurnRequest};
use crate::types::{CompletionCallbacks, CompletionParameters, RequestOptions, TurnEvent};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Turn events buffered between the transport task and the consumer. The
/// channel is bounded so a slow consumer backpressures the stream pump.
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct CompletionsClient {
    config: Arc<dyn ConfigSource>,
    router: Router,
    logger: Arc<dyn CompletionLogger>,
}

impl CompletionsClient {
    pub fn new(config: impl ConfigSource + 'static) -> Self {
        Self {
            config: Arc::new(config),
            router: Router::new(),
            logger: Arc::new(NoopLogger),
        }
    }

    pub fn with_logger(mut self, logger: impl CompletionLogger + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Start a turn and return its cancellable event stream. The request goes
    /// out lazily on the spawned task; dropping the stream cancels the turn.
    pub fn stream(
        &self,
        params: CompletionParameters,
        request: RequestOptions,
    ) -> CompletionStream {
        let token = CancellationToken::new();
        let rx = self.spawn_turn(params, request, token.clone());
        CompletionStream {
            rx,
            token,
            finished: false,
        }
    }

    /// Run a turn to completion, dispatching each event to `callbacks`.
    ///
    /// A thin adapter over the same event sequence [`stream`](Self::stream)
    /// yields. After `on_complete` or `on_error` fires no further callback
    /// fires, and once `token` is cancelled no callback of any kind fires.
    pub async fn stream_with_callbacks(
        &self,
        params: CompletionParameters,
        request: RequestOptions,
        callbacks: &mut dyn CompletionCallbacks,
        token: CancellationToken,
    ) {
        // The turn runs on a child token, so finishing (and dropping) the
        // sequence never cancels anything else the caller's token governs.
        let turn_token = token.child_token();
        let rx = self.spawn_turn(params, request, turn_token.clone());
        let mut stream = CompletionStream {
            rx,
            token: turn_token,
            finished: false,
        };
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                event = stream.next() => event,
            };
            match event {
                Some(TurnEvent::Change(text)) => callbacks.on_change(&text),
                Some(TurnEvent::Complete) => {
                    callbacks.on_complete();
                    return;
                }
                Some(TurnEvent::Error(error)) => {
                    callbacks.on_error(&error);
                    return;
                }
                None => return,
            }
        }
    }

    fn spawn_turn(
        &self,
        params: CompletionParameters,
        request: RequestOptions,
        token: CancellationToken,
    ) -> mpsc::Receiver<TurnEvent> {
        let config = self.config.resolve();
        let params = apply_sampling_policy(params, &config);
        let transport = self.router.select(&config.endpoint);
        let trace = TraceContext::new();
        let logger = Arc::clone(&self.logger);
        let streaming = config.streaming_enabled;

        tracing::debug!(
            trace_id = %trace.trace_id,
            endpoint = %config.endpoint,
            streaming,
            "starting completion turn"
        );

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut sink = EventSink::new(tx);
            let req = TurnRequest {
                params,
                request,
                config,
                trace,
                logger,
            };
            if streaming {
                transport.stream(req, &mut sink, token).await;
            } else {
                transport.fetch(req, &mut sink, token).await;
            }
        });
        rx
    }
}

/// Deterministic-sampling override: when configured, every request goes out
/// with temperature zero no matter what the caller asked for.
fn apply_sampling_policy(
    mut params: CompletionParameters,
    config: &ClientConfig,
) -> CompletionParameters {
    if config.temperature_zero {
        params.temperature = Some(0.0);
    }
    params
}

/// A turn's events as a finite async sequence. Yields `Change` items followed
/// by exactly one terminal item, then ends; it never restarts. Dropping the
/// stream (or calling [`cancel`](Self::cancel)) cancels the underlying turn,
/// after which no further item is yielded.
pub struct CompletionStream {
    rx: mpsc::Receiver<TurnEvent>,
    token: CancellationToken,
    finished: bool,
}

impl CompletionStream {
    /// Cancel the turn. Safe to call more than once.
    pub fn cancel(&mut self) {
        self.finished = true;
        self.token.cancel();
        self.rx.close();
    }

    /// Token observing this turn's cancellation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Stream for CompletionStream {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for CompletionStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
