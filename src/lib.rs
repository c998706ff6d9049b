//! Client for streaming completion backends.
//!
//! Speaks two wire dialects behind one interface: the native SSE streaming
//! protocol and the Anthropic-style messages protocol, selected per request
//! from the configured endpoint. Turns are cancellable, deliver events in
//! arrival order, and end with exactly one terminal notification.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod logger;
pub mod multiplexer;
pub mod trace;
pub mod transport;
pub mod types;

pub use client::{CompletionStream, CompletionsClient};
pub use config::{ClientConfig, ConfigSource};
pub use error::Error;
pub use logger::{CompletionLogger, NoopLogger};
pub use multiplexer::{DEFAULT_TOPIC, ResponseMultiplexer, TopicHandler};
pub use types::{
    CompletionCallbacks, CompletionEvent, CompletionParameters, Message, RequestOptions, Speaker,
    TurnEvent,
};
