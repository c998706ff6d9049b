//! Shared types for the completion protocol.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Human,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub speaker: Speaker,
    pub text: String,
}

impl Message {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }
}

/// Model parameters for one completion request. Immutable once submitted;
/// the client may apply a temperature-zero override before transmission.
///
/// Serializes directly as the native streaming dialect's wire body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionParameters {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens_to_sample: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    pub stream: bool,
    pub fast: bool,
}

/// Wire-protocol options for one request, orthogonal to the model
/// parameters.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Protocol version negotiated with the backend. Version 0 streams
    /// cumulative completion text; version 1 and later stream increments.
    pub api_version: u32,
    /// Caller-supplied headers. These win on key collision with configured
    /// headers and client defaults.
    pub custom_headers: HashMap<String, String>,
}

/// One structured event reassembled from the wire. Produced in strict
/// arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEvent {
    /// A text-bearing frame. Cumulative or incremental depending on the
    /// dialect and negotiated protocol version.
    Completion { text: String },
    Done,
}

/// What a turn produces, as observed by the caller. `Complete` and `Error`
/// are terminal; exactly one of them ends a turn that was not cancelled.
#[derive(Debug)]
pub enum TurnEvent {
    /// The cumulative completion text so far.
    Change(String),
    Complete,
    Error(Error),
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Complete | TurnEvent::Error(_))
    }
}

/// Callback form of the turn contract. After `on_complete` or `on_error`
/// fires, no further callback fires for that request.
pub trait CompletionCallbacks: Send {
    fn on_change(&mut self, text: &str);
    fn on_complete(&mut self);
    fn on_error(&mut self, error: &Error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_serialize_camel_case() {
        let params = CompletionParameters {
            model: "test-model".into(),
            messages: vec![Message::new(Speaker::Human, "hi")],
            max_tokens_to_sample: 1000,
            temperature: Some(0.2),
            top_k: Some(-1),
            top_p: None,
            stop_sequences: vec!["\n\nHuman:".into()],
            stream: true,
            fast: false,
        };

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["maxTokensToSample"], 1000);
        assert_eq!(json["topK"], -1);
        assert_eq!(json["stopSequences"][0], "\n\nHuman:");
        assert_eq!(json["messages"][0]["speaker"], "human");
        assert!(json.get("topP").is_none());
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_empty_stop_sequences_omitted() {
        let params = CompletionParameters {
            model: "m".into(),
            messages: vec![],
            max_tokens_to_sample: 10,
            temperature: None,
            top_k: None,
            top_p: None,
            stop_sequences: vec![],
            stream: false,
            fast: true,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert!(json.get("stopSequences").is_none());
    }

    #[test]
    fn test_turn_event_terminality() {
        assert!(!TurnEvent::Change("a".into()).is_terminal());
        assert!(TurnEvent::Complete.is_terminal());
        assert!(TurnEvent::Error(Error::NeedsAuthChallenge).is_terminal());
    }
}
