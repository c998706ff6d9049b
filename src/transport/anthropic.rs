//! Anthropic-style messages dialect.
//!
//! The native parameter set is translated into the vendor's message schema:
//! a leading system-speaker message becomes the separate `system` field, and
//! streamed deltas are always incremental, accumulated locally before every
//! change notification.

use super::{CompletionAccumulator, EventSink, Transport, TurnRequest, drive_stream};
use crate::error::Error;
use crate::http;
use crate::types::{CompletionParameters, Speaker};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const MESSAGES_PATH: &str = "/v1/messages";
const API_VERSION: &str = "2023-06-01";
const BETA_FEATURES: &str = "messages-2023-12-15";
const DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<VendorMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    stream: bool,
}

#[derive(Debug, Serialize, PartialEq)]
struct VendorMessage {
    role: &'static str,
    content: String,
}

/// Non-streaming response body: a content array with text blocks.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

pub struct AnthropicTransport {
    client: reqwest::Client,
}

impl AnthropicTransport {
    pub fn new() -> Self {
        Self {
            client: http::build_http_client(),
        }
    }

    fn messages_url(endpoint: &str) -> String {
        format!("{}{MESSAGES_PATH}", endpoint.trim_end_matches('/'))
    }

    fn headers(req: &TurnRequest) -> Result<HeaderMap, Error> {
        let mut headers = http::request_headers(&req.config, &req.request, &req.trace)?;
        let Some(api_key) = &req.config.api_key else {
            return Err(Error::InvalidRequest(
                "no API key configured for the vendor endpoint".into(),
            ));
        };
        let key = HeaderValue::from_str(api_key)
            .map_err(|_| Error::InvalidRequest("API key is not a valid header".into()))?;
        headers.insert(HeaderName::from_static("x-api-key"), key);
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(API_VERSION),
        );
        headers.insert(
            HeaderName::from_static("anthropic-beta"),
            HeaderValue::from_static(BETA_FEATURES),
        );
        Ok(headers)
    }

    /// Reduce a prefixed model identifier (`provider::version::model`) to the
    /// bare vendor model id. Unprefixed and foreign identifiers pass through.
    fn vendor_model_id(model: &str) -> &str {
        let parts: Vec<&str> = model.split("::").collect();
        match parts.as_slice() {
            [provider, _, name] if provider.eq_ignore_ascii_case("anthropic") => name,
            _ => model,
        }
    }

    /// Translate to the vendor schema, hoisting a leading system message out
    /// of the message list.
    fn build_request(params: &CompletionParameters, stream: bool) -> MessagesRequest {
        let mut messages: Vec<VendorMessage> = params
            .messages
            .iter()
            .map(|m| VendorMessage {
                role: match m.speaker {
                    Speaker::Human => "user",
                    Speaker::Assistant => "assistant",
                    Speaker::System => "system",
                },
                content: m.text.clone(),
            })
            .collect();

        let system = if messages.first().is_some_and(|m| m.role == "system") {
            Some(messages.remove(0).content)
        } else {
            None
        };

        let model = Self::vendor_model_id(&params.model);
        MessagesRequest {
            model: if model.is_empty() {
                DEFAULT_MODEL.to_string()
            } else {
                model.to_string()
            },
            messages,
            system,
            max_tokens: params.max_tokens_to_sample,
            temperature: params.temperature,
            top_k: params.top_k,
            top_p: params.top_p,
            stop_sequences: params.stop_sequences.clone(),
            stream,
        }
    }

    async fn send(
        &self,
        req: &TurnRequest,
        url: &str,
        body: &MessagesRequest,
    ) -> Result<reqwest::Response, Error> {
        let headers = Self::headers(req)?;

        tracing::debug!(
            url,
            model = %body.model,
            stream = body.stream,
            "vendor completion request"
        );
        req.logger.on_request(url, &req.params);

        let response = self
            .client
            .post(url)
            .headers(headers)
            .query(&http::client_info_params())
            .json(body)
            .send()
            .await
            .map_err(|e| Error::from_transport(e, &req.config.endpoint))?;

        if !response.status().is_success() {
            return Err(http::classify_error_response(response, url, &req.trace).await);
        }
        Ok(response)
    }
}

impl Default for AnthropicTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for AnthropicTransport {
    async fn stream(&self, req: TurnRequest, sink: &mut EventSink, token: CancellationToken) {
        let url = Self::messages_url(&req.config.endpoint);
        let body = Self::build_request(&req.params, true);

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            response = self.send(&req, &url, &body) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                req.logger.on_error(&error.to_string());
                sink.error(error).await;
                return;
            }
        };

        // Vendor deltas are always incremental regardless of the negotiated
        // native protocol version.
        drive_stream(
            response.bytes_stream(),
            CompletionAccumulator::incremental(),
            sink,
            &token,
            req.logger.as_ref(),
        )
        .await;
    }

    async fn fetch(&self, req: TurnRequest, sink: &mut EventSink, token: CancellationToken) {
        let url = Self::messages_url(&req.config.endpoint);
        let body = Self::build_request(&req.params, false);

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = async {
                let response = self.send(&req, &url, &body).await?;
                response
                    .json::<MessagesResponse>()
                    .await
                    .map_err(|e| Error::Connection(format!("invalid messages response: {e}")))
            } => result,
        };

        match result {
            Ok(body) => {
                let text = body.content.into_iter().find_map(|block| match block {
                    ResponseBlock::Text { text } => Some(text),
                    ResponseBlock::Other => None,
                });
                match text {
                    Some(text) => {
                        req.logger.on_complete();
                        sink.change(&text).await;
                        sink.complete().await;
                    }
                    None => {
                        let error =
                            Error::Connection("response contained no text content block".into());
                        req.logger.on_error(&error.to_string());
                        sink.error(error).await;
                    }
                }
            }
            Err(error) => {
                req.logger.on_error(&error.to_string());
                sink.error(error).await;
            }
        }
    }
}
