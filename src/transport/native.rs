//! Native streaming dialect.
//!
//! The full parameter set goes out in one JSON body; the response is SSE
//! whose frames carry cumulative text (protocol version 0) or increments
//! (version 1 and later).

use super::{CompletionAccumulator, EventSink, Transport, TurnRequest, drive_stream};
use crate::error::Error;
use crate::http;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

const COMPLETIONS_PATH: &str = "/.api/completions/stream";

/// Non-streaming response body.
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    completion: String,
}

pub struct NativeTransport {
    client: reqwest::Client,
}

impl NativeTransport {
    pub fn new() -> Self {
        Self {
            client: http::build_http_client(),
        }
    }

    fn completions_url(endpoint: &str) -> String {
        format!("{}{COMPLETIONS_PATH}", endpoint.trim_end_matches('/'))
    }

    fn headers(req: &TurnRequest) -> Result<HeaderMap, Error> {
        let mut headers = http::request_headers(&req.config, &req.request, &req.trace)?;
        if let Some(token) = &req.config.access_token {
            let value = HeaderValue::from_str(&format!("token {token}"))
                .map_err(|_| Error::InvalidRequest("access token is not a valid header".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Issue the POST shared by both modes. Returns the classified error for
    /// anything that is not a 2xx response.
    async fn send(&self, req: &TurnRequest, url: &str) -> Result<reqwest::Response, Error> {
        let headers = Self::headers(req)?;

        let mut query: Vec<(String, String)> = http::client_info_params()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if req.request.api_version >= 1 {
            query.push(("api-version".into(), req.request.api_version.to_string()));
        }

        tracing::debug!(
            url,
            model = %req.params.model,
            api_version = req.request.api_version,
            stream = req.params.stream,
            "native completion request"
        );
        req.logger.on_request(url, &req.params);

        let response = self
            .client
            .post(url)
            .headers(headers)
            .query(&query)
            .json(&req.params)
            .send()
            .await
            .map_err(|e| Error::from_transport(e, &req.config.endpoint))?;

        if !response.status().is_success() {
            return Err(http::classify_error_response(response, url, &req.trace).await);
        }
        Ok(response)
    }
}

impl Default for NativeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for NativeTransport {
    async fn stream(&self, mut req: TurnRequest, sink: &mut EventSink, token: CancellationToken) {
        req.params.stream = true;
        let url = Self::completions_url(&req.config.endpoint);

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            response = self.send(&req, &url) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                req.logger.on_error(&error.to_string());
                sink.error(error).await;
                return;
            }
        };

        let accumulator = CompletionAccumulator::for_api_version(req.request.api_version);
        drive_stream(
            response.bytes_stream(),
            accumulator,
            sink,
            &token,
            req.logger.as_ref(),
        )
        .await;
    }

    async fn fetch(&self, mut req: TurnRequest, sink: &mut EventSink, token: CancellationToken) {
        req.params.stream = false;
        let url = Self::completions_url(&req.config.endpoint);

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = async {
                let response = self.send(&req, &url).await?;
                response
                    .json::<CompletionResponse>()
                    .await
                    .map_err(|e| Error::Connection(format!("invalid completion response: {e}")))
            } => result,
        };

        match result {
            Ok(body) => {
                req.logger.on_complete();
                sink.change(&body.completion).await;
                sink.complete().await;
            }
            Err(error) => {
                req.logger.on_error(&error.to_string());
                sink.error(error).await;
            }
        }
    }
}
