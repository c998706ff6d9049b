//! Shared HTTP plumbing for the completion transports.

mod decode;
mod sse;

pub use decode::Utf8Decoder;
pub use sse::EventParser;

use crate::config::ClientConfig;
use crate::error::{Error, RATE_LIMIT_FEATURE};
use crate::trace::TraceContext;
use crate::types::RequestOptions;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT_ENCODING, CONNECTION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER,
    WWW_AUTHENTICATE,
};
use std::time::Duration;

/// Connection timeout. No overall timeout is set: a streaming response stays
/// open for as long as the model produces tokens.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifies this client to the backend.
const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Vendor header marking paid-tier users. Upgrade is only on offer when the
/// header is present and explicitly `false`.
const PRO_USER_HEADER: &str = "x-is-pro-user";
const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";

pub(crate) fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Query parameters identifying the client, appended to every request URL.
pub(crate) fn client_info_params() -> [(&'static str, &'static str); 2] {
    [
        ("client-name", CLIENT_NAME),
        ("client-version", CLIENT_VERSION),
    ]
}

/// Assemble the header set shared by both dialects.
///
/// Order matters: defaults first, then configured headers, then
/// caller-supplied request headers (which win on collision), and finally the
/// trace and identification headers which must not be overridden.
pub(crate) fn request_headers(
    config: &ClientConfig,
    request: &RequestOptions,
    trace: &TraceContext,
) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    // Disable gzip so the server does not batch SSE frames.
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip;q=0"));

    for (name, value) in config.custom_headers.iter().chain(&request.custom_headers) {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|_| Error::InvalidRequest(format!("invalid header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::InvalidRequest(format!("invalid value for header {name}")))?;
        headers.insert(name, value);
    }

    let traceparent = HeaderValue::from_str(&trace.traceparent())
        .map_err(|_| Error::InvalidRequest("invalid traceparent".into()))?;
    headers.insert(HeaderName::from_static("traceparent"), traceparent);

    let identity = HeaderValue::from_str(&format!("{CLIENT_NAME} {CLIENT_VERSION}"))
        .map_err(|_| Error::InvalidRequest("invalid client identification".into()))?;
    headers.insert(HeaderName::from_static("x-requested-with"), identity);

    Ok(headers)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Build the rate-limit error for a 429 from its headers and drained body.
pub(crate) fn rate_limit_error(headers: &HeaderMap, message: String) -> Error {
    // Explicit `false` means the account can upgrade out of the limit; an
    // absent header means no upgrade exists.
    let upgrade_available = header_str(headers, PRO_USER_HEADER) == Some("false");
    let limit = header_str(headers, RATE_LIMIT_LIMIT_HEADER).and_then(|v| v.parse().ok());
    let retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    Error::RateLimit {
        feature: RATE_LIMIT_FEATURE.into(),
        message,
        upgrade_available,
        limit,
        retry_after,
    }
}

/// Detect a custom authentication challenge from status and headers alone.
/// Must run before any body is read.
pub(crate) fn is_auth_challenge(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::UNAUTHORIZED && headers.contains_key(WWW_AUTHENTICATE)
}

/// Classify a non-2xx response, draining its body first. Error payloads can
/// be chunked mid-character too, so they go through the UTF-8 decoder.
pub(crate) async fn classify_error_response(
    response: reqwest::Response,
    url: &str,
    trace: &TraceContext,
) -> Error {
    let status = response.status();
    let headers = response.headers().clone();

    if is_auth_challenge(status, &headers) {
        return Error::NeedsAuthChallenge;
    }

    let message = drain_body(response).await;

    if status == StatusCode::TOO_MANY_REQUESTS {
        return rate_limit_error(&headers, message);
    }

    Error::Network {
        url: url.to_string(),
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        message,
        trace_id: Some(trace.trace_id.clone()),
    }
}

/// Read a response body to completion through the incremental decoder.
async fn drain_body(response: reqwest::Response) -> String {
    drain_text(response.bytes_stream()).await
}

/// Decode a chunked byte stream to text. Error payloads are chunked like any
/// other body, so multi-byte characters split across chunks reassemble here
/// too; a read failure mid-body keeps what was already decoded.
pub(crate) async fn drain_text<S, E>(body: S) -> String
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    pin_mut!(body);
    let mut decoder = Utf8Decoder::new();
    let mut out = String::new();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => out.push_str(&decoder.feed(&bytes)),
            Err(e) => {
                tracing::debug!(error = %e, "error body truncated mid-read");
                break;
            }
        }
    }
    out.push_str(&decoder.finish());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn options_with(headers: &[(&str, &str)]) -> RequestOptions {
        RequestOptions {
            api_version: 1,
            custom_headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_request_headers_defaults() {
        let config = ClientConfig::default();
        let trace = TraceContext::new();
        let headers = request_headers(&config, &RequestOptions::default(), &trace).unwrap();

        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get(CONNECTION).unwrap(), "keep-alive");
        assert_eq!(headers.get(ACCEPT_ENCODING).unwrap(), "gzip;q=0");
        assert_eq!(
            headers.get("traceparent").unwrap().to_str().unwrap(),
            trace.traceparent()
        );
        assert!(headers.contains_key("x-requested-with"));
    }

    #[test]
    fn test_caller_headers_win_over_config() {
        let mut config = ClientConfig::default();
        config
            .custom_headers
            .insert("x-team".into(), "configured".into());
        let request = options_with(&[("x-team", "caller")]);
        let headers = request_headers(&config, &request, &TraceContext::new()).unwrap();
        assert_eq!(headers.get("x-team").unwrap(), "caller");
    }

    #[test]
    fn test_caller_headers_can_override_defaults_but_not_trace() {
        let config = ClientConfig::default();
        let request = options_with(&[("content-type", "text/plain"), ("traceparent", "forged")]);
        let trace = TraceContext::new();
        let headers = request_headers(&config, &request, &trace).unwrap();
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "text/plain");
        // Trace propagation is applied last and cannot be spoofed.
        assert_eq!(
            headers.get("traceparent").unwrap().to_str().unwrap(),
            trace.traceparent()
        );
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let config = ClientConfig::default();
        let request = options_with(&[("bad header", "v")]);
        let err = request_headers(&config, &request, &TraceContext::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    fn rate_limit_headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.insert(
                HeaderName::try_from(*k).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn test_rate_limit_retry_after_is_raw_header_value() {
        let headers = rate_limit_headers(&[("retry-after", "30")]);
        let err = rate_limit_error(&headers, "slow down".into());
        match err {
            Error::RateLimit {
                retry_after,
                limit,
                upgrade_available,
                message,
                ..
            } => {
                assert_eq!(retry_after.as_deref(), Some("30"));
                assert_eq!(limit, None);
                assert!(!upgrade_available);
                assert_eq!(message, "slow down");
            }
            other => panic!("expected RateLimit, got {other:?}"),
        }
    }

    #[test]
    fn test_rate_limit_upgrade_flag_requires_explicit_false() {
        let headers = rate_limit_headers(&[("x-is-pro-user", "false")]);
        assert!(matches!(
            rate_limit_error(&headers, String::new()),
            Error::RateLimit {
                upgrade_available: true,
                ..
            }
        ));

        let headers = rate_limit_headers(&[("x-is-pro-user", "true")]);
        assert!(matches!(
            rate_limit_error(&headers, String::new()),
            Error::RateLimit {
                upgrade_available: false,
                ..
            }
        ));
    }

    #[test]
    fn test_rate_limit_limit_header_parsed() {
        let headers = rate_limit_headers(&[("x-ratelimit-limit", "500")]);
        assert!(matches!(
            rate_limit_error(&headers, String::new()),
            Error::RateLimit {
                limit: Some(500),
                ..
            }
        ));
    }

    #[test]
    fn test_auth_challenge_detection() {
        let challenge = rate_limit_headers(&[("www-authenticate", "Custom realm=\"sso\"")]);
        assert!(is_auth_challenge(StatusCode::UNAUTHORIZED, &challenge));
        assert!(!is_auth_challenge(StatusCode::FORBIDDEN, &challenge));
        assert!(!is_auth_challenge(
            StatusCode::UNAUTHORIZED,
            &HeaderMap::new()
        ));
    }

    #[tokio::test]
    async fn test_error_body_drained_across_mid_character_chunks() {
        let payload = "{\"error\":\"caf\u{00e9} is closed\"}".as_bytes();
        // Split between the two bytes of "é".
        let split = payload.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let (a, b) = payload.split_at(split);
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::copy_from_slice(a)),
            Ok(Bytes::copy_from_slice(b)),
        ];

        let text = drain_text(futures::stream::iter(chunks)).await;
        assert_eq!(text, "{\"error\":\"café is closed\"}");
    }

    #[tokio::test]
    async fn test_error_body_read_failure_keeps_decoded_prefix() {
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"upstream do")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"never read")),
        ];

        let text = drain_text(futures::stream::iter(chunks)).await;
        assert_eq!(text, "upstream do");
    }

    #[test]
    fn test_client_identity_params() {
        let params: HashMap<_, _> = client_info_params().into_iter().collect();
        assert_eq!(params["client-name"], "strand");
        assert!(!params["client-version"].is_empty());
    }
}
