//! Trace propagation for completion requests.
//!
//! Generates W3C `traceparent` headers and keeps the active trace id around
//! so transport errors can be correlated with server-side logs.

use rand::RngCore;
use uuid::Uuid;

/// Request-scoped trace identity. Created once per turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// 32 lowercase hex characters.
    pub trace_id: String,
    /// 16 lowercase hex characters.
    pub span_id: String,
}

impl TraceContext {
    pub fn new() -> Self {
        let mut span = [0u8; 8];
        rand::rng().fill_bytes(&mut span);
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: span.iter().map(|b| format!("{b:02x}")).collect(),
        }
    }

    /// The W3C trace context header value for this request.
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_shape() {
        let trace = TraceContext::new();
        assert_eq!(trace.trace_id.len(), 32);
        assert_eq!(trace.span_id.len(), 16);
        assert!(trace.trace_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(trace.span_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_traceparent_format() {
        let trace = TraceContext {
            trace_id: "0af7651916cd43dd8448eb211c80319c".into(),
            span_id: "b7ad6b7169203331".into(),
        };
        assert_eq!(
            trace.traceparent(),
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
        );
    }

    #[test]
    fn test_contexts_are_unique() {
        assert_ne!(TraceContext::new(), TraceContext::new());
    }
}
