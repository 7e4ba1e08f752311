// src/agentverse/trace.rs

use std::collections::HashMap;

use uuid::Uuid;

const TRACEPARENT_HEADER: &str = "traceparent";
const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// A W3C-traceparent-shaped propagation carrier.
///
/// One [`TraceContext`] is minted per workflow at construction time and a
/// fresh span id is derived for every outbound call, so downstream spans
/// nest under a single trace id without pulling in a tracing SDK - this
/// crate only needs the wire shape, not exporters or samplers.
#[derive(Debug, Clone)]
pub struct TraceContext {
    trace_id: String,
}

impl TraceContext {
    /// Originates a new trace for a workflow run.
    pub fn new() -> Self {
        TraceContext {
            trace_id: format!("{:032x}", Uuid::new_v4().as_u128()),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Builds a carrier for one outbound call: a fresh span id under this
    /// context's trace id, in `00-<trace-id>-<span-id>-01` wire format.
    pub fn carrier(&self) -> HashMap<String, String> {
        let span_id = format!("{:016x}", (Uuid::new_v4().as_u128() & 0xffff_ffff_ffff_ffff) as u64);
        let mut carrier = HashMap::new();
        carrier.insert(
            TRACEPARENT_HEADER.to_string(),
            format!("00-{}-{}-01", self.trace_id, span_id),
        );
        carrier
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Mints a fresh 8-hex-character correlation id for one outbound RPC,
/// independent of the trace carrier (mirrors the reference orchestrator's
/// `uuid4()[:8]` convention).
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Convenience to attach the `X-Request-ID` header to an existing carrier.
pub fn with_request_id(mut carrier: HashMap<String, String>, request_id: &str) -> HashMap<String, String> {
    carrier.insert(REQUEST_ID_HEADER.to_string(), request_id.to_string());
    carrier
}
