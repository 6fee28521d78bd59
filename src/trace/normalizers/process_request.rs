use std::sync::Arc;

use serde_json::Value;

use crate::trace::exclusions::ExclusionFilter;
use crate::trace::normalize::{normalize_payload, Normalize, Normalized, NormalizedEntry};
use crate::trace::span::Trace;

/// Event-source name this normalizer is registered under.
pub const SOURCE_NAME: &str = "process_request.handler";

const CATEGORY: &str = "app.controller.request";
const PAYLOAD_KEYS: [&str; 6] = ["controller", "action", "params", "format", "method", "path"];

/// Normalizes the "request handled" event emitted once per request by the
/// host framework's handler layer.
///
/// Derives the endpoint identity `"Controller#action"` from the payload
/// and assigns it to the trace, unless the identity is on the exclusion
/// denylist, in which case the event is skipped and the trace is left
/// untouched.
#[derive(Debug)]
pub struct ProcessRequest {
    exclusions: Arc<ExclusionFilter>,
}

impl ProcessRequest {
    /// Creates the normalizer with the filter it consults per event.
    pub fn new(exclusions: Arc<ExclusionFilter>) -> Self {
        ProcessRequest { exclusions }
    }

    fn handler_identity(payload: &Value) -> String {
        format!(
            "{}#{}",
            text_field(payload, "controller"),
            text_field(payload, "action")
        )
    }
}

impl Normalize for ProcessRequest {
    fn normalize(&self, trace: &mut Trace, payload: &Value) -> Normalized {
        let endpoint = Self::handler_identity(payload);
        if self.exclusions.is_excluded(&endpoint) {
            return Normalized::Skip;
        }
        trace.set_endpoint(endpoint.clone());
        Normalized::Entry(NormalizedEntry {
            category: CATEGORY.into(),
            title: endpoint,
            description: None,
            annotations: normalize_payload(payload, &PAYLOAD_KEYS),
        })
    }
}

fn text_field(payload: &Value, key: &str) -> String {
    match payload.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
