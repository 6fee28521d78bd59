//! Wire representation of report payloads.
//!
//! Converts the in-memory trace model, which carries monotonic
//! timestamps, into the serializable shape the collector accepts: spans
//! with start offset and duration in microseconds relative to their
//! trace's start.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::export::Batch;
use crate::trace::{Annotations, Span, Trace};

/// Top-level report envelope sent to the collector.
#[derive(Debug, Serialize)]
pub struct Report {
    /// Unix timestamp (seconds) at which the report was assembled.
    pub timestamp: u64,
    /// Hostname of the reporting process, if configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// One entry per endpoint with traces in this report.
    pub endpoints: Vec<ReportEndpoint>,
}

/// All traces reported for one endpoint.
#[derive(Debug, Serialize)]
pub struct ReportEndpoint {
    /// Endpoint identity, e.g. `"UsersController#index"`.
    pub name: String,
    /// Traces in submission order.
    pub traces: Vec<ReportTrace>,
}

/// One completed trace.
#[derive(Debug, Serialize)]
pub struct ReportTrace {
    /// Unix timestamp (seconds) of trace start.
    pub timestamp: u64,
    /// Spans in open order (pre-order of the span tree).
    pub spans: Vec<ReportSpan>,
}

/// One span, with timing relative to its trace's start.
#[derive(Debug, Serialize)]
pub struct ReportSpan {
    /// Dotted category namespace.
    pub category: String,
    /// Operation identity, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form detail, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Projected payload data.
    pub annotations: Annotations,
    /// Microseconds between trace start and span open.
    pub start: u64,
    /// Microseconds between span open and span close.
    pub duration: u64,
    /// Index of the parent span within the trace, if not a root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<u32>,
}

/// Assembles the report envelope for a set of batches.
pub fn build_report(hostname: Option<&str>, batches: &[Batch]) -> Report {
    Report {
        timestamp: unix_seconds(SystemTime::now()),
        hostname: hostname.map(str::to_owned),
        endpoints: batches
            .iter()
            .map(|batch| ReportEndpoint {
                name: batch.endpoint.clone(),
                traces: batch.traces.iter().map(report_trace).collect(),
            })
            .collect(),
    }
}

fn report_trace(trace: &Trace) -> ReportTrace {
    ReportTrace {
        timestamp: unix_seconds(trace.timestamp()),
        spans: trace
            .spans()
            .iter()
            .map(|span| report_span(trace, span))
            .collect(),
    }
}

fn report_span(trace: &Trace, span: &Span) -> ReportSpan {
    let start = span
        .started_at()
        .saturating_duration_since(trace.started_at());
    // complete traces only carry closed spans; degrade to zero duration
    // rather than failing if one slips through
    let duration = span.duration().unwrap_or_default();
    ReportSpan {
        category: span.category().to_owned(),
        title: span.title().map(str::to_owned),
        description: span.description().map(str::to_owned),
        annotations: span.annotations().clone(),
        start: start.as_micros() as u64,
        duration: duration.as_micros() as u64,
        parent: span.parent().map(|index| index as u32),
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
