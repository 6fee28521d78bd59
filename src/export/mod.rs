//! Batch exporters.
//!
//! The reporter hands completed traces, grouped by endpoint, to a
//! [`BatchExporter`]. The exporter is expected to be a simple payload
//! encoder and transmitter; retry policy lives in the reporter.

use std::fmt::Debug;

use futures_util::future::BoxFuture;

use crate::error::ExportError;
use crate::trace::Trace;

pub mod http;
pub mod in_memory;
pub mod model;

/// Describes the result of an export.
pub type ExportResult = Result<(), ExportError>;

/// Completed traces for one endpoint, collected within one flush
/// interval.
#[derive(Clone, Debug)]
pub struct Batch {
    /// Endpoint identity the traces belong to.
    pub endpoint: String,
    /// Completed traces in submission order.
    pub traces: Vec<Trace>,
}

/// Interface that protocol-specific exporters implement so they can be
/// plugged into the reporting pipeline.
pub trait BatchExporter: Send + Debug {
    /// Delivers a set of batches to the destination.
    ///
    /// Called from the reporter's worker thread, never concurrently for
    /// the same exporter. A delivery attempt must be bounded: a hung call
    /// would stall subsequent flush cycles.
    fn export(&mut self, batches: Vec<Batch>) -> BoxFuture<'static, ExportResult>;

    /// Shuts down the exporter; called once when the pipeline stops.
    fn shutdown(&mut self) {}
}
