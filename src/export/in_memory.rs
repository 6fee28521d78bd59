//! An in-memory batch exporter that stores delivered batches.
//!
//! Useful for testing and debugging: nothing leaves the process, and the
//! most recently sent batches, traces, and spans can be enumerated with
//! [`InMemoryBatchExporter::get_exported_batches`].

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::error::ExportError;
use crate::export::{Batch, BatchExporter, ExportResult};

/// Records every exported batch in memory.
///
/// Cloning shares the underlying storage, so a clone handed to the
/// pipeline can be inspected from the test afterwards.
///
/// # Example
///
/// ```
/// use traceline::export::in_memory::InMemoryBatchExporterBuilder;
/// use traceline::{Config, Instrumenter};
///
/// let exporter = InMemoryBatchExporterBuilder::new().build();
/// let instrumenter = Instrumenter::builder()
///     .with_config(Config::builder().with_constant_flush(true).build())
///     .with_exporter(exporter.clone())
///     .build();
///
/// instrumenter.trace("Rack", "app.rack.request", || {
///     instrumenter.instrument("app.inside", || "result")
/// });
///
/// instrumenter.force_flush().unwrap();
/// let batches = exporter.get_exported_batches().unwrap();
/// assert_eq!(batches[0].endpoint, "Rack");
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryBatchExporter {
    batches: Arc<Mutex<Vec<Batch>>>,
}

impl Default for InMemoryBatchExporter {
    fn default() -> Self {
        InMemoryBatchExporterBuilder::new().build()
    }
}

/// Builder for [`InMemoryBatchExporter`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryBatchExporterBuilder {}

impl InMemoryBatchExporterBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        InMemoryBatchExporterBuilder::default()
    }

    /// Creates an exporter with fresh storage.
    pub fn build(&self) -> InMemoryBatchExporter {
        InMemoryBatchExporter {
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl InMemoryBatchExporter {
    /// Returns every batch exported so far, in delivery order.
    pub fn get_exported_batches(&self) -> Result<Vec<Batch>, ExportError> {
        self.batches
            .lock()
            .map(|batches| batches.clone())
            .map_err(|err| ExportError::Other(format!("failed to lock batches: {err:?}")))
    }

    /// Clears the recorded batches.
    pub fn reset(&self) {
        let _ = self.batches.lock().map(|mut batches| batches.clear());
    }
}

impl BatchExporter for InMemoryBatchExporter {
    fn export(&mut self, batches: Vec<Batch>) -> BoxFuture<'static, ExportResult> {
        let result = self
            .batches
            .lock()
            .map(|mut stored| stored.extend(batches))
            .map_err(|err| ExportError::Other(format!("failed to lock batches: {err:?}")));
        Box::pin(std::future::ready(result))
    }

    fn shutdown(&mut self) {
        self.reset();
    }
}
