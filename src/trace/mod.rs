//! # Trace recording
//!
//! The recording half of the agent: the span/trace model, the normalizer
//! registry converting raw instrumentation events into spans, the
//! exclusion filter, and the [`Instrumenter`] façade that instrumented
//! call sites talk to.
//!
//! ```
//! use traceline::export::in_memory::InMemoryBatchExporterBuilder;
//! use traceline::{Config, Instrumenter};
//!
//! let exporter = InMemoryBatchExporterBuilder::new().build();
//! let instrumenter = Instrumenter::builder()
//!     .with_config(Config::builder().with_constant_flush(true).build())
//!     .with_exporter(exporter.clone())
//!     .build();
//!
//! instrumenter.trace("Rack", "app.rack.request", || {
//!     instrumenter.instrument("app.inside", || {
//!         // traced application work
//!     });
//! });
//! # instrumenter.force_flush().unwrap();
//! ```

mod exclusions;
mod instrumenter;
mod normalize;
pub mod normalizers;
mod span;

pub use exclusions::ExclusionFilter;
pub use instrumenter::{Instrumenter, InstrumenterBuilder};
pub use normalize::{normalize_payload, Normalize, Normalized, NormalizedEntry, NormalizerRegistry};
pub use span::{AnnotationValue, Annotations, Span, SpanHandle, SpanOptions, Trace};
