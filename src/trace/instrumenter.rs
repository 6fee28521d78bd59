//! # Instrumenter
//!
//! The process-facing façade: owns the active trace for the current unit
//! of execution, exposes the `trace`/`instrument` bracketing API, and
//! wires normalization, exclusion, and reporting together.
//!
//! The active trace lives in a thread-local slot, so concurrently
//! executing requests never interleave spans into each other's trace.
//! Span bookkeeping is synchronous and guard-based: a span opened by
//! `instrument` is closed when the guard drops, on every exit path
//! including panics, while the panic itself propagates unchanged.

use std::borrow::Cow;
use std::cell::RefCell;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::error::ReporterError;
use crate::export::http::HttpExporter;
use crate::export::BatchExporter;
use crate::reporter::BatchReporter;
use crate::trace::exclusions::ExclusionFilter;
use crate::trace::normalize::{Normalized, NormalizerRegistry};
use crate::trace::normalizers::{ProcessRequest, PROCESS_REQUEST};
use crate::trace::span::{SpanHandle, SpanOptions, Trace};

thread_local! {
    static ACTIVE_TRACE: RefCell<Option<Trace>> = const { RefCell::new(None) };
}

/// The in-process tracing agent.
///
/// Explicitly constructed and passed by reference to instrumented call
/// sites; running one instance per process is a deployment convention,
/// not a language-level singleton.
///
/// # Example
///
/// ```
/// use traceline::export::in_memory::InMemoryBatchExporterBuilder;
/// use traceline::{Config, Instrumenter, SpanOptions};
///
/// let exporter = InMemoryBatchExporterBuilder::new().build();
/// let instrumenter = Instrumenter::builder()
///     .with_config(Config::builder().with_constant_flush(true).build())
///     .with_exporter(exporter.clone())
///     .build();
///
/// let body = instrumenter.trace("Rack", "app.rack.request", || {
///     instrumenter.instrument(
///         SpanOptions::new("app.view.render").with_title("users/index"),
///         || "rendered",
///     )
/// });
/// assert_eq!(body, "rendered");
///
/// instrumenter.force_flush().unwrap();
/// assert_eq!(exporter.get_exported_batches().unwrap().len(), 1);
/// ```
#[derive(Debug)]
pub struct Instrumenter {
    config: Arc<Config>,
    registry: NormalizerRegistry,
    exclusions: Arc<ExclusionFilter>,
    reporter: BatchReporter,
}

impl Instrumenter {
    /// Returns a builder for assembling an instrumenter.
    pub fn builder() -> InstrumenterBuilder {
        InstrumenterBuilder::default()
    }

    /// Begins a new trace for one logical request.
    ///
    /// `endpoint` names the trace until a normalizer assigns the real
    /// endpoint identity; `root_category` is the category of the root
    /// span. The closure runs inside the trace; on every exit path,
    /// including a panic, the root span is closed, the trace is sealed,
    /// and the result is handed to the reporter. A panic in the closure
    /// propagates unchanged.
    pub fn trace<F, R>(
        &self,
        endpoint: impl Into<String>,
        root_category: impl Into<Cow<'static, str>>,
        f: F,
    ) -> R
    where
        F: FnOnce() -> R,
    {
        let already_active = ACTIVE_TRACE.with(|slot| slot.borrow().is_some());
        if already_active {
            warn!("trace requested while another trace is active; running block untraced");
            return f();
        }

        let mut trace = Trace::new(endpoint);
        let root = trace.open_span(SpanOptions::new(root_category));
        ACTIVE_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));

        let _guard = TraceGuard {
            instrumenter: self,
            root,
        };
        f()
    }

    /// Brackets one nested unit of work inside the active trace.
    ///
    /// Opens a child span described by `options`, runs the closure, and
    /// closes the span on every exit path. The closure's return value,
    /// and any panic, propagate unchanged. Without an active trace this
    /// is a passthrough that still runs the closure.
    pub fn instrument<F, R>(&self, options: impl Into<SpanOptions>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let options = options.into();
        match with_active_trace(|trace| trace.open_span(options)) {
            Some(handle) => {
                let _guard = SpanGuard { handle };
                f()
            }
            None => f(),
        }
    }

    /// Normalizes a bracketed event's start and opens the corresponding
    /// span. Returns `None` when there is no active trace, no registered
    /// normalizer, or the normalizer skipped the event.
    pub fn start_event(&self, source_name: &str, payload: &Value) -> Option<SpanHandle> {
        with_active_trace(|trace| match self.registry.normalize(trace, source_name, payload) {
            Normalized::Entry(entry) => Some(trace.open_span(entry)),
            Normalized::Skip => None,
        })
        .flatten()
    }

    /// Closes the span opened by [`start_event`](Self::start_event).
    pub fn finish_event(&self, handle: SpanHandle) {
        with_active_trace(|trace| trace.close_span(handle));
    }

    /// Normalizes an instantaneous event into a zero-duration span.
    pub fn record_event(&self, source_name: &str, payload: &Value) {
        with_active_trace(|trace| {
            if let Normalized::Entry(entry) = self.registry.normalize(trace, source_name, payload) {
                trace.record_leaf(entry);
            }
        });
    }

    /// Registers endpoint identities that should never be traced.
    pub fn exclude_endpoints<I, S>(&self, endpoints: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for endpoint in endpoints {
            self.exclusions.add(endpoint);
        }
    }

    /// The exclusion filter consulted by normalizers.
    pub fn exclusions(&self) -> &ExclusionFilter {
        &self.exclusions
    }

    /// The normalizer registry, for adapters registering their own
    /// normalizers.
    pub fn registry(&self) -> &NormalizerRegistry {
        &self.registry
    }

    /// The configuration this instrumenter runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Forces an immediate synchronous flush of accumulated traces.
    pub fn force_flush(&self) -> Result<(), ReporterError> {
        self.reporter.force_flush()
    }

    /// Flushes remaining traces within a short deadline and stops the
    /// reporting pipeline.
    pub fn shutdown(&self) -> Result<(), ReporterError> {
        self.reporter.shutdown()
    }
}

/// Runs `f` against the active trace of the current thread, if any.
///
/// The slot stays borrowed for the duration of `f`; callbacks must not
/// re-enter the instrumenter's trace-mutating API.
fn with_active_trace<T>(f: impl FnOnce(&mut Trace) -> T) -> Option<T> {
    ACTIVE_TRACE.with(|slot| slot.borrow_mut().as_mut().map(f))
}

struct SpanGuard {
    handle: SpanHandle,
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        with_active_trace(|trace| trace.close_span(self.handle));
    }
}

struct TraceGuard<'a> {
    instrumenter: &'a Instrumenter,
    root: SpanHandle,
}

impl Drop for TraceGuard<'_> {
    fn drop(&mut self) {
        let trace = ACTIVE_TRACE.with(|slot| slot.borrow_mut().take());
        if let Some(mut trace) = trace {
            trace.close_span(self.root);
            trace.end();
            self.instrumenter.reporter.submit(trace);
        }
    }
}

/// Builder for [`Instrumenter`] instances.
#[derive(Debug, Default)]
pub struct InstrumenterBuilder {
    config: Option<Config>,
    exporter: Option<Box<dyn BatchExporter>>,
}

impl InstrumenterBuilder {
    /// Sets the configuration; defaults come from the environment.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the default HTTP exporter, e.g. with an in-memory one for
    /// tests.
    pub fn with_exporter(mut self, exporter: impl BatchExporter + 'static) -> Self {
        self.exporter = Some(Box::new(exporter));
        self
    }

    /// Assembles the instrumenter and starts its reporting pipeline.
    pub fn build(self) -> Instrumenter {
        let config = Arc::new(self.config.unwrap_or_default());
        let exclusions = Arc::new(ExclusionFilter::new());

        let registry = NormalizerRegistry::new();
        registry.register(PROCESS_REQUEST, ProcessRequest::new(Arc::clone(&exclusions)));

        let exporter = self
            .exporter
            .unwrap_or_else(|| Box::new(HttpExporter::new(Arc::clone(&config))));
        let reporter = BatchReporter::new(exporter, Arc::clone(&config));

        Instrumenter {
            config,
            registry,
            exclusions,
            reporter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::in_memory::{InMemoryBatchExporter, InMemoryBatchExporterBuilder};
    use crate::trace::span::Span;
    use serde_json::json;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::time::Duration;

    fn test_instrumenter() -> (Instrumenter, InMemoryBatchExporter) {
        let exporter = InMemoryBatchExporterBuilder::new().build();
        let instrumenter = Instrumenter::builder()
            .with_config(
                Config::builder()
                    .with_flush_interval(Duration::from_secs(60))
                    .build(),
            )
            .with_exporter(exporter.clone())
            .build();
        (instrumenter, exporter)
    }

    fn request_payload(action: &str) -> serde_json::Value {
        json!({
            "controller": "UsersController",
            "action": action,
            "format": "html",
            "method": "GET",
            "path": format!("/users/{action}"),
        })
    }

    #[test]
    fn nested_blocks_produce_preorder_categories() {
        let (instrumenter, exporter) = test_instrumenter();

        instrumenter.trace("Rack", "app.rack.request", || {
            let event = instrumenter
                .start_event(PROCESS_REQUEST, &request_payload("index"))
                .expect("event should open a span");
            instrumenter.instrument("app.inside", || {
                instrumenter.instrument("app.zomg", || {});
            });
            instrumenter.finish_event(event);
        });
        instrumenter.force_flush().unwrap();

        let batches = exporter.get_exported_batches().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].endpoint, "UsersController#index");
        let trace = &batches[0].traces[0];
        let categories: Vec<_> = trace.spans().iter().map(Span::category).collect();
        assert_eq!(
            categories,
            [
                "app.rack.request",
                "app.controller.request",
                "app.inside",
                "app.zomg"
            ]
        );
        assert_eq!(categories[0], "app.rack.request");
        assert!(trace.spans().iter().all(|span| !span.is_open()));
    }

    #[test]
    fn instrument_outside_a_trace_is_a_passthrough() {
        let (instrumenter, exporter) = test_instrumenter();

        let result = instrumenter.instrument("app.orphan", || 41 + 1);
        assert_eq!(result, 42);

        instrumenter.force_flush().unwrap();
        assert!(exporter.get_exported_batches().unwrap().is_empty());
    }

    #[test]
    fn instrument_returns_the_block_result() {
        let (instrumenter, _exporter) = test_instrumenter();

        let result = instrumenter.trace("Rack", "app.rack.request", || {
            instrumenter.instrument("app.inside", || "hello")
        });
        assert_eq!(result, "hello");
    }

    #[test]
    fn panics_propagate_and_spans_still_close() {
        let (instrumenter, exporter) = test_instrumenter();

        let result = catch_unwind(AssertUnwindSafe(|| {
            instrumenter.trace("Rack", "app.rack.request", || {
                instrumenter.instrument("app.inside", || panic!("boom"));
            })
        }));
        assert!(result.is_err());

        instrumenter.force_flush().unwrap();
        let batches = exporter.get_exported_batches().unwrap();
        assert_eq!(batches.len(), 1);
        let trace = &batches[0].traces[0];
        assert_eq!(trace.spans().len(), 2);
        assert!(trace.spans().iter().all(|span| !span.is_open()));
        assert!(trace.ended_at().is_some());
    }

    #[test]
    fn excluded_actions_produce_no_span_and_no_endpoint() {
        let (instrumenter, exporter) = test_instrumenter();
        instrumenter.exclude_endpoints(["UsersController#show"]);

        instrumenter.trace("Rack", "app.rack.request", || {
            let event = instrumenter.start_event(PROCESS_REQUEST, &request_payload("show"));
            assert!(event.is_none());
        });
        instrumenter.force_flush().unwrap();

        let batches = exporter.get_exported_batches().unwrap();
        assert_eq!(batches.len(), 1);
        // grouped under the default endpoint, with only the root span
        assert_eq!(batches[0].endpoint, "Rack");
        assert_eq!(batches[0].traces[0].spans().len(), 1);
    }

    #[test]
    fn record_event_adds_a_leaf() {
        let (instrumenter, exporter) = test_instrumenter();

        instrumenter.trace("Rack", "app.rack.request", || {
            instrumenter.record_event(PROCESS_REQUEST, &request_payload("index"));
        });
        instrumenter.force_flush().unwrap();

        let batches = exporter.get_exported_batches().unwrap();
        let trace = &batches[0].traces[0];
        assert_eq!(trace.spans().len(), 2);
        assert_eq!(trace.spans()[1].duration(), Some(Duration::ZERO));
        assert_eq!(trace.spans()[1].parent(), Some(0));
    }

    #[test]
    fn nested_trace_calls_run_untraced() {
        let (instrumenter, exporter) = test_instrumenter();

        let result = instrumenter.trace("Rack", "app.rack.request", || {
            instrumenter.trace("Rack", "app.rack.request", || "inner")
        });
        assert_eq!(result, "inner");

        instrumenter.force_flush().unwrap();
        // only the outer trace is reported
        assert_eq!(exporter.get_exported_batches().unwrap().len(), 1);
        assert_eq!(
            exporter.get_exported_batches().unwrap()[0].traces.len(),
            1
        );
    }

    #[test]
    fn unknown_event_sources_are_skipped() {
        let (instrumenter, exporter) = test_instrumenter();

        instrumenter.trace("Rack", "app.rack.request", || {
            assert!(instrumenter
                .start_event("sql.unregistered", &json!({}))
                .is_none());
        });
        instrumenter.force_flush().unwrap();

        let batches = exporter.get_exported_batches().unwrap();
        assert_eq!(batches[0].traces[0].spans().len(), 1);
    }
}
