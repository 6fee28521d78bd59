//! # Traceline
//!
//! An in-process tracing agent. Traceline records nested units of work
//! ("spans") performed while handling a single logical request,
//! normalizes raw framework event payloads into a uniform trace
//! representation, filters out operator-excluded endpoints, and
//! periodically batches completed traces for transmission to a remote
//! collector.
//!
//! The agent is transparent to the host application: failures in the
//! instrumented code propagate unchanged through the bracketing API,
//! while failures internal to tracing and reporting are isolated and
//! only observable through the crate's own diagnostics.
//!
//! ## Getting started
//!
//! ```no_run
//! use traceline::{Config, Instrumenter, SpanOptions};
//!
//! let instrumenter = Instrumenter::builder()
//!     .with_config(Config::builder().with_authentication("my-credential").build())
//!     .build();
//!
//! // Middleware brackets each request:
//! instrumenter.trace("Rack", "app.rack.request", || {
//!     // Application code brackets interesting work:
//!     instrumenter.instrument(
//!         SpanOptions::new("db.sql.query").with_title("SELECT FROM users"),
//!         || { /* run the query */ },
//!     )
//! });
//! ```
//!
//! Framework adapters feed lifecycle events through
//! [`Instrumenter::start_event`] / [`Instrumenter::finish_event`], which
//! consult the [`trace::NormalizerRegistry`] and the exclusion denylist
//! before any span is recorded.

#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod config;
pub mod error;
pub mod export;
pub mod reporter;
mod retry;
pub mod trace;

pub use config::{Config, ConfigBuilder};
pub use error::{ExportError, ReporterError};
pub use trace::{Instrumenter, InstrumenterBuilder, SpanOptions};
