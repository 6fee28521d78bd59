//! # Event normalization
//!
//! Normalizers convert raw instrumentation events, a `(source name,
//! payload)` pair produced by a framework adapter, into the uniform span
//! descriptor recorded in a trace. A normalizer may also decide that an
//! event should not be recorded at all, which is ordinary control flow
//! expressed as [`Normalized::Skip`], not an error.
//!
//! The registry maps event-source names to normalizer instances. It is
//! populated at startup by adapters and is effectively read-only
//! afterwards; lookups only hold the lock long enough to clone the
//! strategy handle, so registration during steady state cannot race a
//! normalization in progress.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::trace::span::{Annotations, SpanOptions, Trace};

/// The uniform descriptor a normalizer produces for one accepted event.
///
/// Immutable after creation; the instrumenter turns it into a span.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedEntry {
    /// Dotted category namespace, e.g. `"app.controller.request"`.
    pub category: Cow<'static, str>,
    /// Human-readable identity of the operation, e.g.
    /// `"UsersController#index"`.
    pub title: String,
    /// Free-form detail, if any.
    pub description: Option<String>,
    /// Payload data projected down to strings and numbers.
    pub annotations: Annotations,
}

impl From<NormalizedEntry> for SpanOptions {
    fn from(entry: NormalizedEntry) -> Self {
        let mut options = SpanOptions::new(entry.category)
            .with_title(entry.title)
            .with_annotations(entry.annotations);
        if let Some(description) = entry.description {
            options = options.with_description(description);
        }
        options
    }
}

/// Outcome of normalizing one event.
#[derive(Clone, Debug, PartialEq)]
pub enum Normalized {
    /// The event maps to a span described by the entry.
    Entry(NormalizedEntry),
    /// The event should not be recorded.
    Skip,
}

/// A strategy converting one event source's raw payloads into normalized
/// entries.
///
/// Implementations must be defensive about payload shape: payloads come
/// from external producers and may be missing keys or carry unexpected
/// types. A normalizer's only permitted side effects are the one-time
/// endpoint assignment on the trace and reads of the exclusion set.
pub trait Normalize: Send + Sync + fmt::Debug {
    /// Produces a normalized entry for the event, or [`Normalized::Skip`].
    fn normalize(&self, trace: &mut Trace, payload: &Value) -> Normalized;
}

/// Mapping from event-source name to normalization strategy.
#[derive(Clone, Debug, Default)]
pub struct NormalizerRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn Normalize>>>>,
}

impl NormalizerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        NormalizerRegistry::default()
    }

    /// Associates an event-source name with a normalizer. The last
    /// registration for a given name wins, which lets adapters and tests
    /// override built-ins.
    pub fn register(&self, source_name: impl Into<String>, normalizer: impl Normalize + 'static) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(source_name.into(), Arc::new(normalizer));
        }
    }

    /// Returns the normalizer registered for `source_name`, if any.
    pub fn lookup(&self, source_name: &str) -> Option<Arc<dyn Normalize>> {
        self.inner
            .read()
            .ok()
            .and_then(|map| map.get(source_name).cloned())
    }

    /// Normalizes one event. Unknown source names yield
    /// [`Normalized::Skip`].
    pub fn normalize(&self, trace: &mut Trace, source_name: &str, payload: &Value) -> Normalized {
        match self.lookup(source_name) {
            Some(normalizer) => normalizer.normalize(trace, payload),
            None => Normalized::Skip,
        }
    }
}

/// Projects the named payload keys into annotations.
///
/// Never fails: string and number values pass through, anything else
/// (including a missing key, projected as null) is converted to its
/// textual rendering.
pub fn normalize_payload(payload: &Value, keys: &[&str]) -> Annotations {
    let mut annotations = Annotations::new();
    for key in keys {
        let value = payload.get(key).unwrap_or(&Value::Null);
        annotations.insert(*key, value);
    }
    annotations
}
