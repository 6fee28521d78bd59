//! # Span and trace model
//!
//! A [`Span`] is one timed unit of observed work; a [`Trace`] is the
//! ordered tree of spans belonging to one logical request. Spans are
//! appended in open order, which doubles as a depth-first pre-order
//! traversal of the span tree because each span carries an index
//! back-reference to its parent.
//!
//! A span is *open* between [`Trace::open_span`] and the matching
//! [`Trace::close_span`]; once closed it is immutable. Closing is
//! idempotent: guard-based call sites may close a span on every exit path
//! without tracking whether it already happened.

use std::borrow::Cow;
use std::time::{Duration, Instant, SystemTime};

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tracing::{debug, warn};

/// A single annotation value: a string or a number.
///
/// Values that are neither are converted to their textual rendering at
/// construction time rather than dropped, so the conversion from raw
/// payload data is total.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum AnnotationValue {
    /// Text value, also the fallback rendering for non-primitive data.
    String(String),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
}

impl From<&str> for AnnotationValue {
    fn from(value: &str) -> Self {
        AnnotationValue::String(value.to_owned())
    }
}

impl From<String> for AnnotationValue {
    fn from(value: String) -> Self {
        AnnotationValue::String(value)
    }
}

impl From<i64> for AnnotationValue {
    fn from(value: i64) -> Self {
        AnnotationValue::Int(value)
    }
}

impl From<i32> for AnnotationValue {
    fn from(value: i32) -> Self {
        AnnotationValue::Int(value.into())
    }
}

impl From<f64> for AnnotationValue {
    fn from(value: f64) -> Self {
        AnnotationValue::Float(value)
    }
}

impl From<&Value> for AnnotationValue {
    /// Total conversion from arbitrary payload data. Strings and numbers
    /// map directly; null, booleans, arrays, and objects become their
    /// compact JSON rendering.
    fn from(value: &Value) -> Self {
        match value {
            Value::String(s) => AnnotationValue::String(s.clone()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AnnotationValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    AnnotationValue::Float(f)
                } else {
                    AnnotationValue::String(n.to_string())
                }
            }
            other => AnnotationValue::String(other.to_string()),
        }
    }
}

/// Insertion-ordered annotation map attached to a span.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Annotations(Vec<(String, AnnotationValue)>);

impl Annotations {
    /// Creates an empty annotation map.
    pub fn new() -> Self {
        Annotations::default()
    }

    /// Appends an annotation, preserving insertion order.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AnnotationValue>) {
        self.0.push((key.into(), value.into()));
    }

    /// Returns the value recorded for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&AnnotationValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Number of annotations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, AnnotationValue)> {
        self.0.iter()
    }
}

impl Serialize for Annotations {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Descriptor for a span about to be opened.
///
/// The category is required; everything else is optional and ignored by
/// consumers that do not understand it.
#[derive(Clone, Debug)]
pub struct SpanOptions {
    pub(crate) category: Cow<'static, str>,
    pub(crate) title: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) annotations: Annotations,
}

impl SpanOptions {
    /// Creates a descriptor with the given dotted category, e.g.
    /// `"app.controller.request"`.
    pub fn new(category: impl Into<Cow<'static, str>>) -> Self {
        SpanOptions {
            category: category.into(),
            title: None,
            description: None,
            annotations: Annotations::new(),
        }
    }

    /// Human-readable identity of the operation.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Free-form detail, e.g. a SQL statement.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replaces the annotation map.
    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = annotations;
        self
    }

    /// Appends one annotation.
    pub fn with_annotation(
        mut self,
        key: impl Into<String>,
        value: impl Into<AnnotationValue>,
    ) -> Self {
        self.annotations.insert(key, value);
        self
    }
}

impl From<&'static str> for SpanOptions {
    fn from(category: &'static str) -> Self {
        SpanOptions::new(category)
    }
}

/// Handle to a span inside its owning trace, used to close it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpanHandle(pub(crate) usize);

/// Single timed unit of work within a trace.
#[derive(Clone, Debug)]
pub struct Span {
    category: Cow<'static, str>,
    title: Option<String>,
    description: Option<String>,
    annotations: Annotations,
    started_at: Instant,
    ended_at: Option<Instant>,
    parent: Option<usize>,
}

impl Span {
    /// Dotted category namespace.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Human-readable identity of the operation, if set.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Free-form detail, if set.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Annotations recorded at open time.
    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    /// Index of the enclosing span within the trace, or `None` for a root.
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Monotonic open timestamp.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Monotonic close timestamp; `None` while the span is open.
    pub fn ended_at(&self) -> Option<Instant> {
        self.ended_at
    }

    /// Whether the span is still open.
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Elapsed time between open and close, `None` while open.
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// The complete tree of spans for one logical request.
///
/// Spans are stored in open order; `endpoint` is assigned at most once by
/// the first normalizer that identifies the logical operation, later
/// attempts are ignored.
#[derive(Clone, Debug)]
pub struct Trace {
    default_endpoint: String,
    endpoint: Option<String>,
    spans: Vec<Span>,
    open: Vec<usize>,
    started_at: Instant,
    timestamp: SystemTime,
    ended_at: Option<Instant>,
}

impl Trace {
    /// Begins an empty trace. `default_endpoint` names the trace until a
    /// normalizer assigns the real endpoint identity, and is used for
    /// batch grouping if none ever does.
    pub fn new(default_endpoint: impl Into<String>) -> Self {
        Trace {
            default_endpoint: default_endpoint.into(),
            endpoint: None,
            spans: Vec::new(),
            open: Vec::new(),
            started_at: Instant::now(),
            timestamp: SystemTime::now(),
            ended_at: None,
        }
    }

    /// The normalizer-assigned endpoint identity, if any.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Assigns the endpoint identity. The first assignment wins; later
    /// calls are ignored.
    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        if self.endpoint.is_some() {
            debug!("trace endpoint already assigned; ignoring reassignment");
            return;
        }
        self.endpoint = Some(endpoint.into());
    }

    /// The endpoint identity used for grouping: the assigned endpoint, or
    /// the default name the trace was opened with.
    pub fn effective_endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(&self.default_endpoint)
    }

    /// All spans in open order (pre-order of the span tree).
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Monotonic timestamp of trace start.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Wall-clock anchor of trace start, used for reporting.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Monotonic timestamp of trace completion, `None` while active.
    pub fn ended_at(&self) -> Option<Instant> {
        self.ended_at
    }

    /// Whether any span is still open.
    pub fn is_active(&self) -> bool {
        !self.open.is_empty()
    }

    /// Appends a new open span as a child of the innermost open span, or
    /// as a root if none is open. Never fails.
    pub fn open_span(&mut self, options: impl Into<SpanOptions>) -> SpanHandle {
        let options = options.into();
        let index = self.spans.len();
        self.spans.push(Span {
            category: options.category,
            title: options.title,
            description: options.description,
            annotations: options.annotations,
            started_at: Instant::now(),
            ended_at: None,
            parent: self.open.last().copied(),
        });
        self.open.push(index);
        SpanHandle(index)
    }

    /// Closes the span for `handle`.
    ///
    /// Closing an already-closed span is ignored. Closing out of stack
    /// order is a caller bug: it is reported and then handled best-effort
    /// (the span is closed, enclosing spans stay open).
    pub fn close_span(&mut self, handle: SpanHandle) {
        let Some(span) = self.spans.get_mut(handle.0) else {
            warn!("close_span called with unknown span handle {}", handle.0);
            return;
        };
        if span.ended_at.is_some() {
            debug!("span {} already closed; ignoring repeated close", handle.0);
            return;
        }
        if self.open.last() != Some(&handle.0) {
            warn!(
                "span {} closed out of order; parent chain may be inaccurate",
                handle.0
            );
        }
        span.ended_at = Some(Instant::now());
        self.open.retain(|&index| index != handle.0);
    }

    /// Records a zero-duration span under the innermost open span, for
    /// events reported after the fact rather than bracketed.
    pub fn record_leaf(&mut self, options: impl Into<SpanOptions>) {
        let options = options.into();
        let now = Instant::now();
        self.spans.push(Span {
            category: options.category,
            title: options.title,
            description: options.description,
            annotations: options.annotations,
            started_at: now,
            ended_at: Some(now),
            parent: self.open.last().copied(),
        });
    }

    /// Seals the trace: closes any spans left open and sets the end
    /// timestamp. Called when the outermost unit of work completes.
    pub(crate) fn end(&mut self) {
        if !self.open.is_empty() {
            warn!("trace ended with {} spans still open", self.open.len());
            let now = Instant::now();
            for index in self.open.drain(..) {
                if let Some(span) = self.spans.get_mut(index) {
                    span.ended_at.get_or_insert(now);
                }
            }
        }
        self.ended_at = Some(Instant::now());
    }
}
