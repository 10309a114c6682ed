use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::RngCore;

use crate::error::TracedError;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct TraceId(pub [u8; 16]);

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct SpanId(pub [u8; 8]);

/// Uniquely identifies a span.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct SpanKey(pub TraceId, pub SpanId);

/// Uniquely identifies an event within a log instance.
///
/// Event IDs are 1-based; the zero value means "no event" on the wire.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
#[must_use]
pub struct TraceEventId(pub u64);

impl TraceEventId {
    /// The "no event" sentinel.
    pub const NONE: TraceEventId = TraceEventId(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn serialize(&self) -> String {
        self.0.to_string()
    }
}

impl FromStr for TraceEventId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.parse::<u64>()?;
        Ok(TraceEventId(id))
    }
}

impl TraceId {
    pub fn generate() -> Self {
        let mut trace_id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut trace_id);
        TraceId(trace_id)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }

    pub fn serialize(&self) -> String {
        hex::encode(self.0)
    }

    pub fn parse(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let trace_id: [u8; 16] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(TraceId(trace_id))
    }

    pub fn with_span(&self, span_id: SpanId) -> SpanKey {
        SpanKey(*self, span_id)
    }
}

impl SpanId {
    pub fn generate() -> Self {
        let mut span_id = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut span_id);
        SpanId(span_id)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 8]
    }

    pub fn serialize(&self) -> String {
        hex::encode(self.0)
    }

    pub fn parse(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let span_id: [u8; 8] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(SpanId(span_id))
    }
}

/// The lifecycle of a span: created, start event emitted, end event emitted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpanPhase {
    Created,
    Started,
    Ended,
}

/// Live state for a span, owned by the execution context that started it.
///
/// The parent linkage is stored by value; a parent may complete before its
/// children without affecting anything recorded here.
#[derive(Debug)]
pub struct Span {
    /// The trace/span pair identifying this span.
    pub key: SpanKey,

    /// The trace that caused this span, if any.
    pub parent_trace: Option<TraceId>,

    /// The parent span, if any. May belong to a different trace than
    /// `parent_trace` when causality crosses process boundaries.
    pub parent_span: Option<SpanKey>,

    /// The event ID in the caller's trace that spawned this span
    /// (an RPC call start, a publish end, etc).
    pub caller_event_id: Option<TraceEventId>,

    /// Externally-supplied correlation ID for cross-system stitching.
    pub ext_correlation_id: Option<String>,

    /// Opaque handle identifying the code location that defined the
    /// operation; resolved by the consumer.
    pub def_loc: u32,

    /// Monotonic nanoseconds (relative to the log's time anchor) at which
    /// the span was created.
    pub start_nanos: u64,

    phase: SpanPhase,
}

impl Span {
    pub fn new(key: SpanKey) -> Self {
        Span {
            key,
            parent_trace: None,
            parent_span: None,
            caller_event_id: None,
            ext_correlation_id: None,
            def_loc: 0,
            start_nanos: 0,
            phase: SpanPhase::Created,
        }
    }

    pub fn phase(&self) -> SpanPhase {
        self.phase
    }

    /// Transitions to `Started`. Returns false if the span was already
    /// started or ended.
    pub(crate) fn begin(&mut self) -> bool {
        if self.phase == SpanPhase::Created {
            self.phase = SpanPhase::Started;
            true
        } else {
            false
        }
    }

    /// Transitions to `Ended`. Returns false unless the span was started.
    pub(crate) fn finish(&mut self) -> bool {
        if self.phase == SpanPhase::Started {
            self.phase = SpanPhase::Ended;
            true
        } else {
            false
        }
    }
}

// Level bytes match the wire format.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

/// A single structured field attached to a log message.
pub struct LogField<'a> {
    pub key: &'a str,
    pub value: LogFieldValue<'a>,
}

/// The closed set of log field value kinds.
pub enum LogFieldValue<'a> {
    Err(&'a TracedError),
    Str(&'a str),
    Bool(bool),
    Time(chrono::DateTime<chrono::Utc>),
    Duration(std::time::Duration),
    Uuid(uuid::Uuid),
    Json(&'a serde_json::Value),
    Int(i64),
    Uint(u64),
    F32(f32),
    F64(f64),
}

impl LogField<'_> {
    /// The wire tag for this field's value kind.
    pub fn type_byte(&self) -> u8 {
        match self.value {
            LogFieldValue::Err(_) => 1,
            LogFieldValue::Str(_) => 2,
            LogFieldValue::Bool(_) => 3,
            LogFieldValue::Time(_) => 4,
            LogFieldValue::Duration(_) => 5,
            LogFieldValue::Uuid(_) => 6,
            LogFieldValue::Json(_) => 7,
            LogFieldValue::Int(_) => 8,
            LogFieldValue::Uint(_) => 9,
            LogFieldValue::F32(_) => 10,
            LogFieldValue::F64(_) => 11,
        }
    }
}

static NEXT_THREAD_TAG: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TAG: u64 = NEXT_THREAD_TAG.fetch_add(1, Ordering::Relaxed);
}

/// Returns an opaque tag identifying the current OS thread, stable for the
/// thread's lifetime. Carried on the wire in place of a goroutine ID.
pub fn current_thread_tag() -> u64 {
    THREAD_TAG.with(|tag| *tag)
}
