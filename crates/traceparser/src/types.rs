use std::collections::HashMap;

// === Error types ===

/// Errors that can occur during trace stream parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Reached end of stream at a clean event boundary (no more events).
    #[error("end of stream")]
    EndOfStream,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad stream magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported stream version: {0}")]
    UnsupportedVersion(u64),

    #[error("unknown event type: 0x{0:02x}")]
    UnknownEventType(u8),

    #[error("unexpected end of event data")]
    UnexpectedEof,

    #[error("parse error: {0}")]
    InvalidData(String),
}

// === Basic types ===

/// A timestamp represented as seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

/// A 128-bit trace identifier, opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub [u8; 16]);

impl TraceId {
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }
}

/// A 64-bit span identifier, opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub [u8; 8]);

impl SpanId {
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 8]
    }
}

/// A captured stack: absolute program counters, reconstructed from the
/// delta encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTrace {
    pub pcs: Vec<u64>,
}

/// A resolved frame in a formatted stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub file: String,
    pub line: u32,
}

/// An error carried in a payload: message, classification tag, and the
/// frames where it was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedError {
    pub msg: String,
    pub kind: u64,
    pub stack: Vec<StackFrame>,
}

// === Top-level event types ===

/// A parsed trace event.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub event_id: u64,

    /// Monotonic nanoseconds since the producing log's time anchor.
    pub ts_nanos: u64,

    pub event: Event,
}

/// The three families of trace events.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SpanStart(SpanStart),
    SpanEnd(SpanEnd),
    SpanEvent(SpanEvent),
}

// === Span start ===

#[derive(Debug, Clone, PartialEq)]
pub struct SpanStart {
    pub goid: u64,
    pub parent_trace_id: Option<TraceId>,
    pub parent_span_id: Option<SpanId>,
    pub def_loc: Option<u64>,
    pub caller_event_id: Option<u64>,
    pub ext_correlation_id: Option<String>,
    pub data: SpanStartData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpanStartData {
    Request(RequestSpanStart),
    Auth(AuthSpanStart),
    PubsubMessage(PubsubMessageSpanStart),
    Test(TestSpanStart),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpanStart {
    pub service_name: String,
    pub endpoint_name: String,
    pub http_method: String,
    pub path: String,
    pub path_params: Vec<String>,
    pub request_headers: HashMap<String, String>,
    pub request_payload: Vec<u8>,
    pub ext_correlation_id: Option<String>,
    pub uid: Option<String>,
    pub mocked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthSpanStart {
    pub service_name: String,
    pub endpoint_name: String,
    pub auth_payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PubsubMessageSpanStart {
    pub service_name: String,
    pub topic_name: String,
    pub subscription_name: String,
    pub message_id: String,
    pub attempt: u32,
    pub publish_time: Timestamp,
    pub message_payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestSpanStart {
    pub service_name: String,
    pub test_name: String,
    pub uid: String,
    pub test_file: String,
    pub test_line: u32,
}

// === Span end ===

#[derive(Debug, Clone, PartialEq)]
pub struct SpanEnd {
    pub duration_nanos: u64,
    pub error: Option<TracedError>,
    pub panic_stack: Option<Vec<StackFrame>>,
    pub parent_trace_id: Option<TraceId>,
    pub parent_span_id: Option<SpanId>,
    pub data: SpanEndData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpanEndData {
    Request(RequestSpanEnd),
    Auth(AuthSpanEnd),
    PubsubMessage(PubsubMessageSpanEnd),
    Test(TestSpanEnd),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpanEnd {
    pub service_name: String,
    pub endpoint_name: String,
    pub http_status_code: u32,
    pub response_headers: HashMap<String, String>,
    pub response_payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthSpanEnd {
    pub service_name: String,
    pub endpoint_name: String,
    pub uid: String,
    pub user_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PubsubMessageSpanEnd {
    pub service_name: String,
    pub topic_name: String,
    pub subscription_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestSpanEnd {
    pub service_name: String,
    pub test_name: String,
    pub failed: bool,
    pub skipped: bool,
}

// === Span events ===

#[derive(Debug, Clone, PartialEq)]
pub struct SpanEvent {
    pub goid: u64,
    pub def_loc: Option<u64>,
    pub correlation_event_id: Option<u64>,
    pub data: SpanEventData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpanEventData {
    RpcCallStart(RpcCallStart),
    RpcCallEnd(RpcCallEnd),
    DbQueryStart(DbQueryStart),
    DbQueryEnd(DbQueryEnd),
    DbTransactionStart(DbTransactionStart),
    DbTransactionEnd(DbTransactionEnd),
    PubsubPublishStart(PubsubPublishStart),
    PubsubPublishEnd(PubsubPublishEnd),
    HttpCallStart(HttpCallStart),
    HttpCallEnd(HttpCallEnd),
    LogMessage(LogMessage),
    ServiceInitStart(ServiceInitStart),
    ServiceInitEnd(ServiceInitEnd),
    CacheCallStart(CacheCallStart),
    CacheCallEnd(CacheCallEnd),
    BodyStream(BodyStream),
    BucketObjectUploadStart(BucketObjectUploadStart),
    BucketObjectUploadEnd(BucketObjectUploadEnd),
    BucketObjectDownloadStart(BucketObjectDownloadStart),
    BucketObjectDownloadEnd(BucketObjectDownloadEnd),
    BucketObjectGetAttrsStart(BucketObjectGetAttrsStart),
    BucketObjectGetAttrsEnd(BucketObjectGetAttrsEnd),
    BucketListObjectsStart(BucketListObjectsStart),
    BucketListObjectsEnd(BucketListObjectsEnd),
    BucketDeleteObjectsStart(BucketDeleteObjectsStart),
    BucketDeleteObjectsEnd(BucketDeleteObjectsEnd),
}

// === RPC types ===

#[derive(Debug, Clone, PartialEq)]
pub struct RpcCallStart {
    pub target_service_name: String,
    pub target_endpoint_name: String,
    pub stack: Option<StackTrace>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcCallEnd {
    pub err: Option<TracedError>,
}

// === DB types ===

#[derive(Debug, Clone, PartialEq)]
pub struct DbQueryStart {
    pub query: String,
    pub stack: Option<StackTrace>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbQueryEnd {
    pub err: Option<TracedError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbTransactionStart {
    pub stack: Option<StackTrace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbTransactionCompletion {
    Rollback,
    Commit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbTransactionEnd {
    pub completion: DbTransactionCompletion,
    pub stack: Option<StackTrace>,
    pub err: Option<TracedError>,
}

// === Pubsub types ===

#[derive(Debug, Clone, PartialEq)]
pub struct PubsubPublishStart {
    pub topic: String,
    pub message: Vec<u8>,
    pub stack: Option<StackTrace>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PubsubPublishEnd {
    pub message_id: String,
    pub err: Option<TracedError>,
}

// === HTTP call types ===

#[derive(Debug, Clone, PartialEq)]
pub struct HttpCallStart {
    /// Span ID assigned to the logical child span of the outgoing call;
    /// zero bytes if it has none.
    pub correlation_parent_span_id: SpanId,

    pub method: String,
    pub url: String,
    pub stack: Option<StackTrace>,

    /// Monotonic nanoseconds at which the call began.
    pub start_nanos: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpCallEnd {
    pub status_code: Option<u64>,
    pub err: Option<TracedError>,
}

// === Service init types ===

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInitStart {
    pub service: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInitEnd {
    pub err: Option<TracedError>,
}

// === Cache types ===

#[derive(Debug, Clone, PartialEq)]
pub struct CacheCallStart {
    pub operation: String,
    pub write: bool,
    pub stack: Option<StackTrace>,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    Unknown,
    Ok,
    NoSuchKey,
    Conflict,
    Err,
}

impl CacheResult {
    pub(crate) fn from_byte(b: u8) -> Self {
        match b {
            1 => Self::Ok,
            2 => Self::NoSuchKey,
            3 => Self::Conflict,
            4 => Self::Err,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheCallEnd {
    pub result: CacheResult,
    pub err: Option<TracedError>,
}

// === Body stream ===

#[derive(Debug, Clone, PartialEq)]
pub struct BodyStream {
    pub is_response: bool,
    pub overflowed: bool,
    pub data: Vec<u8>,
}

// === Log types ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from the binary wire format byte value.
    pub(crate) fn from_wire_byte(b: u8) -> Self {
        match b {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            4 => Self::Error,
            _ => Self::Trace,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    pub level: LogLevel,
    pub msg: String,
    pub fields: Vec<LogField>,
    pub stack: Option<StackTrace>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogField {
    pub key: String,
    pub value: LogFieldValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogFieldValue {
    Error(TracedError),
    Str(String),
    Bool(bool),
    Time(Timestamp),
    Duration(i64),
    Uuid([u8; 16]),
    Json(Vec<u8>),
    Int(i64),
    Uint(u64),
    Float32(f32),
    Float64(f64),
}

// === Bucket types ===

#[derive(Debug, Clone, PartialEq)]
pub struct BucketObjectAttributes {
    pub size: Option<u64>,
    pub version: Option<String>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketObjectUploadStart {
    pub bucket: String,
    pub object: String,
    pub attrs: BucketObjectAttributes,
    pub stack: Option<StackTrace>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketObjectUploadEnd {
    pub size: u64,
    pub version: Option<String>,
    pub err: Option<TracedError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketObjectDownloadStart {
    pub bucket: String,
    pub object: String,
    pub version: Option<String>,
    pub stack: Option<StackTrace>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketObjectDownloadEnd {
    pub size: u64,
    pub err: Option<TracedError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketObjectGetAttrsStart {
    pub bucket: String,
    pub object: String,
    pub version: Option<String>,
    pub stack: Option<StackTrace>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketObjectGetAttrsEnd {
    pub err: Option<TracedError>,
    pub attrs: Option<BucketObjectAttributes>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketListObjectsStart {
    pub bucket: String,
    pub prefix: Option<String>,
    pub stack: Option<StackTrace>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketListObjectsEnd {
    pub err: Option<TracedError>,
    pub observed: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketDeleteObjectEntry {
    pub object: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketDeleteObjectsStart {
    pub bucket: String,
    pub stack: Option<StackTrace>,
    pub entries: Vec<BucketDeleteObjectEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketDeleteObjectsEnd {
    pub err: Option<TracedError>,
}
