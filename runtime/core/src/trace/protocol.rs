//! Implements the trace event protocol: the event catalog and the typed
//! emitters that encode payloads and hand them to the event log.

use std::sync::Arc;

use crate::error::TracedError;
use crate::model::{LogField, LogLevel, Span, SpanId, SpanKey, TraceEventId};
use crate::stack::Stack;
use crate::trace::eventbuf::EventBuffer;
use crate::trace::log::EventLog;

/// Represents a type of trace event. The tag values are part of the wire
/// format and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    RequestSpanStart = 0x01,
    RequestSpanEnd = 0x02,
    AuthSpanStart = 0x03,
    AuthSpanEnd = 0x04,
    PubsubMessageSpanStart = 0x05,
    PubsubMessageSpanEnd = 0x06,
    DBTransactionStart = 0x07,
    DBTransactionEnd = 0x08,
    DBQueryStart = 0x09,
    DBQueryEnd = 0x0A,
    RPCCallStart = 0x0B,
    RPCCallEnd = 0x0C,
    HTTPCallStart = 0x0D,
    HTTPCallEnd = 0x0E,
    LogMessage = 0x0F,
    PubsubPublishStart = 0x10,
    PubsubPublishEnd = 0x11,
    ServiceInitStart = 0x12,
    ServiceInitEnd = 0x13,
    CacheCallStart = 0x14,
    CacheCallEnd = 0x15,
    BodyStream = 0x16,
    TestStart = 0x17,
    TestEnd = 0x18,
    BucketObjectUploadStart = 0x19,
    BucketObjectUploadEnd = 0x1A,
    BucketObjectDownloadStart = 0x1B,
    BucketObjectDownloadEnd = 0x1C,
    BucketObjectGetAttrsStart = 0x1D,
    BucketObjectGetAttrsEnd = 0x1E,
    BucketListObjectsStart = 0x1F,
    BucketListObjectsEnd = 0x20,
    BucketDeleteObjectsStart = 0x21,
    BucketDeleteObjectsEnd = 0x22,
}

/// Externally-supplied correlation IDs longer than this are truncated
/// before encoding.
pub const MAX_EXT_CORRELATION_ID_LEN: usize = 64;

// Room left for the envelope fields and length prefix when sizing a
// body-stream capture against the payload cap.
const BODY_STREAM_OVERHEAD: usize = 64;

/// Common envelope for inner-operation events.
#[derive(Debug, Clone, Copy)]
pub struct EventParams {
    pub span: SpanKey,

    /// Opaque execution-thread tag; see [`crate::model::current_thread_tag`].
    pub goid: u64,

    /// Code-location handle, resolved by the consumer. Zero if unknown.
    pub def_loc: u32,
}

/// Emits trace events into an [`EventLog`].
///
/// Emitters never fail and never block beyond the log's queue lock; all
/// failure is represented in-stream or counted on the log.
#[derive(Clone)]
pub struct Tracer {
    log: Option<Arc<EventLog>>,
}

impl Tracer {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self { log: Some(log) }
    }

    /// A tracer that records nothing.
    pub fn noop() -> Self {
        Self { log: None }
    }

    pub fn is_noop(&self) -> bool {
        self.log.is_none()
    }

    // Transitions a span to Started, counting refused transitions.
    fn begin_span(&self, span: &mut Span) -> bool {
        if span.begin() {
            true
        } else {
            if let Some(log) = &self.log {
                log.record_invalid_span_transition();
            }
            false
        }
    }

    // Transitions a span to Ended, counting refused transitions.
    fn finish_span(&self, span: &mut Span) -> bool {
        if span.finish() {
            true
        } else {
            if let Some(log) = &self.log {
                log.record_invalid_span_transition();
            }
            false
        }
    }
}

// === Request, auth, pub/sub message, and test spans ===

pub struct RequestSpanStartData<'a> {
    pub service: &'a str,
    pub endpoint: &'a str,
    pub http_method: &'a str,
    pub path: &'a str,
    pub path_params: &'a [String],
    pub request_headers: &'a http::HeaderMap,
    pub payload: &'a [u8],
    pub user_id: Option<&'a str>,
    pub mocked: bool,
}

pub struct RequestSpanEndData<'a> {
    pub service: &'a str,
    pub endpoint: &'a str,
    pub http_status: u32,
    pub response_headers: &'a http::HeaderMap,
    pub response_payload: &'a [u8],
    pub duration: std::time::Duration,
    pub err: Option<&'a TracedError>,
}

pub struct AuthSpanStartData<'a> {
    pub service: &'a str,
    pub endpoint: &'a str,
    pub payload: &'a [u8],
}

pub struct AuthSpanEndData<'a> {
    pub service: &'a str,
    pub endpoint: &'a str,
    pub user_id: &'a str,
    pub payload: &'a [u8],
    pub duration: std::time::Duration,
    pub err: Option<&'a TracedError>,
}

pub struct PubsubMessageSpanStartData<'a> {
    pub service: &'a str,
    pub topic: &'a str,
    pub subscription: &'a str,
    pub message_id: &'a str,
    pub attempt: u32,
    pub published: chrono::DateTime<chrono::Utc>,
    pub payload: &'a [u8],
}

pub struct PubsubMessageSpanEndData<'a> {
    pub service: &'a str,
    pub topic: &'a str,
    pub subscription: &'a str,
    pub duration: std::time::Duration,
    pub err: Option<&'a TracedError>,
}

pub struct TestSpanStartData<'a> {
    pub service: &'a str,
    pub test_name: &'a str,
    pub user_id: &'a str,
    pub test_file: &'a str,
    pub test_line: u32,
}

pub struct TestSpanEndData<'a> {
    pub service: &'a str,
    pub test_name: &'a str,
    pub failed: bool,
    pub skipped: bool,
    pub duration: std::time::Duration,
    pub err: Option<&'a TracedError>,
}

impl Tracer {
    pub fn request_span_start(
        &self,
        span: &mut Span,
        goid: u64,
        data: RequestSpanStartData,
    ) -> TraceEventId {
        if !self.begin_span(span) {
            return TraceEventId::NONE;
        }
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = SpanStartEventData {
            span,
            goid,
            extra_space: 100 + data.path.len() + data.payload.len(),
        }
        .to_eb();

        eb.str(data.service);
        eb.str(data.endpoint);
        eb.str(data.http_method);
        eb.str(data.path);

        // Only the values are encoded; the keys are known from metadata.
        eb.uvarint(data.path_params.len() as u64);
        for value in data.path_params {
            eb.str(value);
        }

        headers(log, &mut eb, data.request_headers);
        eb.byte_string(data.payload);

        // The correlation ID appears a second time here; the duplication is
        // part of the wire format.
        eb.str(bounded_correlation_id(span.ext_correlation_id.as_deref()));
        eb.str(data.user_id.unwrap_or(""));
        eb.bool(data.mocked);

        log.add(EventType::RequestSpanStart, span.key, eb)
    }

    pub fn request_span_end(&self, span: &mut Span, data: RequestSpanEndData) {
        if !self.finish_span(span) {
            return;
        }
        let Some(log) = &self.log else { return };

        let mut eb = SpanEndEventData {
            span,
            duration: data.duration,
            err: data.err,
            extra_space: data.service.len() + data.endpoint.len() + 64 + data.response_payload.len(),
        }
        .to_eb();

        eb.str(data.service);
        eb.str(data.endpoint);
        eb.uvarint(data.http_status as u64);
        headers(log, &mut eb, data.response_headers);
        eb.byte_string(data.response_payload);

        _ = log.add(EventType::RequestSpanEnd, span.key, eb);
    }

    pub fn auth_span_start(
        &self,
        span: &mut Span,
        goid: u64,
        data: AuthSpanStartData,
    ) -> TraceEventId {
        if !self.begin_span(span) {
            return TraceEventId::NONE;
        }
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = SpanStartEventData {
            span,
            goid,
            extra_space: data.service.len() + data.endpoint.len() + data.payload.len() + 5,
        }
        .to_eb();

        eb.str(data.service);
        eb.str(data.endpoint);
        eb.byte_string(data.payload);

        log.add(EventType::AuthSpanStart, span.key, eb)
    }

    pub fn auth_span_end(&self, span: &mut Span, data: AuthSpanEndData) {
        if !self.finish_span(span) {
            return;
        }
        let Some(log) = &self.log else { return };

        let mut eb = SpanEndEventData {
            span,
            duration: data.duration,
            err: data.err,
            extra_space: data.service.len() + data.endpoint.len() + 64 + data.payload.len(),
        }
        .to_eb();

        eb.str(data.service);
        eb.str(data.endpoint);
        eb.str(data.user_id);
        eb.byte_string(data.payload);

        _ = log.add(EventType::AuthSpanEnd, span.key, eb);
    }

    pub fn pubsub_message_span_start(
        &self,
        span: &mut Span,
        goid: u64,
        data: PubsubMessageSpanStartData,
    ) -> TraceEventId {
        if !self.begin_span(span) {
            return TraceEventId::NONE;
        }
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = SpanStartEventData {
            span,
            goid,
            extra_space: data.service.len()
                + data.topic.len()
                + data.subscription.len()
                + data.payload.len()
                + 20,
        }
        .to_eb();

        eb.str(data.service);
        eb.str(data.topic);
        eb.str(data.subscription);
        eb.str(data.message_id);
        eb.uvarint(data.attempt as u64);
        eb.time(&data.published);
        eb.byte_string(data.payload);

        log.add(EventType::PubsubMessageSpanStart, span.key, eb)
    }

    pub fn pubsub_message_span_end(&self, span: &mut Span, data: PubsubMessageSpanEndData) {
        if !self.finish_span(span) {
            return;
        }
        let Some(log) = &self.log else { return };

        let mut eb = SpanEndEventData {
            span,
            duration: data.duration,
            err: data.err,
            extra_space: data.service.len() + data.topic.len() + data.subscription.len() + 4,
        }
        .to_eb();

        eb.str(data.service);
        eb.str(data.topic);
        eb.str(data.subscription);

        _ = log.add(EventType::PubsubMessageSpanEnd, span.key, eb);
    }

    pub fn test_span_start(
        &self,
        span: &mut Span,
        goid: u64,
        data: TestSpanStartData,
    ) -> TraceEventId {
        if !self.begin_span(span) {
            return TraceEventId::NONE;
        }
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = SpanStartEventData {
            span,
            goid,
            extra_space: data.service.len()
                + data.test_name.len()
                + data.user_id.len()
                + data.test_file.len()
                + 30,
        }
        .to_eb();

        eb.str(data.service);
        eb.str(data.test_name);
        eb.str(data.user_id);
        eb.str(data.test_file);
        eb.u32(data.test_line);

        log.add(EventType::TestStart, span.key, eb)
    }

    pub fn test_span_end(&self, span: &mut Span, data: TestSpanEndData) {
        if !self.finish_span(span) {
            return;
        }
        let Some(log) = &self.log else { return };

        let mut eb = SpanEndEventData {
            span,
            duration: data.duration,
            err: data.err,
            extra_space: data.service.len() + data.test_name.len() + 20,
        }
        .to_eb();

        eb.str(data.service);
        eb.str(data.test_name);
        eb.bool(data.failed);
        eb.bool(data.skipped);

        _ = log.add(EventType::TestEnd, span.key, eb);
    }
}

// === RPC and HTTP calls ===

pub struct RpcCallStartData<'a> {
    pub target_service: &'a str,
    pub target_endpoint: &'a str,
    pub stack: &'a Stack,
}

pub struct HttpCallStartData<'a> {
    /// Span ID assigned to the logical child span of the outgoing call;
    /// zero if it has none.
    pub correlation_parent_span_id: SpanId,

    pub http_method: &'a str,
    pub url: &'a str,
    pub stack: &'a Stack,

    /// Monotonic nanoseconds at which the call began.
    pub start_nanos: u64,
}

pub struct HttpCallEndData<'a> {
    pub start_id: TraceEventId,
    pub http_status: Option<u64>,
    pub err: Option<&'a TracedError>,
}

impl Tracer {
    pub fn rpc_call_start(&self, p: EventParams, data: RpcCallStartData) -> TraceEventId {
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: data.target_service.len() + data.target_endpoint.len() + 64,
        }
        .to_eb();

        eb.str(data.target_service);
        eb.str(data.target_endpoint);
        eb.stack(data.stack);

        log.add(EventType::RPCCallStart, p.span, eb)
    }

    pub fn rpc_call_end(&self, p: EventParams, start_id: TraceEventId, err: Option<&TracedError>) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: Some(start_id),
            extra_space: 64,
        }
        .to_eb();

        eb.err_with_stack(err);

        _ = log.add(EventType::RPCCallEnd, p.span, eb);
    }

    pub fn http_call_start(&self, p: EventParams, data: HttpCallStartData) -> TraceEventId {
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: 8 + data.http_method.len() + data.url.len() + 64,
        }
        .to_eb();

        eb.raw(&data.correlation_parent_span_id.0);
        eb.str(data.http_method);
        eb.str(data.url);
        eb.stack(data.stack);
        eb.uvarint(data.start_nanos);

        log.add(EventType::HTTPCallStart, p.span, eb)
    }

    pub fn http_call_end(&self, p: EventParams, data: HttpCallEndData) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: Some(data.start_id),
            extra_space: 64,
        }
        .to_eb();

        eb.opt_uvarint(data.http_status);
        eb.err_with_stack(data.err);

        _ = log.add(EventType::HTTPCallEnd, p.span, eb);
    }
}

// === Database queries and transactions ===

pub struct DbQueryStartData<'a> {
    pub query: &'a str,

    /// The enclosing transaction's start event, if the query runs inside
    /// one.
    pub tx_start_id: Option<TraceEventId>,

    pub stack: &'a Stack,
}

pub struct DbTransactionEndData<'a> {
    pub start_id: TraceEventId,
    pub commit: bool,
    pub stack: &'a Stack,
    pub err: Option<&'a TracedError>,
}

impl Tracer {
    pub fn db_query_start(&self, p: EventParams, data: DbQueryStartData) -> TraceEventId {
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: data.tx_start_id,
            extra_space: data.query.len() + 64,
        }
        .to_eb();

        eb.str(data.query);
        eb.stack(data.stack);

        log.add(EventType::DBQueryStart, p.span, eb)
    }

    pub fn db_query_end(&self, p: EventParams, start_id: TraceEventId, err: Option<&TracedError>) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: Some(start_id),
            extra_space: 64,
        }
        .to_eb();

        eb.err_with_stack(err);

        _ = log.add(EventType::DBQueryEnd, p.span, eb);
    }

    pub fn db_transaction_start(&self, p: EventParams, stack: &Stack) -> TraceEventId {
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: 64,
        }
        .to_eb();

        eb.stack(stack);

        log.add(EventType::DBTransactionStart, p.span, eb)
    }

    pub fn db_transaction_end(&self, p: EventParams, data: DbTransactionEndData) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: Some(data.start_id),
            extra_space: 64,
        }
        .to_eb();

        eb.bool(data.commit);
        eb.stack(data.stack);
        eb.err_with_stack(data.err);

        _ = log.add(EventType::DBTransactionEnd, p.span, eb);
    }
}

// === Pub/sub publishing ===

pub struct PubsubPublishStartData<'a> {
    pub topic: &'a str,
    pub message: &'a [u8],
    pub stack: &'a Stack,
}

pub struct PubsubPublishEndData<'a> {
    pub start_id: TraceEventId,
    pub message_id: &'a str,
    pub err: Option<&'a TracedError>,
}

impl Tracer {
    pub fn pubsub_publish_start(&self, p: EventParams, data: PubsubPublishStartData) -> TraceEventId {
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: data.topic.len() + data.message.len() + 64,
        }
        .to_eb();

        eb.str(data.topic);
        eb.byte_string(data.message);
        eb.stack(data.stack);

        log.add(EventType::PubsubPublishStart, p.span, eb)
    }

    pub fn pubsub_publish_end(&self, p: EventParams, data: PubsubPublishEndData) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: Some(data.start_id),
            extra_space: data.message_id.len() + 64,
        }
        .to_eb();

        eb.str(data.message_id);
        eb.err_with_stack(data.err);

        _ = log.add(EventType::PubsubPublishEnd, p.span, eb);
    }
}

// === Service initialization ===

impl Tracer {
    pub fn service_init_start(&self, p: EventParams, service: &str) -> TraceEventId {
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: service.len() + 8,
        }
        .to_eb();

        eb.str(service);

        log.add(EventType::ServiceInitStart, p.span, eb)
    }

    pub fn service_init_end(
        &self,
        p: EventParams,
        start_id: TraceEventId,
        err: Option<&TracedError>,
    ) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: Some(start_id),
            extra_space: 64,
        }
        .to_eb();

        eb.err_with_stack(err);

        _ = log.add(EventType::ServiceInitEnd, p.span, eb);
    }
}

// === Cache calls ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CacheCallResult {
    Ok = 1,
    NoSuchKey = 2,
    Conflict = 3,
    Err = 4,
}

pub struct CacheCallStartData<'a> {
    pub operation: &'a str,
    pub is_write: bool,
    pub keys: &'a [String],
    pub stack: &'a Stack,
}

pub struct CacheCallEndData<'a> {
    pub start_id: TraceEventId,
    pub result: CacheCallResult,
    pub err: Option<&'a TracedError>,
}

impl Tracer {
    pub fn cache_call_start(&self, p: EventParams, data: CacheCallStartData) -> TraceEventId {
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: data.operation.len() + 64,
        }
        .to_eb();

        eb.str(data.operation);
        eb.bool(data.is_write);
        eb.stack(data.stack);

        eb.uvarint(data.keys.len() as u64);
        for key in data.keys {
            eb.str(key);
        }

        log.add(EventType::CacheCallStart, p.span, eb)
    }

    pub fn cache_call_end(&self, p: EventParams, data: CacheCallEndData) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: Some(data.start_id),
            extra_space: 64,
        }
        .to_eb();

        eb.byte(data.result as u8);
        eb.err_with_stack(data.err);

        _ = log.add(EventType::CacheCallEnd, p.span, eb);
    }
}

// === Body streams ===

pub struct BodyStreamData<'a> {
    /// Whether the captured stream was a response body rather than a
    /// request body.
    pub is_response: bool,

    /// Whether the capture overflowed upstream of the tracer.
    pub overflowed: bool,

    pub data: &'a [u8],
}

impl Tracer {
    pub fn body_stream(&self, p: EventParams, data: BodyStreamData) {
        let Some(log) = &self.log else { return };

        let budget = log
            .config()
            .max_payload_bytes
            .saturating_sub(BODY_STREAM_OVERHEAD);
        let overflowed = data.overflowed || data.data.len() > budget;

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: data.data.len().min(budget) + 16,
        }
        .to_eb();

        let mut flags: u8 = 0;
        if data.is_response {
            flags |= 1 << 0;
        }
        if overflowed {
            flags |= 1 << 1;
        }
        eb.byte(flags);
        eb.truncated_byte_string(data.data, budget, b"");

        _ = log.add(EventType::BodyStream, p.span, eb);
    }
}

// === Object store (bucket) operations ===

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketObjectAttrs {
    pub size: Option<u64>,
    pub version: Option<String>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

pub struct BucketObjectUploadStartData<'a> {
    pub bucket: &'a str,
    pub object: &'a str,
    pub attrs: &'a BucketObjectAttrs,
    pub stack: &'a Stack,
}

pub struct BucketObjectUploadEndData<'a> {
    pub start_id: TraceEventId,
    pub size: u64,
    pub version: Option<&'a str>,
    pub err: Option<&'a TracedError>,
}

pub struct BucketObjectDownloadStartData<'a> {
    pub bucket: &'a str,
    pub object: &'a str,
    pub version: Option<&'a str>,
    pub stack: &'a Stack,
}

pub struct BucketObjectDownloadEndData<'a> {
    pub start_id: TraceEventId,
    pub size: u64,
    pub err: Option<&'a TracedError>,
}

pub struct BucketObjectGetAttrsStartData<'a> {
    pub bucket: &'a str,
    pub object: &'a str,
    pub version: Option<&'a str>,
    pub stack: &'a Stack,
}

pub struct BucketObjectGetAttrsEndData<'a> {
    pub start_id: TraceEventId,
    pub err: Option<&'a TracedError>,

    /// Set iff there was no error.
    pub attrs: Option<&'a BucketObjectAttrs>,
}

pub struct BucketListObjectsStartData<'a> {
    pub bucket: &'a str,
    pub prefix: Option<&'a str>,
    pub stack: &'a Stack,
}

pub struct BucketListObjectsEndData<'a> {
    pub start_id: TraceEventId,
    pub err: Option<&'a TracedError>,
    pub observed: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketDeleteEntry {
    pub object: String,
    pub version: Option<String>,
}

pub struct BucketDeleteObjectsStartData<'a> {
    pub bucket: &'a str,
    pub entries: &'a [BucketDeleteEntry],
    pub stack: &'a Stack,
}

pub struct BucketDeleteObjectsEndData<'a> {
    pub start_id: TraceEventId,
    pub err: Option<&'a TracedError>,
}

impl Tracer {
    pub fn bucket_object_upload_start(
        &self,
        p: EventParams,
        data: BucketObjectUploadStartData,
    ) -> TraceEventId {
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: data.bucket.len() + data.object.len() + 64,
        }
        .to_eb();

        eb.str(data.bucket);
        eb.str(data.object);
        eb.bucket_object_attrs(data.attrs);
        eb.stack(data.stack);

        log.add(EventType::BucketObjectUploadStart, p.span, eb)
    }

    pub fn bucket_object_upload_end(&self, p: EventParams, data: BucketObjectUploadEndData) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: Some(data.start_id),
            extra_space: 64,
        }
        .to_eb();

        eb.uvarint(data.size);
        eb.opt_str(data.version);
        eb.err_with_stack(data.err);

        _ = log.add(EventType::BucketObjectUploadEnd, p.span, eb);
    }

    pub fn bucket_object_download_start(
        &self,
        p: EventParams,
        data: BucketObjectDownloadStartData,
    ) -> TraceEventId {
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: data.bucket.len() + data.object.len() + 64,
        }
        .to_eb();

        eb.str(data.bucket);
        eb.str(data.object);
        eb.opt_str(data.version);
        eb.stack(data.stack);

        log.add(EventType::BucketObjectDownloadStart, p.span, eb)
    }

    pub fn bucket_object_download_end(&self, p: EventParams, data: BucketObjectDownloadEndData) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: Some(data.start_id),
            extra_space: 16,
        }
        .to_eb();

        eb.uvarint(data.size);
        eb.err_with_stack(data.err);

        _ = log.add(EventType::BucketObjectDownloadEnd, p.span, eb);
    }

    pub fn bucket_object_get_attrs_start(
        &self,
        p: EventParams,
        data: BucketObjectGetAttrsStartData,
    ) -> TraceEventId {
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: data.bucket.len() + data.object.len() + 64,
        }
        .to_eb();

        eb.str(data.bucket);
        eb.str(data.object);
        eb.opt_str(data.version);
        eb.stack(data.stack);

        log.add(EventType::BucketObjectGetAttrsStart, p.span, eb)
    }

    pub fn bucket_object_get_attrs_end(&self, p: EventParams, data: BucketObjectGetAttrsEndData) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: Some(data.start_id),
            extra_space: 64,
        }
        .to_eb();

        eb.err_with_stack(data.err);
        if data.err.is_none() {
            let empty = BucketObjectAttrs::default();
            eb.bucket_object_attrs(data.attrs.unwrap_or(&empty));
        }

        _ = log.add(EventType::BucketObjectGetAttrsEnd, p.span, eb);
    }

    pub fn bucket_list_objects_start(
        &self,
        p: EventParams,
        data: BucketListObjectsStartData,
    ) -> TraceEventId {
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: data.bucket.len() + 64,
        }
        .to_eb();

        eb.str(data.bucket);
        eb.opt_str(data.prefix);
        eb.stack(data.stack);

        log.add(EventType::BucketListObjectsStart, p.span, eb)
    }

    pub fn bucket_list_objects_end(&self, p: EventParams, data: BucketListObjectsEndData) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: Some(data.start_id),
            extra_space: 16,
        }
        .to_eb();

        eb.err_with_stack(data.err);
        eb.uvarint(data.observed);
        eb.bool(data.has_more);

        _ = log.add(EventType::BucketListObjectsEnd, p.span, eb);
    }

    pub fn bucket_delete_objects_start(
        &self,
        p: EventParams,
        data: BucketDeleteObjectsStartData,
    ) -> TraceEventId {
        let Some(log) = &self.log else {
            return TraceEventId::NONE;
        };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: data.bucket.len() + 64,
        }
        .to_eb();

        eb.str(data.bucket);
        eb.stack(data.stack);
        eb.uvarint(data.entries.len() as u64);
        for entry in data.entries {
            eb.str(&entry.object);
            eb.opt_str(entry.version.as_deref());
        }

        log.add(EventType::BucketDeleteObjectsStart, p.span, eb)
    }

    pub fn bucket_delete_objects_end(&self, p: EventParams, data: BucketDeleteObjectsEndData) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: Some(data.start_id),
            extra_space: 16,
        }
        .to_eb();

        eb.err_with_stack(data.err);

        _ = log.add(EventType::BucketDeleteObjectsEnd, p.span, eb);
    }
}

// === Log messages ===

pub struct LogMessageData<'a> {
    pub level: LogLevel,
    pub msg: &'a str,
    pub fields: &'a [LogField<'a>],
    pub stack: &'a Stack,
}

impl Tracer {
    pub fn log_message(&self, p: EventParams, data: LogMessageData) {
        let Some(log) = &self.log else { return };

        let mut eb = BasicEventData {
            params: p,
            correlation_event_id: None,
            extra_space: data.msg.len() + 1 + 64 * data.fields.len(),
        }
        .to_eb();

        eb.byte(data.level as u8);
        eb.str(data.msg);

        eb.uvarint(data.fields.len() as u64);
        for field in data.fields {
            eb.log_field(field);
        }
        eb.stack(data.stack);

        _ = log.add(EventType::LogMessage, p.span, eb);
    }
}

// === Payload base builders ===

fn headers(log: &EventLog, eb: &mut EventBuffer, headers: &http::HeaderMap) {
    if log.config().capture_headers {
        eb.headers(headers);
    } else {
        eb.uvarint(0u64);
    }
}

// Truncates to the bound on a char boundary.
fn bounded_correlation_id(s: Option<&str>) -> &str {
    let s = s.unwrap_or("");
    if s.len() <= MAX_EXT_CORRELATION_ID_LEN {
        return s;
    }
    let mut end = MAX_EXT_CORRELATION_ID_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl EventBuffer {
    // The two parent fields are independent: a span's parent span may sit
    // in a different trace than its parent trace. Each encodes on its own,
    // zeroed when unset.
    fn parent_ids(&mut self, span: &Span) {
        self.reserve(16 + 8);
        match span.parent_trace {
            Some(trace) => self.raw(&trace.0),
            None => self.raw(&[0; 16]),
        }
        match span.parent_span {
            Some(parent) => self.raw(&parent.1 .0),
            None => self.raw(&[0; 8]),
        }
    }

    fn bucket_object_attrs(&mut self, attrs: &BucketObjectAttrs) {
        self.opt_uvarint(attrs.size);
        self.opt_str(attrs.version.as_deref());
        self.opt_str(attrs.etag.as_deref());
        self.opt_str(attrs.content_type.as_deref());
    }
}

struct SpanStartEventData<'a> {
    span: &'a Span,
    goid: u64,

    /// Additional extra space to allocate in the buffer.
    extra_space: usize,
}

impl SpanStartEventData<'_> {
    fn to_eb(self) -> EventBuffer {
        let correlation_id = bounded_correlation_id(self.span.ext_correlation_id.as_deref());
        let mut eb =
            EventBuffer::with_capacity(4 + 16 + 8 + 4 + correlation_id.len() + 2 + self.extra_space);

        eb.uvarint(self.goid);
        eb.parent_ids(self.span);
        eb.uvarint(self.span.def_loc as u64);
        eb.event_id(self.span.caller_event_id);
        eb.str(correlation_id);

        eb
    }
}

struct SpanEndEventData<'a> {
    span: &'a Span,
    duration: std::time::Duration,
    err: Option<&'a TracedError>,

    /// Additional extra space to allocate in the buffer.
    extra_space: usize,
}

impl SpanEndEventData<'_> {
    fn to_eb(self) -> EventBuffer {
        let mut eb = EventBuffer::with_capacity(8 + 12 + 8 + self.extra_space);

        eb.duration(self.duration);
        eb.err_with_stack(self.err);
        match self.err.and_then(|e| e.panic_stack.as_deref()) {
            Some(frames) => eb.formatted_stack(frames),
            None => eb.formatted_stack(&[]),
        }
        eb.parent_ids(self.span);

        eb
    }
}

struct BasicEventData {
    params: EventParams,
    correlation_event_id: Option<TraceEventId>,

    /// Additional extra space to allocate in the buffer.
    extra_space: usize,
}

impl BasicEventData {
    fn to_eb(self) -> EventBuffer {
        let mut eb = EventBuffer::with_capacity(4 + 4 + self.extra_space);

        eb.uvarint(self.params.def_loc as u64);
        eb.uvarint(self.params.goid);
        eb.event_id(self.correlation_event_id);

        eb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TraceId;
    use crate::trace::log::Config;

    fn setup() -> (Arc<EventLog>, Tracer) {
        let log = Arc::new(EventLog::new(Config::default()));
        let tracer = Tracer::new(log.clone());
        (log, tracer)
    }

    fn span_key() -> SpanKey {
        SpanKey(TraceId([1; 16]), SpanId([2; 8]))
    }

    #[test]
    fn event_type_tags_are_stable() {
        let table: &[(EventType, u8)] = &[
            (EventType::RequestSpanStart, 0x01),
            (EventType::RequestSpanEnd, 0x02),
            (EventType::AuthSpanStart, 0x03),
            (EventType::AuthSpanEnd, 0x04),
            (EventType::PubsubMessageSpanStart, 0x05),
            (EventType::PubsubMessageSpanEnd, 0x06),
            (EventType::DBTransactionStart, 0x07),
            (EventType::DBTransactionEnd, 0x08),
            (EventType::DBQueryStart, 0x09),
            (EventType::DBQueryEnd, 0x0A),
            (EventType::RPCCallStart, 0x0B),
            (EventType::RPCCallEnd, 0x0C),
            (EventType::HTTPCallStart, 0x0D),
            (EventType::HTTPCallEnd, 0x0E),
            (EventType::LogMessage, 0x0F),
            (EventType::PubsubPublishStart, 0x10),
            (EventType::PubsubPublishEnd, 0x11),
            (EventType::ServiceInitStart, 0x12),
            (EventType::ServiceInitEnd, 0x13),
            (EventType::CacheCallStart, 0x14),
            (EventType::CacheCallEnd, 0x15),
            (EventType::BodyStream, 0x16),
            (EventType::TestStart, 0x17),
            (EventType::TestEnd, 0x18),
            (EventType::BucketObjectUploadStart, 0x19),
            (EventType::BucketObjectUploadEnd, 0x1A),
            (EventType::BucketObjectDownloadStart, 0x1B),
            (EventType::BucketObjectDownloadEnd, 0x1C),
            (EventType::BucketObjectGetAttrsStart, 0x1D),
            (EventType::BucketObjectGetAttrsEnd, 0x1E),
            (EventType::BucketListObjectsStart, 0x1F),
            (EventType::BucketListObjectsEnd, 0x20),
            (EventType::BucketDeleteObjectsStart, 0x21),
            (EventType::BucketDeleteObjectsEnd, 0x22),
        ];
        for (typ, tag) in table {
            assert_eq!(*typ as u8, *tag, "{typ:?}");
        }
    }

    #[test]
    fn inner_event_base_field_order() {
        let (log, tracer) = setup();
        let p = EventParams {
            span: span_key(),
            goid: 10,
            def_loc: 5,
        };
        let id = tracer.service_init_start(p, "svc");
        assert_eq!(id, TraceEventId(1));

        let events = log.drain(1);
        assert_eq!(events[0].typ, EventType::ServiceInitStart);
        // def_loc, goid, correlation, then "svc".
        assert_eq!(events[0].data.as_ref(), &[0x05, 0x0A, 0x00, 0x03, b's', b'v', b'c']);
    }

    #[test]
    fn span_start_base_field_order() {
        let (log, tracer) = setup();

        let mut span = Span::new(span_key());
        span.parent_trace = Some(TraceId([7; 16]));
        span.caller_event_id = Some(TraceEventId(9));
        span.ext_correlation_id = Some("corr".to_string());

        let id = tracer.auth_span_start(
            &mut span,
            3,
            AuthSpanStartData {
                service: "s",
                endpoint: "e",
                payload: b"p",
            },
        );
        assert_eq!(id, TraceEventId(1));

        let events = log.drain(1);
        let data = events[0].data.as_ref();

        let mut expected = vec![0x03]; // goid
        expected.extend_from_slice(&[7; 16]); // parent trace
        expected.extend_from_slice(&[0; 8]); // no parent span
        expected.push(0x00); // def_loc
        expected.push(0x09); // caller event id
        expected.extend_from_slice(&[0x04, b'c', b'o', b'r', b'r']);
        expected.extend_from_slice(&[0x01, b's', 0x01, b'e', 0x01, b'p']);
        assert_eq!(data, expected.as_slice());
    }

    #[test]
    fn parent_fields_encode_independently() {
        let (log, tracer) = setup();

        // The parent span lives in a different trace than the parent trace.
        let mut span = Span::new(span_key());
        span.parent_trace = Some(TraceId([0xAA; 16]));
        span.parent_span = Some(SpanKey(TraceId([0xBB; 16]), SpanId([0xCC; 8])));

        _ = tracer.auth_span_start(
            &mut span,
            1,
            AuthSpanStartData {
                service: "s",
                endpoint: "e",
                payload: &[],
            },
        );

        let events = log.drain(1);
        let data = events[0].data.as_ref();
        // goid, then the parent trace bytes, then the parent span bytes.
        assert_eq!(&data[1..17], &[0xAA; 16]);
        assert_eq!(&data[17..25], &[0xCC; 8]);
    }

    #[test]
    fn double_start_is_refused_with_counter() {
        let (log, tracer) = setup();
        let mut span = Span::new(span_key());

        let first = tracer.auth_span_start(
            &mut span,
            1,
            AuthSpanStartData {
                service: "s",
                endpoint: "e",
                payload: &[],
            },
        );
        assert_eq!(first, TraceEventId(1));

        let second = tracer.auth_span_start(
            &mut span,
            1,
            AuthSpanStartData {
                service: "s",
                endpoint: "e",
                payload: &[],
            },
        );
        assert!(second.is_none());
        assert_eq!(log.invalid_span_transitions(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn end_without_start_is_refused_with_counter() {
        let (log, tracer) = setup();
        let mut span = Span::new(span_key());

        tracer.request_span_end(
            &mut span,
            RequestSpanEndData {
                service: "s",
                endpoint: "e",
                http_status: 200,
                response_headers: &http::HeaderMap::new(),
                response_payload: &[],
                duration: std::time::Duration::from_millis(1),
                err: None,
            },
        );
        assert_eq!(log.invalid_span_transitions(), 1);
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn correlation_id_is_bounded() {
        let long = "x".repeat(200);
        let bounded = bounded_correlation_id(Some(&long));
        assert_eq!(bounded.len(), MAX_EXT_CORRELATION_ID_LEN);

        assert_eq!(bounded_correlation_id(None), "");
        assert_eq!(bounded_correlation_id(Some("ok")), "ok");
    }

    #[test]
    fn body_stream_sets_overflow_flag_when_truncating() {
        let log = Arc::new(EventLog::new(Config {
            max_payload_bytes: 256,
            ..Config::default()
        }));
        let tracer = Tracer::new(log.clone());

        let big = vec![0xCD; 1024];
        tracer.body_stream(
            EventParams {
                span: span_key(),
                goid: 0,
                def_loc: 0,
            },
            BodyStreamData {
                is_response: false,
                overflowed: false,
                data: &big,
            },
        );

        let events = log.drain(1);
        let data = events[0].data.as_ref();
        // Inner-op base is three zero varints, then the flag byte.
        assert_eq!(data[3] & 0b10, 0b10);
        // The whole payload fits within the cap despite the oversized input.
        assert!(data.len() <= 256);
        assert_eq!(log.truncated_payloads(), 0);
    }

    #[test]
    fn noop_tracer_records_nothing() {
        let tracer = Tracer::noop();
        assert!(tracer.is_noop());

        let mut span = Span::new(span_key());
        let id = tracer.auth_span_start(
            &mut span,
            1,
            AuthSpanStartData {
                service: "s",
                endpoint: "e",
                payload: &[],
            },
        );
        assert!(id.is_none());

        let id = tracer.db_transaction_start(
            EventParams {
                span: span_key(),
                goid: 0,
                def_loc: 0,
            },
            &Stack::empty(),
        );
        assert!(id.is_none());
    }

    #[test]
    fn nested_query_correlates_to_transaction() {
        let (log, tracer) = setup();
        let p = EventParams {
            span: span_key(),
            goid: 1,
            def_loc: 0,
        };

        let tx = tracer.db_transaction_start(p, &Stack::empty());
        let query = tracer.db_query_start(
            p,
            DbQueryStartData {
                query: "SELECT 1",
                tx_start_id: Some(tx),
                stack: &Stack::empty(),
            },
        );
        tracer.db_query_end(p, query, None);
        tracer.db_transaction_end(
            p,
            DbTransactionEndData {
                start_id: tx,
                commit: true,
                stack: &Stack::empty(),
                err: None,
            },
        );

        let events = log.drain(10);
        assert_eq!(events.len(), 4);
        assert_eq!(tx, TraceEventId(1));
        assert_eq!(query, TraceEventId(2));

        // The query start carries the transaction's event ID as its
        // correlation (third base varint).
        assert_eq!(events[1].typ, EventType::DBQueryStart);
        assert_eq!(events[1].data.as_ref()[2], 0x01);
    }
}
