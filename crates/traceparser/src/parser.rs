use std::collections::HashMap;

use crate::reader::{self, EventReader};
use crate::types::*;

// Event type constants (wire format byte values).
const REQUEST_SPAN_START: u8 = 0x01;
const REQUEST_SPAN_END: u8 = 0x02;
const AUTH_SPAN_START: u8 = 0x03;
const AUTH_SPAN_END: u8 = 0x04;
const PUBSUB_MESSAGE_SPAN_START: u8 = 0x05;
const PUBSUB_MESSAGE_SPAN_END: u8 = 0x06;
const DB_TRANSACTION_START: u8 = 0x07;
const DB_TRANSACTION_END: u8 = 0x08;
const DB_QUERY_START: u8 = 0x09;
const DB_QUERY_END: u8 = 0x0A;
const RPC_CALL_START: u8 = 0x0B;
const RPC_CALL_END: u8 = 0x0C;
const HTTP_CALL_START: u8 = 0x0D;
const HTTP_CALL_END: u8 = 0x0E;
const LOG_MESSAGE: u8 = 0x0F;
const PUBSUB_PUBLISH_START: u8 = 0x10;
const PUBSUB_PUBLISH_END: u8 = 0x11;
const SERVICE_INIT_START: u8 = 0x12;
const SERVICE_INIT_END: u8 = 0x13;
const CACHE_CALL_START: u8 = 0x14;
const CACHE_CALL_END: u8 = 0x15;
const BODY_STREAM: u8 = 0x16;
const TEST_START: u8 = 0x17;
const TEST_END: u8 = 0x18;
const BUCKET_OBJECT_UPLOAD_START: u8 = 0x19;
const BUCKET_OBJECT_UPLOAD_END: u8 = 0x1A;
const BUCKET_OBJECT_DOWNLOAD_START: u8 = 0x1B;
const BUCKET_OBJECT_DOWNLOAD_END: u8 = 0x1C;
const BUCKET_OBJECT_GET_ATTRS_START: u8 = 0x1D;
const BUCKET_OBJECT_GET_ATTRS_END: u8 = 0x1E;
const BUCKET_LIST_OBJECTS_START: u8 = 0x1F;
const BUCKET_LIST_OBJECTS_END: u8 = 0x20;
const BUCKET_DELETE_OBJECTS_START: u8 = 0x21;
const BUCKET_DELETE_OBJECTS_END: u8 = 0x22;

// Log field type constants (wire format).
const LOG_FIELD_ERR: u8 = 1;
const LOG_FIELD_STRING: u8 = 2;
const LOG_FIELD_BOOL: u8 = 3;
const LOG_FIELD_TIME: u8 = 4;
const LOG_FIELD_DURATION: u8 = 5;
const LOG_FIELD_UUID: u8 = 6;
const LOG_FIELD_JSON: u8 = 7;
const LOG_FIELD_INT: u8 = 8;
const LOG_FIELD_UINT: u8 = 9;
const LOG_FIELD_FLOAT32: u8 = 10;
const LOG_FIELD_FLOAT64: u8 = 11;

/// Read and validate the stream header (magic bytes and version).
///
/// Must be called once per stream, before the first [`parse_event`].
pub fn read_stream_header(reader: &mut impl std::io::Read) -> Result<u64, ParseError> {
    reader::read_stream_header(reader)
}

/// Parse a single trace event from the reader.
///
/// Reads one complete record (header + body) from the stream.
/// Returns `ParseError::EndOfStream` when there are no more events.
pub fn parse_event(reader: &mut impl std::io::Read) -> Result<TraceEvent, ParseError> {
    let header = reader::read_record_header(reader)?;
    let body = reader::read_body(reader, header.data_len)?;
    let mut r = EventReader::new(&body);

    let event = match header.event_type {
        REQUEST_SPAN_START => Event::SpanStart(r.request_span_start()),
        REQUEST_SPAN_END => Event::SpanEnd(r.request_span_end()),
        AUTH_SPAN_START => Event::SpanStart(r.auth_span_start()),
        AUTH_SPAN_END => Event::SpanEnd(r.auth_span_end()),
        PUBSUB_MESSAGE_SPAN_START => Event::SpanStart(r.pubsub_message_span_start()),
        PUBSUB_MESSAGE_SPAN_END => Event::SpanEnd(r.pubsub_message_span_end()),
        TEST_START => Event::SpanStart(r.test_span_start()),
        TEST_END => Event::SpanEnd(r.test_span_end()),
        other => Event::SpanEvent(r.span_event(other)?),
    };

    if r.has_error() {
        return Err(ParseError::UnexpectedEof);
    }

    Ok(TraceEvent {
        trace_id: header.trace_id,
        span_id: header.span_id,
        event_id: header.event_id,
        ts_nanos: header.ts_nanos,
        event,
    })
}

// === Internal helpers ===

fn non_zero_u64(val: u64) -> Option<u64> {
    if val == 0 {
        None
    } else {
        Some(val)
    }
}

/// Common span start fields.
struct SpanStartCommon {
    goid: u64,
    parent_trace_id: Option<TraceId>,
    parent_span_id: Option<SpanId>,
    def_loc: Option<u64>,
    caller_event_id: Option<u64>,
    ext_correlation_id: Option<String>,
}

/// Common span end fields.
struct SpanEndCommon {
    duration_nanos: u64,
    error: Option<TracedError>,
    panic_stack: Option<Vec<StackFrame>>,
    parent_trace_id: Option<TraceId>,
    parent_span_id: Option<SpanId>,
}

// === Event-specific parsing methods on EventReader ===

impl EventReader<'_> {
    // --- Common parsers ---

    fn span_start_common(&mut self) -> SpanStartCommon {
        let goid = self.uvarint();
        let parent_trace_id = self.trace_id();
        let parent_span_id = self.span_id();
        let def_loc = self.uvarint();
        let caller_event_id = self.uvarint();
        let ext_correlation_id = self.string();

        SpanStartCommon {
            goid,
            parent_trace_id: if !parent_trace_id.is_zero() {
                Some(parent_trace_id)
            } else {
                None
            },
            parent_span_id: if !parent_span_id.is_zero() {
                Some(parent_span_id)
            } else {
                None
            },
            def_loc: non_zero_u64(def_loc),
            caller_event_id: non_zero_u64(caller_event_id),
            ext_correlation_id: if ext_correlation_id.is_empty() {
                None
            } else {
                Some(ext_correlation_id)
            },
        }
    }

    fn span_end_common(&mut self) -> SpanEndCommon {
        let dur = self.duration();
        let duration_nanos = if dur < 0 { 0 } else { dur as u64 };

        let error = self.err_with_stack();
        let panic_frames = self.formatted_stack();
        let parent_trace_id = self.trace_id();
        let parent_span_id = self.span_id();

        SpanEndCommon {
            duration_nanos,
            error,
            panic_stack: if panic_frames.is_empty() {
                None
            } else {
                Some(panic_frames)
            },
            parent_trace_id: if !parent_trace_id.is_zero() {
                Some(parent_trace_id)
            } else {
                None
            },
            parent_span_id: if !parent_span_id.is_zero() {
                Some(parent_span_id)
            } else {
                None
            },
        }
    }

    fn headers(&mut self) -> HashMap<String, String> {
        let n = self.uvarint() as usize;
        if n == 0 {
            return HashMap::new();
        }
        let mut headers = HashMap::with_capacity(n);
        for _ in 0..n {
            let key = self.string();
            let value = self.string();
            headers.insert(key, value);
        }
        headers
    }

    fn stack(&mut self) -> Option<StackTrace> {
        let n = self.uvarint() as usize;
        if n == 0 {
            return None;
        }

        // Delta decoding: the first value is absolute.
        let mut pcs = Vec::with_capacity(n);
        let mut prev: i64 = 0;
        for _ in 0..n {
            let pc = prev.wrapping_add(self.varint());
            pcs.push(pc as u64);
            prev = pc;
        }

        Some(StackTrace { pcs })
    }

    fn formatted_stack(&mut self) -> Vec<StackFrame> {
        let n = self.uvarint() as usize;
        let mut frames = Vec::with_capacity(n.min(64));
        for _ in 0..n {
            frames.push(StackFrame {
                function: self.string(),
                file: self.string(),
                line: self.uvarint() as u32,
            });
        }
        frames
    }

    fn err_with_stack(&mut self) -> Option<TracedError> {
        if self.byte() == 0 {
            return None;
        }
        let msg = self.string();
        let kind = self.uvarint();
        let stack = self.formatted_stack();
        Some(TracedError { msg, kind, stack })
    }

    fn bucket_object_attrs(&mut self) -> BucketObjectAttributes {
        BucketObjectAttributes {
            size: self.opt_uvarint(),
            version: self.opt_string(),
            etag: self.opt_string(),
            content_type: self.opt_string(),
        }
    }

    // --- Span starts ---

    fn request_span_start(&mut self) -> SpanStart {
        let c = self.span_start_common();

        let service_name = self.string();
        let endpoint_name = self.string();
        let http_method = self.string();
        let path = self.string();

        let n = self.uvarint() as usize;
        let mut path_params = Vec::with_capacity(n.min(64));
        for _ in 0..n {
            path_params.push(self.string());
        }

        let request_headers = self.headers();
        let request_payload = self.byte_string();

        // The correlation ID is encoded twice; this is the second copy.
        let ext_correlation_id = self.string();
        let ext_correlation_id = if ext_correlation_id.is_empty() {
            None
        } else {
            Some(ext_correlation_id)
        };

        let uid = self.string();
        let uid = if uid.is_empty() { None } else { Some(uid) };
        let mocked = self.bool_val();

        SpanStart {
            goid: c.goid,
            parent_trace_id: c.parent_trace_id,
            parent_span_id: c.parent_span_id,
            def_loc: c.def_loc,
            caller_event_id: c.caller_event_id,
            ext_correlation_id: c.ext_correlation_id,
            data: SpanStartData::Request(RequestSpanStart {
                service_name,
                endpoint_name,
                http_method,
                path,
                path_params,
                request_headers,
                request_payload,
                ext_correlation_id,
                uid,
                mocked,
            }),
        }
    }

    fn auth_span_start(&mut self) -> SpanStart {
        let c = self.span_start_common();

        SpanStart {
            goid: c.goid,
            parent_trace_id: c.parent_trace_id,
            parent_span_id: c.parent_span_id,
            def_loc: c.def_loc,
            caller_event_id: c.caller_event_id,
            ext_correlation_id: c.ext_correlation_id,
            data: SpanStartData::Auth(AuthSpanStart {
                service_name: self.string(),
                endpoint_name: self.string(),
                auth_payload: self.byte_string(),
            }),
        }
    }

    fn pubsub_message_span_start(&mut self) -> SpanStart {
        let c = self.span_start_common();

        SpanStart {
            goid: c.goid,
            parent_trace_id: c.parent_trace_id,
            parent_span_id: c.parent_span_id,
            def_loc: c.def_loc,
            caller_event_id: c.caller_event_id,
            ext_correlation_id: c.ext_correlation_id,
            data: SpanStartData::PubsubMessage(PubsubMessageSpanStart {
                service_name: self.string(),
                topic_name: self.string(),
                subscription_name: self.string(),
                message_id: self.string(),
                attempt: self.uvarint() as u32,
                publish_time: self.time(),
                message_payload: self.byte_string(),
            }),
        }
    }

    fn test_span_start(&mut self) -> SpanStart {
        let c = self.span_start_common();

        SpanStart {
            goid: c.goid,
            parent_trace_id: c.parent_trace_id,
            parent_span_id: c.parent_span_id,
            def_loc: c.def_loc,
            caller_event_id: c.caller_event_id,
            ext_correlation_id: c.ext_correlation_id,
            data: SpanStartData::Test(TestSpanStart {
                service_name: self.string(),
                test_name: self.string(),
                uid: self.string(),
                test_file: self.string(),
                test_line: self.uint32(),
            }),
        }
    }

    // --- Span ends ---

    fn request_span_end(&mut self) -> SpanEnd {
        let c = self.span_end_common();

        let service_name = self.string();
        let endpoint_name = self.string();
        let http_status_code = self.uvarint() as u32;
        let response_headers = self.headers();
        let response_payload = self.byte_string();

        SpanEnd {
            duration_nanos: c.duration_nanos,
            error: c.error,
            panic_stack: c.panic_stack,
            parent_trace_id: c.parent_trace_id,
            parent_span_id: c.parent_span_id,
            data: SpanEndData::Request(RequestSpanEnd {
                service_name,
                endpoint_name,
                http_status_code,
                response_headers,
                response_payload,
            }),
        }
    }

    fn auth_span_end(&mut self) -> SpanEnd {
        let c = self.span_end_common();

        SpanEnd {
            duration_nanos: c.duration_nanos,
            error: c.error,
            panic_stack: c.panic_stack,
            parent_trace_id: c.parent_trace_id,
            parent_span_id: c.parent_span_id,
            data: SpanEndData::Auth(AuthSpanEnd {
                service_name: self.string(),
                endpoint_name: self.string(),
                uid: self.string(),
                user_data: self.byte_string(),
            }),
        }
    }

    fn pubsub_message_span_end(&mut self) -> SpanEnd {
        let c = self.span_end_common();

        SpanEnd {
            duration_nanos: c.duration_nanos,
            error: c.error,
            panic_stack: c.panic_stack,
            parent_trace_id: c.parent_trace_id,
            parent_span_id: c.parent_span_id,
            data: SpanEndData::PubsubMessage(PubsubMessageSpanEnd {
                service_name: self.string(),
                topic_name: self.string(),
                subscription_name: self.string(),
            }),
        }
    }

    fn test_span_end(&mut self) -> SpanEnd {
        let c = self.span_end_common();

        SpanEnd {
            duration_nanos: c.duration_nanos,
            error: c.error,
            panic_stack: c.panic_stack,
            parent_trace_id: c.parent_trace_id,
            parent_span_id: c.parent_span_id,
            data: SpanEndData::Test(TestSpanEnd {
                service_name: self.string(),
                test_name: self.string(),
                failed: self.bool_val(),
                skipped: self.bool_val(),
            }),
        }
    }

    // --- Span events ---

    fn span_event(&mut self, event_type: u8) -> Result<SpanEvent, ParseError> {
        let def_loc = self.uvarint();
        let goid = self.uvarint();
        let correlation_event_id = self.event_id();

        let data = match event_type {
            RPC_CALL_START => SpanEventData::RpcCallStart(self.rpc_call_start()),
            RPC_CALL_END => SpanEventData::RpcCallEnd(self.rpc_call_end()),
            DB_QUERY_START => SpanEventData::DbQueryStart(self.db_query_start()),
            DB_QUERY_END => SpanEventData::DbQueryEnd(self.db_query_end()),
            DB_TRANSACTION_START => SpanEventData::DbTransactionStart(self.db_transaction_start()),
            DB_TRANSACTION_END => SpanEventData::DbTransactionEnd(self.db_transaction_end()),
            PUBSUB_PUBLISH_START => SpanEventData::PubsubPublishStart(self.pubsub_publish_start()),
            PUBSUB_PUBLISH_END => SpanEventData::PubsubPublishEnd(self.pubsub_publish_end()),
            HTTP_CALL_START => SpanEventData::HttpCallStart(self.http_call_start()),
            HTTP_CALL_END => SpanEventData::HttpCallEnd(self.http_call_end()),
            LOG_MESSAGE => SpanEventData::LogMessage(self.log_message()),
            SERVICE_INIT_START => SpanEventData::ServiceInitStart(self.service_init_start()),
            SERVICE_INIT_END => SpanEventData::ServiceInitEnd(self.service_init_end()),
            CACHE_CALL_START => SpanEventData::CacheCallStart(self.cache_call_start()),
            CACHE_CALL_END => SpanEventData::CacheCallEnd(self.cache_call_end()),
            BODY_STREAM => SpanEventData::BodyStream(self.body_stream()),
            BUCKET_OBJECT_UPLOAD_START => {
                SpanEventData::BucketObjectUploadStart(self.bucket_object_upload_start())
            }
            BUCKET_OBJECT_UPLOAD_END => {
                SpanEventData::BucketObjectUploadEnd(self.bucket_object_upload_end())
            }
            BUCKET_OBJECT_DOWNLOAD_START => {
                SpanEventData::BucketObjectDownloadStart(self.bucket_object_download_start())
            }
            BUCKET_OBJECT_DOWNLOAD_END => {
                SpanEventData::BucketObjectDownloadEnd(self.bucket_object_download_end())
            }
            BUCKET_OBJECT_GET_ATTRS_START => {
                SpanEventData::BucketObjectGetAttrsStart(self.bucket_object_get_attrs_start())
            }
            BUCKET_OBJECT_GET_ATTRS_END => {
                SpanEventData::BucketObjectGetAttrsEnd(self.bucket_object_get_attrs_end())
            }
            BUCKET_LIST_OBJECTS_START => {
                SpanEventData::BucketListObjectsStart(self.bucket_list_objects_start())
            }
            BUCKET_LIST_OBJECTS_END => {
                SpanEventData::BucketListObjectsEnd(self.bucket_list_objects_end())
            }
            BUCKET_DELETE_OBJECTS_START => {
                SpanEventData::BucketDeleteObjectsStart(self.bucket_delete_objects_start())
            }
            BUCKET_DELETE_OBJECTS_END => {
                SpanEventData::BucketDeleteObjectsEnd(self.bucket_delete_objects_end())
            }
            other => return Err(ParseError::UnknownEventType(other)),
        };

        Ok(SpanEvent {
            goid,
            def_loc: non_zero_u64(def_loc),
            correlation_event_id: non_zero_u64(correlation_event_id),
            data,
        })
    }

    // --- RPC ---

    fn rpc_call_start(&mut self) -> RpcCallStart {
        RpcCallStart {
            target_service_name: self.string(),
            target_endpoint_name: self.string(),
            stack: self.stack(),
        }
    }

    fn rpc_call_end(&mut self) -> RpcCallEnd {
        RpcCallEnd {
            err: self.err_with_stack(),
        }
    }

    // --- DB ---

    fn db_query_start(&mut self) -> DbQueryStart {
        DbQueryStart {
            query: self.string(),
            stack: self.stack(),
        }
    }

    fn db_query_end(&mut self) -> DbQueryEnd {
        DbQueryEnd {
            err: self.err_with_stack(),
        }
    }

    fn db_transaction_start(&mut self) -> DbTransactionStart {
        DbTransactionStart {
            stack: self.stack(),
        }
    }

    fn db_transaction_end(&mut self) -> DbTransactionEnd {
        let completion = if self.bool_val() {
            DbTransactionCompletion::Commit
        } else {
            DbTransactionCompletion::Rollback
        };
        DbTransactionEnd {
            completion,
            stack: self.stack(),
            err: self.err_with_stack(),
        }
    }

    // --- Pubsub ---

    fn pubsub_publish_start(&mut self) -> PubsubPublishStart {
        PubsubPublishStart {
            topic: self.string(),
            message: self.byte_string(),
            stack: self.stack(),
        }
    }

    fn pubsub_publish_end(&mut self) -> PubsubPublishEnd {
        PubsubPublishEnd {
            message_id: self.string(),
            err: self.err_with_stack(),
        }
    }

    // --- HTTP ---

    fn http_call_start(&mut self) -> HttpCallStart {
        HttpCallStart {
            correlation_parent_span_id: self.span_id(),
            method: self.string(),
            url: self.string(),
            stack: self.stack(),
            start_nanos: self.uvarint(),
        }
    }

    fn http_call_end(&mut self) -> HttpCallEnd {
        HttpCallEnd {
            status_code: self.opt_uvarint(),
            err: self.err_with_stack(),
        }
    }

    // --- Service init ---

    fn service_init_start(&mut self) -> ServiceInitStart {
        ServiceInitStart {
            service: self.string(),
        }
    }

    fn service_init_end(&mut self) -> ServiceInitEnd {
        ServiceInitEnd {
            err: self.err_with_stack(),
        }
    }

    // --- Cache ---

    fn cache_call_start(&mut self) -> CacheCallStart {
        let operation = self.string();
        let write = self.bool_val();
        let stack = self.stack();
        let n = self.uvarint() as usize;
        let mut keys = Vec::with_capacity(n.min(64));
        for _ in 0..n {
            keys.push(self.string());
        }
        CacheCallStart {
            operation,
            write,
            stack,
            keys,
        }
    }

    fn cache_call_end(&mut self) -> CacheCallEnd {
        let result = CacheResult::from_byte(self.byte());
        CacheCallEnd {
            result,
            err: self.err_with_stack(),
        }
    }

    // --- Body stream ---

    fn body_stream(&mut self) -> BodyStream {
        let flags = self.byte();
        let data = self.byte_string();
        BodyStream {
            is_response: flags & 0b01 == 0b01,
            overflowed: flags & 0b10 == 0b10,
            data,
        }
    }

    // --- Log ---

    fn log_message(&mut self) -> LogMessage {
        let level = LogLevel::from_wire_byte(self.byte());
        let msg = self.string();

        let n = self.uvarint() as usize;
        let mut fields = Vec::with_capacity(n.min(64));
        for _ in 0..n {
            if let Some(f) = self.log_field() {
                fields.push(f);
            }
        }

        let stack = self.stack();

        LogMessage {
            level,
            msg,
            fields,
            stack,
        }
    }

    fn log_field(&mut self) -> Option<LogField> {
        let typ = self.byte();
        let key = self.string();

        let value = match typ {
            LOG_FIELD_ERR => {
                let err = self.err_with_stack().unwrap_or(TracedError {
                    msg: String::new(),
                    kind: 0,
                    stack: Vec::new(),
                });
                LogFieldValue::Error(err)
            }
            LOG_FIELD_STRING => LogFieldValue::Str(self.string()),
            LOG_FIELD_BOOL => LogFieldValue::Bool(self.bool_val()),
            LOG_FIELD_TIME => LogFieldValue::Time(self.time()),
            LOG_FIELD_DURATION => LogFieldValue::Duration(self.duration()),
            LOG_FIELD_UUID => {
                let bytes = self.bytes(16);
                let bytes: [u8; 16] = bytes.try_into().unwrap_or([0; 16]);
                LogFieldValue::Uuid(bytes)
            }
            LOG_FIELD_JSON => {
                // A JSON field that failed to encode carries an empty byte
                // string plus the failure as an in-band error.
                let val = self.byte_string();
                let err = self.err_with_stack();
                if let Some(e) = err {
                    LogFieldValue::Error(e)
                } else {
                    LogFieldValue::Json(val)
                }
            }
            LOG_FIELD_INT => LogFieldValue::Int(self.varint()),
            LOG_FIELD_UINT => LogFieldValue::Uint(self.uvarint()),
            LOG_FIELD_FLOAT32 => LogFieldValue::Float32(self.float32()),
            LOG_FIELD_FLOAT64 => LogFieldValue::Float64(self.float64()),
            _ => return None,
        };

        Some(LogField { key, value })
    }

    // --- Bucket operations ---

    fn bucket_object_upload_start(&mut self) -> BucketObjectUploadStart {
        BucketObjectUploadStart {
            bucket: self.string(),
            object: self.string(),
            attrs: self.bucket_object_attrs(),
            stack: self.stack(),
        }
    }

    fn bucket_object_upload_end(&mut self) -> BucketObjectUploadEnd {
        BucketObjectUploadEnd {
            size: self.uvarint(),
            version: self.opt_string(),
            err: self.err_with_stack(),
        }
    }

    fn bucket_object_download_start(&mut self) -> BucketObjectDownloadStart {
        BucketObjectDownloadStart {
            bucket: self.string(),
            object: self.string(),
            version: self.opt_string(),
            stack: self.stack(),
        }
    }

    fn bucket_object_download_end(&mut self) -> BucketObjectDownloadEnd {
        BucketObjectDownloadEnd {
            size: self.uvarint(),
            err: self.err_with_stack(),
        }
    }

    fn bucket_object_get_attrs_start(&mut self) -> BucketObjectGetAttrsStart {
        BucketObjectGetAttrsStart {
            bucket: self.string(),
            object: self.string(),
            version: self.opt_string(),
            stack: self.stack(),
        }
    }

    fn bucket_object_get_attrs_end(&mut self) -> BucketObjectGetAttrsEnd {
        let err = self.err_with_stack();
        let attrs = if err.is_none() {
            Some(self.bucket_object_attrs())
        } else {
            None
        };
        BucketObjectGetAttrsEnd { err, attrs }
    }

    fn bucket_list_objects_start(&mut self) -> BucketListObjectsStart {
        BucketListObjectsStart {
            bucket: self.string(),
            prefix: self.opt_string(),
            stack: self.stack(),
        }
    }

    fn bucket_list_objects_end(&mut self) -> BucketListObjectsEnd {
        BucketListObjectsEnd {
            err: self.err_with_stack(),
            observed: self.uvarint(),
            has_more: self.bool_val(),
        }
    }

    fn bucket_delete_objects_start(&mut self) -> BucketDeleteObjectsStart {
        let bucket = self.string();
        let stack = self.stack();
        let n = self.uvarint() as usize;
        let mut entries = Vec::with_capacity(n.min(64));
        for _ in 0..n {
            entries.push(BucketDeleteObjectEntry {
                object: self.string(),
                version: self.opt_string(),
            });
        }
        BucketDeleteObjectsStart {
            bucket,
            stack,
            entries,
        }
    }

    fn bucket_delete_objects_end(&mut self) -> BucketDeleteObjectsEnd {
        BucketDeleteObjectsEnd {
            err: self.err_with_stack(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to build a complete binary record.
    fn build_record(event_type: u8, body: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.push(event_type);
        data.extend_from_slice(&[10; 16]); // trace id
        data.extend_from_slice(&[5; 8]); // span id
        data.push(0x01); // event id = 1
        data.extend_from_slice(&[0xAC, 0x02]); // ts = 300
        data.push(body.len() as u8); // data length
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn test_parse_service_init_start() {
        // Body: defLoc(0) + goid(0) + correlationEventID(0) + service("myservice")
        let mut body = Vec::new();
        body.push(0x00); // defLoc
        body.push(0x00); // goid
        body.push(0x00); // correlationEventID
        body.push(9); // string length
        body.extend_from_slice(b"myservice");

        let data = build_record(SERVICE_INIT_START, &body);
        let mut cursor = std::io::Cursor::new(&data);
        let event = parse_event(&mut cursor).unwrap();

        assert_eq!(event.trace_id, TraceId([10; 16]));
        assert_eq!(event.span_id, SpanId([5; 8]));
        assert_eq!(event.event_id, 1);
        assert_eq!(event.ts_nanos, 300);

        match &event.event {
            Event::SpanEvent(se) => {
                assert_eq!(se.goid, 0);
                assert_eq!(se.def_loc, None);
                assert_eq!(se.correlation_event_id, None);
                match &se.data {
                    SpanEventData::ServiceInitStart(s) => {
                        assert_eq!(s.service, "myservice");
                    }
                    other => panic!("expected ServiceInitStart, got {:?}", other),
                }
            }
            other => panic!("expected SpanEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_service_init_end_no_error() {
        // Body: defLoc(0) + goid(0) + correlationEventID(1) + absent error
        let body = vec![0x00, 0x00, 0x01, 0x00];

        let data = build_record(SERVICE_INIT_END, &body);
        let mut cursor = std::io::Cursor::new(&data);
        let event = parse_event(&mut cursor).unwrap();

        match &event.event {
            Event::SpanEvent(se) => {
                assert_eq!(se.correlation_event_id, Some(1));
                match &se.data {
                    SpanEventData::ServiceInitEnd(e) => {
                        assert!(e.err.is_none());
                    }
                    other => panic!("expected ServiceInitEnd, got {:?}", other),
                }
            }
            other => panic!("expected SpanEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_service_init_end_with_error() {
        let mut body = Vec::new();
        body.push(0x00); // defLoc
        body.push(0x00); // goid
        body.push(0x00); // correlationEventID
        body.push(0x01); // error present
        body.push(4); // message length
        body.extend_from_slice(b"oops");
        body.push(0x07); // kind tag = 7
        body.push(0x00); // 0 stack frames

        let data = build_record(SERVICE_INIT_END, &body);
        let mut cursor = std::io::Cursor::new(&data);
        let event = parse_event(&mut cursor).unwrap();

        match &event.event {
            Event::SpanEvent(se) => match &se.data {
                SpanEventData::ServiceInitEnd(e) => {
                    let err = e.err.as_ref().unwrap();
                    assert_eq!(err.msg, "oops");
                    assert_eq!(err.kind, 7);
                    assert!(err.stack.is_empty());
                }
                other => panic!("expected ServiceInitEnd, got {:?}", other),
            },
            other => panic!("expected SpanEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_log_message() {
        let mut body = Vec::new();
        // Span event header: defLoc(0) + goid(0) + correlationEventID(0)
        body.push(0x00);
        body.push(0x00);
        body.push(0x00);
        // LogMessage: level=2 (Info)
        body.push(2);
        // msg = "hello world"
        body.push(11);
        body.extend_from_slice(b"hello world");
        // fields count = 1
        body.push(1);
        // field: type=STRING(2), key="key1", value="val1"
        body.push(LOG_FIELD_STRING);
        body.push(4);
        body.extend_from_slice(b"key1");
        body.push(4);
        body.extend_from_slice(b"val1");
        // stack: 0
        body.push(0);

        let data = build_record(LOG_MESSAGE, &body);
        let mut cursor = std::io::Cursor::new(&data);
        let event = parse_event(&mut cursor).unwrap();

        match &event.event {
            Event::SpanEvent(se) => match &se.data {
                SpanEventData::LogMessage(log) => {
                    assert_eq!(log.level, LogLevel::Info);
                    assert_eq!(log.msg, "hello world");
                    assert_eq!(log.fields.len(), 1);
                    assert_eq!(log.fields[0].key, "key1");
                    assert_eq!(log.fields[0].value, LogFieldValue::Str("val1".to_string()));
                    assert!(log.stack.is_none());
                }
                other => panic!("expected LogMessage, got {:?}", other),
            },
            other => panic!("expected SpanEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rpc_call_start() {
        let mut body = Vec::new();
        // Span event header
        body.push(0x05); // defLoc = 5
        body.push(0x0A); // goid = 10
        body.push(0x00); // correlationEventID = 0
        // RpcCallStart
        body.push(7);
        body.extend_from_slice(b"svc-foo");
        body.push(9);
        body.extend_from_slice(b"DoRequest");
        body.push(0); // no stack

        let data = build_record(RPC_CALL_START, &body);
        let mut cursor = std::io::Cursor::new(&data);
        let event = parse_event(&mut cursor).unwrap();

        match &event.event {
            Event::SpanEvent(se) => {
                assert_eq!(se.goid, 10);
                assert_eq!(se.def_loc, Some(5));
                match &se.data {
                    SpanEventData::RpcCallStart(rpc) => {
                        assert_eq!(rpc.target_service_name, "svc-foo");
                        assert_eq!(rpc.target_endpoint_name, "DoRequest");
                        assert!(rpc.stack.is_none());
                    }
                    other => panic!("expected RpcCallStart, got {:?}", other),
                }
            }
            other => panic!("expected SpanEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_stack_delta_decoding() {
        let mut body = Vec::new();
        body.push(0x00); // defLoc
        body.push(0x00); // goid
        body.push(0x00); // correlationEventID
        // DbTransactionStart: stack with 3 PCs: 100, 160, 40.
        body.push(0x03); // depth
        body.extend_from_slice(&[0xC8, 0x01]); // zigzag(100)
        body.push(0x78); // zigzag(+60)
        body.extend_from_slice(&[0xEF, 0x01]); // zigzag(-120)

        let data = build_record(DB_TRANSACTION_START, &body);
        let mut cursor = std::io::Cursor::new(&data);
        let event = parse_event(&mut cursor).unwrap();

        match &event.event {
            Event::SpanEvent(se) => match &se.data {
                SpanEventData::DbTransactionStart(tx) => {
                    let stack = tx.stack.as_ref().unwrap();
                    assert_eq!(stack.pcs, vec![100, 160, 40]);
                }
                other => panic!("expected DbTransactionStart, got {:?}", other),
            },
            other => panic!("expected SpanEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_body_stream() {
        let mut body = Vec::new();
        body.push(0x00);
        body.push(0x00);
        body.push(0x00);
        // BodyStream: flags = 0b01 (is_response)
        body.push(0b01);
        // data = [0xDE, 0xAD]
        body.push(2);
        body.extend_from_slice(&[0xDE, 0xAD]);

        let data = build_record(BODY_STREAM, &body);
        let mut cursor = std::io::Cursor::new(&data);
        let event = parse_event(&mut cursor).unwrap();

        match &event.event {
            Event::SpanEvent(se) => match &se.data {
                SpanEventData::BodyStream(bs) => {
                    assert!(bs.is_response);
                    assert!(!bs.overflowed);
                    assert_eq!(bs.data, vec![0xDE, 0xAD]);
                }
                other => panic!("expected BodyStream, got {:?}", other),
            },
            other => panic!("expected SpanEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_event_type() {
        let body = vec![0x00, 0x00, 0x00]; // minimal span event header
        let data = build_record(0xFF, &body);
        let mut cursor = std::io::Cursor::new(&data);
        let result = parse_event(&mut cursor);
        assert!(matches!(result, Err(ParseError::UnknownEventType(0xFF))));
    }

    #[test]
    fn test_parse_end_of_stream() {
        let data: &[u8] = &[];
        let mut cursor = std::io::Cursor::new(data);
        let result = parse_event(&mut cursor);
        assert!(matches!(result, Err(ParseError::EndOfStream)));
    }

    #[test]
    fn test_parse_truncated_body_is_an_error() {
        let mut body = Vec::new();
        body.push(0x00);
        body.push(0x00);
        body.push(0x00);
        body.push(9); // declares 9 bytes but provides fewer
        body.extend_from_slice(b"shor");

        let data = build_record(SERVICE_INIT_START, &body);
        let mut cursor = std::io::Cursor::new(&data);
        let result = parse_event(&mut cursor);
        assert!(matches!(result, Err(ParseError::UnexpectedEof)));
    }

    #[test]
    fn test_parse_multiple_events() {
        let body1 = {
            let mut b = vec![0x00, 0x00, 0x00];
            b.push(4);
            b.extend_from_slice(b"svc1");
            b
        };
        let body2 = {
            let mut b = vec![0x00, 0x00, 0x00];
            b.push(4);
            b.extend_from_slice(b"svc2");
            b
        };

        let mut data = build_record(SERVICE_INIT_START, &body1);
        data.extend_from_slice(&build_record(SERVICE_INIT_START, &body2));

        let mut cursor = std::io::Cursor::new(&data);

        let ev1 = parse_event(&mut cursor).unwrap();
        let ev2 = parse_event(&mut cursor).unwrap();
        let ev3 = parse_event(&mut cursor);

        match &ev1.event {
            Event::SpanEvent(se) => match &se.data {
                SpanEventData::ServiceInitStart(s) => assert_eq!(s.service, "svc1"),
                _ => panic!("wrong event data"),
            },
            _ => panic!("wrong event type"),
        }

        match &ev2.event {
            Event::SpanEvent(se) => match &se.data {
                SpanEventData::ServiceInitStart(s) => assert_eq!(s.service, "svc2"),
                _ => panic!("wrong event data"),
            },
            _ => panic!("wrong event type"),
        }

        assert!(matches!(ev3, Err(ParseError::EndOfStream)));
    }

    #[test]
    fn test_parse_request_span_start() {
        let mut body = Vec::new();
        // span_start_common: goid(1), parent trace (zeros), parent span (zeros),
        //   def_loc(0), caller_event_id(0), ext_correlation_id("")
        body.push(0x01);
        body.extend_from_slice(&[0u8; 16]);
        body.extend_from_slice(&[0u8; 8]);
        body.push(0x00);
        body.push(0x00);
        body.push(0x00);

        // RequestSpanStart fields
        body.push(3);
        body.extend_from_slice(b"svc"); // service_name
        body.push(2);
        body.extend_from_slice(b"Ep"); // endpoint_name
        body.push(3);
        body.extend_from_slice(b"GET"); // http_method
        body.push(5);
        body.extend_from_slice(b"/test"); // path
        body.push(0x00); // path_params count = 0
        body.push(0x00); // headers count = 0
        body.push(0x00); // request_payload = empty
        body.push(0x00); // ext_correlation_id repeat = ""
        body.push(0x00); // uid = ""
        body.push(0x00); // mocked = false

        let data = build_record(REQUEST_SPAN_START, &body);
        let mut cursor = std::io::Cursor::new(&data);
        let event = parse_event(&mut cursor).unwrap();

        match &event.event {
            Event::SpanStart(ss) => {
                assert_eq!(ss.goid, 1);
                assert!(ss.parent_trace_id.is_none());
                match &ss.data {
                    SpanStartData::Request(req) => {
                        assert_eq!(req.service_name, "svc");
                        assert_eq!(req.endpoint_name, "Ep");
                        assert_eq!(req.http_method, "GET");
                        assert_eq!(req.path, "/test");
                        assert!(req.path_params.is_empty());
                        assert!(req.request_headers.is_empty());
                        assert!(!req.mocked);
                    }
                    other => panic!("expected Request, got {:?}", other),
                }
            }
            other => panic!("expected SpanStart, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_request_span_end() {
        let mut body = Vec::new();
        // span_end_common: duration varint(5000) = uvarint(10000)
        body.push(0x90);
        body.push(0x4E);
        // error absent
        body.push(0x00);
        // panic stack: 0 frames
        body.push(0x00);
        // parent trace (zeros) + parent span (zeros)
        body.extend_from_slice(&[0u8; 16]);
        body.extend_from_slice(&[0u8; 8]);

        // RequestSpanEnd fields
        body.push(3);
        body.extend_from_slice(b"svc");
        body.push(2);
        body.extend_from_slice(b"Ep");
        body.push(0xC8);
        body.push(0x01); // uvarint(200)
        body.push(0x00); // response headers count = 0
        body.push(0x00); // response payload = empty

        let data = build_record(REQUEST_SPAN_END, &body);
        let mut cursor = std::io::Cursor::new(&data);
        let event = parse_event(&mut cursor).unwrap();

        match &event.event {
            Event::SpanEnd(se) => {
                assert_eq!(se.duration_nanos, 5000);
                assert!(se.error.is_none());
                assert!(se.panic_stack.is_none());
                match &se.data {
                    SpanEndData::Request(req) => {
                        assert_eq!(req.service_name, "svc");
                        assert_eq!(req.endpoint_name, "Ep");
                        assert_eq!(req.http_status_code, 200);
                    }
                    other => panic!("expected Request, got {:?}", other),
                }
            }
            other => panic!("expected SpanEnd, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_cache_call() {
        let mut body = Vec::new();
        body.push(0x00);
        body.push(0x00);
        body.push(0x00);
        // CacheCallStart
        body.push(3);
        body.extend_from_slice(b"Get"); // operation
        body.push(0x00); // write = false
        body.push(0x00); // stack = none
        body.push(0x02); // 2 keys
        body.push(4);
        body.extend_from_slice(b"key1");
        body.push(4);
        body.extend_from_slice(b"key2");

        let data = build_record(CACHE_CALL_START, &body);
        let mut cursor = std::io::Cursor::new(&data);
        let event = parse_event(&mut cursor).unwrap();

        match &event.event {
            Event::SpanEvent(se) => match &se.data {
                SpanEventData::CacheCallStart(cc) => {
                    assert_eq!(cc.operation, "Get");
                    assert!(!cc.write);
                    assert!(cc.stack.is_none());
                    assert_eq!(cc.keys, vec!["key1", "key2"]);
                }
                other => panic!("expected CacheCallStart, got {:?}", other),
            },
            other => panic!("expected SpanEvent, got {:?}", other),
        }
    }
}
