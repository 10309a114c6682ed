use bytes::{BufMut, Bytes, BytesMut};

use crate::error::TracedError;
use crate::model::{LogField, LogFieldValue, TraceEventId};
use crate::stack::{Stack, StackFrame};

/// A buffer for encoding trace event payloads.
pub struct EventBuffer {
    buf: BytesMut,
}

impl AsRef<[u8]> for EventBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl EventBuffer {
    pub fn with_capacity(size: usize) -> Self {
        EventBuffer {
            buf: BytesMut::with_capacity(size),
        }
    }

    pub(super) fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Appends one raw byte.
    #[inline]
    pub fn byte(&mut self, byte: u8) {
        self.buf.put_u8(byte);
    }

    /// Appends raw bytes with no length prefix.
    #[inline]
    pub fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pre-grows the buffer by `additional` bytes to batch allocations.
    #[inline]
    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }

    /// Appends a string: uvarint byte length, then the UTF-8 bytes.
    #[inline]
    pub fn str<S: AsRef<str>>(&mut self, str: S) {
        self.byte_string(str.as_ref().as_bytes());
    }

    /// Appends a byte string: uvarint length, then the bytes.
    #[inline]
    pub fn byte_string(&mut self, bytes: &[u8]) {
        self.buf.reserve(uvarint_len(bytes.len() as u64) + bytes.len());
        self.uvarint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    /// Appends a byte string holding at most `max_len` bytes of `bytes`.
    /// When the input is cut short, `truncation_suffix` is appended after
    /// the kept prefix, so the encoded length becomes
    /// `max_len + truncation_suffix.len()`.
    #[inline]
    pub fn truncated_byte_string(
        &mut self,
        bytes: &[u8],
        max_len: usize,
        truncation_suffix: &[u8],
    ) {
        if bytes.len() <= max_len {
            self.byte_string(bytes);
            return;
        }

        self.uvarint((max_len + truncation_suffix.len()) as u64);
        self.buf.reserve(max_len + truncation_suffix.len());
        self.buf.extend_from_slice(&bytes[..max_len]);
        self.buf.extend_from_slice(truncation_suffix);
    }

    /// Appends an optional string: a presence byte, then the string if present.
    #[inline]
    pub fn opt_str(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.byte(1);
                self.str(s);
            }
            None => self.byte(0),
        }
    }

    /// Appends an optional unsigned integer: a presence byte, then the value.
    #[inline]
    pub fn opt_uvarint(&mut self, u: Option<u64>) {
        match u {
            Some(u) => {
                self.byte(1);
                self.uvarint(u);
            }
            None => self.byte(0),
        }
    }

    /// Appends a boolean as one byte.
    #[inline]
    pub fn bool(&mut self, b: bool) {
        self.byte(if b { 1 } else { 0 });
    }

    /// Appends a UTC timestamp as two varints: whole seconds since the Unix
    /// epoch, then the nanosecond remainder.
    #[inline]
    pub fn time(&mut self, time: &chrono::DateTime<chrono::Utc>) {
        self.ivarint(time.timestamp());
        self.ivarint(time.timestamp_subsec_nanos() as i64);
    }

    /// Appends a zigzag-encoded variable-length signed integer.
    #[inline]
    pub fn ivarint<I: Into<i64>>(&mut self, i: I) {
        self.uvarint(zigzag(i.into()));
    }

    /// Appends a variable-length unsigned integer, seven bits per byte,
    /// high bit marking continuation.
    #[inline]
    pub fn uvarint<U: Into<u64>>(&mut self, u: U) {
        let mut remaining: u64 = u.into();
        loop {
            let group = (remaining & 0x7F) as u8;
            remaining >>= 7;
            if remaining == 0 {
                self.buf.put_u8(group);
                return;
            }
            self.buf.put_u8(group | 0x80);
        }
    }

    /// Appends a float as 4 little-endian bytes.
    #[inline]
    pub fn f32(&mut self, f: f32) {
        self.buf.put_f32_le(f);
    }

    /// Appends a float as 8 little-endian bytes.
    #[inline]
    pub fn f64(&mut self, f: f64) {
        self.buf.put_f64_le(f);
    }

    /// Appends an unsigned integer as 4 little-endian bytes.
    #[inline]
    pub fn u32(&mut self, u: u32) {
        self.buf.put_u32_le(u);
    }

    /// Appends a UUID as 16 raw bytes.
    #[inline]
    pub fn uuid(&mut self, u: &uuid::Uuid) {
        self.raw(u.as_bytes());
    }

    /// Appends a duration as varint nanoseconds. Durations beyond the i64
    /// range saturate at the maximum.
    #[inline]
    pub fn duration(&mut self, duration: std::time::Duration) {
        let nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        self.ivarint(nanos);
    }

    /// Appends an event ID. Writes 0 if the ID is `None`.
    #[inline]
    pub fn event_id(&mut self, event_id: Option<TraceEventId>) {
        self.uvarint(match event_id {
            Some(event_id) => event_id.0,
            None => 0,
        });
    }

    /// Appends a captured stack as its depth followed by delta-encoded
    /// program counters: the first value absolute, the rest relative to the
    /// preceding one.
    pub fn stack(&mut self, stack: &Stack) {
        self.uvarint(stack.pcs.len() as u64);
        let mut prev: i64 = 0;
        for &pc in &stack.pcs {
            let pc = pc as i64;
            self.ivarint(pc.wrapping_sub(prev));
            prev = pc;
        }
    }

    /// Appends a resolved stack as (function, file, line) triples.
    pub fn formatted_stack(&mut self, frames: &[StackFrame]) {
        self.uvarint(frames.len() as u64);
        for frame in frames {
            self.str(&frame.function);
            self.str(&frame.file);
            self.uvarint(frame.line as u64);
        }
    }

    /// Appends an optional error: a presence byte, then the message, the
    /// classification tag, and the error's formatted stack.
    pub fn err_with_stack(&mut self, err: Option<&TracedError>) {
        match err {
            Some(err) => {
                self.byte(1);
                self.str(&err.message);
                self.uvarint(err.kind);
                self.formatted_stack(&err.stack);
            }
            None => self.byte(0),
        }
    }

    /// Appends HTTP headers as a key count followed by (key, first value)
    /// pairs. Additional values for a key are not captured.
    pub fn headers(&mut self, headers: &http::HeaderMap) {
        self.uvarint(headers.keys_len() as u64);
        for key in headers.keys() {
            let first_val = headers
                .get(key)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            self.str(key.as_str());
            self.str(first_val);
        }
    }

    /// Appends a structured log field: type tag, key, then the value in its
    /// type-specific encoding.
    pub fn log_field(&mut self, field: &LogField) {
        self.byte(field.type_byte());
        self.str(field.key);
        match &field.value {
            LogFieldValue::Err(err) => self.err_with_stack(Some(*err)),
            LogFieldValue::Str(s) => self.str(s),
            LogFieldValue::Bool(b) => self.bool(*b),
            LogFieldValue::Time(t) => self.time(t),
            LogFieldValue::Duration(d) => self.duration(*d),
            LogFieldValue::Uuid(u) => self.uuid(u),
            LogFieldValue::Json(v) => self.json(serde_json::to_vec(v)),
            LogFieldValue::Int(i) => self.ivarint(*i),
            LogFieldValue::Uint(u) => self.uvarint(*u),
            LogFieldValue::F32(f) => self.f32(*f),
            LogFieldValue::F64(f) => self.f64(*f),
        }
    }

    /// Appends a JSON encoding result: the data followed by an absent error,
    /// or an empty byte string followed by the encoding failure.
    pub fn json(&mut self, result: Result<Vec<u8>, serde_json::Error>) {
        match result {
            Ok(data) => {
                self.byte_string(&data);
                self.err_with_stack(None);
            }
            Err(err) => {
                let err = TracedError::from_display(&err);
                self.byte_string(&[]);
                self.err_with_stack(Some(&err));
            }
        }
    }
}

// How many bytes the uvarint encoding of `u` occupies.
#[inline]
fn uvarint_len(u: u64) -> usize {
    (64 - u.leading_zeros()).div_ceil(7).max(1) as usize
}

#[inline]
fn zigzag(i: i64) -> u64 {
    ((i << 1) ^ (i >> 63)) as u64
}
