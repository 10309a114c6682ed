//! The boundary format handed to out-of-process consumers.
//!
//! A stream starts with the magic bytes `"TRC2"` and a uvarint format
//! version, followed by one record per event:
//!
//! | Field       | Encoding          |
//! |-------------|-------------------|
//! | Event type  | 1 byte            |
//! | Trace ID    | 16 bytes          |
//! | Span ID     | 8 bytes           |
//! | Event ID    | uvarint           |
//! | Nanotime    | uvarint           |
//! | Data length | uvarint           |
//! | Event data  | data-length bytes |
//!
//! End of stream is signaled by EOF on the transport; there is no
//! terminator record.

use std::io::{self, Write};

use crate::trace::log::{Event, EventLog};

pub const MAGIC: [u8; 4] = *b"TRC2";
pub const WIRE_VERSION: u64 = 1;

/// Frames drained events onto a byte-oriented transport.
#[must_use]
pub struct StreamWriter<W: Write> {
    w: W,
    header_written: bool,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(w: W) -> Self {
        StreamWriter {
            w,
            header_written: false,
        }
    }

    /// Drains up to `limit` events from the log and writes them out.
    /// Returns the number of events written. The stream header is written
    /// ahead of the first record.
    pub fn export(&mut self, log: &EventLog, limit: usize) -> io::Result<usize> {
        self.ensure_header()?;
        let events = log.drain(limit);
        for event in &events {
            self.write_record(event)?;
        }
        Ok(events.len())
    }

    /// Writes a single event record, preceded by the stream header if this
    /// is the first write.
    pub fn write_event(&mut self, event: &Event) -> io::Result<()> {
        self.ensure_header()?;
        self.write_record(event)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.w.flush()
    }

    pub fn into_inner(self) -> W {
        self.w
    }

    fn ensure_header(&mut self) -> io::Result<()> {
        if !self.header_written {
            self.w.write_all(&MAGIC)?;
            write_uvarint(&mut self.w, WIRE_VERSION)?;
            self.header_written = true;
        }
        Ok(())
    }

    fn write_record(&mut self, event: &Event) -> io::Result<()> {
        self.w.write_all(&[event.typ as u8])?;
        self.w.write_all(&event.span.0 .0)?;
        self.w.write_all(&event.span.1 .0)?;
        write_uvarint(&mut self.w, event.id.0)?;
        write_uvarint(&mut self.w, event.ts_nanos)?;
        write_uvarint(&mut self.w, event.data.len() as u64)?;
        self.w.write_all(&event.data)
    }
}

fn write_uvarint<W: Write>(w: &mut W, mut u: u64) -> io::Result<()> {
    // At most ten seven-bit groups fit a u64.
    let mut encoded = [0u8; 10];
    let mut len = 0;
    loop {
        let group = (u & 0x7F) as u8;
        u >>= 7;
        if u == 0 {
            encoded[len] = group;
            len += 1;
            break;
        }
        encoded[len] = group | 0x80;
        len += 1;
    }
    w.write_all(&encoded[..len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SpanId, SpanKey, TraceEventId, TraceId};
    use crate::trace::log::Config;
    use crate::trace::protocol::EventType;
    use bytes::Bytes;

    fn event(id: u64, ts: u64, data: &[u8]) -> Event {
        Event {
            typ: EventType::LogMessage,
            span: SpanKey(TraceId([1; 16]), SpanId([2; 8])),
            id: TraceEventId(id),
            ts_nanos: ts,
            data: Bytes::copy_from_slice(data),
        }
    }

    #[test]
    fn stream_header_and_record_layout() {
        let mut writer = StreamWriter::new(Vec::new());
        writer.write_event(&event(42, 300, &[0xAA, 0xBB])).unwrap();
        let out = writer.into_inner();

        let mut expected = Vec::new();
        expected.extend_from_slice(b"TRC2");
        expected.push(0x01); // version
        expected.push(0x0F); // LogMessage
        expected.extend_from_slice(&[1; 16]);
        expected.extend_from_slice(&[2; 8]);
        expected.push(42); // event id
        expected.extend_from_slice(&[0xAC, 0x02]); // ts = 300
        expected.push(0x02); // data length
        expected.extend_from_slice(&[0xAA, 0xBB]);

        assert_eq!(out, expected);
    }

    #[test]
    fn header_is_written_once() {
        let mut writer = StreamWriter::new(Vec::new());
        writer.write_event(&event(1, 0, &[])).unwrap();
        writer.write_event(&event(2, 0, &[])).unwrap();
        let out = writer.into_inner();

        assert_eq!(&out[..4], b"TRC2");
        assert!(!out[4..].windows(4).any(|w| w == b"TRC2"));
    }

    #[test]
    fn export_drains_the_log() {
        let log = EventLog::new(Config::default());
        for _ in 0..3 {
            let mut eb = crate::trace::eventbuf::EventBuffer::with_capacity(4);
            eb.byte(0x01);
            _ = log.add(EventType::LogMessage, SpanKey(TraceId([0; 16]), SpanId([0; 8])), eb);
        }

        let mut writer = StreamWriter::new(Vec::new());
        assert_eq!(writer.export(&log, 2).unwrap(), 2);
        assert_eq!(log.len(), 1);
        assert_eq!(writer.export(&log, 10).unwrap(), 1);
        assert_eq!(log.len(), 0);

        // Exporting an empty log still emits only the header once.
        assert_eq!(writer.export(&log, 10).unwrap(), 0);
    }
}
