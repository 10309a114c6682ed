//! Parser for the tracelog binary trace stream.
//!
//! This crate parses the binary format emitted by the trace event log into
//! structured Rust types.
//!
//! # Protocol
//!
//! A stream opens with the magic bytes `"TRC2"` and a uvarint format
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
//! End of stream is signaled by EOF; there is no terminator record.
//!
//! # Usage
//!
//! ```no_run
//! use tracelog_traceparser::{parse_event, read_stream_header, ParseError};
//!
//! let data: &[u8] = &[/* trace bytes */];
//! let mut cursor = std::io::Cursor::new(data);
//!
//! read_stream_header(&mut cursor).expect("bad stream header");
//! loop {
//!     match parse_event(&mut cursor) {
//!         Ok(event) => println!("{:?}", event),
//!         Err(ParseError::EndOfStream) => break,
//!         Err(e) => panic!("parse error: {}", e),
//!     }
//! }
//! ```

pub mod types;
mod parser;
mod reader;

pub use parser::{parse_event, read_stream_header};
pub use types::{ParseError, SpanId, Timestamp, TraceId};
