//! In-process trace event log.
//!
//! Records structured, timestamped, causally-linked observability events
//! (request/auth/pub-sub/test spans, database queries and transactions,
//! RPC and HTTP calls, cache and object-store operations, body streams,
//! service initializations, and log messages) and serializes them into a
//! compact binary stream for out-of-process consumers.
//!
//! The main pieces:
//!
//! - [`model`]: trace/span/event identifiers and live span state.
//! - [`trace::protocol::Tracer`]: typed emitters, one pair per event kind.
//!   Start emitters return the assigned event ID, which end emitters and
//!   nested operations carry as their correlation handle.
//! - [`trace::EventLog`]: the thread-safe sink. Assigns monotonic event
//!   IDs, stamps timestamps, and drops (never blocks) under saturation.
//! - [`trace::StreamWriter`]: frames drained events onto an `io::Write`
//!   for the collector to consume.
//!
//! Emitters are total: they never return errors and never block the
//! caller beyond the sink's queue lock. Encoding failures are degraded
//! in-band; queue saturation and payload truncation are counted and
//! reported through periodic in-stream log messages.

pub mod error;
pub mod model;
pub mod stack;
pub mod trace;

pub use trace::protocol::Tracer;
pub use trace::{Config, Event, EventLog, StreamWriter};
