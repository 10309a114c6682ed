use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;

use crate::model::{LogField, LogFieldValue, LogLevel, SpanKey, TraceEventId};
use crate::trace::eventbuf::EventBuffer;
use crate::trace::protocol::EventType;
use crate::trace::time_anchor::TimeAnchor;

/// Configuration for a trace event log.
#[derive(Debug, Clone)]
pub struct Config {
    /// Soft cap on aggregate queued payload bytes; adds beyond it drop.
    pub queue_soft_cap_bytes: usize,

    /// Cap on the number of queued events; adds beyond it drop.
    pub queue_event_cap: usize,

    /// Per-event payload cap; larger payloads are truncated to this size.
    pub max_payload_bytes: usize,

    /// Maximum number of program counters captured per stack.
    pub max_stack_depth: usize,

    /// When false, header writers emit an empty header set.
    pub capture_headers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            queue_soft_cap_bytes: 64 * 1024 * 1024,
            queue_event_cap: 200_000,
            max_payload_bytes: 1024 * 1024,
            max_stack_depth: 64,
            capture_headers: true,
        }
    }
}

/// A completed trace event, queued for framing.
#[derive(Debug, Clone)]
pub struct Event {
    pub typ: EventType,
    pub span: SpanKey,
    pub id: TraceEventId,

    /// Monotonic nanoseconds since the log's time anchor.
    pub ts_nanos: u64,

    /// The encoded payload. Owned by the log once added.
    pub data: Bytes,
}

struct Queue {
    events: VecDeque<Event>,
    queued_bytes: usize,

    // The next event ID to assign. Assigned under the lock so that queue
    // order always matches ID order; dropped adds consume no ID.
    next_id: u64,

    // Set when events have been dropped since the last in-stream report.
    pending_drop_report: bool,
}

/// Thread-safe sink for completed trace events.
///
/// `add` assigns event IDs, stamps timestamps, and enforces the queue caps;
/// it never blocks the caller beyond the queue lock. Consumers pull events
/// out with `drain`.
pub struct EventLog {
    queue: Mutex<Queue>,
    anchor: TimeAnchor,
    config: Config,

    dropped_events: AtomicU64,
    truncated_payloads: AtomicU64,
    invalid_span_transitions: AtomicU64,
}

impl EventLog {
    pub fn new(config: Config) -> Self {
        EventLog {
            queue: Mutex::new(Queue {
                events: VecDeque::new(),
                queued_bytes: 0,
                next_id: 1,
                pending_drop_report: false,
            }),
            anchor: TimeAnchor::new(),
            config,
            dropped_events: AtomicU64::new(0),
            truncated_payloads: AtomicU64::new(0),
            invalid_span_transitions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn anchor(&self) -> &TimeAnchor {
        &self.anchor
    }

    /// Appends a completed event, assigning its event ID and timestamp.
    ///
    /// Returns the assigned ID, or [`TraceEventId::NONE`] if the queue is
    /// saturated and the event was dropped.
    pub fn add(&self, typ: EventType, span: SpanKey, eb: EventBuffer) -> TraceEventId {
        let mut data = eb.freeze();
        if data.len() > self.config.max_payload_bytes {
            data.truncate(self.config.max_payload_bytes);
            self.truncated_payloads.fetch_add(1, Ordering::Release);
        }
        let ts_nanos = self.anchor.nanos_since_start();

        let mut q = self.queue.lock().unwrap();
        if q.events.len() >= self.config.queue_event_cap
            || q.queued_bytes + data.len() > self.config.queue_soft_cap_bytes
        {
            q.pending_drop_report = true;
            drop(q);

            let dropped = self.dropped_events.fetch_add(1, Ordering::AcqRel) + 1;
            if dropped == 1 {
                log::warn!("trace event queue saturated, dropping events");
            }
            return TraceEventId::NONE;
        }

        if q.pending_drop_report {
            q.pending_drop_report = false;
            let report = self.drop_report_payload();
            let id = TraceEventId(q.next_id);
            q.next_id += 1;
            q.queued_bytes += report.len();
            q.events.push_back(Event {
                typ: EventType::LogMessage,
                span,
                id,
                ts_nanos,
                data: report,
            });
        }

        let id = TraceEventId(q.next_id);
        q.next_id += 1;
        q.queued_bytes += data.len();
        q.events.push_back(Event {
            typ,
            span,
            id,
            ts_nanos,
            data,
        });
        id
    }

    // A warning-level LogMessage payload carrying the loss counters.
    fn drop_report_payload(&self) -> Bytes {
        let dropped = self.dropped_events.load(Ordering::Acquire);
        let truncated = self.truncated_payloads.load(Ordering::Acquire);

        let mut eb = EventBuffer::with_capacity(64);
        eb.uvarint(0u64); // def_loc
        eb.uvarint(0u64); // thread tag
        eb.event_id(None);

        eb.byte(LogLevel::Warn as u8);
        eb.str("trace events dropped");
        eb.uvarint(2u64);
        eb.log_field(&LogField {
            key: "dropped_events",
            value: LogFieldValue::Uint(dropped),
        });
        eb.log_field(&LogField {
            key: "truncated_payloads",
            value: LogFieldValue::Uint(truncated),
        });
        eb.stack(&crate::stack::Stack::empty());
        eb.freeze()
    }

    /// Removes and returns up to `limit` events, oldest first.
    pub fn drain(&self, limit: usize) -> Vec<Event> {
        let mut q = self.queue.lock().unwrap();
        let n = limit.min(q.events.len());
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let event = q.events.pop_front().expect("queue length checked");
            q.queued_bytes -= event.data.len();
            out.push(event);
        }
        out
    }

    /// The number of queued events.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate payload bytes currently queued.
    pub fn queued_bytes(&self) -> usize {
        self.queue.lock().unwrap().queued_bytes
    }

    /// The configured event-count capacity.
    pub fn capacity(&self) -> usize {
        self.config.queue_event_cap
    }

    /// Events dropped due to saturation.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Acquire)
    }

    /// Payloads truncated to the per-event cap.
    pub fn truncated_payloads(&self) -> u64 {
        self.truncated_payloads.load(Ordering::Acquire)
    }

    /// Span start/end emits refused because of an invalid phase transition.
    pub fn invalid_span_transitions(&self) -> u64 {
        self.invalid_span_transitions.load(Ordering::Acquire)
    }

    pub(super) fn record_invalid_span_transition(&self) {
        self.invalid_span_transitions.fetch_add(1, Ordering::Release);
    }
}
