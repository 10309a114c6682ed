mod eventbuf;
mod export;
mod log;
pub mod protocol;
mod time_anchor;

pub use eventbuf::EventBuffer;
pub use export::{StreamWriter, MAGIC, WIRE_VERSION};
pub use log::{Config, Event, EventLog};
pub use protocol::Tracer;
pub use time_anchor::TimeAnchor;
