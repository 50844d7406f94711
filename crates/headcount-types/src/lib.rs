pub mod counts;
pub mod message;
pub mod record;
pub mod track;

pub use counts::{CounterState, CrossingEvent, Direction};
pub use message::{CountsMessage, InboundMessage, StatePatch};
pub use record::{EventKind, EventLogEntry, SnapshotRecord, TIMESTAMP_FORMAT};
pub use track::{TrackId, TrackParseError, TrackPosition};
