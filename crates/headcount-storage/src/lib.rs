pub mod error;
pub mod event_log;
pub mod snapshot;

pub use error::StorageError;
pub use event_log::{run_event_log, CsvEventLog};
pub use snapshot::CsvSnapshotStore;
