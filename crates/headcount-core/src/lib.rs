pub mod bus;
pub mod clock;
pub mod counter;
pub mod detector;
pub mod error;
pub mod metrics;
pub mod snapshot;
pub mod tracking;

pub use bus::{SharedTransitionBus, Transition, TransitionBus, TransitionKind};
pub use clock::{Clock, FixedClock, SystemClock};
pub use counter::Counter;
pub use detector::{detect, BoundaryLines, CrossingState};
pub use error::{CountError, Result};
pub use snapshot::{seed_state, MemorySnapshotStore, SnapshotStore};
pub use tracking::{TrackStore, TrackStoreConfig, TrackedObject};
