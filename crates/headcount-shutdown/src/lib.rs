pub mod connection;
pub mod signal;

pub use connection::{ConnectionGuard, ConnectionTracker};
pub use signal::{ShutdownListener, ShutdownSignal, SignalHandler};
