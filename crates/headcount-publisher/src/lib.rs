pub mod error;
pub mod forward;
pub mod publisher;

pub use error::{PublishError, Result};
pub use forward::run_forwarder;
pub use publisher::{ConnectionState, PublisherOptions, ReconnectingPublisher};
