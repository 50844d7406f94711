pub mod error;
pub mod hub;
pub mod server;

pub use error::{HubError, Result};
pub use hub::{BroadcastHub, SubscriberHandle};
pub use server::{create_router, AppState, HubServer};
