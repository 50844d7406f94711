pub mod app;
pub mod loader;

pub use app::{
    AppConfig, CountingConfig, EventBusConfig, HubConfig, LogFormat, LoggingConfig,
    MetricsConfig, PublisherConfig, RolloverConfig, StorageConfig,
};
pub use loader::{validate, ConfigLoader, DEFAULT_CONFIG_FILE, ENV_PREFIX};
