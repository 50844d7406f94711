use headcount_core::{BoundaryLines, TrackStoreConfig};
use serde::Deserialize;
use std::time::Duration;

/// 应用配置，所有段落都可省略
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub counting: CountingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rollover: RolloverConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub eventbus: EventBusConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CountingConfig {
    #[serde(default = "default_y_upper")]
    pub y_upper: f64,
    #[serde(default = "default_y_lower")]
    pub y_lower: f64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_missed_frames")]
    pub max_missed_frames: u64,
    /// 被淘汰的 id 在多少帧内重新出现时沿用旧状态
    #[serde(default)]
    pub reuse_grace_frames: u64,
}

impl CountingConfig {
    pub fn boundary_lines(&self) -> BoundaryLines {
        BoundaryLines::new(self.y_upper, self.y_lower, self.tolerance)
    }

    pub fn track_store(&self) -> TrackStoreConfig {
        TrackStoreConfig {
            lines: self.boundary_lines(),
            max_missed_frames: self.max_missed_frames,
            reuse_grace_frames: self.reuse_grace_frames,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    #[serde(default = "default_event_log_path")]
    pub event_log_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RolloverConfig {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

impl RolloverConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HubConfig {
    #[serde(default = "default_hub_host")]
    pub host: String,
    #[serde(default = "default_hub_port")]
    pub port: u16,
    /// 每个订阅者的待发送队列长度
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

impl HubConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublisherConfig {
    /// 关闭后计数进程只写本地文件
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_publisher_url")]
    pub url: String,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// 重连成功后重发最后一次状态
    #[serde(default = "default_true")]
    pub resend_on_connect: bool,
}

impl PublisherConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventBusConfig {
    #[serde(default = "default_eventbus_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

// 默认值函数
fn default_y_upper() -> f64 {
    194.0
}

fn default_y_lower() -> f64 {
    220.0
}

fn default_tolerance() -> f64 {
    6.0
}

fn default_max_missed_frames() -> u64 {
    30
}

fn default_snapshot_path() -> String {
    "counts/daily_count.csv".to_string()
}

fn default_event_log_path() -> String {
    "logs/monitoring_timestamps.csv".to_string()
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_hub_host() -> String {
    "127.0.0.1".to_string()
}

fn default_hub_port() -> u16 {
    8765
}

fn default_subscriber_queue() -> usize {
    64
}

fn default_ping_interval_secs() -> u64 {
    10
}

fn default_publisher_url() -> String {
    "ws://127.0.0.1:8765".to_string()
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_outbox_capacity() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_eventbus_capacity() -> usize {
    1024
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9898".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default trait 实现
impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            y_upper: default_y_upper(),
            y_lower: default_y_lower(),
            tolerance: default_tolerance(),
            max_missed_frames: default_max_missed_frames(),
            reuse_grace_frames: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            event_log_path: default_event_log_path(),
        }
    }
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: default_hub_host(),
            port: default_hub_port(),
            subscriber_queue: default_subscriber_queue(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_publisher_url(),
            retry_delay_secs: default_retry_delay_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            outbox_capacity: default_outbox_capacity(),
            resend_on_connect: true,
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: default_eventbus_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Plain,
        }
    }
}
