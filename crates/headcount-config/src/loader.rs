use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat, Map};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::AppConfig;

pub const DEFAULT_CONFIG_FILE: &str = "headcount.toml";

/// 环境变量前缀，例如 `HEADCOUNT__HUB__PORT=9000`
pub const ENV_PREFIX: &str = "HEADCOUNT";

/// 配置加载器：TOML 文件 + 环境变量覆盖
pub struct ConfigLoader {
    path: PathBuf,
    env_override: Option<Map<String, String>>,
}

impl ConfigLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            env_override: None,
        }
    }

    /// 用给定的键值代替进程环境变量
    pub fn with_env(mut self, vars: Map<String, String>) -> Self {
        self.env_override = Some(vars);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载并校验配置；文件不存在时使用默认值
    pub fn load(&self) -> Result<AppConfig> {
        let mut builder = Config::builder();

        if self.path.exists() {
            builder = builder.add_source(File::new(
                self.path
                    .to_str()
                    .ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ));
        } else {
            debug!(path = ?self.path, "Config file not found, using defaults");
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(self.env_override.clone()),
        );

        let config: AppConfig = builder
            .build()
            .with_context(|| format!("Failed to read config {}", self.path.display()))?
            .try_deserialize()
            .context("Invalid config values")?;

        validate(&config)?;
        Ok(config)
    }
}

/// 校验配置
pub fn validate(config: &AppConfig) -> Result<()> {
    config
        .counting
        .boundary_lines()
        .validate()
        .map_err(|e| anyhow!("[counting] {}", e))?;

    if config.counting.max_missed_frames == 0 {
        return Err(anyhow!("max_missed_frames must be greater than 0"));
    }
    if config.rollover.check_interval_secs == 0 {
        return Err(anyhow!("check_interval_secs must be greater than 0"));
    }
    if config.hub.subscriber_queue == 0 {
        return Err(anyhow!("subscriber_queue must be greater than 0"));
    }
    if config.hub.ping_interval_secs == 0 {
        return Err(anyhow!("ping_interval_secs must be greater than 0"));
    }
    if config.publisher.retry_delay_secs == 0 {
        return Err(anyhow!("retry_delay_secs must be greater than 0"));
    }
    if config.publisher.connect_timeout_secs == 0 {
        return Err(anyhow!("connect_timeout_secs must be greater than 0"));
    }
    if config.publisher.outbox_capacity == 0 {
        return Err(anyhow!("outbox_capacity must be greater than 0"));
    }
    if config.eventbus.capacity == 0 {
        return Err(anyhow!("eventbus capacity must be greater than 0"));
    }

    Ok(())
}
