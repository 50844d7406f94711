use async_trait::async_trait;
use chrono::{DateTime, Local};
use headcount_types::{CounterState, SnapshotRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{CountError, Result};

/// 每日快照存储
///
/// 写入按日期 upsert：同一天的记录被替换而不是追加。
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// 读取最近一天的记录
    async fn load_latest(&self) -> Result<Option<SnapshotRecord>>;

    async fn save(&self, record: &SnapshotRecord) -> Result<()>;
}

/// 启动时从快照恢复计数状态。
///
/// 当天的记录原样恢复；更早的记录只沿用在场人数，当日累计从 0 开始；
/// 读取失败视为没有历史状态。
pub async fn seed_state(store: &dyn SnapshotStore, now: DateTime<Local>) -> CounterState {
    let today = now.date_naive();
    match store.load_latest().await {
        Ok(Some(record)) if record.date == today => {
            info!(
                daily_total = record.daily_total,
                occupancy = record.occupancy,
                "Resuming today's counts from snapshot"
            );
            CounterState::new(record.daily_total, record.occupancy, now)
        }
        Ok(Some(record)) => {
            info!(
                snapshot_date = %record.date,
                occupancy = record.occupancy,
                "Snapshot is from an earlier day, carrying occupancy over"
            );
            CounterState::new(0, record.occupancy, now)
        }
        Ok(None) => {
            info!("No snapshot found, starting from zero");
            CounterState::zero(now)
        }
        Err(e) => {
            warn!(error = %e, "Failed to read snapshot, starting from zero");
            CounterState::zero(now)
        }
    }
}

/// 内存快照存储，可模拟写入失败
#[derive(Default)]
pub struct MemorySnapshotStore {
    records: Mutex<Vec<SnapshotRecord>>,
    fail_writes: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn records(&self) -> Vec<SnapshotRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load_latest(&self) -> Result<Option<SnapshotRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().max_by_key(|r| r.date).cloned())
    }

    async fn save(&self, record: &SnapshotRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CountError::Snapshot("simulated write failure".to_string()));
        }

        let mut records = self.records.lock().await;
        match records.iter_mut().find(|r| r.date == record.date) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }
}
