use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 快照与事件日志使用的时间格式
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 每日快照，每天只保留一条
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub date: NaiveDate,
    pub written_at: NaiveDateTime,
    pub daily_total: u64,
    pub occupancy: u64,
}

impl SnapshotRecord {
    pub fn new(written_at: NaiveDateTime, daily_total: u64, occupancy: u64) -> Self {
        Self {
            date: written_at.date(),
            written_at,
            daily_total,
            occupancy,
        }
    }
}

/// 事件日志中的事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Increment,
    Decrement,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Increment => "Increment",
            EventKind::Decrement => "Decrement",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 事件日志条目，`count` 为变更后的在场人数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: NaiveDateTime,
    pub event: EventKind,
    pub count: u64,
    pub monitoring_active: bool,
}
