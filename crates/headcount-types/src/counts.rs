use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::track::TrackId;

/// 穿越方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// 经过上线，计为进入
    Down,
    /// 经过下线，计为离开
    Up,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Down => "down",
            Direction::Up => "up",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次穿越事件，只会被计数器消费一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossingEvent {
    pub track_id: TrackId,
    pub direction: Direction,
    pub timestamp: DateTime<Local>,
}

impl CrossingEvent {
    pub fn new(track_id: TrackId, direction: Direction, timestamp: DateTime<Local>) -> Self {
        Self {
            track_id,
            direction,
            timestamp,
        }
    }
}

/// 计数器的权威状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterState {
    /// 当前区域内人数
    pub occupancy: u64,
    /// 当日累计进入人数
    pub daily_total: u64,
    pub last_updated: DateTime<Local>,
}

impl CounterState {
    pub fn new(daily_total: u64, occupancy: u64, last_updated: DateTime<Local>) -> Self {
        Self {
            occupancy,
            daily_total,
            last_updated,
        }
    }

    pub fn zero(last_updated: DateTime<Local>) -> Self {
        Self::new(0, 0, last_updated)
    }
}
