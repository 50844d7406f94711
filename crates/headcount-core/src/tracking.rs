use chrono::{DateTime, Local};
use headcount_types::{CrossingEvent, TrackId, TrackPosition};
use std::collections::HashMap;
use tracing::debug;

use crate::detector::{detect, BoundaryLines, CrossingState};

/// 被跟踪目标
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub id: TrackId,
    pub cx: f64,
    pub cy: f64,
    pub state: CrossingState,
}

impl TrackedObject {
    pub fn new(id: TrackId, cx: f64, cy: f64) -> Self {
        Self {
            id,
            cx,
            cy,
            state: CrossingState::None,
        }
    }
}

/// 目标状态存储配置
#[derive(Debug, Clone, Copy)]
pub struct TrackStoreConfig {
    pub lines: BoundaryLines,
    /// 连续多少帧未出现后淘汰
    pub max_missed_frames: u64,
    /// 淘汰后保留穿越状态的帧数，0 表示重新出现即视为新目标
    pub reuse_grace_frames: u64,
}

impl Default for TrackStoreConfig {
    fn default() -> Self {
        Self {
            lines: BoundaryLines::default(),
            max_missed_frames: 30,
            reuse_grace_frames: 0,
        }
    }
}

struct TrackEntry {
    object: TrackedObject,
    last_seen: u64,
}

struct Tombstone {
    state: CrossingState,
    expires_at: u64,
}

/// 逐帧维护目标的穿越状态，并产生穿越事件。
///
/// 跟踪器复用已淘汰的 ID 时，默认当作全新目标处理，可能导致重复计数；
/// 设置 `reuse_grace_frames` 后，宽限期内重新出现的 ID 会恢复原有状态。
pub struct TrackStore {
    config: TrackStoreConfig,
    tracks: HashMap<TrackId, TrackEntry>,
    tombstones: HashMap<TrackId, Tombstone>,
    frame: u64,
}

impl TrackStore {
    pub fn new(config: TrackStoreConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
            tombstones: HashMap::new(),
            frame: 0,
        }
    }

    /// 处理一帧的所有目标位置，返回本帧产生的穿越事件
    pub fn observe(
        &mut self,
        positions: &[TrackPosition],
        timestamp: DateTime<Local>,
    ) -> Vec<CrossingEvent> {
        self.frame += 1;
        let frame = self.frame;
        let mut events = Vec::new();

        for pos in positions {
            let tombstones = &mut self.tombstones;
            let entry = self.tracks.entry(pos.id.clone()).or_insert_with(|| {
                let mut object = TrackedObject::new(pos.id.clone(), pos.cx, pos.cy);
                if let Some(tombstone) = tombstones.remove(&pos.id) {
                    debug!(track_id = %pos.id, "Track reappeared within grace period");
                    object.state = tombstone.state;
                } else {
                    debug!(track_id = %pos.id, "New track");
                }
                TrackEntry {
                    object,
                    last_seen: frame,
                }
            });

            entry.object.cx = pos.cx;
            entry.object.cy = pos.cy;
            entry.last_seen = frame;

            if let Some(direction) = detect(&mut entry.object, &self.config.lines) {
                debug!(track_id = %pos.id, %direction, cy = pos.cy, "Crossing detected");
                events.push(CrossingEvent::new(pos.id.clone(), direction, timestamp));
            }
        }

        self.evict_stale();
        events
    }

    fn evict_stale(&mut self) {
        let frame = self.frame;
        let max_missed = self.config.max_missed_frames;
        let grace = self.config.reuse_grace_frames;

        let stale: Vec<TrackId> = self
            .tracks
            .iter()
            .filter(|(_, entry)| frame - entry.last_seen >= max_missed)
            .map(|(id, _)| id.clone())
            .collect();

        for id in stale {
            if let Some(entry) = self.tracks.remove(&id) {
                debug!(track_id = %id, "Track evicted");
                crate::metrics::record_track_evicted();
                if grace > 0 {
                    self.tombstones.insert(
                        id,
                        Tombstone {
                            state: entry.object.state,
                            expires_at: frame + grace,
                        },
                    );
                }
            }
        }

        self.tombstones.retain(|_, t| t.expires_at > frame);
    }

    pub fn get(&self, id: &TrackId) -> Option<&TrackedObject> {
        self.tracks.get(id).map(|entry| &entry.object)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
