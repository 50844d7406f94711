use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use headcount_types::{CounterState, CrossingEvent, Direction, SnapshotRecord};
use tracing::{debug, info, warn};

use crate::bus::{SharedTransitionBus, Transition, TransitionKind};
use crate::error::Result;
use crate::snapshot::SnapshotStore;

/// 计数器：唯一的写入者
///
/// 每次状态变化都会在 [`TransitionBus`](crate::bus::TransitionBus) 上发出一条携带完整状态的通知。
pub struct Counter {
    state: CounterState,
    day: NaiveDate,
    is_monitoring: bool,
    bus: SharedTransitionBus,
    /// 写入失败的跨日快照，按日期顺序在下次检查时重试
    pending: Vec<SnapshotRecord>,
    /// 自上次成功写入后是否有变化
    dirty: bool,
}

impl Counter {
    pub fn new(initial: CounterState, bus: SharedTransitionBus) -> Self {
        let day = initial.last_updated.date_naive();
        Self {
            state: initial,
            day,
            is_monitoring: false,
            bus,
            pending: Vec::new(),
            dirty: false,
        }
    }

    pub fn state(&self) -> &CounterState {
        &self.state
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn is_monitoring(&self) -> bool {
        self.is_monitoring
    }

    pub fn pending_snapshots(&self) -> &[SnapshotRecord] {
        &self.pending
    }

    /// 应用一次穿越事件并返回新状态
    pub fn apply(&mut self, event: CrossingEvent) -> CounterState {
        let kind = match event.direction {
            Direction::Down => {
                self.state.occupancy = self.state.occupancy.saturating_add(1);
                self.state.daily_total = self.state.daily_total.saturating_add(1);
                TransitionKind::Increment
            }
            Direction::Up => {
                self.state.occupancy = self.state.occupancy.saturating_sub(1);
                TransitionKind::Decrement
            }
        };
        self.state.last_updated = event.timestamp;
        self.dirty = true;

        info!(
            track_id = %event.track_id,
            direction = %event.direction,
            occupancy = self.state.occupancy,
            daily_total = self.state.daily_total,
            "Counter updated"
        );
        crate::metrics::record_crossing(event.direction);

        self.emit(kind);
        self.state.clone()
    }

    /// 设置监控开关，值变化时广播
    pub fn set_monitoring(&mut self, on: bool) -> CounterState {
        if self.is_monitoring != on {
            self.is_monitoring = on;
            info!(is_monitoring = on, "Monitoring {}", if on { "activated" } else { "deactivated" });
            self.emit(TransitionKind::Monitoring);
        }
        self.state.clone()
    }

    /// 采用广播中心的监控开关，值变化时通知本地消费者但不回传
    pub fn sync_monitoring(&mut self, on: bool) -> CounterState {
        if self.is_monitoring != on {
            self.is_monitoring = on;
            info!(is_monitoring = on, "Monitoring synced from hub");
            self.emit(TransitionKind::MonitoringSynced);
        }
        self.state.clone()
    }

    /// 重新广播当前完整状态
    pub fn announce(&self) {
        self.emit(TransitionKind::Resync);
    }

    /// 跨日检查：日期变化时写入前一天的快照，然后清零当日累计，在场人数保留。
    ///
    /// 快照写入失败不会阻止跨日，未写入的记录会在后续检查中重试。
    pub async fn roll_over_if_needed(
        &mut self,
        store: &dyn SnapshotStore,
        now: DateTime<Local>,
    ) -> Option<SnapshotRecord> {
        self.retry_pending(store).await;

        let today = now.date_naive();
        if today <= self.day {
            return None;
        }

        let record = self.snapshot_at(now);
        info!(
            date = %record.date,
            daily_total = record.daily_total,
            occupancy = record.occupancy,
            "Day rollover"
        );

        if let Err(e) = store.save(&record).await {
            warn!(date = %record.date, error = %e, "Failed to persist rollover snapshot, will retry");
            self.pending.push(record.clone());
        }

        self.state.daily_total = 0;
        self.state.last_updated = now;
        self.day = today;
        self.dirty = true;
        self.emit(TransitionKind::Rollover);

        Some(record)
    }

    /// 有未写入的变化时写入当天快照
    pub async fn flush(
        &mut self,
        store: &dyn SnapshotStore,
        now: DateTime<Local>,
    ) -> Result<Option<SnapshotRecord>> {
        self.retry_pending(store).await;
        if !self.dirty {
            return Ok(None);
        }
        self.persist(store, now).await.map(Some)
    }

    /// 无条件写入当天快照
    pub async fn persist(
        &mut self,
        store: &dyn SnapshotStore,
        now: DateTime<Local>,
    ) -> Result<SnapshotRecord> {
        let record = self.snapshot_at(now);
        store.save(&record).await?;
        self.dirty = false;
        debug!(
            date = %record.date,
            daily_total = record.daily_total,
            occupancy = record.occupancy,
            "Snapshot saved"
        );
        Ok(record)
    }

    async fn retry_pending(&mut self, store: &dyn SnapshotStore) {
        if self.pending.is_empty() {
            return;
        }

        let mut still_failing = Vec::new();
        for record in std::mem::take(&mut self.pending) {
            match store.save(&record).await {
                Ok(()) => info!(date = %record.date, "Pending rollover snapshot saved"),
                Err(e) => {
                    warn!(date = %record.date, error = %e, "Pending rollover snapshot still failing");
                    still_failing.push(record);
                }
            }
        }
        self.pending = still_failing;
    }

    /// 生成当前计数日的快照，记录日期始终等于计数日
    fn snapshot_at(&self, at: DateTime<Local>) -> SnapshotRecord {
        let written_at = if at.date_naive() == self.day {
            at.naive_local()
        } else if self.state.last_updated.date_naive() == self.day {
            self.state.last_updated.naive_local()
        } else {
            self.day.and_time(NaiveTime::MIN)
        };
        SnapshotRecord::new(written_at, self.state.daily_total, self.state.occupancy)
    }

    fn emit(&self, kind: TransitionKind) {
        crate::metrics::set_counter_state(&self.state);

        let transition = Transition {
            kind,
            state: self.state.clone(),
            is_monitoring: self.is_monitoring,
        };
        if self.bus.publish(transition).is_err() {
            debug!(?kind, "Transition emitted with no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TransitionBus;
    use crate::detector::BoundaryLines;
    use crate::snapshot::MemorySnapshotStore;
    use crate::tracking::{TrackStore, TrackStoreConfig};
    use chrono::{Duration, TimeZone};
    use headcount_types::{TrackId, TrackPosition};
    use std::sync::Arc;

    fn at(day: u32, hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn counter_at(now: DateTime<Local>) -> (Counter, Arc<TransitionBus>) {
        let bus = Arc::new(TransitionBus::new(64));
        (Counter::new(CounterState::zero(now), bus.clone()), bus)
    }

    fn event(direction: Direction, ts: DateTime<Local>) -> CrossingEvent {
        CrossingEvent::new(TrackId::Number(1), direction, ts)
    }

    #[test]
    fn test_downs_accumulate() {
        let now = at(10, 9);
        let (mut counter, _bus) = counter_at(now);
        for n in 1..=25u64 {
            let state = counter.apply(event(Direction::Down, now));
            assert_eq!(state.daily_total, n);
            assert_eq!(state.occupancy, n);
        }
    }

    #[test]
    fn test_occupancy_clamps_at_zero() {
        let now = at(10, 9);
        let (mut counter, _bus) = counter_at(now);
        counter.apply(event(Direction::Down, now));
        for _ in 0..5 {
            let state = counter.apply(event(Direction::Up, now));
            assert_eq!(state.occupancy, 0);
            assert_eq!(state.daily_total, 1);
        }
    }

    #[tokio::test]
    async fn test_every_apply_emits_full_state() {
        let now = at(10, 9);
        let (mut counter, bus) = counter_at(now);
        let mut rx = bus.subscribe();

        counter.apply(event(Direction::Down, now));
        counter.apply(event(Direction::Up, now));
        counter.apply(event(Direction::Up, now));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, TransitionKind::Increment);
        assert_eq!((first.state.daily_total, first.state.occupancy), (1, 1));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, TransitionKind::Decrement);
        assert_eq!((second.state.daily_total, second.state.occupancy), (1, 0));

        let third = rx.recv().await.unwrap();
        assert_eq!(third.kind, TransitionKind::Decrement);
        assert_eq!(third.state.occupancy, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_scenario_track_seven() {
        let now = at(10, 9);
        let (mut counter, _bus) = counter_at(now);
        let mut tracks = TrackStore::new(TrackStoreConfig {
            lines: BoundaryLines::new(194.0, 220.0, 6.0),
            ..Default::default()
        });

        for cy in [188.0, 193.0, 200.0, 195.0] {
            for e in tracks.observe(&[TrackPosition::new(7, 50.0, cy)], now) {
                counter.apply(e);
            }
        }
        assert_eq!((counter.state().occupancy, counter.state().daily_total), (1, 1));

        for cy in [214.0, 220.0, 226.0] {
            for e in tracks.observe(&[TrackPosition::new(7, 50.0, cy)], now) {
                counter.apply(e);
            }
        }
        assert_eq!((counter.state().occupancy, counter.state().daily_total), (0, 1));
    }

    #[tokio::test]
    async fn test_rollover_persists_then_resets() {
        let store = MemorySnapshotStore::new();
        let (mut counter, bus) = counter_at(at(10, 9));
        for _ in 0..3 {
            counter.apply(event(Direction::Down, at(10, 10)));
        }
        counter.apply(event(Direction::Up, at(10, 11)));
        let mut rx = bus.subscribe();

        assert!(counter.roll_over_if_needed(&store, at(10, 23)).await.is_none());

        let record = counter
            .roll_over_if_needed(&store, at(11, 0) + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
        assert_eq!((record.daily_total, record.occupancy), (3, 2));
        assert_eq!(store.records().await, vec![record]);

        assert_eq!(counter.state().daily_total, 0);
        assert_eq!(counter.state().occupancy, 2);
        assert_eq!(counter.day(), NaiveDate::from_ymd_opt(2024, 5, 11).unwrap());
        assert_eq!(rx.recv().await.unwrap().kind, TransitionKind::Rollover);
    }

    #[tokio::test]
    async fn test_failed_rollover_write_is_retried() {
        let store = MemorySnapshotStore::new();
        store.set_fail_writes(true);
        let (mut counter, _bus) = counter_at(at(10, 9));
        counter.apply(event(Direction::Down, at(10, 10)));

        counter.roll_over_if_needed(&store, at(11, 1)).await.unwrap();
        assert_eq!(counter.pending_snapshots().len(), 1);
        assert_eq!(counter.state().daily_total, 0);

        store.set_fail_writes(false);
        counter.flush(&store, at(11, 2)).await.unwrap();
        assert!(counter.pending_snapshots().is_empty());

        let records = store.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
        assert_eq!(records[0].daily_total, 1);
        assert_eq!(records[1].date, NaiveDate::from_ymd_opt(2024, 5, 11).unwrap());
        assert_eq!(records[1].daily_total, 0);
        assert_eq!(records[1].occupancy, 1);
    }

    #[tokio::test]
    async fn test_consecutive_failed_rollovers_keep_every_day() {
        let store = MemorySnapshotStore::new();
        store.set_fail_writes(true);
        let (mut counter, _bus) = counter_at(at(10, 9));
        counter.apply(event(Direction::Down, at(10, 10)));
        counter.roll_over_if_needed(&store, at(11, 1)).await.unwrap();

        counter.apply(event(Direction::Down, at(11, 10)));
        counter.apply(event(Direction::Down, at(11, 11)));
        counter.roll_over_if_needed(&store, at(12, 1)).await.unwrap();

        let pending: Vec<NaiveDate> = counter.pending_snapshots().iter().map(|r| r.date).collect();
        assert_eq!(
            pending,
            vec![
                NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
                NaiveDate::from_ymd_opt(2024, 5, 11).unwrap(),
            ]
        );

        store.set_fail_writes(false);
        assert!(counter.roll_over_if_needed(&store, at(12, 2)).await.is_none());
        assert!(counter.pending_snapshots().is_empty());

        let totals: Vec<(NaiveDate, u64)> = store
            .records()
            .await
            .iter()
            .map(|r| (r.date, r.daily_total))
            .collect();
        assert_eq!(
            totals,
            vec![
                (NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(), 1),
                (NaiveDate::from_ymd_opt(2024, 5, 11).unwrap(), 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_flush_only_when_dirty() {
        let store = MemorySnapshotStore::new();
        let (mut counter, _bus) = counter_at(at(10, 9));

        assert!(counter.flush(&store, at(10, 10)).await.unwrap().is_none());
        counter.apply(event(Direction::Down, at(10, 10)));
        assert!(counter.flush(&store, at(10, 11)).await.unwrap().is_some());
        assert!(counter.flush(&store, at(10, 12)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_monitoring_toggle_emits_once() {
        let (mut counter, bus) = counter_at(at(10, 9));
        let mut rx = bus.subscribe();

        counter.set_monitoring(true);
        counter.set_monitoring(true);

        let t = rx.recv().await.unwrap();
        assert_eq!(t.kind, TransitionKind::Monitoring);
        assert!(t.is_monitoring);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_synced_monitoring_is_not_a_local_toggle() {
        let (mut counter, bus) = counter_at(at(10, 9));
        let mut rx = bus.subscribe();

        counter.sync_monitoring(true);
        counter.sync_monitoring(true);
        assert!(counter.is_monitoring());

        let t = rx.recv().await.unwrap();
        assert_eq!(t.kind, TransitionKind::MonitoringSynced);
        assert!(t.is_monitoring);
        assert!(rx.try_recv().is_err());
    }
}
