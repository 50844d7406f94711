use headcount_core::{Clock, Counter, SnapshotStore, TrackStore, TrackStoreConfig};
use headcount_shutdown::ShutdownListener;
use headcount_types::{CounterState, CrossingEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::input::{parse_line, Frame, InputLine};

/// 计数流水线：逐帧检测穿越并更新计数器，定期检查跨日和写快照
///
/// 检测和计数在同一个任务里顺序执行，网络和文件写入都在其他任务中完成。
pub struct CountingPipeline {
    tracks: TrackStore,
    counter: Counter,
    clock: Arc<dyn Clock>,
    store: Arc<dyn SnapshotStore>,
    check_interval: Duration,
    /// 广播中心的监控开关，连接广播中心时由发布端提供
    hub_monitoring: Option<watch::Receiver<Option<bool>>>,
}

impl CountingPipeline {
    pub fn new(
        config: TrackStoreConfig,
        counter: Counter,
        clock: Arc<dyn Clock>,
        store: Arc<dyn SnapshotStore>,
        check_interval: Duration,
    ) -> Self {
        Self {
            tracks: TrackStore::new(config),
            counter,
            clock,
            store,
            check_interval,
            hub_monitoring: None,
        }
    }

    /// 跟随广播中心的监控开关
    pub fn with_hub_monitoring(mut self, rx: watch::Receiver<Option<bool>>) -> Self {
        self.hub_monitoring = Some(rx);
        self
    }

    pub fn counter(&self) -> &Counter {
        &self.counter
    }

    /// 处理一行输入，无法解析的行记录后跳过
    pub async fn process_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match parse_line(line) {
            Ok(InputLine::Frame(frame)) => {
                self.process_frame(frame).await;
            }
            Ok(InputLine::MonitoringToggle(on)) => {
                let next = on.unwrap_or(!self.counter.is_monitoring());
                self.counter.set_monitoring(next);
            }
            Err(e) => warn!(error = %e, "Skipping input line"),
        }
    }

    /// 处理一帧，返回本帧产生的穿越事件
    pub async fn process_frame(&mut self, frame: Frame) -> Vec<CrossingEvent> {
        if frame.skipped > 0 {
            warn!(skipped = frame.skipped, "Frame contained malformed tracks");
        }

        let now = frame.timestamp.unwrap_or_else(|| self.clock.now());
        let events = self.tracks.observe(&frame.tracks, now);

        if !events.is_empty() {
            // 午夜后的第一次计数先完成跨日
            self.counter
                .roll_over_if_needed(self.store.as_ref(), now)
                .await;
            for event in &events {
                self.counter.apply(event.clone());
            }
        }

        events
    }

    /// 定时检查：跨日，或者在有变化时写入当天快照
    pub async fn tick(&mut self) {
        let now = self.clock.now();
        if self
            .counter
            .roll_over_if_needed(self.store.as_ref(), now)
            .await
            .is_some()
        {
            return;
        }

        match self.counter.flush(self.store.as_ref(), now).await {
            Ok(Some(record)) => debug!(date = %record.date, "Periodic snapshot written"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Periodic snapshot failed"),
        }
    }

    /// 读取输入直到结束或收到关闭信号，然后写入最终快照
    pub async fn run<R>(mut self, input: R, mut shutdown: ShutdownListener) -> CounterState
    where
        R: AsyncBufRead + Unpin,
    {
        // 启动时广播一次恢复出的状态
        self.counter.announce();

        let mut hub_monitoring = self.hub_monitoring.take();
        let mut lines = input.lines();
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.process_line(&line).await,
                    Ok(None) => {
                        info!("End of input");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read input");
                        break;
                    }
                },
                _ = ticker.tick() => self.tick().await,
                on = next_hub_monitoring(&mut hub_monitoring) => {
                    self.counter.sync_monitoring(on);
                }
                _ = shutdown.wait() => {
                    info!("Shutdown requested, stopping pipeline");
                    break;
                }
            }
        }

        self.finish().await
    }

    /// 写入最终快照并广播最终状态
    pub async fn finish(&mut self) -> CounterState {
        let now = self.clock.now();
        self.counter
            .roll_over_if_needed(self.store.as_ref(), now)
            .await;

        match self.counter.persist(self.store.as_ref(), now).await {
            Ok(record) => info!(
                date = %record.date,
                daily_total = record.daily_total,
                occupancy = record.occupancy,
                "Final snapshot written"
            ),
            Err(e) => warn!(error = %e, "Final snapshot failed"),
        }

        self.counter.announce();
        self.counter.state().clone()
    }
}

/// 等待广播中心的下一个开关值；没有来源或来源已关闭时永远挂起
async fn next_hub_monitoring(source: &mut Option<watch::Receiver<Option<bool>>>) -> bool {
    loop {
        let Some(rx) = source.as_mut() else {
            return std::future::pending().await;
        };
        if rx.changed().await.is_err() {
            *source = None;
            continue;
        }
        let current = *rx.borrow_and_update();
        if let Some(on) = current {
            return on;
        }
    }
}
