use anyhow::Result;
use headcount_config::AppConfig;
use headcount_core::{seed_state, Clock, Counter, SnapshotStore, SystemClock, TransitionBus};
use headcount_publisher::{run_forwarder, ReconnectingPublisher};
use headcount_shutdown::{ShutdownListener, SignalHandler};
use headcount_storage::{run_event_log, CsvEventLog, CsvSnapshotStore};
use headcount_types::CounterState;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufRead;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::pipeline::CountingPipeline;

/// 发布端把最后的状态发出去的等待上限
const PUBLISH_GRACE: Duration = Duration::from_secs(2);

/// 运行计数进程直到输入结束或收到关闭信号，返回最终状态
pub async fn run<R>(config: &AppConfig, input: R, shutdown: ShutdownListener) -> Result<CounterState>
where
    R: AsyncBufRead + Unpin,
{
    run_with_clock(config, input, shutdown, Arc::new(SystemClock)).await
}

pub async fn run_with_clock<R>(
    config: &AppConfig,
    input: R,
    shutdown: ShutdownListener,
    clock: Arc<dyn Clock>,
) -> Result<CounterState>
where
    R: AsyncBufRead + Unpin,
{
    let store: Arc<dyn SnapshotStore> =
        Arc::new(CsvSnapshotStore::new(&config.storage.snapshot_path));
    let initial = seed_state(store.as_ref(), clock.now()).await;

    // 后台任务单独关闭，保证流水线的最终状态先写完、发完
    let (background, background_shutdown) = SignalHandler::new();
    let bus = Arc::new(TransitionBus::new(config.eventbus.capacity));

    // 事件日志要求逐条记录，使用不丢消息的 journal 订阅
    let event_log = tokio::spawn(run_event_log(
        CsvEventLog::new(&config.storage.event_log_path),
        bus.subscribe_journal(),
        background_shutdown.clone(),
    ));

    let (publishing, hub_monitoring) = if config.publisher.enabled {
        let (publisher, publisher_task) = ReconnectingPublisher::spawn(
            (&config.publisher).into(),
            background_shutdown.clone(),
        );
        let hub_monitoring = publisher.hub_monitoring();
        let forwarder = tokio::spawn(run_forwarder(
            publisher,
            bus.subscribe(),
            background_shutdown.clone(),
        ));
        (Some((forwarder, publisher_task)), Some(hub_monitoring))
    } else {
        info!("Publisher disabled, counts stay local");
        (None, None)
    };

    let counter = Counter::new(initial, bus);
    let mut pipeline = CountingPipeline::new(
        config.counting.track_store(),
        counter,
        clock,
        store,
        config.rollover.check_interval(),
    );
    if let Some(hub_monitoring) = hub_monitoring {
        pipeline = pipeline.with_hub_monitoring(hub_monitoring);
    }

    // 流水线结束时释放总线，事件日志和转发任务读完剩余变更后退出
    let final_state = pipeline.run(input, shutdown).await;

    if let Err(e) = event_log.await {
        warn!(error = %e, "Event log writer panicked");
    }

    if let Some((forwarder, mut publisher_task)) = publishing {
        if let Err(e) = forwarder.await {
            warn!(error = %e, "Forwarder panicked");
        }
        // 已连接时发布端发完队列后自行退出；未连接则直接停止重试
        if timeout(PUBLISH_GRACE, &mut publisher_task).await.is_err() {
            background.trigger_shutdown();
            if let Err(e) = publisher_task.await {
                warn!(error = %e, "Publisher panicked");
            }
        }
    }
    background.trigger_shutdown();

    info!(
        daily_total = final_state.daily_total,
        occupancy = final_state.occupancy,
        "Counting stopped"
    );
    Ok(final_state)
}
