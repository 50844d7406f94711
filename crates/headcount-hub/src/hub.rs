use headcount_core::metrics;
use headcount_types::{CountsMessage, InboundMessage};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;

/// 订阅者句柄，持有该订阅者的待发送队列
pub struct SubscriberHandle {
    id: Uuid,
    rx: mpsc::Receiver<String>,
}

impl SubscriberHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 下一条待发送消息；被移除后返回 None
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

struct HubState {
    subscribers: HashMap<Uuid, mpsc::Sender<String>>,
    latest: CountsMessage,
}

/// 广播中心
///
/// 所有投递都在同一把锁内用 `try_send` 完成，因此订阅者之间互不阻塞，
/// 每个订阅者看到的消息顺序与发布顺序一致。队列已满或已关闭的订阅者会被移除。
pub struct BroadcastHub {
    state: Mutex<HubState>,
    queue_capacity: usize,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self::with_latest(queue_capacity, CountsMessage::default())
    }

    pub fn with_latest(queue_capacity: usize, latest: CountsMessage) -> Self {
        Self {
            state: Mutex::new(HubState {
                subscribers: HashMap::new(),
                latest,
            }),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// 注册订阅者，并立即把最新状态放入它的队列
    pub async fn subscribe(&self) -> Result<SubscriberHandle> {
        self.subscribe_as(Uuid::new_v4()).await
    }

    /// 用调用方给定的 ID 注册订阅者，websocket 连接用它的连接 ID
    pub async fn subscribe_as(&self, id: Uuid) -> Result<SubscriberHandle> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let mut state = self.state.lock().await;
        let initial = state.latest.to_json()?;
        // 新建队列至少有一个空位
        let _ = tx.try_send(initial);
        state.subscribers.insert(id, tx);

        let count = state.subscribers.len();
        metrics::set_hub_subscribers(count);
        info!(connection_id = %id, subscribers = count, "Subscriber joined");

        Ok(SubscriberHandle { id, rx })
    }

    pub async fn unsubscribe(&self, id: &Uuid) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.subscribers.remove(id).is_some();
        if removed {
            let count = state.subscribers.len();
            metrics::set_hub_subscribers(count);
            info!(connection_id = %id, subscribers = count, "Subscriber left");
        }
        removed
    }

    /// 用新状态替换最新状态并推送给所有订阅者，返回成功投递的数量
    pub async fn publish(&self, message: CountsMessage) -> Result<usize> {
        let mut state = self.state.lock().await;
        state.latest = message;
        Self::deliver(&mut state)
    }

    /// 处理订阅者发来的文本消息
    ///
    /// 监控开关只由 `monitoringToggle` 修改，原始状态更新中的 `is_monitoring` 被忽略，
    /// 其余字段按字段合并。非法 JSON 返回错误且不广播，由调用方记录日志后丢弃。
    pub async fn handle_inbound(&self, text: &str) -> Result<usize> {
        let inbound = InboundMessage::parse(text)?;

        let mut state = self.state.lock().await;
        match inbound {
            InboundMessage::MonitoringToggle { is_monitoring } => {
                let next = is_monitoring.unwrap_or(!state.latest.is_monitoring);
                state.latest.is_monitoring = next;
                info!(is_monitoring = next, "Monitoring toggled");
            }
            InboundMessage::StateUpdate(mut patch) => {
                if let Some(ignored) = patch.is_monitoring.take() {
                    if ignored != state.latest.is_monitoring {
                        debug!(ignored, "State update carried a stale monitoring flag");
                    }
                }
                state.latest.merge(patch);
                debug!(
                    day_count = state.latest.day_count,
                    existing_count = state.latest.existing_count,
                    "State update received"
                );
            }
        }
        Self::deliver(&mut state)
    }

    pub async fn latest(&self) -> CountsMessage {
        self.state.lock().await.latest.clone()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    fn deliver(state: &mut HubState) -> Result<usize> {
        let payload = state.latest.to_json()?;

        let mut failed = Vec::new();
        for (id, tx) in state.subscribers.iter() {
            match tx.try_send(payload.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(connection_id = %id, "Subscriber queue full, removing");
                    failed.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection_id = %id, "Subscriber closed, removing");
                    failed.push(*id);
                }
            }
        }

        for id in &failed {
            state.subscribers.remove(id);
        }

        let delivered = state.subscribers.len();
        metrics::record_hub_broadcast();
        if !failed.is_empty() {
            metrics::record_hub_pruned(failed.len());
            metrics::set_hub_subscribers(delivered);
        }
        debug!(delivered, pruned = failed.len(), "Broadcast complete");

        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn counts(day_count: u64, existing_count: u64) -> CountsMessage {
        CountsMessage {
            day_count,
            existing_count,
            ..CountsMessage::default()
        }
    }

    async fn next(handle: &mut SubscriberHandle) -> CountsMessage {
        let text = timeout(Duration::from_secs(1), handle.recv())
            .await
            .expect("timeout")
            .expect("closed");
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let hub = BroadcastHub::new(8);
        let mut a = hub.subscribe().await.unwrap();
        let b = hub.subscribe().await.unwrap();
        let mut c = hub.subscribe().await.unwrap();
        drop(b);

        // 跳过初始状态
        next(&mut a).await;
        next(&mut c).await;

        let delivered = hub.publish(counts(3, 2)).await.unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(hub.subscriber_count().await, 2);
        assert_eq!(next(&mut a).await, counts(3, 2));
        assert_eq!(next(&mut c).await, counts(3, 2));
    }

    #[tokio::test]
    async fn test_late_joiner_receives_latest() {
        let hub = BroadcastHub::new(8);
        hub.publish(counts(5, 1)).await.unwrap();
        hub.publish(counts(6, 2)).await.unwrap();

        let mut late = hub.subscribe().await.unwrap();
        assert_eq!(next(&mut late).await, counts(6, 2));
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_new_hub_sends_zero_counts() {
        let hub = BroadcastHub::new(8);
        let mut handle = hub.subscribe().await.unwrap();
        assert_eq!(next(&mut handle).await, CountsMessage::default());
    }

    #[tokio::test]
    async fn test_per_subscriber_order() {
        let hub = BroadcastHub::new(32);
        let mut handle = hub.subscribe().await.unwrap();
        next(&mut handle).await;

        for i in 1..=10 {
            hub.publish(counts(i, i)).await.unwrap();
        }
        for i in 1..=10 {
            assert_eq!(next(&mut handle).await.day_count, i);
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_pruned() {
        let hub = BroadcastHub::new(2);
        let mut fast = hub.subscribe().await.unwrap();
        let _slow = hub.subscribe().await.unwrap();

        next(&mut fast).await;
        hub.publish(counts(1, 1)).await.unwrap();
        next(&mut fast).await;

        // 慢订阅者队列已满（初始状态 + 1 条）
        let delivered = hub.publish(counts(2, 2)).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(next(&mut fast).await, counts(2, 2));
    }

    #[tokio::test]
    async fn test_subscribe_as_uses_given_id() {
        let hub = BroadcastHub::new(8);
        let id = Uuid::new_v4();
        let handle = hub.subscribe_as(id).await.unwrap();
        assert_eq!(handle.id(), id);
        assert!(hub.unsubscribe(&id).await);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let hub = BroadcastHub::new(8);
        let handle = hub.subscribe().await.unwrap();
        assert!(hub.unsubscribe(&handle.id()).await);
        assert!(!hub.unsubscribe(&handle.id()).await);
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_state_update_is_merged_and_rebroadcast() {
        let hub = BroadcastHub::new(8);
        hub.publish(counts(10, 4)).await.unwrap();
        let mut handle = hub.subscribe().await.unwrap();
        next(&mut handle).await;

        hub.handle_inbound(r#"{"existing_count": 3, "matched_bus_stops": ["A"]}"#)
            .await
            .unwrap();

        let message = next(&mut handle).await;
        assert_eq!(message.day_count, 10);
        assert_eq!(message.existing_count, 3);
        assert!(message.matched_bus_stops.is_some());
    }

    #[tokio::test]
    async fn test_monitoring_toggle() {
        let hub = BroadcastHub::new(8);
        let mut handle = hub.subscribe().await.unwrap();
        next(&mut handle).await;

        hub.handle_inbound(r#"{"type": "monitoringToggle", "isMonitoring": true}"#)
            .await
            .unwrap();
        assert!(next(&mut handle).await.is_monitoring);

        // 未给出取值时翻转
        hub.handle_inbound(r#"{"type": "monitoringToggle"}"#)
            .await
            .unwrap();
        assert!(!next(&mut handle).await.is_monitoring);
    }

    #[tokio::test]
    async fn test_state_update_does_not_override_toggle() {
        let hub = BroadcastHub::new(8);
        let mut handle = hub.subscribe().await.unwrap();
        next(&mut handle).await;

        hub.handle_inbound(r#"{"type": "monitoringToggle", "isMonitoring": true}"#)
            .await
            .unwrap();
        next(&mut handle).await;

        hub.handle_inbound(r#"{"day_count": 1, "existing_count": 1, "is_monitoring": false}"#)
            .await
            .unwrap();

        let message = next(&mut handle).await;
        assert_eq!((message.day_count, message.existing_count), (1, 1));
        assert!(message.is_monitoring);
        assert!(hub.latest().await.is_monitoring);
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected_without_broadcast() {
        let hub = BroadcastHub::new(8);
        let mut handle = hub.subscribe().await.unwrap();
        next(&mut handle).await;

        assert!(hub.handle_inbound("not json").await.is_err());
        assert!(hub.handle_inbound("42").await.is_err());
        assert!(handle.try_recv().is_none());
        assert_eq!(hub.latest().await, CountsMessage::default());
    }
}
