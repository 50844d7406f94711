use headcount_types::{CounterState, CountsMessage, EventKind};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

/// 状态变更的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Increment,
    Decrement,
    /// 跨日，当日累计清零
    Rollover,
    /// 本地监控开关变化
    Monitoring,
    /// 监控开关从广播中心同步而来，不再回传
    MonitoringSynced,
    /// 启动或关闭时重新广播完整状态
    Resync,
}

/// 计数器发出的一次状态变更，总是携带完整状态而不是增量
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub kind: TransitionKind,
    pub state: CounterState,
    pub is_monitoring: bool,
}

impl Transition {
    /// 只有增减会写入事件日志
    pub fn event_kind(&self) -> Option<EventKind> {
        match self.kind {
            TransitionKind::Increment => Some(EventKind::Increment),
            TransitionKind::Decrement => Some(EventKind::Decrement),
            _ => None,
        }
    }

    pub fn to_message(&self) -> CountsMessage {
        CountsMessage::from_state(&self.state, self.is_monitoring)
    }
}

/// 状态变更总线
///
/// 广播订阅者落后时会丢掉中间的变更，只适合关心最新状态的消费者。
/// 需要逐条记录的消费者使用 [`subscribe_journal`](Self::subscribe_journal)，
/// 它得到一个无界的有序队列，不会丢消息。
pub struct TransitionBus {
    sender: broadcast::Sender<Transition>,
    journals: Mutex<Vec<mpsc::UnboundedSender<Transition>>>,
}

impl TransitionBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            journals: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.sender.subscribe()
    }

    /// 不丢消息的有序订阅，总线销毁后队列关闭
    pub fn subscribe_journal(&self) -> mpsc::UnboundedReceiver<Transition> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut journals) = self.journals.lock() {
            journals.push(tx);
        }
        rx
    }

    /// 发布一次变更，返回收到它的订阅者数量
    pub fn publish(
        &self,
        transition: Transition,
    ) -> Result<usize, broadcast::error::SendError<Transition>> {
        let mut journaled = 0;
        if let Ok(mut journals) = self.journals.lock() {
            journals.retain(|tx| tx.send(transition.clone()).is_ok());
            journaled = journals.len();
        }

        match self.sender.send(transition) {
            Ok(received) => Ok(received + journaled),
            Err(_) if journaled > 0 => Ok(journaled),
            Err(e) => Err(e),
        }
    }
}

pub type SharedTransitionBus = Arc<TransitionBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use tokio::time::{timeout, Duration};

    fn transition(kind: TransitionKind, daily_total: u64, occupancy: u64) -> Transition {
        Transition {
            kind,
            state: CounterState::new(daily_total, occupancy, Local::now()),
            is_monitoring: false,
        }
    }

    #[tokio::test]
    async fn test_bus_publish_subscribe() {
        let bus = TransitionBus::new(10);
        let mut rx = bus.subscribe();

        let result = bus.publish(transition(TransitionKind::Increment, 1, 1));
        assert_eq!(result.unwrap(), 1);

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("Timeout waiting for transition")
            .expect("Failed to receive transition");
        assert_eq!(received.kind, TransitionKind::Increment);
        assert_eq!(received.state.daily_total, 1);
    }

    #[tokio::test]
    async fn test_bus_multiple_subscribers_keep_order() {
        let bus = TransitionBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(transition(TransitionKind::Increment, 1, 1)).unwrap();
        bus.publish(transition(TransitionKind::Increment, 2, 2)).unwrap();
        bus.publish(transition(TransitionKind::Decrement, 2, 1)).unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let occupancies: Vec<u64> = vec![
                rx.recv().await.unwrap().state.occupancy,
                rx.recv().await.unwrap().state.occupancy,
                rx.recv().await.unwrap().state.occupancy,
            ];
            assert_eq!(occupancies, vec![1, 2, 1]);
        }
    }

    #[tokio::test]
    async fn test_bus_no_subscribers() {
        let bus = TransitionBus::new(10);
        assert!(bus.publish(transition(TransitionKind::Resync, 0, 0)).is_err());
    }

    #[tokio::test]
    async fn test_bus_lagged_receiver_catches_up_with_full_state() {
        let bus = TransitionBus::new(2);
        let mut rx = bus.subscribe();

        bus.publish(transition(TransitionKind::Increment, 1, 1)).unwrap();
        bus.publish(transition(TransitionKind::Increment, 2, 2)).unwrap();
        bus.publish(transition(TransitionKind::Increment, 3, 3)).unwrap();

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert_eq!(n, 1),
            other => panic!("Expected Lagged error, got {:?}", other),
        }

        assert_eq!(rx.recv().await.unwrap().state.daily_total, 2);
        assert_eq!(rx.recv().await.unwrap().state.daily_total, 3);
    }

    #[tokio::test]
    async fn test_journal_keeps_every_transition_beyond_capacity() {
        let bus = TransitionBus::new(2);
        let mut journal = bus.subscribe_journal();
        let _lagging = bus.subscribe();

        for n in 1..=50 {
            bus.publish(transition(TransitionKind::Increment, n, n)).unwrap();
        }
        drop(bus);

        let mut totals = Vec::new();
        while let Some(t) = journal.recv().await {
            totals.push(t.state.daily_total);
        }
        assert_eq!(totals, (1..=50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_journal_only_counts_as_subscriber() {
        let bus = TransitionBus::new(4);
        let journal = bus.subscribe_journal();
        assert_eq!(bus.publish(transition(TransitionKind::Resync, 0, 0)).unwrap(), 1);

        drop(journal);
        assert!(bus.publish(transition(TransitionKind::Resync, 0, 0)).is_err());
    }

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(
            transition(TransitionKind::Increment, 1, 1).event_kind(),
            Some(EventKind::Increment)
        );
        assert_eq!(
            transition(TransitionKind::Decrement, 1, 0).event_kind(),
            Some(EventKind::Decrement)
        );
        assert_eq!(transition(TransitionKind::Rollover, 0, 0).event_kind(), None);
        assert_eq!(
            transition(TransitionKind::MonitoringSynced, 0, 0).event_kind(),
            None
        );
    }
}
