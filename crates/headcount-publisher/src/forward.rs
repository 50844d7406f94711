use headcount_core::{Transition, TransitionKind};
use headcount_shutdown::ShutdownListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::publisher::ReconnectingPublisher;

/// 把计数器的状态变更转发给发布端，直到总线关闭或收到关闭信号
pub async fn run_forwarder(
    publisher: ReconnectingPublisher,
    mut rx: broadcast::Receiver<Transition>,
    mut shutdown: ShutdownListener,
) {
    info!("Transition forwarder started");

    loop {
        tokio::select! {
            result = rx.recv() => match result {
                Ok(transition) => forward(&publisher, &transition),
                // 只有最新状态有意义，落后时继续处理后面的
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Forwarder lagged behind the transition bus");
                }
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.wait() => {
                // 把最终状态交给发布端
                while let Ok(transition) = rx.try_recv() {
                    forward(&publisher, &transition);
                }
                break;
            }
        }
    }

    info!("Transition forwarder stopped");
}

fn forward(publisher: &ReconnectingPublisher, transition: &Transition) {
    let sent = match transition.kind {
        TransitionKind::Monitoring => publisher.publish_monitoring(transition.is_monitoring),
        // 来自广播中心的开关不再回传
        TransitionKind::MonitoringSynced => return,
        _ => publisher.publish(transition.to_message()),
    };
    debug!(kind = ?transition.kind, sent, "Transition forwarded");
}
