use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct Registry {
    /// 连接 ID 到建立时间
    connections: Mutex<HashMap<Uuid, Instant>>,
    is_shutting_down: AtomicBool,
    released: Notify,
}

impl Registry {
    fn connections(&self) -> MutexGuard<'_, HashMap<Uuid, Instant>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 订阅连接登记表
///
/// 每个连接分配一个 ID，同一个 ID 也用作广播中心的订阅者 ID，
/// 关闭时按 ID 报告仍未退出的连接。
#[derive(Clone)]
pub struct ConnectionTracker {
    registry: Arc<Registry>,
    max_drain_duration: Duration,
}

impl ConnectionTracker {
    pub fn new(max_drain_duration: Duration) -> Self {
        Self {
            registry: Arc::new(Registry {
                connections: Mutex::new(HashMap::new()),
                is_shutting_down: AtomicBool::new(false),
                released: Notify::new(),
            }),
            max_drain_duration,
        }
    }

    /// 登记一个新连接，关闭期间拒绝
    pub fn acquire(&self) -> Option<ConnectionGuard> {
        if self.registry.is_shutting_down.load(Ordering::SeqCst) {
            debug!("Rejecting new connection: shutting down");
            return None;
        }

        let id = Uuid::new_v4();
        let active = {
            let mut connections = self.registry.connections();
            connections.insert(id, Instant::now());
            connections.len()
        };
        debug!(connection_id = %id, active, "Connection registered");

        Some(ConnectionGuard {
            id,
            registry: self.registry.clone(),
        })
    }

    pub fn active_count(&self) -> usize {
        self.registry.connections().len()
    }

    /// 仍在线的连接，按建立时间排序
    pub fn active_ids(&self) -> Vec<Uuid> {
        let mut open: Vec<(Uuid, Instant)> = self
            .registry
            .connections()
            .iter()
            .map(|(id, opened)| (*id, *opened))
            .collect();
        open.sort_by_key(|(_, opened)| *opened);
        open.into_iter().map(|(id, _)| id).collect()
    }

    /// 停止接受新连接并等待现有连接退出，超过上限后放弃
    pub async fn drain(&self) {
        self.registry.is_shutting_down.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + self.max_drain_duration;
        info!(active = self.active_count(), "Draining subscriber connections");

        loop {
            // 先注册等待再检查，避免错过释放通知
            let released = self.registry.released.notified();
            let remaining = self.active_count();
            if remaining == 0 {
                info!("All connections drained");
                return;
            }
            debug!(remaining, "Waiting for connections to close");

            if tokio::time::timeout_at(deadline, released).await.is_err() {
                let now = Instant::now();
                for (id, opened) in self.registry.connections().iter() {
                    warn!(
                        connection_id = %id,
                        open_for = ?now.duration_since(*opened),
                        "Connection still open after drain timeout"
                    );
                }
                warn!(
                    remaining = self.active_count(),
                    "Drain timeout after {:?}",
                    self.max_drain_duration
                );
                return;
            }
        }
    }
}

/// 连接守卫，drop 时注销并唤醒排空等待
pub struct ConnectionGuard {
    id: Uuid,
    registry: Arc<Registry>,
}

impl ConnectionGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let opened = self.registry.connections().remove(&self.id);
        if let Some(opened) = opened {
            debug!(
                connection_id = %self.id,
                open_for = ?opened.elapsed(),
                "Connection released"
            );
        }
        self.registry.released.notify_waiters();
    }
}
