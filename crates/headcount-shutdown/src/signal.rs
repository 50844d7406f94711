use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// 关闭信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM - 优雅关闭
    Term,

    /// SIGINT - Ctrl+C
    Interrupt,

    /// 手动触发，或输入结束
    Manual,
}

/// 信号处理器
///
/// 信号只会触发一次；晚于触发订阅的监听者也能立即看到结果。
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_tx: Arc<watch::Sender<Option<ShutdownSignal>>>,
}

impl SignalHandler {
    pub fn new() -> (Self, ShutdownListener) {
        let (tx, rx) = watch::channel(None);
        (
            Self {
                shutdown_tx: Arc::new(tx),
            },
            ShutdownListener { rx },
        )
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    pub fn trigger(&self, signal: ShutdownSignal) {
        // 只保留第一次的信号
        let first = self.shutdown_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(signal);
                true
            } else {
                false
            }
        });
        if first {
            info!("Shutdown triggered: {:?}", signal);
        }
    }

    /// 手动触发关闭
    pub fn trigger_shutdown(&self) {
        self.trigger(ShutdownSignal::Manual);
    }

    pub fn is_triggered(&self) -> bool {
        self.shutdown_tx.borrow().is_some()
    }

    /// 等待系统信号并广播
    #[cfg(unix)]
    pub async fn listen_for_system_signals(&self) -> ShutdownSignal {
        use signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return self.subscribe().wait().await;
            }
        };

        let mut listener = self.subscribe();
        let received = tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                ShutdownSignal::Term
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
                ShutdownSignal::Interrupt
            }
            signal = listener.wait() => return signal,
        };
        self.trigger(received);
        received
    }

    /// 等待系统信号（Windows 版本）
    #[cfg(not(unix))]
    pub async fn listen_for_system_signals(&self) -> ShutdownSignal {
        let mut listener = self.subscribe();
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    return self.subscribe().wait().await;
                }
                info!("Received Ctrl+C");
                self.trigger(ShutdownSignal::Interrupt);
                ShutdownSignal::Interrupt
            }
            signal = listener.wait() => signal,
        }
    }
}

/// 关闭信号监听者
#[derive(Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownListener {
    /// 等待关闭信号；处理器全部销毁后永远不会返回
    pub async fn wait(&mut self) -> ShutdownSignal {
        loop {
            if let Some(signal) = *self.rx.borrow_and_update() {
                return signal;
            }
            if self.rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.borrow().is_some()
    }
}
