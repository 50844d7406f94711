use futures_util::{Sink, SinkExt, StreamExt};
use headcount_config::PublisherConfig;
use headcount_core::metrics;
use headcount_shutdown::ShutdownListener;
use headcount_types::{CountsMessage, InboundMessage};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{PublishError, Result};

type HubStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 到广播中心的连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct PublisherOptions {
    pub url: String,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub outbox_capacity: usize,
    /// 每次连上后先发送最后一次状态
    pub resend_on_connect: bool,
}

impl From<&PublisherConfig> for PublisherOptions {
    fn from(config: &PublisherConfig) -> Self {
        Self {
            url: config.url.clone(),
            retry_delay: config.retry_delay(),
            connect_timeout: config.connect_timeout(),
            outbox_capacity: config.outbox_capacity,
            resend_on_connect: config.resend_on_connect,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Outgoing {
    Counts(CountsMessage),
    MonitoringToggle(bool),
}

impl Outgoing {
    fn to_text(&self) -> Result<String> {
        Ok(match self {
            Outgoing::Counts(message) => message.to_json()?,
            Outgoing::MonitoringToggle(on) => InboundMessage::toggle_json(*on),
        })
    }
}

/// 连上后需要补发的内容
#[derive(Debug, Default)]
struct Resend {
    counts: Option<CountsMessage>,
    /// 还没送达的本地监控开关
    toggle: Option<bool>,
}

/// 自动重连的发布端
///
/// `publish` 从不阻塞：未连接时直接丢弃，已连接时放入有界发送队列，
/// 队列满同样丢弃。连接由后台任务维护，断开后按固定间隔重试。
///
/// 监控开关归广播中心所有：本地切换以 `monitoringToggle` 消息发出，
/// 广播中心回传的开关值通过 [`hub_monitoring`](Self::hub_monitoring) 提供给计数端。
#[derive(Clone)]
pub struct ReconnectingPublisher {
    outbox: mpsc::Sender<Outgoing>,
    state: watch::Receiver<ConnectionState>,
    hub_monitoring: watch::Receiver<Option<bool>>,
    resend: Arc<Mutex<Resend>>,
}

enum SessionEnd {
    Shutdown,
    Lost(PublishError),
}

impl ReconnectingPublisher {
    /// 启动后台连接任务
    pub fn spawn(options: PublisherOptions, shutdown: ShutdownListener) -> (Self, JoinHandle<()>) {
        let (outbox_tx, outbox_rx) = mpsc::channel(options.outbox_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (monitoring_tx, monitoring_rx) = watch::channel(None);
        let resend = Arc::new(Mutex::new(Resend::default()));

        let task = tokio::spawn(connection_loop(
            options,
            outbox_rx,
            state_tx,
            monitoring_tx,
            resend.clone(),
            shutdown,
        ));

        (
            Self {
                outbox: outbox_tx,
                state: state_rx,
                hub_monitoring: monitoring_rx,
                resend,
            },
            task,
        )
    }

    /// 尽力发送；返回是否进入了发送队列
    pub fn publish(&self, message: CountsMessage) -> bool {
        if let Ok(mut resend) = self.resend.lock() {
            resend.counts = Some(message.clone());
        }
        self.enqueue(Outgoing::Counts(message))
    }

    /// 发送本地监控开关；未送达的开关会在下次连上后补发
    pub fn publish_monitoring(&self, on: bool) -> bool {
        if let Ok(mut resend) = self.resend.lock() {
            resend.toggle = Some(on);
        }
        self.enqueue(Outgoing::MonitoringToggle(on))
    }

    /// 广播中心当前的监控开关，连上并收到第一条广播之前为 None
    pub fn hub_monitoring(&self) -> watch::Receiver<Option<bool>> {
        self.hub_monitoring.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// 等待进入指定状态；后台任务结束时返回 false
    pub async fn wait_for_state(&self, wanted: ConnectionState) -> bool {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(|state| *state == wanted).await.is_ok();
        reached
    }

    fn enqueue(&self, outgoing: Outgoing) -> bool {
        if *self.state.borrow() != ConnectionState::Connected {
            metrics::record_publisher_dropped();
            debug!("Hub not connected, dropping message");
            return false;
        }

        match self.outbox.try_send(outgoing) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                metrics::record_publisher_dropped();
                warn!("Publisher outbox full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => {
                metrics::record_publisher_dropped();
                false
            }
        }
    }
}

async fn connection_loop(
    options: PublisherOptions,
    mut outbox: mpsc::Receiver<Outgoing>,
    state: watch::Sender<ConnectionState>,
    hub_monitoring: watch::Sender<Option<bool>>,
    resend: Arc<Mutex<Resend>>,
    mut shutdown: ShutdownListener,
) {
    info!(url = %options.url, "Publisher started");

    loop {
        if shutdown.is_triggered() {
            break;
        }

        state.send_replace(ConnectionState::Connecting);
        metrics::record_publisher_reconnect();
        debug!(url = %options.url, "Connecting to hub");

        let connected = tokio::select! {
            result = connect(&options) => result,
            _ = shutdown.wait() => break,
        };

        match connected {
            Ok(ws) => {
                info!(url = %options.url, "Connected to hub");
                state.send_replace(ConnectionState::Connected);

                let mut initial = Vec::new();
                if let Ok(pending) = resend.lock() {
                    if options.resend_on_connect {
                        if let Some(counts) = &pending.counts {
                            initial.push(Outgoing::Counts(counts.clone()));
                        }
                    }
                    if let Some(on) = pending.toggle {
                        initial.push(Outgoing::MonitoringToggle(on));
                    }
                }

                let mut session = Session {
                    outbox: &mut outbox,
                    hub_monitoring: &hub_monitoring,
                    resend: &resend,
                    expected_monitoring: None,
                };
                let end = session.run(ws, initial, &mut shutdown).await;
                state.send_replace(ConnectionState::Disconnected);

                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(e) => warn!(error = %e, "Hub connection lost"),
                }
            }
            Err(e) => {
                state.send_replace(ConnectionState::Disconnected);
                warn!(url = %options.url, error = %e, "Failed to connect to hub");
            }
        }

        // 断开期间不排队，丢掉残留的待发送消息
        while outbox.try_recv().is_ok() {
            metrics::record_publisher_dropped();
        }

        info!("Retrying hub connection in {:?}", options.retry_delay);
        tokio::select! {
            _ = sleep(options.retry_delay) => {}
            _ = shutdown.wait() => break,
        }
    }

    state.send_replace(ConnectionState::Disconnected);
    info!("Publisher stopped");
}

async fn connect(options: &PublisherOptions) -> Result<HubStream> {
    let (ws, _) = timeout(options.connect_timeout, connect_async(options.url.as_str()))
        .await
        .map_err(|_| PublishError::Timeout(options.connect_timeout))??;
    Ok(ws)
}

/// 一次连接期间的收发
struct Session<'a> {
    outbox: &'a mut mpsc::Receiver<Outgoing>,
    hub_monitoring: &'a watch::Sender<Option<bool>>,
    resend: &'a Mutex<Resend>,
    /// 已发出、还没在广播中看到生效的开关值
    expected_monitoring: Option<bool>,
}

impl Session<'_> {
    async fn run(
        &mut self,
        ws: HubStream,
        initial: Vec<Outgoing>,
        shutdown: &mut ShutdownListener,
    ) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        for outgoing in initial {
            if let Err(e) = self.send(&mut sink, &outgoing).await {
                return SessionEnd::Lost(e);
            }
            debug!(?outgoing, "Resent after connect");
        }

        loop {
            tokio::select! {
                next = self.outbox.recv() => match next {
                    Some(outgoing) => {
                        if let Err(e) = self.send(&mut sink, &outgoing).await {
                            return SessionEnd::Lost(e);
                        }
                    }
                    // 所有发布端句柄都已释放
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.observe_broadcast(&text),
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost(PublishError::Closed),
                    Some(Err(e)) => return SessionEnd::Lost(e.into()),
                    Some(Ok(_)) => {}
                },
                _ = shutdown.wait() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    async fn send<S>(&mut self, sink: &mut S, outgoing: &Outgoing) -> Result<()>
    where
        S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let text = outgoing.to_text()?;
        sink.send(Message::Text(text)).await?;

        if let Outgoing::MonitoringToggle(on) = outgoing {
            self.expected_monitoring = Some(*on);
            if let Ok(mut resend) = self.resend.lock() {
                if resend.toggle == Some(*on) {
                    resend.toggle = None;
                }
            }
        }
        Ok(())
    }

    /// 记录广播中的监控开关
    ///
    /// 自己发出的开关生效之前，广播里的旧值不会覆盖本地。
    fn observe_broadcast(&mut self, text: &str) {
        let Ok(message) = serde_json::from_str::<CountsMessage>(text) else {
            debug!("Ignoring non-counts message from hub");
            return;
        };
        let on = message.is_monitoring;

        match self.expected_monitoring {
            Some(expected) if expected != on => return,
            Some(_) => self.expected_monitoring = None,
            None => {}
        }

        self.hub_monitoring.send_if_modified(|current| {
            if *current == Some(on) {
                false
            } else {
                *current = Some(on);
                true
            }
        });
    }
}
