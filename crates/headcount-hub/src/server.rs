use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use headcount_shutdown::{ConnectionGuard, ConnectionTracker, ShutdownListener};
use headcount_types::CountsMessage;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{HubError, Result};
use crate::hub::BroadcastHub;

/// 关闭时等待 websocket 连接退出的上限
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub tracker: ConnectionTracker,
    pub ping_interval: Duration,
    pub shutdown: ShutdownListener,
}

impl AppState {
    pub fn new(hub: Arc<BroadcastHub>, ping_interval: Duration, shutdown: ShutdownListener) -> Self {
        Self {
            hub,
            tracker: ConnectionTracker::new(DRAIN_TIMEOUT),
            ping_interval,
            shutdown,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .route("/api/v1/counts", get(get_counts))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn get_counts(State(state): State<AppState>) -> Json<CountsMessage> {
    Json(state.hub.latest().await)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let Some(guard) = state.tracker.acquire() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, guard))
}

/// 单个 websocket 连接：转发广播、处理入站消息、定期 ping
async fn handle_socket(socket: WebSocket, state: AppState, guard: ConnectionGuard) {
    let mut handle = match state.hub.subscribe_as(guard.id()).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(error = %e, "Failed to register subscriber");
            return;
        }
    };
    let conn_id = handle.id();
    let (mut sender, mut receiver) = socket.split();
    let mut shutdown = state.shutdown.clone();

    let mut ping = interval(state.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            outgoing = handle.recv() => match outgoing {
                Some(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        debug!(connection_id = %conn_id, "Send failed");
                        break;
                    }
                }
                // 已被广播中心移除
                None => break,
            },
            incoming = receiver.next() => {
                last_seen = Instant::now();
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = state.hub.handle_inbound(&text).await {
                            warn!(connection_id = %conn_id, error = %e, "Dropping malformed message");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection_id = %conn_id, "Client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if last_seen.elapsed() > state.ping_interval * 2 {
                    warn!(connection_id = %conn_id, "Ping timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            _ = shutdown.wait() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.hub.unsubscribe(&conn_id).await;
}

/// 已绑定端口、尚未开始服务的广播服务器
pub struct HubServer {
    listener: TcpListener,
    state: AppState,
}

impl HubServer {
    pub fn bind(
        addr: &str,
        hub: Arc<BroadcastHub>,
        ping_interval: Duration,
        shutdown: ShutdownListener,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            state: AppState::new(hub, ping_interval, shutdown),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 运行直到收到关闭信号，然后等待 websocket 连接退出
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        let tracker = self.state.tracker.clone();
        let mut shutdown = self.state.shutdown.clone();
        let app = create_router(self.state);

        info!("Hub listening on ws://{}", addr);

        axum::Server::from_tcp(self.listener)
            .map_err(|e| HubError::Server(e.to_string()))?
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
            })
            .await
            .map_err(|e| HubError::Server(e.to_string()))?;

        tracker.drain().await;
        info!("Hub stopped");
        Ok(())
    }
}
