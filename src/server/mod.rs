// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 推流服务 (StreamServer)
//!
//! 每个连接独立的投递循环, 按固定间隔从摄像头单槽通道取值并写出:
//! - `/video/live/{cam_id}`: 二进制 JPEG
//! - `/event/live/{cam_id}`: 文本 JSON 告警
//! - `/status`: 各摄像头状态与通道计数
//!
//! 同一摄像头的多个连接竞争同一个槽位, 每帧只会被其中一个连接取走。

pub mod codec;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::pipeline::{CameraRegistry, CameraSession};
use crate::CameraId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChannelKind {
    Video,
    Event,
}

/// 连接状态: Connected → Streaming → Closed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionState {
    Connected,
    Streaming,
    Closed,
}

struct ServerState {
    registry: CameraRegistry,
    interval: Duration,
    jpeg_quality: u8,
    shutdown: watch::Receiver<bool>,
}

pub struct StreamServer {
    state: Arc<ServerState>,
}

impl StreamServer {
    /// `shutdown` 置为 true 时停止接受连接并关闭全部现有连接
    pub fn new(
        registry: CameraRegistry,
        interval: Duration,
        jpeg_quality: u8,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            state: Arc::new(ServerState {
                registry,
                interval,
                jpeg_quality,
                shutdown,
            }),
        }
    }

    pub fn from_config(
        config: &MonitorConfig,
        registry: CameraRegistry,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self::new(registry, config.stream_interval(), config.jpeg_quality, shutdown)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/video/live/:cam_id", get(video_live))
            .route("/event/live/:cam_id", get(event_live))
            .route("/status", get(status))
            .with_state(Arc::clone(&self.state))
    }

    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown = self.state.shutdown.clone();
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "stream server listening");
        }
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
    }
}

async fn video_live(
    ws: Option<WebSocketUpgrade>,
    Path(cam_id): Path<String>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    upgrade(ws, &cam_id, client, state, ChannelKind::Video)
}

async fn event_live(
    ws: Option<WebSocketUpgrade>,
    Path(cam_id): Path<String>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    upgrade(ws, &cam_id, client, state, ChannelKind::Event)
}

async fn status(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.registry.status())
}

fn upgrade(
    ws: Option<WebSocketUpgrade>,
    cam_id: &str,
    client: SocketAddr,
    state: Arc<ServerState>,
    kind: ChannelKind,
) -> Response {
    // 未知摄像头在升级前返回 404
    let Some(session) = cam_id
        .parse::<CameraId>()
        .ok()
        .and_then(|id| state.registry.get(id))
    else {
        debug!(%client, cam_id, "unknown camera requested");
        return (StatusCode::NOT_FOUND, format!("unknown camera {cam_id}")).into_response();
    };
    let Some(ws) = ws else {
        return (StatusCode::BAD_REQUEST, "websocket upgrade required").into_response();
    };
    ws.on_upgrade(move |socket| deliver(socket, session, state, client, kind))
}

/// 单个连接的投递循环
async fn deliver(
    socket: WebSocket,
    session: Arc<CameraSession>,
    state: Arc<ServerState>,
    client: SocketAddr,
    kind: ChannelKind,
) {
    let camera = session.id();
    let (mut sender, mut receiver) = socket.split();
    let mut shutdown = state.shutdown.clone();
    let mut ticker = tokio::time::interval(state.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut conn = ConnectionState::Connected;
    info!(camera, %client, ?kind, "client connected");
    let mut sent = 0u64;

    while !*shutdown.borrow() {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(message) = next_message(&session, kind, state.jpeg_quality).await else {
                    continue;
                };
                if let Err(e) = sender.send(message).await {
                    let e = MonitorError::ClientWrite(e.to_string());
                    warn!(camera, %client, "{}", e);
                    break;
                }
                sent += 1;
                if conn == ConnectionState::Connected {
                    conn = ConnectionState::Streaming;
                    debug!(camera, %client, ?conn, "first message delivered");
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(camera, %client, "receive error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = shutdown.changed() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    conn = ConnectionState::Closed;
    info!(camera, %client, ?kind, ?conn, sent, "client disconnected");
}

/// 取出并编码当前值; 槽位为空时返回 None
///
/// JPEG 编码在阻塞线程池执行, 不占用 tokio 工作线程
async fn next_message(
    session: &CameraSession,
    kind: ChannelKind,
    jpeg_quality: u8,
) -> Option<Message> {
    let camera = session.id();
    let encoded = match kind {
        ChannelKind::Video => {
            let frame = session.frames().try_take()?;
            let encoding =
                tokio::task::spawn_blocking(move || codec::encode_jpeg(&frame.image, jpeg_quality));
            match encoding.await {
                Ok(jpeg) => jpeg.map(Message::Binary),
                Err(e) => {
                    warn!(camera, "encode task failed: {}", e);
                    return None;
                }
            }
        }
        ChannelKind::Event => {
            let event = session.events().try_take()?;
            codec::encode_event(&event).map(Message::Text)
        }
    };
    match encoded {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(camera, "encode failed: {}", e);
            None
        }
    }
}
