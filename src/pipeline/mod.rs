// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 摄像头处理流水线 (Camera Pipeline)
///
/// 每个摄像头一个采集线程, 通过单槽通道与推流连接通信:
/// - Worker:  采集 → 缩放 → 检测 → 标注 → FrameChannel / EventChannel
/// - Session: 通道与生命周期状态, 推流连接只读
pub mod session;
pub mod worker;

pub use session::{CameraRegistry, CameraSession, CameraState, SessionStatus};
pub use worker::{spawn_camera, CameraWorker, FrameReport, WorkerContext, WorkerSettings};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::CameraId;

// ========== 事件类型定义 ==========

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Alert,
    Offline,
}

/// 告警事件 (采集线程 → EventChannel → 推流连接)
#[derive(Clone, Debug)]
pub struct AlertEvent {
    pub camera_id: CameraId,
    pub kind: EventKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn alert(camera_id: CameraId, label: &str) -> Self {
        Self {
            camera_id,
            kind: EventKind::Alert,
            message: format!("{label} detected on camera {camera_id}"),
            created_at: Utc::now(),
        }
    }

    pub fn offline(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            kind: EventKind::Offline,
            message: format!("Camera {camera_id} offline"),
            created_at: Utc::now(),
        }
    }
}
