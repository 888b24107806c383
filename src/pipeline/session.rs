// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 摄像头会话 (CameraSession)
//!
//! 持有单槽通道与生命周期状态: `Starting → Running → Stopped | Failed`。
//! 采集设备由采集线程独占, 不放在会话中。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use super::AlertEvent;
use crate::channel::{EventChannel, FrameChannel};
use crate::detection::Frame;
use crate::CameraId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
    Starting,
    Running,
    Stopped,
    Failed,
}

impl CameraState {
    fn can_enter(self, next: CameraState) -> bool {
        use CameraState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Failed)
                | (Starting, Stopped)
                | (Running, Stopped)
                | (Running, Failed)
        )
    }
}

/// `/status` 输出
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStatus {
    pub id: CameraId,
    pub state: CameraState,
    pub frames_published: u64,
    pub frames_dropped: u64,
    pub events_published: u64,
}

pub struct CameraSession {
    id: CameraId,
    frames: FrameChannel<Frame>,
    events: EventChannel<AlertEvent>,
    state: Mutex<CameraState>,
    stop: AtomicBool,
}

impl CameraSession {
    pub fn new(id: CameraId) -> Self {
        Self {
            id,
            frames: FrameChannel::new(),
            events: EventChannel::new(),
            state: Mutex::new(CameraState::Starting),
            stop: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> CameraId {
        self.id
    }

    pub fn frames(&self) -> &FrameChannel<Frame> {
        &self.frames
    }

    pub fn events(&self) -> &EventChannel<AlertEvent> {
        &self.events
    }

    pub fn state(&self) -> CameraState {
        *self.state.lock()
    }

    /// 状态迁移; 非法迁移被忽略并返回 None, 成功时返回原状态
    pub fn transition(&self, next: CameraState) -> Option<CameraState> {
        let mut state = self.state.lock();
        let previous = *state;
        if !previous.can_enter(next) {
            if previous != next {
                warn!(camera = self.id, ?previous, ?next, "invalid state transition ignored");
            }
            return None;
        }
        *state = next;
        drop(state);
        info!(camera = self.id, ?previous, ?next, "camera state changed");
        Some(previous)
    }

    /// 请求采集线程在当前帧结束后退出
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SessionStatus {
        let frames = self.frames.stats();
        SessionStatus {
            id: self.id,
            state: self.state(),
            frames_published: frames.published,
            frames_dropped: frames.discarded,
            events_published: self.events.stats().published,
        }
    }
}

/// 全部摄像头会话, 启动时创建, 之后只读
#[derive(Clone, Default)]
pub struct CameraRegistry {
    sessions: HashMap<CameraId, Arc<CameraSession>>,
}

impl CameraRegistry {
    pub fn new(ids: impl IntoIterator<Item = CameraId>) -> Self {
        Self {
            sessions: ids
                .into_iter()
                .map(|id| (id, Arc::new(CameraSession::new(id))))
                .collect(),
        }
    }

    pub fn get(&self, id: CameraId) -> Option<Arc<CameraSession>> {
        self.sessions.get(&id).cloned()
    }

    /// 按摄像头ID排序
    pub fn status(&self) -> Vec<SessionStatus> {
        let mut status: Vec<_> = self.sessions.values().map(|s| s.status()).collect();
        status.sort_by_key(|s| s.id);
        status
    }

    pub fn stop_all(&self) {
        for session in self.sessions.values() {
            session.request_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let session = CameraSession::new(1);
        assert_eq!(session.state(), CameraState::Starting);
        assert_eq!(session.transition(CameraState::Running), Some(CameraState::Starting));
        assert_eq!(session.transition(CameraState::Starting), None);
        assert_eq!(session.transition(CameraState::Failed), Some(CameraState::Running));

        // 终态不可离开
        assert_eq!(session.transition(CameraState::Running), None);
        assert_eq!(session.transition(CameraState::Stopped), None);
        assert_eq!(session.state(), CameraState::Failed);
    }

    #[test]
    fn test_open_failure_goes_straight_to_failed() {
        let session = CameraSession::new(0);
        assert_eq!(session.transition(CameraState::Failed), Some(CameraState::Starting));
        assert_eq!(session.state(), CameraState::Failed);
    }

    #[test]
    fn test_status_reflects_channel_counters() {
        let session = CameraSession::new(4);
        for seq in 0..2 {
            let frame = Frame::new(4, seq, image::RgbImage::new(2, 2));
            session.frames().publish(frame);
        }
        session.events().publish(AlertEvent::alert(4, "Knife"));

        let status = session.status();
        assert_eq!(status.frames_published, 2);
        assert_eq!(status.frames_dropped, 1);
        assert_eq!(status.events_published, 1);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "starting");
        assert_eq!(json["id"], 4);
    }

    #[test]
    fn test_registry_lookup_and_stop() {
        let registry = CameraRegistry::new([1, 0]);
        assert_eq!(registry.status().len(), 2);
        assert!(registry.get(2).is_none());
        assert_eq!(
            registry.status().iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![0, 1]
        );

        registry.stop_all();
        assert!(registry.get(0).unwrap().stop_requested());
        assert!(registry.get(1).unwrap().stop_requested());
    }
}
