// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 错误类型 (Error taxonomy)
//!
//! 每种错误只影响所属的摄像头或连接:
//! - DeviceOpen:    该摄像头 → Failed, 其他摄像头不受影响
//! - DeviceRead:    瞬时错误, 连续失败超过上限后升级为致命
//! - Inference:     视为本帧无检测结果, 流水线继续
//! - AlarmPlayback: 仅记录日志, 不向调用方传播
//! - ClientWrite:   关闭该客户端连接

use crate::CameraId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("camera {camera}: failed to open device: {reason}")]
    DeviceOpen { camera: CameraId, reason: String },

    #[error("camera {camera}: failed to read frame: {reason}")]
    DeviceRead { camera: CameraId, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("alarm playback failed: {0}")]
    AlarmPlayback(String),

    #[error("client write failed: {0}")]
    ClientWrite(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("encode error: {0}")]
    Encode(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    pub fn device_open(camera: CameraId, reason: impl ToString) -> Self {
        MonitorError::DeviceOpen {
            camera,
            reason: reason.to_string(),
        }
    }

    pub fn device_read(camera: CameraId, reason: impl ToString) -> Self {
        MonitorError::DeviceRead {
            camera,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;
