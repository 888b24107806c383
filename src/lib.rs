// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod alarm; // 报警播放
pub mod annotator; // 检测结果标注
pub mod channel; // 单槽交接通道
pub mod config; // 运行配置
pub mod detection; // 智能检测系统
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod pipeline; // 摄像头处理流水线
pub mod server; // 推流服务

/// 摄像头ID (本地设备索引或配置中的编号)
pub type CameraId = u32;

pub use crate::alarm::{AlarmPlayer, AudioBackend, CommandBackend};
pub use crate::annotator::{Annotator, LabelPolicy};
pub use crate::channel::{EventChannel, FrameChannel, SlotStats};
pub use crate::config::{Args, CameraConfig, DetectorConfig, MonitorConfig};
pub use crate::error::{MonitorError, Result};
pub use crate::input::{open_device, CaptureDevice};
pub use crate::pipeline::{AlertEvent, CameraRegistry, CameraSession, CameraState, EventKind};
pub use crate::server::StreamServer;
