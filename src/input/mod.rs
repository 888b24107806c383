// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频采集 (Capture devices)
///
/// 每个摄像头一个独占设备, 由采集线程持有:
/// - FfmpegDevice: 本地摄像头 (DirectShow/AVFoundation/V4L2) 与 RTSP 流 (需 `ffmpeg` 特性)
/// - StillImageDevice: 图片文件或目录, 按帧率循环回放
#[cfg(feature = "ffmpeg")]
pub mod camera;
pub mod still;

#[cfg(feature = "ffmpeg")]
pub use camera::FfmpegDevice;
pub use still::StillImageDevice;

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::RgbImage;

use crate::config::CameraConfig;
use crate::error::{MonitorError, Result};
use crate::CameraId;

/// 帧来源; 读取失败返回 `DeviceRead`, 丢弃即释放设备
pub trait CaptureDevice: Send {
    fn read_frame(&mut self) -> Result<RgbImage>;
}

/// 采集源类型
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// 本地设备索引
    Local(u32),
    /// 网络流 (rtsp/rtmp/http)
    Stream(String),
    /// 视频文件
    VideoFile(PathBuf),
    /// 单张图片或图片目录
    Images(PathBuf),
}

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "webp", "tif"];
const STREAM_SCHEMES: [&str; 5] = ["rtsp://", "rtsps://", "rtmp://", "http://", "https://"];

pub(crate) fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl SourceKind {
    pub fn classify(config: &CameraConfig) -> Result<Self> {
        let Some(source) = config.source.as_deref() else {
            return Ok(SourceKind::Local(config.id));
        };
        if STREAM_SCHEMES.iter().any(|s| source.starts_with(s)) {
            return Ok(SourceKind::Stream(source.to_string()));
        }
        // 纯数字视为设备索引
        if let Ok(index) = source.parse::<u32>() {
            return Ok(SourceKind::Local(index));
        }
        let path = PathBuf::from(source);
        if path.is_dir() || (path.is_file() && is_image_path(&path)) {
            Ok(SourceKind::Images(path))
        } else if path.is_file() {
            Ok(SourceKind::VideoFile(path))
        } else {
            Err(MonitorError::device_open(
                config.id,
                format!("source not found: {source}"),
            ))
        }
    }
}

/// 打开摄像头对应的采集设备
///
/// `read_timeout` 限制 ffmpeg 设备单次读取的最长等待。
pub fn open_device(
    config: &CameraConfig,
    read_timeout: Duration,
) -> Result<Box<dyn CaptureDevice>> {
    let kind = SourceKind::classify(config)?;
    tracing::debug!(camera = config.id, ?kind, "opening capture device");
    match kind {
        SourceKind::Images(path) => {
            Ok(Box::new(StillImageDevice::open(config.id, &path, config.fps)?))
        }
        other => open_ffmpeg(config.id, other, read_timeout),
    }
}

#[cfg(feature = "ffmpeg")]
fn open_ffmpeg(
    camera: CameraId,
    kind: SourceKind,
    read_timeout: Duration,
) -> Result<Box<dyn CaptureDevice>> {
    Ok(Box::new(FfmpegDevice::open(camera, kind, read_timeout)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_ffmpeg(
    camera: CameraId,
    kind: SourceKind,
    _read_timeout: Duration,
) -> Result<Box<dyn CaptureDevice>> {
    Err(MonitorError::device_open(
        camera,
        format!("built without the `ffmpeg` feature, cannot open {kind:?}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(id: CameraId, source: Option<&str>) -> CameraConfig {
        CameraConfig {
            id,
            source: source.map(str::to_string),
            fps: 20,
        }
    }

    #[test]
    fn test_classify_sources() {
        assert_eq!(
            SourceKind::classify(&camera(1, None)).unwrap(),
            SourceKind::Local(1)
        );
        assert_eq!(
            SourceKind::classify(&camera(0, Some("2"))).unwrap(),
            SourceKind::Local(2)
        );
        assert_eq!(
            SourceKind::classify(&camera(0, Some("rtsp://10.0.0.2/live"))).unwrap(),
            SourceKind::Stream("rtsp://10.0.0.2/live".into())
        );

        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();
        assert_eq!(
            SourceKind::classify(&camera(0, Some(dir_str))).unwrap(),
            SourceKind::Images(dir.path().to_path_buf())
        );

        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"").unwrap();
        assert_eq!(
            SourceKind::classify(&camera(0, video.to_str())).unwrap(),
            SourceKind::VideoFile(video)
        );
    }

    #[test]
    fn test_missing_source_is_open_error() {
        let err = open_device(&camera(3, Some("/nonexistent/cam.png")), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, MonitorError::DeviceOpen { camera: 3, .. }));
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn test_local_device_requires_ffmpeg() {
        let err = open_device(&camera(0, None), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, MonitorError::DeviceOpen { camera: 0, .. }));
    }
}
