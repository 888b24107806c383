// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! FFmpeg采集设备 - 本地摄像头 / RTSP流 / 视频文件
//!
//! 解码在独立线程中运行, 帧经容量为2的通道交给采集线程,
//! 通道满时直接丢弃新帧, 保证读到的总是较新的画面。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input};
use image::RgbImage;
use tracing::{debug, info, warn};

use super::{CaptureDevice, SourceKind};
use crate::error::{MonitorError, Result};
use crate::CameraId;

const MAX_DIMENSION: u32 = 4096;

pub struct FfmpegDevice {
    camera: CameraId,
    frames: Receiver<RgbImage>,
    release: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl FfmpegDevice {
    pub fn open(camera: CameraId, kind: SourceKind, read_timeout: Duration) -> Result<Self> {
        let input = build_input(camera, &kind)?;
        let (tx, rx) = bounded(2);
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);
        let release = Arc::new(AtomicBool::new(false));

        let filter = CaptureFilter::new(camera, tx, Arc::clone(&release));
        std::thread::Builder::new()
            .name(format!("ffmpeg-{camera}"))
            .spawn(move || run_decoder(camera, input, filter, ready_tx))
            .map_err(|e| MonitorError::device_open(camera, e))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(camera, ?kind, "capture device opened");
                Ok(Self {
                    camera,
                    frames: rx,
                    release,
                    read_timeout,
                })
            }
            Ok(Err(reason)) => Err(MonitorError::device_open(camera, reason)),
            Err(_) => Err(MonitorError::device_open(camera, "decoder thread exited")),
        }
    }
}

impl CaptureDevice for FfmpegDevice {
    fn read_frame(&mut self) -> Result<RgbImage> {
        self.frames
            .recv_timeout(self.read_timeout)
            .map_err(|e| match e {
                RecvTimeoutError::Timeout => MonitorError::device_read(
                    self.camera,
                    format!("no frame within {:?}", self.read_timeout),
                ),
                RecvTimeoutError::Disconnected => {
                    MonitorError::device_read(self.camera, "stream ended")
                }
            })
    }
}

impl Drop for FfmpegDevice {
    fn drop(&mut self) {
        // 解码线程在下一帧时退出并释放设备
        self.release.store(true, Ordering::Release);
        debug!(camera = self.camera, "capture device released");
    }
}

fn build_input(camera: CameraId, kind: &SourceKind) -> Result<Input> {
    let input = match kind {
        SourceKind::Local(index) => {
            let url = local_device_url(camera, *index)?;
            Input::new(url)
                .set_format(local_device_format())
                .set_input_opts([("framerate", "30")].into())
        }
        SourceKind::Stream(url) if url.starts_with("rtsp") => Input::new(url.as_str())
            .set_input_opts(
                [
                    ("rtsp_transport", "tcp"),
                    ("rtsp_flags", "prefer_tcp"),
                    ("fflags", "nobuffer"),
                ]
                .into(),
            ),
        SourceKind::Stream(url) => Input::new(url.as_str()),
        SourceKind::VideoFile(path) => Input::new(path.to_string_lossy().to_string()),
        SourceKind::Images(path) => {
            return Err(MonitorError::device_open(
                camera,
                format!("{} is not a video source", path.display()),
            ))
        }
    };
    Ok(input)
}

fn local_device_format() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dshow"
    }
    #[cfg(target_os = "macos")]
    {
        "avfoundation"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        "v4l2"
    }
}

#[cfg(target_os = "windows")]
fn local_device_url(camera: CameraId, index: u32) -> Result<String> {
    // DirectShow 需要设备名称
    let devices = ez_ffmpeg::device::get_input_video_devices()
        .map_err(|e| MonitorError::device_open(camera, e))?;
    devices
        .get(index as usize)
        .map(|name| format!("video={name}"))
        .ok_or_else(|| MonitorError::device_open(camera, format!("no video device #{index}")))
}

#[cfg(target_os = "macos")]
fn local_device_url(_camera: CameraId, index: u32) -> Result<String> {
    Ok(index.to_string())
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn local_device_url(_camera: CameraId, index: u32) -> Result<String> {
    Ok(format!("/dev/video{index}"))
}

fn run_decoder(
    camera: CameraId,
    input: Input,
    filter: CaptureFilter,
    ready: Sender<std::result::Result<(), String>>,
) {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("capture", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let ctx = match FfmpegContext::builder()
        .input(input)
        .filter_descs(["format=yuv420p"].into())
        .output(out)
        .build()
    {
        Ok(ctx) => ctx,
        Err(e) => {
            let _ = ready.send(Err(format!("build failed: {e}")));
            return;
        }
    };

    let sch = match ctx.start() {
        Ok(sch) => sch,
        Err(e) => {
            let _ = ready.send(Err(format!("start failed: {e}")));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let _ = sch.wait();
    debug!(camera, "decoder loop finished");
}

/// 解码帧 → RGB, 推入采集通道
#[derive(Clone)]
struct CaptureFilter {
    camera: CameraId,
    tx: Sender<RgbImage>,
    release: Arc<AtomicBool>,
    decoded: u64,
    dropped: u64,
    last: Instant,
}

impl CaptureFilter {
    fn new(camera: CameraId, tx: Sender<RgbImage>, release: Arc<AtomicBool>) -> Self {
        Self {
            camera,
            tx,
            release,
            decoded: 0,
            dropped: 0,
            last: Instant::now(),
        }
    }

    fn report(&mut self) {
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            debug!(
                camera = self.camera,
                fps = format!("{:.1}", self.decoded as f64 / elapsed),
                dropped = self.dropped,
                "decode stats"
            );
            self.decoded = 0;
            self.dropped = 0;
            self.last = Instant::now();
        }
    }
}

impl FrameFilter for CaptureFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> std::result::Result<(), String> {
        debug!(camera = self.camera, "decoder thread started");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> std::result::Result<Option<Frame>, String> {
        if self.release.load(Ordering::Acquire) {
            return Err("capture device released".to_string());
        }

        if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
            self.dropped += 1;
            return Ok(None);
        }

        // SAFETY: 帧指针非空, 格式已由 format=yuv420p 滤镜保证
        let image = unsafe {
            let raw = &*frame.as_ptr();
            let (w, h) = (raw.width as u32, raw.height as u32);
            if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
                self.dropped += 1;
                return Ok(None);
            }
            let (y_stride, uv_stride) = (raw.linesize[0] as usize, raw.linesize[1] as usize);
            if raw.data[0].is_null()
                || raw.data[1].is_null()
                || raw.data[2].is_null()
                || y_stride < w as usize
                || uv_stride < (w as usize).div_ceil(2)
            {
                self.dropped += 1;
                return Ok(None);
            }
            let chroma_rows = (h as usize).div_ceil(2);
            let y = std::slice::from_raw_parts(raw.data[0], y_stride * h as usize);
            let u = std::slice::from_raw_parts(raw.data[1], uv_stride * chroma_rows);
            let v = std::slice::from_raw_parts(raw.data[2], uv_stride * chroma_rows);
            yuv420p_to_rgb(y, u, v, y_stride, uv_stride, w, h)
        };

        self.decoded += 1;
        match self.tx.try_send(image) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.dropped += 1,
            Err(TrySendError::Disconnected(_)) => {
                return Err("capture device released".to_string())
            }
        }
        self.report();
        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        if !self.release.load(Ordering::Acquire) {
            warn!(camera = self.camera, "decoder stopped");
        }
    }
}

/// YUV420P → RGB (BT.601 整数近似)
fn yuv420p_to_rgb(
    y_plane: &[u8],
    u_plane: &[u8],
    v_plane: &[u8],
    y_stride: usize,
    uv_stride: usize,
    width: u32,
    height: u32,
) -> RgbImage {
    let (w, h) = (width as usize, height as usize);
    let mut out = vec![0u8; w * h * 3];
    for row in 0..h {
        let y_row = row * y_stride;
        let uv_row = (row >> 1) * uv_stride;
        for col in 0..w {
            let y_val = y_plane[y_row + col] as i32;
            let u_val = u_plane[uv_row + (col >> 1)] as i32 - 128;
            let v_val = v_plane[uv_row + (col >> 1)] as i32 - 128;

            let idx = (row * w + col) * 3;
            out[idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            out[idx + 1] = (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            out[idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
        }
    }
    RgbImage::from_raw(width, height, out).unwrap_or_else(|| RgbImage::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuv_gray_maps_to_gray() {
        // 4x2, 行步长带填充
        let y = vec![128u8; 6 * 2];
        let u = vec![128u8; 3];
        let v = vec![128u8; 3];
        let rgb = yuv420p_to_rgb(&y, &u, &v, 6, 3, 4, 2);
        assert_eq!(rgb.dimensions(), (4, 2));
        assert!(rgb.pixels().all(|p| p.0 == [128, 128, 128]));
    }

    #[test]
    fn test_yuv_red_chroma() {
        let y = vec![76u8; 4];
        let u = vec![85u8; 1];
        let v = vec![255u8; 1];
        let rgb = yuv420p_to_rgb(&y, &u, &v, 2, 1, 2, 2);
        let p = rgb.get_pixel(1, 1).0;
        assert!(p[0] > 240 && p[1] < 20 && p[2] < 20, "{p:?}");
    }
}
