// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 采集线程 (CameraWorker)
/// 职责: 读帧 → 缩放到工作分辨率 → 检测 → 阈值过滤 → 标注 → 发布帧/告警
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use fast_image_resize as fr;
use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::session::{CameraSession, CameraState};
use super::AlertEvent;
use crate::alarm::AlarmPlayer;
use crate::annotator::Annotator;
use crate::config::MonitorConfig;
use crate::detection::{DetectorBinding, Frame, LabeledDetection};
use crate::error::{MonitorError, Result};
use crate::input::CaptureDevice;

/// 连续读帧失败后的重试间隔
const READ_RETRY_DELAY: Duration = Duration::from_millis(20);

/// 采集线程参数
#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub frame_width: u32,
    pub frame_height: u32,
    pub default_threshold: f32,
    pub thresholds: BTreeMap<String, f32>,
    pub alert_labels: Vec<String>,
    pub max_read_failures: u32,
}

impl WorkerSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            frame_width: config.frame_width,
            frame_height: config.frame_height,
            default_threshold: config.default_threshold,
            thresholds: config.thresholds.clone(),
            alert_labels: config.alert_labels.clone(),
            max_read_failures: config.max_read_failures,
        }
    }

    fn threshold_for(&self, label: &str) -> f32 {
        self.thresholds
            .get(label)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    fn is_alert(&self, label: &str) -> bool {
        self.alert_labels.iter().any(|l| l == label)
    }
}

/// 所有摄像头共享的部分
#[derive(Clone)]
pub struct WorkerContext {
    pub settings: WorkerSettings,
    pub annotator: Arc<Annotator>,
    pub alarm: AlarmPlayer,
}

/// 单帧处理结果
#[derive(Debug, Default)]
pub struct FrameReport {
    pub seq: u64,
    pub detections: Vec<LabeledDetection>,
    pub event_published: bool,
    pub alarm_triggered: bool,
}

#[derive(Default)]
struct Throughput {
    frames: u64,
    inference: Duration,
    read_errors: u64,
}

pub struct CameraWorker {
    session: Arc<CameraSession>,
    detectors: Vec<DetectorBinding>,
    ctx: WorkerContext,
    resizer: fr::Resizer,
    resize_options: fr::ResizeOptions,
    seq: u64,
    stats: Throughput,
    last_report: Instant,
}

impl CameraWorker {
    pub fn new(
        session: Arc<CameraSession>,
        detectors: Vec<DetectorBinding>,
        ctx: WorkerContext,
    ) -> Self {
        Self {
            session,
            detectors,
            ctx,
            resizer: fr::Resizer::new(),
            resize_options: fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            seq: 0,
            stats: Throughput::default(),
            last_report: Instant::now(),
        }
    }

    /// 采集循环, 直到收到停止请求或设备持续不可读
    pub fn run(mut self, mut device: Box<dyn CaptureDevice>) {
        let camera = self.session.id();
        if self.session.transition(CameraState::Running).is_none() {
            return;
        }

        let mut failures = 0u32;
        while !self.session.stop_requested() {
            match device.read_frame() {
                Ok(image) => {
                    failures = 0;
                    if let Err(e) = self.process_frame(image) {
                        warn!(camera, "frame dropped: {}", e);
                    }
                }
                Err(e) => {
                    failures += 1;
                    self.stats.read_errors += 1;
                    warn!(camera, failures, "{}", e);
                    if failures >= self.ctx.settings.max_read_failures {
                        error!(camera, failures, "device unreadable, giving up");
                        self.fail();
                        return;
                    }
                    std::thread::sleep(READ_RETRY_DELAY);
                }
            }
            self.report();
        }

        self.session.transition(CameraState::Stopped);
        info!(camera, frames = self.seq, "camera worker stopped");
    }

    /// 处理一帧: 缩放、检测、标注并发布
    pub fn process_frame(&mut self, image: RgbImage) -> Result<FrameReport> {
        let camera = self.session.id();
        let mut image = self.resize(image)?;

        let started = Instant::now();
        let mut detections = Vec::new();
        for binding in &mut self.detectors {
            match binding.run(&image) {
                Ok(found) => detections.extend(found.into_iter().filter(|d| {
                    // 严格大于阈值
                    d.detection.confidence > self.ctx.settings.threshold_for(&d.label)
                })),
                Err(e) => warn!(camera, detector = binding.name(), "{}", e),
            }
        }
        self.stats.inference += started.elapsed();

        self.ctx.annotator.annotate(&mut image, &detections);

        let seq = self.seq;
        self.seq += 1;
        self.stats.frames += 1;
        let frame = Frame::new(camera, seq, image);
        self.session.frames().publish(frame);

        let mut report = FrameReport {
            seq,
            ..Default::default()
        };
        let settings = &self.ctx.settings;
        if let Some(hit) = detections.iter().find(|d| settings.is_alert(&d.label)) {
            report.event_published = self
                .session
                .events()
                .publish_with(|| AlertEvent::alert(camera, &hit.label));
            if report.event_published {
                info!(
                    camera,
                    label = %hit.label,
                    confidence = hit.detection.confidence,
                    "alert raised"
                );
                report.alarm_triggered = self.ctx.alarm.trigger();
            }
        }
        report.detections = detections;
        Ok(report)
    }

    fn resize(&mut self, image: RgbImage) -> Result<RgbImage> {
        let (w, h) = (self.ctx.settings.frame_width, self.ctx.settings.frame_height);
        if image.dimensions() == (w, h) {
            return Ok(image);
        }
        let camera = self.session.id();
        let src = fr::images::ImageRef::new(
            image.width(),
            image.height(),
            image.as_raw(),
            fr::PixelType::U8x3,
        )
        .map_err(|e| MonitorError::device_read(camera, e))?;
        let mut dst = fr::images::Image::new(w, h, fr::PixelType::U8x3);
        self.resizer
            .resize(&src, &mut dst, &self.resize_options)
            .map_err(|e| MonitorError::device_read(camera, e))?;
        RgbImage::from_raw(w, h, dst.into_vec())
            .ok_or_else(|| MonitorError::device_read(camera, "resized buffer size mismatch"))
    }

    fn fail(&self) {
        let camera = self.session.id();
        // 失效摄像头不再向新连接推送最后一帧
        self.session.frames().clear();
        if self.session.transition(CameraState::Failed) == Some(CameraState::Running)
            && self
                .session
                .events()
                .publish(AlertEvent::offline(camera))
        {
            info!(camera, "offline notice published");
        }
    }

    fn report(&mut self) {
        let elapsed = self.last_report.elapsed();
        if elapsed < Duration::from_secs(1) {
            return;
        }
        let frames = self.stats.frames;
        let inference_ms = if frames > 0 {
            self.stats.inference.as_secs_f64() * 1000.0 / frames as f64
        } else {
            0.0
        };
        debug!(
            camera = self.session.id(),
            fps = format!("{:.1}", frames as f64 / elapsed.as_secs_f64()),
            inference_ms = format!("{:.1}", inference_ms),
            dropped = self.session.frames().stats().discarded,
            read_errors = self.stats.read_errors,
            "camera stats"
        );
        self.stats = Throughput::default();
        self.last_report = Instant::now();
    }
}

/// 启动摄像头线程: 设备在线程内打开, 打开失败不影响其他摄像头
pub fn spawn_camera<O, D>(
    session: Arc<CameraSession>,
    ctx: WorkerContext,
    open: O,
    make_detectors: D,
) -> std::io::Result<JoinHandle<()>>
where
    O: FnOnce() -> Result<Box<dyn CaptureDevice>> + Send + 'static,
    D: FnOnce() -> Vec<DetectorBinding> + Send + 'static,
{
    let camera = session.id();
    std::thread::Builder::new()
        .name(format!("camera-{camera}"))
        .spawn(move || {
            let device = match open() {
                Ok(device) => device,
                Err(e) => {
                    error!(camera, "{}", e);
                    session.transition(CameraState::Failed);
                    return;
                }
            };
            let detectors = make_detectors();
            info!(camera, detectors = detectors.len(), "camera worker started");
            CameraWorker::new(session, detectors, ctx).run(device);
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::AudioBackend;
    use crate::annotator::LabelPolicy;
    use crate::detection::{BBox, Detection, Detector};
    use crate::pipeline::EventKind;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend(Arc<AtomicUsize>);

    impl AudioBackend for CountingBackend {
        fn play(&self, _: &Path) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        }
    }

    struct FixedDetector(Vec<Detection>);

    impl Detector for FixedDetector {
        fn detect(&mut self, _: &RgbImage, _: f32, _: &[u32]) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct BrokenDetector;

    impl Detector for BrokenDetector {
        fn detect(&mut self, _: &RgbImage, _: f32, _: &[u32]) -> Result<Vec<Detection>> {
            Err(MonitorError::Inference("session lost".into()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    /// 前 n 次读取失败, 之后返回纯色帧
    struct FlakyDevice {
        failures: u32,
    }

    /// 先返回若干帧, 之后永久不可读
    struct DyingDevice {
        frames: u32,
    }

    impl CaptureDevice for DyingDevice {
        fn read_frame(&mut self) -> Result<RgbImage> {
            if self.frames == 0 {
                return Err(MonitorError::device_read(0, "device unplugged"));
            }
            self.frames -= 1;
            Ok(RgbImage::new(320, 240))
        }
    }

    impl CaptureDevice for FlakyDevice {
        fn read_frame(&mut self) -> Result<RgbImage> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(MonitorError::device_read(0, "no frame"));
            }
            std::thread::sleep(Duration::from_millis(5));
            Ok(RgbImage::new(640, 480))
        }
    }

    fn binding(label: &str, confidence: f32) -> DetectorBinding {
        DetectorBinding::new(
            Box::new(FixedDetector(vec![Detection::new(
                0,
                confidence,
                BBox::new(10., 10., 60., 80.),
            )])),
            0.25,
            BTreeMap::from([(0, label.to_string())]),
        )
    }

    fn context(plays: Arc<AtomicUsize>, sound: &Path) -> WorkerContext {
        WorkerContext {
            settings: WorkerSettings::from_config(&MonitorConfig::default()),
            annotator: Arc::new(Annotator::new(LabelPolicy::default(), None)),
            alarm: AlarmPlayer::new(sound, Arc::new(CountingBackend(plays))),
        }
    }

    fn sound_file() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"RIFF").unwrap();
        file
    }

    #[test]
    fn test_frames_resized_to_working_resolution() {
        let sound = sound_file();
        let session = Arc::new(CameraSession::new(0));
        let mut worker = CameraWorker::new(
            session.clone(),
            Vec::new(),
            context(Arc::default(), sound.path()),
        );
        worker.process_frame(RgbImage::new(1280, 720)).unwrap();
        let frame = session.frames().try_take().unwrap();
        assert_eq!((frame.width(), frame.height()), (320, 240));
        assert_eq!(frame.camera_id, 0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let sound = sound_file();
        let session = Arc::new(CameraSession::new(1));
        let mut worker = CameraWorker::new(
            session.clone(),
            vec![binding("Person", 0.5), binding("Person", 0.51)],
            context(Arc::default(), sound.path()),
        );
        let report = worker.process_frame(RgbImage::new(320, 240)).unwrap();
        assert_eq!(report.detections.len(), 1);
        assert_eq!(report.detections[0].detection.confidence, 0.51);
        assert!(!report.event_published);
    }

    #[test]
    fn test_knife_raises_single_event_and_alarm() {
        let sound = sound_file();
        let plays = Arc::new(AtomicUsize::new(0));
        let session = Arc::new(CameraSession::new(1));
        let mut worker = CameraWorker::new(
            session.clone(),
            vec![binding("Knife", 0.72)],
            context(plays.clone(), sound.path()),
        );

        let first = worker.process_frame(RgbImage::new(320, 240)).unwrap();
        assert!(first.event_published);
        assert!(first.alarm_triggered);

        std::thread::sleep(Duration::from_millis(10));
        let second = worker.process_frame(RgbImage::new(320, 240)).unwrap();
        assert!(!second.event_published);
        assert!(!second.alarm_triggered);

        let event = session.events().try_take().unwrap();
        assert_eq!(event.kind, EventKind::Alert);
        assert!(event.message.contains("Knife"));
        assert!(session.events().try_take().is_none());

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(plays.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inference_error_keeps_video_flowing() {
        let sound = sound_file();
        let session = Arc::new(CameraSession::new(0));
        let broken = DetectorBinding::new(
            Box::new(BrokenDetector),
            0.25,
            BTreeMap::from([(0, "Knife".to_string())]),
        );
        let mut worker = CameraWorker::new(
            session.clone(),
            vec![broken, binding("Person", 0.9)],
            context(Arc::default(), sound.path()),
        );
        let report = worker.process_frame(RgbImage::new(320, 240)).unwrap();
        assert_eq!(report.detections.len(), 1);
        assert!(session.frames().try_take().is_some());
    }

    #[test]
    fn test_sustained_read_failure_fails_session_with_offline_notice() {
        let sound = sound_file();
        let session = Arc::new(CameraSession::new(0));
        let mut ctx = context(Arc::default(), sound.path());
        ctx.settings.max_read_failures = 3;

        let worker = CameraWorker::new(session.clone(), Vec::new(), ctx);
        worker.run(Box::new(FlakyDevice { failures: 10 }));

        assert_eq!(session.state(), CameraState::Failed);
        let event = session.events().try_take().unwrap();
        assert_eq!(event.kind, EventKind::Offline);
        assert_eq!(event.message, "Camera 0 offline");
    }

    #[test]
    fn test_failed_camera_drops_last_frame() {
        let sound = sound_file();
        let session = Arc::new(CameraSession::new(0));
        let mut ctx = context(Arc::default(), sound.path());
        ctx.settings.max_read_failures = 3;

        let worker = CameraWorker::new(session.clone(), Vec::new(), ctx);
        worker.run(Box::new(DyingDevice { frames: 1 }));

        assert_eq!(session.state(), CameraState::Failed);
        assert_eq!(session.frames().stats().published, 1);
        assert!(session.frames().try_take().is_none());
        let event = session.events().try_take().unwrap();
        assert_eq!(event.kind, EventKind::Offline);
    }

    #[test]
    fn test_transient_read_failures_are_tolerated() {
        let sound = sound_file();
        let session = Arc::new(CameraSession::new(0));
        let mut ctx = context(Arc::default(), sound.path());
        ctx.settings.max_read_failures = 3;

        let handle = {
            let session = session.clone();
            spawn_camera(
                session,
                ctx,
                || Ok(Box::new(FlakyDevice { failures: 2 }) as Box<dyn CaptureDevice>),
                Vec::new,
            )
            .unwrap()
        };

        let start = Instant::now();
        while session.frames().stats().published < 3 {
            assert!(start.elapsed() < Duration::from_secs(5), "no frames published");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(session.state(), CameraState::Running);

        session.request_stop();
        handle.join().unwrap();
        assert_eq!(session.state(), CameraState::Stopped);
    }

    #[test]
    fn test_open_failure_marks_failed() {
        let sound = sound_file();
        let session = Arc::new(CameraSession::new(5));
        let handle = spawn_camera(
            session.clone(),
            context(Arc::default(), sound.path()),
            || Err(MonitorError::device_open(5, "no such device")),
            Vec::new,
        )
        .unwrap();
        handle.join().unwrap();
        assert_eq!(session.state(), CameraState::Failed);
        // 从未运行, 不发布离线通知
        assert!(session.events().try_take().is_none());
    }
}
