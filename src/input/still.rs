// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 图片回放设备: 单张图片或目录内全部图片, 按帧率循环
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::RgbImage;

use super::{is_image_path, CaptureDevice};
use crate::error::{MonitorError, Result};
use crate::CameraId;

pub struct StillImageDevice {
    camera: CameraId,
    frames: Vec<PathBuf>,
    index: usize,
    interval: Duration,
    last: Option<Instant>,
}

impl StillImageDevice {
    pub fn open(camera: CameraId, path: &Path, fps: u32) -> Result<Self> {
        let frames = if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)
                .map_err(|e| MonitorError::device_open(camera, e))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image_path(p))
                .collect();
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        if frames.is_empty() {
            return Err(MonitorError::device_open(
                camera,
                format!("no images in {}", path.display()),
            ));
        }

        // 首帧必须可解码, 否则视为打开失败
        image::open(&frames[0]).map_err(|e| {
            MonitorError::device_open(camera, format!("{}: {}", frames[0].display(), e))
        })?;

        Ok(Self {
            camera,
            frames,
            index: 0,
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            last: None,
        })
    }
}

impl CaptureDevice for StillImageDevice {
    fn read_frame(&mut self) -> Result<RgbImage> {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());

        let path = &self.frames[self.index];
        self.index = (self.index + 1) % self.frames.len();
        image::open(path).map(|img| img.to_rgb8()).map_err(|e| {
            MonitorError::device_read(self.camera, format!("{}: {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_png(path: &Path, shade: u8) {
        RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_directory_cycles_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("b.png"), 20);
        write_png(&dir.path().join("a.png"), 10);
        let notes = dir.path().join("notes.txt");
        std::fs::write(notes, b"skip").unwrap();

        let mut device = StillImageDevice::open(0, dir.path(), 1000).unwrap();
        let shades: Vec<u8> = (0..3)
            .map(|_| device.read_frame().unwrap().get_pixel(0, 0).0[0])
            .collect();
        assert_eq!(shades, vec![10, 20, 10]);
    }

    #[test]
    fn test_reads_are_paced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        write_png(&path, 0);

        let mut device = StillImageDevice::open(0, &path, 20).unwrap();
        let start = Instant::now();
        for _ in 0..3 {
            device.read_frame().unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_empty_directory_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let err = StillImageDevice::open(7, dir.path(), 20).err().unwrap();
        assert!(matches!(err, MonitorError::DeviceOpen { camera: 7, .. }));
    }

    #[test]
    fn test_deleted_image_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        write_png(&path, 0);
        let mut device = StillImageDevice::open(2, &path, 1000).unwrap();
        std::fs::remove_file(&path).unwrap();
        let err = device.read_frame().unwrap_err();
        assert!(matches!(err, MonitorError::DeviceRead { camera: 2, .. }));
    }
}
