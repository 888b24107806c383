// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统数据结构定义
/// Data structures for the detection pipeline
use image::RgbImage;

use crate::CameraId;

// ========== 数据结构 ==========

/// 标注后的视频帧 (采集线程 → FrameChannel → 推流连接)
///
/// 交给 FrameChannel 之后所有权随之转移, 旧帧被丢弃。
#[derive(Clone, Debug)]
pub struct Frame {
    pub camera_id: CameraId,
    pub seq: u64, // 帧序号 (每个摄像头单调递增)
    pub image: RgbImage,
}

impl Frame {
    pub fn new(camera_id: CameraId, seq: u64, image: RgbImage) -> Self {
        Self {
            camera_id,
            seq,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// 检测框 (x1, y1, x2, y2), 像素坐标
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.,
            y1: cy - h / 2.,
            x2: cx + w / 2.,
            y2: cy + h / 2.,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, another: &BBox) -> f32 {
        let l = self.x1.max(another.x1);
        let r = self.x2.min(another.x2);
        let t = self.y1.max(another.y1);
        let b = self.y2.min(another.y2);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &BBox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &BBox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }

    /// 缩放到另一分辨率并裁剪到画面内
    pub fn scale_clamped(&self, sx: f32, sy: f32, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            x1: (self.x1 * sx).clamp(0., w),
            y1: (self.y1 * sy).clamp(0., h),
            x2: (self.x2 * sx).clamp(0., w),
            y2: (self.y2 * sy).clamp(0., h),
        }
    }
}

/// 单次推理的检测结果, 立即交给标注器, 不保留
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32, // [0, 1]
    pub bbox: BBox,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, bbox: BBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// 已映射到标签的检测结果 (如 "Person" / "Knife")
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledDetection {
    pub label: String,
    pub detection: Detection,
}

/// 按类别的贪心NMS, 置信度降序
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_id != xs[index].class_id {
                continue;
            }
            if xs[prev_index].bbox.iou(&xs[index].bbox) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
