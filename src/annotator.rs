// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测结果标注 (Annotator)
//!
//! 在帧上绘制检测框与 `"{label} {conf:.2}"` 文字。多个检测器按注册顺序
//! 叠加, 后绘制的框可能遮挡先绘制的框。

use std::collections::BTreeMap;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::warn;

use crate::detection::LabeledDetection;
use crate::error::{MonitorError, Result};

/// 未配置颜色的标签使用的调色板 (Ultralytics 默认色)
const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [0, 194, 255],
    [52, 69, 147],
];

const LINE_THICKNESS: u32 = 2;
const TEXT_SCALE: f32 = 14.0;
const TEXT_OFFSET: i32 = 10;

/// 标签 → 颜色
#[derive(Clone, Debug, Default)]
pub struct LabelPolicy {
    colors: BTreeMap<String, Rgb<u8>>,
}

impl LabelPolicy {
    pub fn new(colors: &BTreeMap<String, [u8; 3]>) -> Self {
        Self {
            colors: colors
                .iter()
                .map(|(label, rgb)| (label.clone(), Rgb(*rgb)))
                .collect(),
        }
    }

    pub fn color(&self, label: &str) -> Rgb<u8> {
        if let Some(color) = self.colors.get(label) {
            return *color;
        }
        // 同一标签总是得到同一颜色
        let hash = label
            .bytes()
            .fold(0usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
        Rgb(PALETTE[hash % PALETTE.len()])
    }
}

pub struct Annotator {
    policy: LabelPolicy,
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(policy: LabelPolicy, font: Option<FontVec>) -> Self {
        Self { policy, font }
    }

    /// 加载TTF字体; 未配置或加载失败时只画框不写字
    pub fn with_font_file(policy: LabelPolicy, font: Option<&Path>) -> Self {
        let font = font.and_then(|path| match load_font(path) {
            Ok(font) => Some(font),
            Err(e) => {
                warn!("label font unavailable, drawing boxes only: {}", e);
                None
            }
        });
        Self::new(policy, font)
    }

    pub fn annotate(&self, image: &mut RgbImage, detections: &[LabeledDetection]) {
        for labeled in detections {
            self.draw_one(image, labeled);
        }
    }

    fn draw_one(&self, image: &mut RgbImage, labeled: &LabeledDetection) {
        let (w, h) = (image.width() as i32, image.height() as i32);
        if w == 0 || h == 0 {
            return;
        }
        let color = self.policy.color(&labeled.label);
        let bbox = labeled.detection.bbox;

        let x1 = (bbox.x1.round() as i32).clamp(0, w - 1);
        let y1 = (bbox.y1.round() as i32).clamp(0, h - 1);
        let x2 = (bbox.x2.round() as i32).clamp(0, w - 1);
        let y2 = (bbox.y2.round() as i32).clamp(0, h - 1);

        // 逐层内缩画出线宽
        for t in 0..LINE_THICKNESS as i32 {
            let (rx1, ry1, rx2, ry2) = (x1 + t, y1 + t, x2 - t, y2 - t);
            if rx2 < rx1 || ry2 < ry1 {
                break;
            }
            let (rw, rh) = ((rx2 - rx1 + 1) as u32, (ry2 - ry1 + 1) as u32);
            draw_hollow_rect_mut(image, Rect::at(rx1, ry1).of_size(rw, rh), color);
        }

        if let Some(font) = &self.font {
            let text = format!("{} {:.2}", labeled.label, labeled.detection.confidence);
            let ty = (y1 - TEXT_OFFSET - TEXT_SCALE as i32 / 2).max(0);
            draw_text_mut(image, color, x1, ty, PxScale::from(TEXT_SCALE), font, &text);
        }
    }
}

fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = std::fs::read(path)?;
    FontVec::try_from_vec(bytes)
        .map_err(|e| MonitorError::Config(format!("{}: {}", path.display(), e)))
}
