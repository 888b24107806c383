// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! YOLOv8 / YOLO11 ONNX 检测器
//!
//! 输出张量 `[1, 4 + nc, N]`: 每列为 (cx, cy, w, h, cls0 .. clsN)。

use std::path::Path;

use anyhow::{bail, Context};
use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use super::detector::Detector;
use super::types::{non_max_suppression, BBox, Detection};
use crate::error::{MonitorError, Result};

pub struct YoloDetector {
    name: String,
    session: Session,
    input_name: String,
    output_name: String,
    input_size: u32,
    iou: f32,
}

impl YoloDetector {
    /// 加载ONNX模型
    pub fn load(name: &str, model: &Path, input_size: u32, iou: f32) -> anyhow::Result<Self> {
        let session = Session::builder()
            .context("failed to create ORT session builder")?
            .commit_from_file(model)
            .with_context(|| format!("failed to load model {}", model.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .context("model has no inputs")?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .context("model has no outputs")?;

        debug!(detector = name, %input_name, %output_name, input_size, "onnx session ready");

        Ok(Self {
            name: name.to_string(),
            session,
            input_name,
            output_name,
            input_size,
            iou,
        })
    }

    /// 预处理: 缩放到模型输入尺寸, NCHW f32 归一化到 [0, 1]
    fn preprocess(&self, frame: &RgbImage) -> Array4<f32> {
        let size = self.input_size;
        let resized = imageops::resize(frame, size, size, imageops::FilterType::Triangle);
        let mut input = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            input[[0, 0, y, x]] = pixel.0[0] as f32 / 255.;
            input[[0, 1, y, x]] = pixel.0[1] as f32 / 255.;
            input[[0, 2, y, x]] = pixel.0[2] as f32 / 255.;
        }
        input
    }

    fn infer(
        &mut self,
        frame: &RgbImage,
        confidence_threshold: f32,
        class_filter: &[u32],
    ) -> anyhow::Result<Vec<Detection>> {
        let input = Tensor::from_array(self.preprocess(frame))
            .context("failed to create input tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])
            .context("inference failed")?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .context("failed to extract output tensor")?;

        if shape.len() != 3 || shape[1] < 5 {
            bail!("unexpected output shape {:?}", shape);
        }
        let rows = shape[1] as usize;
        let proposals = shape[2] as usize;
        let num_classes = rows - 4;

        let sx = frame.width() as f32 / self.input_size as f32;
        let sy = frame.height() as f32 / self.input_size as f32;

        let mut candidates = Vec::new();
        for i in 0..proposals {
            // 取最高分类别
            let (class_id, score) = (0..num_classes)
                .map(|c| (c, data[(4 + c) * proposals + i]))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

            if score < confidence_threshold {
                continue;
            }
            let class_id = class_id as u32;
            if !class_filter.is_empty() && !class_filter.contains(&class_id) {
                continue;
            }

            let bbox = BBox::from_cxcywh(
                data[i],
                data[proposals + i],
                data[2 * proposals + i],
                data[3 * proposals + i],
            )
            .scale_clamped(sx, sy, frame.width(), frame.height());

            candidates.push(Detection::new(class_id, score, bbox));
        }

        non_max_suppression(&mut candidates, self.iou);
        Ok(candidates)
    }
}

impl Detector for YoloDetector {
    fn detect(
        &mut self,
        frame: &RgbImage,
        confidence_threshold: f32,
        class_filter: &[u32],
    ) -> Result<Vec<Detection>> {
        self.infer(frame, confidence_threshold, class_filter)
            .map_err(|e| MonitorError::Inference(format!("{}: {:#}", self.name, e)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
