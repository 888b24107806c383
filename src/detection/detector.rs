// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测器接口 (Detector)
//! 职责: 帧 → 模型推理 → 带标签的检测结果

use std::collections::BTreeMap;

use image::RgbImage;
use tracing::{error, info, warn};

use super::types::{Detection, LabeledDetection};
use crate::config::DetectorConfig;
use crate::error::{MonitorError, Result};

/// 外部检测能力: 给定一帧, 返回检测框
///
/// 必须可以每帧重复调用, 同步执行, 不修改输入帧。
pub trait Detector: Send {
    /// # Arguments
    /// * `frame` - 工作分辨率下的RGB帧
    /// * `confidence_threshold` - 模型内部置信度下限
    /// * `class_filter` - 只保留这些类别ID (空表示全部)
    fn detect(
        &mut self,
        frame: &RgbImage,
        confidence_threshold: f32,
        class_filter: &[u32],
    ) -> Result<Vec<Detection>>;

    fn name(&self) -> &str;
}

/// 一个已注册的检测器: 实例 + 类别→标签映射
pub struct DetectorBinding {
    detector: Box<dyn Detector>,
    confidence: f32,
    classes: BTreeMap<u32, String>,
    class_filter: Vec<u32>,
}

impl DetectorBinding {
    pub fn new(
        detector: Box<dyn Detector>,
        confidence: f32,
        classes: BTreeMap<u32, String>,
    ) -> Self {
        let class_filter = classes.keys().copied().collect();
        Self {
            detector,
            confidence,
            classes,
            class_filter,
        }
    }

    pub fn name(&self) -> &str {
        self.detector.name()
    }

    /// 执行检测并映射标签, 未登记的类别被丢弃
    pub fn run(&mut self, frame: &RgbImage) -> Result<Vec<LabeledDetection>> {
        let detections = self
            .detector
            .detect(frame, self.confidence, &self.class_filter)?;

        Ok(detections
            .into_iter()
            .filter_map(|detection| {
                self.classes
                    .get(&detection.class_id)
                    .map(|label| LabeledDetection {
                        label: label.clone(),
                        detection,
                    })
            })
            .collect())
    }
}

/// 根据配置创建检测器实例 (每个摄像头各自一份, 互不阻塞)
pub fn build_detector(config: &DetectorConfig) -> Result<Box<dyn Detector>> {
    #[cfg(feature = "onnx")]
    {
        let detector = super::yolo::YoloDetector::load(
            &config.name,
            &config.model,
            config.input_size,
            config.iou,
        )
        .map_err(|e| MonitorError::Inference(format!("{}: {:#}", config.name, e)))?;
        Ok(Box::new(detector))
    }

    #[cfg(not(feature = "onnx"))]
    {
        Err(MonitorError::Inference(format!(
            "{}: built without the `onnx` feature, cannot load {}",
            config.name,
            config.model.display()
        )))
    }
}

/// 按注册顺序创建全部检测器; 加载失败的检测器被跳过, 视频照常推送
pub fn build_bindings<F>(configs: &[DetectorConfig], mut factory: F) -> Vec<DetectorBinding>
where
    F: FnMut(&DetectorConfig) -> Result<Box<dyn Detector>>,
{
    let mut bindings = Vec::with_capacity(configs.len());
    for config in configs {
        if config.classes.is_empty() {
            warn!(detector = %config.name, "no classes mapped, detector skipped");
            continue;
        }
        match factory(config) {
            Ok(detector) => {
                info!(detector = %config.name, model = %config.model.display(), "detector loaded");
                bindings.push(DetectorBinding::new(
                    detector,
                    config.confidence,
                    config.classes.clone(),
                ));
            }
            Err(e) => error!(detector = %config.name, "detector unavailable: {}", e),
        }
    }
    bindings
}
