// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统 (Detection System)
///
/// - Detector: 外部检测能力 (ONNX YOLO 或测试替身)
/// - Binding:  检测器 + 类别→标签映射, 按注册顺序执行
/// - Types:    帧、检测框、NMS
pub mod detector;
pub mod types;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use detector::{build_bindings, build_detector, Detector, DetectorBinding};
pub use types::{non_max_suppression, BBox, Detection, Frame, LabeledDetection};
#[cfg(feature = "onnx")]
pub use yolo::YoloDetector;
