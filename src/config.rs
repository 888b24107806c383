// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 监控配置 - 命令行参数 + JSON配置文件

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MonitorError, Result};
use crate::CameraId;

/// 多摄像头监控参数
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "多摄像头智能监控 - multi-camera detection monitor",
    long_about = None
)]
pub struct Args {
    /// JSON配置文件 (不存在时自动创建默认配置)
    #[arg(short, long, default_value = "sentinel.json")]
    pub config: PathBuf,

    /// 监听地址, 覆盖配置文件
    #[arg(short, long)]
    pub bind: Option<String>,

    /// 摄像头ID列表, 如 0,1,2 (覆盖配置文件)
    #[arg(long, value_delimiter = ',')]
    pub cameras: Option<Vec<CameraId>>,

    /// 报警音频文件, 覆盖配置文件
    #[arg(short, long)]
    pub sound: Option<PathBuf>,

    /// 打印生效的配置后退出
    #[arg(long)]
    pub print_config: bool,
}

/// 单个摄像头配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: CameraId,
    /// 缺省: 本地设备索引 = id; `rtsp://...`: RTSP流; 其他: 图片文件或目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// 图片源的回放帧率
    #[serde(default = "default_fps")]
    pub fps: u32,
}

impl CameraConfig {
    pub fn local(id: CameraId) -> Self {
        Self {
            id,
            source: None,
            fps: default_fps(),
        }
    }
}

/// 检测模型配置, 按注册顺序叠加绘制
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub name: String,
    pub model: PathBuf,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    /// 模型内部置信度 (送入 detect 的阈值)
    #[serde(default = "default_model_conf")]
    pub confidence: f32,
    #[serde(default = "default_iou")]
    pub iou: f32,
    /// 模型类别ID → 标签, 同时作为类别过滤
    pub classes: BTreeMap<u32, String>,
}

/// 监控系统配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    // === 推流 ===
    pub bind: String,
    pub stream_interval_ms: u64,
    pub jpeg_quality: u8,

    // === 采集 ===
    pub frame_width: u32,
    pub frame_height: u32,
    pub max_read_failures: u32,
    pub read_timeout_ms: u64,

    // === 检测 ===
    pub default_threshold: f32,
    pub thresholds: BTreeMap<String, f32>,
    pub alert_labels: Vec<String>,
    pub detectors: Vec<DetectorConfig>,

    // === 标注 ===
    pub font: Option<PathBuf>,
    pub colors: BTreeMap<String, [u8; 3]>,

    // === 报警 ===
    pub alarm_sound: PathBuf,
    pub alarm_command: Option<Vec<String>>,

    pub cameras: Vec<CameraConfig>,
}

fn default_fps() -> u32 {
    20
}

fn default_input_size() -> u32 {
    640
}

fn default_model_conf() -> f32 {
    0.25
}

fn default_iou() -> f32 {
    0.45
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            stream_interval_ms: 50, // 20fps
            jpeg_quality: 80,

            frame_width: 320,
            frame_height: 240,
            max_read_failures: 30,
            read_timeout_ms: 2000,

            default_threshold: 0.5,
            thresholds: BTreeMap::from([
                ("Person".to_string(), 0.5),
                ("Knife".to_string(), 0.5),
            ]),
            alert_labels: vec!["Knife".to_string()],
            detectors: vec![
                DetectorConfig {
                    name: "person".to_string(),
                    model: PathBuf::from("models/yolo11n.onnx"),
                    input_size: default_input_size(),
                    confidence: 0.5,
                    iou: default_iou(),
                    classes: BTreeMap::from([(0, "Person".to_string())]),
                },
                DetectorConfig {
                    name: "knife".to_string(),
                    model: PathBuf::from("models/customknife.onnx"),
                    input_size: default_input_size(),
                    confidence: 0.5,
                    iou: default_iou(),
                    classes: BTreeMap::from([(0, "Knife".to_string())]),
                },
            ],

            font: Some(PathBuf::from("assets/font/DejaVuSansMono.ttf")),
            colors: BTreeMap::from([
                ("Person".to_string(), [0, 255, 0]),
                ("Knife".to_string(), [255, 0, 0]),
            ]),

            alarm_sound: PathBuf::from("assets/sound/alarm.wav"),
            alarm_command: None,

            cameras: vec![CameraConfig::local(0), CameraConfig::local(1)],
        }
    }
}

impl MonitorConfig {
    /// 从JSON文件加载配置, 文件不存在时写入默认配置
    pub fn load(path: &Path) -> Result<Self> {
        let config = match fs::read_to_string(path) {
            Ok(json) => {
                let config: Self = serde_json::from_str(&json).map_err(|e| {
                    MonitorError::Config(format!("{}: {}", path.display(), e))
                })?;
                info!(path = %path.display(), "configuration loaded");
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "configuration not found, writing defaults");
                let config = Self::default();
                config.save(path)?;
                config
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| MonitorError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, json)?;
        Ok(())
    }

    /// 命令行参数覆盖配置文件
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(bind) = &args.bind {
            self.bind = bind.clone();
        }
        if let Some(ids) = &args.cameras {
            self.cameras = ids
                .iter()
                .map(|id| {
                    self.cameras
                        .iter()
                        .find(|c| c.id == *id)
                        .cloned()
                        .unwrap_or_else(|| CameraConfig::local(*id))
                })
                .collect();
        }
        if let Some(sound) = &args.sound {
            self.alarm_sound = sound.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(MonitorError::Config("frame size must be non-zero".into()));
        }
        if self.stream_interval_ms == 0 {
            return Err(MonitorError::Config("stream_interval_ms must be > 0".into()));
        }
        // 单次读帧失败只记录日志, 至少允许一次重试
        if self.max_read_failures < 2 {
            return Err(MonitorError::Config("max_read_failures must be >= 2".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(MonitorError::Config("jpeg_quality must be in 1..=100".into()));
        }
        let thresholds = std::iter::once(("default", self.default_threshold))
            .chain(self.thresholds.iter().map(|(k, v)| (k.as_str(), *v)));
        for (label, t) in thresholds {
            if !(0.0..=1.0).contains(&t) {
                return Err(MonitorError::Config(format!(
                    "threshold for {label} out of [0, 1]: {t}"
                )));
            }
        }
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if !seen.insert(camera.id) {
                return Err(MonitorError::Config(format!(
                    "duplicate camera id {}",
                    camera.id
                )));
            }
        }
        Ok(())
    }

    pub fn stream_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stream_interval_ms)
    }

    pub fn read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_two_camera_setup() {
        let config = MonitorConfig::default();
        assert_eq!(config.cameras.len(), 2);
        assert_eq!((config.frame_width, config.frame_height), (320, 240));
        assert_eq!(config.stream_interval_ms, 50);
        assert_eq!(config.alert_labels, vec!["Knife".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("sentinel.json");
        let config = MonitorConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.bind, "0.0.0.0:5000");

        // 再次加载读取同一文件
        let again = MonitorConfig::load(&path).unwrap();
        assert_eq!(again.detectors, config.detectors);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        fs::write(
            &path,
            r#"{"cameras":[{"id":4,"source":"frames/"}],"thresholds":{"Knife":0.6}}"#,
        )
        .unwrap();
        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.cameras[0].id, 4);
        assert_eq!(config.cameras[0].fps, 20);
        assert_eq!(config.thresholds["Knife"], 0.6);
        assert!(!config.thresholds.contains_key("Person"));
        assert_eq!(config.default_threshold, 0.5);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            MonitorConfig::load(&path),
            Err(MonitorError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MonitorConfig::default();
        config.thresholds.insert("Knife".into(), 1.5);
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.cameras.push(CameraConfig::local(0));
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.stream_interval_ms = 0;
        assert!(config.validate().is_err());

        // 首次读帧失败不能直接判定设备失效
        let mut config = MonitorConfig::default();
        config.max_read_failures = 1;
        assert!(config.validate().is_err());
        config.max_read_failures = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_font_is_bundled_asset() {
        let font = MonitorConfig::default().font.unwrap();
        assert_eq!(font, PathBuf::from("assets/font/DejaVuSansMono.ttf"));
        assert!(Path::new(env!("CARGO_MANIFEST_DIR")).join(&font).is_file());
    }

    #[test]
    fn test_apply_args_overrides() {
        let args = Args::parse_from([
            "sentinel",
            "--bind",
            "127.0.0.1:8080",
            "--cameras",
            "1,7",
        ]);
        let mut config = MonitorConfig::default();
        config.apply_args(&args);
        assert_eq!(config.bind, "127.0.0.1:8080");
        let ids: Vec<_> = config.cameras.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 7]);
    }
}
