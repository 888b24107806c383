// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 报警播放器 (AlarmPlayer)
//!
//! 全进程同一时刻最多一个报警在播放。播放期间的 `trigger()` 直接丢弃,
//! 不排队。播放失败只记录日志, 不影响检测流水线。

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::{MonitorError, Result};

/// 音频输出后端, 同步播放直至结束
pub trait AudioBackend: Send + Sync {
    fn play(&self, sound: &Path) -> Result<()>;
}

/// 调用系统播放器命令
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
}

impl CommandBackend {
    /// 根据平台选择播放器
    pub fn platform_default() -> Self {
        #[cfg(target_os = "macos")]
        {
            Self::new("afplay", Vec::new())
        }
        #[cfg(target_os = "windows")]
        {
            Self::new(
                "powershell",
                vec![
                    "-NoProfile".to_string(),
                    "-Command".to_string(),
                    "(New-Object Media.SoundPlayer $args[0]).PlaySync()".to_string(),
                ],
            )
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            Self::new("aplay", vec!["-q".to_string()])
        }
    }

    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `["mpv", "--no-video"]` 形式的命令行, 音频路径追加在末尾
    pub fn from_command_line(cmd: &[String]) -> Option<Self> {
        let (program, args) = cmd.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl AudioBackend for CommandBackend {
    fn play(&self, sound: &Path) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(sound)
            .status()
            .map_err(|e| MonitorError::AlarmPlayback(format!("{}: {}", self.program, e)))?;
        if !status.success() {
            return Err(MonitorError::AlarmPlayback(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Ok(())
    }
}

/// 播放结束(包括出错或panic)时清除播放标志
struct PlayingGuard(Arc<AtomicBool>);

impl Drop for PlayingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 互斥报警播放器, 可在各摄像头线程间克隆共享
#[derive(Clone)]
pub struct AlarmPlayer {
    playing: Arc<AtomicBool>,
    sound: PathBuf,
    backend: Arc<dyn AudioBackend>,
}

impl AlarmPlayer {
    pub fn new(sound: impl Into<PathBuf>, backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            playing: Arc::new(AtomicBool::new(false)),
            sound: sound.into(),
            backend,
        }
    }

    /// 触发报警; 已在播放时立即返回 false (不阻塞、不排队)
    pub fn trigger(&self) -> bool {
        if self
            .playing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("alarm already playing, trigger dropped");
            return false;
        }

        let guard = PlayingGuard(Arc::clone(&self.playing));
        let sound = self.sound.clone();
        let backend = Arc::clone(&self.backend);

        let spawned = std::thread::Builder::new()
            .name("alarm".to_string())
            .spawn(move || {
                let _guard = guard;
                if let Err(e) = play_once(backend.as_ref(), &sound) {
                    error!("{}", e);
                }
            });

        match spawned {
            Ok(_) => true,
            Err(e) => {
                // 闭包(连同guard)已被丢弃, 标志已复位
                error!("failed to spawn alarm thread: {}", e);
                false
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }
}

fn play_once(backend: &dyn AudioBackend, sound: &Path) -> Result<()> {
    // 每次触发都重新检查音频文件
    let meta = std::fs::metadata(sound)
        .map_err(|e| MonitorError::AlarmPlayback(format!("{}: {}", sound.display(), e)))?;
    if !meta.is_file() {
        return Err(MonitorError::AlarmPlayback(format!(
            "{} is not a file",
            sound.display()
        )));
    }
    info!(sound = %sound.display(), "alarm playing");
    backend.play(sound)
}
