// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 数字卫兵 (Digital Sentinel)
///
/// 多摄像头智能监控服务
///
/// 系统架构:
/// 1. 采集线程: 每个摄像头一个, 读帧 → 检测 → 标注 → 单槽通道
/// 2. 报警线程: 全局同时最多一个报警音在播放
/// 3. 推流服务: 每个websocket连接独立投递循环 (tokio)
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cctv_sentinel::detection::{build_bindings, build_detector};
use cctv_sentinel::pipeline::{spawn_camera, WorkerContext, WorkerSettings};
use cctv_sentinel::{
    open_device, AlarmPlayer, Annotator, Args, AudioBackend, CameraRegistry, CommandBackend,
    LabelPolicy, MonitorConfig, StreamServer,
};
use mimalloc::MiMalloc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cctv_sentinel=info,sentinel=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = MonitorConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    config.apply_args(&args);
    config.validate()?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    info!(
        cameras = config.cameras.len(),
        detectors = config.detectors.len(),
        bind = %config.bind,
        "sentinel starting"
    );

    // ========== 共享部件 ==========
    let backend: Arc<dyn AudioBackend> = match config
        .alarm_command
        .as_deref()
        .and_then(CommandBackend::from_command_line)
    {
        Some(backend) => Arc::new(backend),
        None => Arc::new(CommandBackend::platform_default()),
    };
    if !config.alarm_sound.is_file() {
        warn!(
            sound = %config.alarm_sound.display(),
            "alarm sound not found, alarms will fail until it exists"
        );
    }
    let ctx = WorkerContext {
        settings: WorkerSettings::from_config(&config),
        annotator: Arc::new(Annotator::with_font_file(
            LabelPolicy::new(&config.colors),
            config.font.as_deref(),
        )),
        alarm: AlarmPlayer::new(config.alarm_sound.clone(), backend),
    };

    // ========== 推流服务 ==========
    // 先绑定端口, 绑定失败时还没有启动任何采集线程
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    // ========== 启动采集线程 ==========
    let registry = CameraRegistry::new(config.cameras.iter().map(|c| c.id));
    let mut workers = Vec::with_capacity(config.cameras.len());
    for camera in &config.cameras {
        let Some(session) = registry.get(camera.id) else {
            continue;
        };
        let camera = camera.clone();
        let detectors = config.detectors.clone();
        let read_timeout = config.read_timeout();
        let spawned = spawn_camera(
            session,
            ctx.clone(),
            move || open_device(&camera, read_timeout),
            move || build_bindings(&detectors, build_detector),
        );
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                // 已启动的线程在下一帧检查停止标志后退出
                registry.stop_all();
                return Err(e).context("failed to spawn camera thread");
            }
        }
    }

    // ========== 开始推流 ==========
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = StreamServer::from_config(&config, registry.clone(), shutdown_rx);
    let serving = tokio::spawn(server.serve(listener));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    registry.stop_all();

    match serving.await {
        Ok(Err(e)) => error!("stream server error: {}", e),
        Err(e) => error!("stream server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    // 每个采集线程在当前帧结束后退出
    tokio::task::spawn_blocking(move || {
        for handle in workers {
            if handle.join().is_err() {
                error!("camera thread panicked");
            }
        }
    })
    .await?;

    info!("sentinel stopped");
    Ok(())
}
