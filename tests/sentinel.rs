// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 服务进程启动场景测试

use std::net::TcpListener;
use std::process::Command;

use image::RgbImage;

#[test]
fn test_bind_failure_starts_no_cameras() {
    let dir = tempfile::tempdir().unwrap();
    let frame = dir.path().join("frame.png");
    RgbImage::new(64, 48).save(&frame).unwrap();
    let config = dir.path().join("sentinel.json");
    let json = serde_json::json!({
        "cameras": [{ "id": 0, "source": frame, "fps": 50 }],
        "detectors": [],
    });
    std::fs::write(&config, json.to_string()).unwrap();

    // 端口已被占用
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = occupied.local_addr().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_sentinel"))
        .arg("--config")
        .arg(&config)
        .arg("--bind")
        .arg(addr.to_string())
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .env("RUST_LOG", "cctv_sentinel=info,sentinel=info")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to bind"), "{stderr}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("camera worker started"), "{stdout}");
    assert!(!stdout.contains("camera state changed"), "{stdout}");
}
