// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

// 构建脚本: 静态链接FFmpeg时补充Windows系统库
fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let ffmpeg = std::env::var_os("CARGO_FEATURE_FFMPEG").is_some();
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_env = std::env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();
    if !ffmpeg || target_os != "windows" || target_env != "msvc" {
        return;
    }

    // dshow 摄像头采集 + libavformat 网络流
    let libs = ["oleaut32", "vfw32", "strmiids", "secur32", "ws2_32", "bcrypt"];
    for lib in libs {
        println!("cargo:rustc-link-lib=dylib={lib}");
    }
}
