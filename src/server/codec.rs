// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 推流编码: 帧 → JPEG, 事件 → `{"type": ..., "message": ...}`
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;

use crate::error::{MonitorError, Result};
use crate::pipeline::{AlertEvent, EventKind};

#[derive(Serialize)]
struct EventMessage<'a> {
    #[serde(rename = "type")]
    kind: EventKind,
    message: &'a str,
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity((image.width() * image.height()) as usize / 4);
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(buf)
}

pub fn encode_event(event: &AlertEvent) -> Result<String> {
    serde_json::to_string(&EventMessage {
        kind: event.kind,
        message: &event.message,
    })
    .map_err(|e| MonitorError::ClientWrite(e.to_string()))
}
