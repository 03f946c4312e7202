use async_trait::async_trait;
use base64::Engine as _;

use crate::errors::{PinpointError, PinpointResult};

/// One captured frame of the desktop. Immutable once taken; every grounding
/// attempt captures a fresh one, so the dimensions here are always the true
/// dimensions of the pixels being reasoned about, never a configured constant.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub image: image::RgbaImage,
    pub width: u32,
    pub height: u32,
}

impl Screenshot {
    pub fn from_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            image,
            width,
            height,
        }
    }

    /// Encode as a base64 JPEG string for transport to a vision server.
    pub fn to_jpeg_base64(&self, quality: u8) -> PinpointResult<String> {
        let mut buf = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
        image::DynamicImage::ImageRgba8(self.image.clone())
            .to_rgb8()
            .write_with_encoder(encoder)
            .map_err(|e| PinpointError::Capture(format!("JPEG encode: {e}")))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(&buf))
    }
}

/// Capability seam for taking screenshots, so the grounding engine can be
/// driven by a fake capturer in tests.
#[async_trait]
pub trait ScreenCapturer: Send + Sync {
    async fn capture(&self) -> PinpointResult<Screenshot>;
}

/// Captures the primary monitor via xcap.
pub struct PrimaryMonitorCapturer;

#[async_trait]
impl ScreenCapturer for PrimaryMonitorCapturer {
    async fn capture(&self) -> PinpointResult<Screenshot> {
        // xcap does its own OS calls; run off the async executor.
        let image = tokio::task::spawn_blocking(capture_primary_raw)
            .await
            .map_err(|e| PinpointError::Capture(format!("capture task join: {e}")))??;

        let shot = Screenshot::from_image(image);
        tracing::debug!(width = shot.width, height = shot.height, "screenshot captured");
        Ok(shot)
    }
}

fn capture_primary_raw() -> PinpointResult<image::RgbaImage> {
    let monitors = xcap::Monitor::all()
        .map_err(|e| PinpointError::Capture(format!("enumerate monitors: {e}")))?;
    let primary = monitors
        .into_iter()
        .next()
        .ok_or_else(|| PinpointError::Capture("no monitors found".into()))?;
    let captured = primary
        .capture_image()
        .map_err(|e| PinpointError::Capture(format!("capture image: {e}")))?;
    if captured.width() == 0 || captured.height() == 0 {
        return Err(PinpointError::Capture(
            "captured empty screenshot (permission issue or no display?)".into(),
        ));
    }
    // xcap re-exports an older `image` crate version than this crate depends on;
    // bridge the two identical RGBA buffers by their raw bytes.
    let (width, height) = (captured.width(), captured.height());
    let image = image::RgbaImage::from_raw(width, height, captured.into_raw()).ok_or_else(|| {
        PinpointError::Capture("captured buffer size did not match its dimensions".into())
    })?;
    Ok(image)
}
