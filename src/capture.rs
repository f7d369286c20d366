//! Frame capture from the reader's rendering surface.

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use chromiumoxide::Page;
use image::DynamicImage;

use crate::error::{Error, Result};
use crate::site;

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// One captured frame: the decoded raster plus the canonical PNG bytes used
/// for duplicate detection.
pub struct Frame {
    image: DynamicImage,
    png: Vec<u8>,
}

impl Frame {
    /// Decode a frame from PNG bytes, keeping the bytes as the canonical
    /// encoded form.
    pub fn from_png(png: Vec<u8>) -> Result<Self> {
        let image = image::load_from_memory(&png)?;
        Ok(Self { image, png })
    }

    /// True when every pixel channel is zero. The viewer shows a fully
    /// transparent black canvas until the page has rendered.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.image.as_bytes().iter().all(|&b| b == 0)
    }

    #[must_use]
    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    #[must_use]
    pub fn into_png_bytes(self) -> Vec<u8> {
        self.png
    }
}

/// Read-only source of the currently visible frame.
#[async_trait]
pub trait FrameSource {
    /// Capture the rendering surface as it is right now.
    ///
    /// Fails with [`Error::CaptureFailed`] when the surface element is not
    /// present in the document; the capture retry loop absorbs that.
    async fn capture(&self) -> Result<Frame>;
}

/// Captures the reader's visible canvas by evaluating `toDataURL` on it.
pub struct CanvasCapture {
    page: Page,
}

impl CanvasCapture {
    #[must_use]
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl FrameSource for CanvasCapture {
    async fn capture(&self) -> Result<Frame> {
        let canvas = self
            .page
            .find_element(site::VIEWER_CANVAS)
            .await
            .map_err(|e| Error::CaptureFailed(format!("canvas element not found: {e}")))?;

        let returns = canvas
            .call_js_fn("function() { return this.toDataURL('image/png'); }", false)
            .await
            .map_err(|e| Error::CaptureFailed(format!("toDataURL failed: {e}")))?;

        let data_url = returns
            .result
            .value
            .as_ref()
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::CaptureFailed("canvas returned no data url".to_string()))?;

        let encoded = data_url.strip_prefix(DATA_URL_PREFIX).ok_or_else(|| {
            Error::CaptureFailed(format!(
                "unexpected data url prefix: {:?}",
                data_url.get(..32).unwrap_or(data_url)
            ))
        })?;

        let png = BASE64_STANDARD.decode(encoded)?;
        Frame::from_png(png)
    }
}
