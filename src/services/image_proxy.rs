use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::ImageReader;

/// Bounding box for locally generated thumbnails.
const THUMBNAIL_MAX_WIDTH: u32 = 400;
const THUMBNAIL_MAX_HEIGHT: u32 = 300;
const THUMBNAIL_JPEG_QUALITY: u8 = 70;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches stored results and serves them through the API, generating
/// low-quality thumbnails locally when the provider cannot transform URLs.
/// Thumbnails are cached in memory; the retention sweeper bounds how long
/// any source asset lives, so the cache is keyed by URL and never
/// invalidated.
pub struct ImageProxy {
    http: reqwest::Client,
    thumbnail_cache: Mutex<HashMap<String, Vec<u8>>>,
}

impl ImageProxy {
    pub fn new() -> Result<Self, ProxyError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ProxyError::Http)?;

        Ok(Self {
            http,
            thumbnail_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Download the full-quality bytes behind a storage URL.
    pub async fn fetch_full(&self, url: &str) -> Result<Vec<u8>, ProxyError> {
        tracing::debug!(%url, "downloading full quality image");

        let response = self.http.get(url).send().await.map_err(ProxyError::Http)?;
        if !response.status().is_success() {
            return Err(ProxyError::UpstreamStatus(response.status().as_u16()));
        }

        let bytes = response.bytes().await.map_err(ProxyError::Http)?;
        tracing::debug!(%url, len = bytes.len(), "downloaded image");
        Ok(bytes.to_vec())
    }

    /// Thumbnail bytes for a storage URL: cached, else fetched and re-encoded
    /// at reduced resolution and quality.
    pub async fn fetch_thumbnail(&self, url: &str) -> Result<Vec<u8>, ProxyError> {
        if let Some(cached) = self
            .thumbnail_cache
            .lock()
            .expect("thumbnail cache poisoned")
            .get(url)
            .cloned()
        {
            tracing::debug!(%url, "serving thumbnail from cache");
            return Ok(cached);
        }

        let full = self.fetch_full(url).await?;
        let thumbnail = render_thumbnail(&full)?;

        self.thumbnail_cache
            .lock()
            .expect("thumbnail cache poisoned")
            .insert(url.to_string(), thumbnail.clone());

        Ok(thumbnail)
    }
}

/// Re-encode image bytes as a bounded low-quality JPEG, preserving aspect
/// ratio.
pub fn render_thumbnail(original: &[u8]) -> Result<Vec<u8>, ProxyError> {
    let img = ImageReader::new(Cursor::new(original))
        .with_guessed_format()
        .map_err(|e| ProxyError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| ProxyError::Decode(e.to_string()))?;

    let thumbnail = img.thumbnail(THUMBNAIL_MAX_WIDTH, THUMBNAIL_MAX_HEIGHT);

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, THUMBNAIL_JPEG_QUALITY);
    thumbnail
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| ProxyError::Encode(e.to_string()))?;

    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    UpstreamStatus(u16),

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to encode thumbnail: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([120, 40, 200]),
        ));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn thumbnail_fits_bounding_box() {
        let thumb = render_thumbnail(&png_bytes(1600, 1200)).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert!(decoded.width() <= THUMBNAIL_MAX_WIDTH);
        assert!(decoded.height() <= THUMBNAIL_MAX_HEIGHT);
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let thumb = render_thumbnail(&png_bytes(100, 80)).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 80));
    }

    #[test]
    fn garbage_input_is_rejected() {
        assert!(matches!(
            render_thumbnail(b"definitely not an image"),
            Err(ProxyError::Decode(_))
        ));
    }
}
