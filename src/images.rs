//! Query image retrieval and normalization.
//!
//! Query images arrive as a local path, a URL or raw bytes. Before they reach
//! the image encoder they are checked to be a decodable image and scaled down
//! when larger than [`MAX_QUERY_DIMENSION`].

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use image::{GenericImageView, ImageFormat};

/// Longest side, in pixels, of an image handed to the encoder
pub const MAX_QUERY_DIMENSION: u32 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),

    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("download returned HTTP {0}")]
    Status(u16),

    #[error("download timed out after {0:?}")]
    Timeout(Duration),

    #[error("data is not a supported image")]
    NotAnImage,

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Check magic bytes for an image format the decoder understands.
pub fn is_image(data: &[u8]) -> bool {
    let known = infer::get(data)
        .map(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .unwrap_or(false);

    known && image::guess_format(data).is_ok()
}

/// Fetch an image over http(s).
pub async fn download_image(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, ImageError> {
    log::debug!("downloading image: {url}");

    let request = async {
        let response = client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Status(status.as_u16()));
        }
        Ok::<_, ImageError>(response.bytes().await?.to_vec())
    };

    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| ImageError::Timeout(timeout))?
}

/// Validate `data` and downscale it to fit `max_dimension`.
///
/// Images already within bounds are returned untouched; larger ones are
/// resized keeping the aspect ratio and re-encoded as PNG.
pub fn prepare(data: Vec<u8>, max_dimension: u32) -> Result<Vec<u8>, ImageError> {
    if !is_image(&data) {
        return Err(ImageError::NotAnImage);
    }

    let img = image::load_from_memory(&data)?;
    let (width, height) = img.dimensions();

    if width <= max_dimension && height <= max_dimension {
        return Ok(data);
    }

    let scale = (max_dimension as f64) / (width.max(height) as f64);
    let new_w = (((width as f64) * scale).round() as u32).max(1);
    let new_h = (((height as f64) * scale).round() as u32).max(1);

    log::debug!("downscaling query image {width}x{height} -> {new_w}x{new_h}");
    let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Lanczos3);

    let mut buf = Vec::new();
    resized.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Resolve a query image from a local path or an http(s) URL.
///
/// Any failure is logged and yields `None`, so the image modality is simply
/// skipped.
pub async fn load_query_image(
    client: &reqwest::Client,
    source: &str,
    timeout: Duration,
) -> Option<Vec<u8>> {
    let source = source.trim();
    if source.is_empty() {
        return None;
    }

    match fetch_and_prepare(client, source, timeout).await {
        Ok(data) => Some(data),
        Err(err) => {
            log::warn!("query image {source:?} skipped: {err}");
            None
        }
    }
}

async fn fetch_and_prepare(
    client: &reqwest::Client,
    source: &str,
    timeout: Duration,
) -> Result<Vec<u8>, ImageError> {
    let data = if source.starts_with("http://") || source.starts_with("https://") {
        download_image(client, source, timeout).await?
    } else {
        tokio::fs::read(Path::new(source)).await?
    };

    prepare_blocking(data).await
}

/// [`prepare`] on the blocking pool with the default bound.
pub async fn prepare_blocking(data: Vec<u8>) -> Result<Vec<u8>, ImageError> {
    tokio::task::spawn_blocking(move || prepare(data, MAX_QUERY_DIMENSION)).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 0, 0, 255]));

        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_is_image() {
        assert!(is_image(&create_test_png(1, 1)));
        assert!(!is_image(b"GIF? no, just text"));
        assert!(!is_image(&[]));
    }

    #[test]
    fn test_small_image_untouched() {
        let png = create_test_png(10, 20);
        let prepared = prepare(png.clone(), 1024).unwrap();
        assert_eq!(prepared, png);
    }

    #[test]
    fn test_large_image_downscaled() {
        let png = create_test_png(200, 100);
        let prepared = prepare(png, 50).unwrap();

        let img = image::load_from_memory(&prepared).unwrap();
        assert_eq!(img.dimensions(), (50, 25));
        assert_eq!(image::guess_format(&prepared).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            prepare(b"not an image".to_vec(), 1024),
            Err(ImageError::NotAnImage)
        ));
    }

    #[tokio::test]
    async fn test_load_from_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("query.png");
        std::fs::write(&path, create_test_png(4, 4)).unwrap();

        let client = reqwest::Client::new();
        let data = load_query_image(&client, path.to_str().unwrap(), Duration::from_secs(1)).await;
        assert!(data.is_some());

        let missing = tmp.path().join("missing.png");
        let data =
            load_query_image(&client, missing.to_str().unwrap(), Duration::from_secs(1)).await;
        assert!(data.is_none());

        assert!(load_query_image(&client, "  ", Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_url_is_none() {
        let client = reqwest::Client::new();
        let data = load_query_image(
            &client,
            "http://127.0.0.1:1/meme.png",
            Duration::from_secs(1),
        )
        .await;
        assert!(data.is_none());
    }
}
