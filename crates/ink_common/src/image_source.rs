//! Image acquisition: remote fetch with retry, and the generated
//! placeholder shown when the first fetch fails.

use image::{DynamicImage, GrayImage, Luma};
use tracing::debug;

use crate::error::FrameError;
use crate::retry::{retry, RetryPolicy};

/// GET `url` and decode the body, retrying per `policy`.
///
/// Transport failures, non-2xx statuses, and undecodable bodies all count
/// as `Fetch` and consume one attempt each.
pub async fn fetch_image(
    http: &reqwest::Client,
    url: &str,
    policy: RetryPolicy,
) -> Result<DynamicImage, FrameError> {
    let http = http.clone();
    let url = url.to_string();
    retry(policy, "image fetch", move || {
        let http = http.clone();
        let url = url.clone();
        async move { fetch_once(&http, &url).await }
    })
    .await
}

async fn fetch_once(http: &reqwest::Client, url: &str) -> Result<DynamicImage, FrameError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| FrameError::Fetch(format!("GET {}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FrameError::Fetch(format!("GET {}: status {}", url, status)));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| FrameError::Fetch(format!("GET {}: body read: {}", url, e)))?;
    debug!("fetched {} bytes from {}", bytes.len(), url);

    image::load_from_memory(&bytes).map_err(|e| FrameError::Fetch(format!("decode: {}", e)))
}

/// Frame shown when no image could be fetched: dark field, light border,
/// diagonal cross. Generated so the crate ships no image assets.
pub fn placeholder_image(width: u32, height: u32) -> DynamicImage {
    const BACKGROUND: Luma<u8> = Luma([30u8]);
    const FOREGROUND: Luma<u8> = Luma([220u8]);
    const BORDER: u32 = 3;

    let mut canvas = GrayImage::from_pixel(width.max(1), height.max(1), BACKGROUND);
    let (w, h) = canvas.dimensions();
    if w < 2 * BORDER + 2 || h < 2 * BORDER + 2 {
        return DynamicImage::ImageLuma8(canvas);
    }

    for x in 0..w {
        for b in 0..BORDER {
            canvas.put_pixel(x, b, FOREGROUND);
            canvas.put_pixel(x, h - 1 - b, FOREGROUND);
        }
    }
    for y in 0..h {
        for b in 0..BORDER {
            canvas.put_pixel(b, y, FOREGROUND);
            canvas.put_pixel(w - 1 - b, y, FOREGROUND);
        }
    }

    // The cross marks the frame as a fallback rather than a fetched photo.
    for x in 0..w {
        let y = (u64::from(x) * u64::from(h - 1) / u64::from(w - 1)) as u32;
        for line_y in [y, h - 1 - y] {
            canvas.put_pixel(x, line_y, FOREGROUND);
            if line_y + 1 < h {
                canvas.put_pixel(x, line_y + 1, FOREGROUND);
            }
        }
    }

    DynamicImage::ImageLuma8(canvas)
}
