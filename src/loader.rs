use std::time::Duration;

use image::DynamicImage;
use ndarray::prelude::*;
use reqwest::{Client, Url};
use tracing::debug;

use crate::errors::{MedSegError, Result};
use crate::imageops::normalize_luma;

/// Decodes an encoded image into a grayscale `(H, W)` array in `[0, 1]`.
///
/// Sources deeper than 8 bits per channel keep 16-bit precision.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<Array2<f32>> {
    if bytes.is_empty() {
        return Err(MedSegError::validation("image", "image data is empty"));
    }

    let decoded =
        image::load_from_memory(bytes).map_err(|e| MedSegError::image("decode image", e))?;
    debug!(
        "Decoded {}x{} image ({:?})",
        decoded.width(),
        decoded.height(),
        decoded.color()
    );

    into_2d(to_grayscale(&decoded).into_dyn())
}

fn to_grayscale(image: &DynamicImage) -> Array2<f32> {
    let color = image.color();
    let bits_per_channel = color.bits_per_pixel() / u16::from(color.channel_count());
    if bits_per_channel > 8 {
        normalize_luma(&image.to_luma16())
    } else {
        normalize_luma(&image.to_luma8())
    }
}

/// Reduces an image array to exactly two dimensions.
///
/// `(H, W, C)` inputs are averaged over the channel axis, other ranks have their
/// singleton axes removed. Anything that is still not a non-empty 2D array is
/// rejected as invalid input.
pub fn into_2d(image: ArrayD<f32>) -> Result<Array2<f32>> {
    let image = match image.ndim() {
        2 => image,
        3 => image.mean_axis(Axis(2)).ok_or_else(|| {
            MedSegError::validation("image", "image has an empty channel dimension")
        })?,
        _ => {
            let squeezed = image
                .shape()
                .iter()
                .copied()
                .filter(|&d| d != 1)
                .collect::<Vec<_>>();
            image
                .into_shape_with_order(IxDyn(&squeezed))
                .map_err(|e| MedSegError::image("squeeze image", e))?
        }
    };

    let shape = image.shape().to_vec();
    let image = image.into_dimensionality::<Ix2>().map_err(|_| {
        MedSegError::validation("image", format!("Image must be 2D (H, W), got shape {:?}", shape))
    })?;
    if image.is_empty() {
        return Err(MedSegError::validation(
            "image",
            format!("Image has no pixels, got shape {:?}", shape),
        ));
    }
    Ok(image)
}

/// Downloads images referenced by URL.
#[derive(Clone, Debug)]
pub struct ImageFetcher {
    client: Client,
}

impl ImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MedSegError::Configuration {
                message: format!("HTTP client initialization failed: {}", e),
            })?;
        Ok(Self { client })
    }

    /// Fetches the raw bytes behind `url`. Non-success statuses are errors.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url)
            .map_err(|e| MedSegError::validation("image_url", format!("invalid URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(MedSegError::validation(
                "image_url",
                format!("unsupported URL scheme `{}`", parsed.scheme()),
            ));
        }

        let fetch_error = |source| MedSegError::Fetch {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_error)?;
        let bytes = response.bytes().await.map_err(fetch_error)?;

        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}
