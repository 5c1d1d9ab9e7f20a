use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::prelude::*;

use crate::errors::{MedSegError, Result};

/// Display colors by class index: background, normal tissue, lesion.
pub const PALETTE: [Rgb<u8>; 3] = [
    Rgb([0, 0, 0]),
    Rgb([70, 130, 180]),
    Rgb([255, 99, 71]),
];

/// Paints `mask` with [`PALETTE`]. Classes outside the palette stay black.
pub fn colorize(mask: ArrayView2<u32>) -> RgbImage {
    let (height, width) = mask.dim();
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        PALETTE
            .get(mask[[y as usize, x as usize]] as usize)
            .copied()
            .unwrap_or(PALETTE[0])
    })
}

pub fn encode_mask_png(mask: ArrayView2<u32>) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    colorize(mask)
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| MedSegError::image("encode mask png", e))?;
    Ok(buf.into_inner())
}

pub fn encode_mask_b64(mask: ArrayView2<u32>) -> Result<String> {
    Ok(STANDARD.encode(encode_mask_png(mask)?))
}

/// Recovers class indices from a color-coded mask PNG.
///
/// Colors that are not in the palette decode as background.
pub fn decode_mask_png(bytes: &[u8]) -> Result<Array2<u32>> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map_err(|e| MedSegError::image("decode mask png", e))?
        .into_rgb8();
    let (width, height) = image.dimensions();
    Ok(Array2::from_shape_fn(
        (height as usize, width as usize),
        |(y, x)| {
            let pixel = image.get_pixel(x as u32, y as u32);
            PALETTE
                .iter()
                .position(|c| c == pixel)
                .unwrap_or(0) as u32
        },
    ))
}

pub fn decode_mask_b64(encoded: &str) -> Result<Array2<u32>> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| MedSegError::validation("segmentation_mask_b64", e.to_string()))?;
    decode_mask_png(&bytes)
}
