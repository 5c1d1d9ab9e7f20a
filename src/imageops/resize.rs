use image::{imageops, imageops::FilterType, ImageBuffer, Luma};
use ndarray::prelude::*;

use crate::errors::{MedSegError, Result};

/// Resizes an intensity image with a linear (triangle) filter.
pub fn resize_bilinear(image: ArrayView2<f32>, height: u32, width: u32) -> Result<Array2<f32>> {
    let (h, w) = image.dim();
    if (h, w) == (height as usize, width as usize) {
        return Ok(image.to_owned());
    }

    let pixels = image.iter().copied().collect::<Vec<f32>>();
    let buffer = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| {
            MedSegError::image(
                "build resize buffer",
                format!("buffer does not match {}x{} image", h, w),
            )
        })?;

    let resized = imageops::resize(&buffer, width, height, FilterType::Triangle);
    Ok(Array2::from_shape_vec(
        (height as usize, width as usize),
        resized.into_raw(),
    )?)
}

/// Resizes a label map by nearest-neighbour sampling so no new label values appear.
pub fn resize_nearest<T: Copy>(labels: ArrayView2<T>, height: u32, width: u32) -> Array2<T> {
    let (h, w) = labels.dim();
    let (height, width) = (height as usize, width as usize);
    if (h, w) == (height, width) {
        return labels.to_owned();
    }

    let source_index = |dst: usize, src_len: usize, dst_len: usize| {
        let pos = (dst as f64 + 0.5) * src_len as f64 / dst_len as f64;
        (pos.floor() as usize).min(src_len.saturating_sub(1))
    };
    let rows = (0..height)
        .map(|y| source_index(y, h, height))
        .collect::<Vec<_>>();
    let cols = (0..width)
        .map(|x| source_index(x, w, width))
        .collect::<Vec<_>>();

    Array2::from_shape_fn((height, width), |(y, x)| labels[[rows[y], cols[x]]])
}
