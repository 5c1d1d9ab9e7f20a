mod resize;
pub mod stats;

pub use resize::{resize_bilinear, resize_nearest};

use image::{ImageBuffer, Luma, Primitive};
use ndarray::prelude::*;
use num_traits::AsPrimitive;

/// Maximum representable value of a subpixel type, as f32 (1.0 for float samples).
pub fn get_max_value<S: Primitive + AsPrimitive<f32>>() -> f32 {
    S::DEFAULT_MAX_VALUE.as_()
}

/// Converts a grayscale buffer into an `(H, W)` array scaled to `[0, 1]`.
pub fn normalize_luma<S>(image: &ImageBuffer<Luma<S>, Vec<S>>) -> Array2<f32>
where
    S: Primitive + AsPrimitive<f32> + 'static,
{
    let max = get_max_value::<S>();
    let (width, height) = image.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        let Luma([v]) = *image.get_pixel(x as u32, y as u32);
        v.as_() / max
    })
}
