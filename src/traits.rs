use crate::config::InputSize;
use crate::errors::Result;
use ndarray::prelude::*;

/// A 2D segmentation backend.
///
/// Implementations receive an image already resized to the pipeline's input
/// resolution and return one class index per pixel at that same resolution.
/// Resizing back to the original resolution is the caller's job.
pub trait Segmenter: Send + Sync {
    /// Per-pixel class prediction for a normalized `(H, W)` image in `[0, 1]`.
    fn predict(&self, image: ArrayView2<f32>) -> Result<Array2<u32>>;

    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Device the backend runs on, e.g. `cpu` or `cuda:0`.
    fn device(&self) -> String;

    /// Resolution the backend requires, if it is fixed.
    ///
    /// When set, it takes precedence over the configured input size.
    fn input_size(&self) -> Option<InputSize> {
        None
    }
}
