use ndarray::prelude::*;
use tracing::debug;

use crate::config::InputSize;
use crate::errors::Result;
use crate::imageops::{resize_bilinear, resize_nearest, stats::percentile};
use crate::traits::Segmenter;

/// Percentile cut-offs for the threshold heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicParams {
    /// Pixels above this percentile become class 1.
    pub tissue_percentile: f32,
    /// Pixels at or above this percentile become class 2.
    pub lesion_percentile: f32,
}

impl Default for HeuristicParams {
    fn default() -> Self {
        Self {
            tissue_percentile: 50.0,
            lesion_percentile: 95.0,
        }
    }
}

/// Two-threshold stand-in for a trained network.
///
/// Labels the brighter half of the image as tissue and the brightest tail as
/// lesion. It is a rough demo heuristic, not a clinical classifier.
#[derive(Debug, Clone, Default)]
pub struct ThresholdSegmenter {
    params: HeuristicParams,
}

impl ThresholdSegmenter {
    pub const fn new(params: HeuristicParams) -> Self {
        Self { params }
    }
}

impl Segmenter for ThresholdSegmenter {
    fn predict(&self, image: ArrayView2<f32>) -> Result<Array2<u32>> {
        let (Some(tissue), Some(lesion)) = (
            percentile(image.iter().copied(), self.params.tissue_percentile),
            percentile(image.iter().copied(), self.params.lesion_percentile),
        ) else {
            return Ok(Array2::zeros(image.raw_dim()));
        };
        debug!("Threshold heuristic: tissue > {:.4}, lesion >= {:.4}", tissue, lesion);

        Ok(image.mapv(|v| {
            if v >= lesion {
                2
            } else if v > tissue {
                1
            } else {
                0
            }
        }))
    }

    fn name(&self) -> &str {
        "threshold-heuristic"
    }

    fn device(&self) -> String {
        "cpu".to_string()
    }
}

/// Runs `segmenter` on a single 2D slice and returns a mask at the slice's
/// original resolution.
///
/// The slice is brought to `[0, 1]` if needed, resized bilinearly to the
/// segmenter's own input size (or `input_size` when it has none), predicted, and the labels are resized back with
/// nearest-neighbour sampling.
pub fn segment_slice(
    image: ArrayView2<f32>,
    segmenter: &dyn Segmenter,
    input_size: InputSize,
) -> Result<Array2<u32>> {
    let (height, width) = image.dim();

    let max = image.iter().copied().fold(f32::MIN, f32::max);
    let normalized = if max > 1.0 {
        image.mapv(|v| v / max)
    } else {
        image.to_owned()
    };

    let input_size = segmenter.input_size().unwrap_or(input_size);
    let resized = resize_bilinear(normalized.view(), input_size.height, input_size.width)?;
    let prediction = segmenter.predict(resized.view())?;
    Ok(resize_nearest(prediction.view(), height as u32, width as u32))
}
