//! Rule-based abnormality findings derived from a segmentation mask and raw
//! intensity statistics.
//!
//! These rules are a rough screening heuristic. A dedicated classifier should
//! replace them for anything beyond a demo.

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::imageops::stats::{mean, percentile};

/// One heuristic observation returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub label: String,
    pub confidence: f32,
    pub region: String,
    pub description: String,
}

/// Tuning constants for the scorer.
///
/// Lesion confidence is `min(cap, base + gain * min(ratio * area_scale, 1))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringParams {
    pub confidence_cap: f32,
    pub confidence_base: f32,
    pub confidence_gain: f32,
    pub area_scale: f32,
    pub intensity_percentile: f32,
    pub intensity_ratio: f32,
    pub intensity_confidence: f32,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            confidence_cap: 0.99,
            confidence_base: 0.5,
            confidence_gain: 0.4,
            area_scale: 20.0,
            intensity_percentile: 99.5,
            intensity_ratio: 2.0,
            intensity_confidence: 0.65,
        }
    }
}

impl ScoringParams {
    pub fn lesion_confidence(&self, ratio: f32) -> f32 {
        let saturation = (ratio * self.area_scale).min(1.0);
        let confidence = (self.confidence_base + self.confidence_gain * saturation)
            .min(self.confidence_cap);
        round2(confidence)
    }
}

fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

/// Index of the label treated as abnormal tissue.
///
/// The first label containing "lesion" (any case) or named exactly "tumor";
/// otherwise the last label when there is more than one.
pub fn lesion_class(labels: &[String]) -> Option<usize> {
    labels
        .iter()
        .position(|l| l.to_lowercase().contains("lesion") || l == "tumor")
        .or_else(|| (labels.len() > 1).then(|| labels.len() - 1))
}

/// Derives findings from the image, its mask and the label set.
///
/// `image` holds intensities in `[0, 1]`; `mask` must have the same shape.
pub fn detect_abnormalities(
    image: ArrayView2<f32>,
    mask: ArrayView2<u32>,
    labels: &[String],
    params: &ScoringParams,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    if let Some(idx) = lesion_class(labels) {
        let area = mask.iter().filter(|&&c| c as usize == idx).count();
        if area > 0 {
            let ratio = area as f32 / mask.len().max(1) as f32;
            let confidence = params.lesion_confidence(ratio);
            debug!("Lesion class {} covers {:.4} of the image", idx, ratio);
            findings.push(Finding {
                label: "Potential lesion / abnormal tissue".to_string(),
                confidence,
                region: "segmented_region".to_string(),
                description: format!(
                    "Segmentation identified {} (relative area {:.2}%). Clinical correlation recommended.",
                    labels[idx],
                    ratio * 100.0
                ),
            });
        }
    }

    if has_high_intensity_region(image, params) {
        findings.push(Finding {
            label: "High-intensity region detected".to_string(),
            confidence: params.intensity_confidence,
            region: "intensity_analysis".to_string(),
            description: "Image contains high-intensity regions. Consider review for calcification or other bright findings.".to_string(),
        });
    }

    findings
}

/// Whether the bright tail of the 8-bit histogram sits well above the mean.
fn has_high_intensity_region(image: ArrayView2<f32>, params: &ScoringParams) -> bool {
    let quantized = image
        .iter()
        .map(|v| (v.clamp(0.0, 1.0) * 255.0) as u8)
        .collect::<Vec<u8>>();

    match (
        percentile(quantized.iter().copied(), params.intensity_percentile),
        mean(quantized.iter().copied()),
    ) {
        (Some(high), Some(mean)) => mean > 0.0 && high > mean * params.intensity_ratio,
        _ => false,
    }
}
