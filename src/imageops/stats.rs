//! Intensity statistics over flattened pixel data.

use num_traits::AsPrimitive;

/// Percentile `q` in `[0, 100]` with linear interpolation between closest ranks.
///
/// Returns `None` for empty input.
pub fn percentile<I, T>(values: I, q: f32) -> Option<f32>
where
    I: IntoIterator<Item = T>,
    T: AsPrimitive<f32>,
{
    let mut sorted = values.into_iter().map(|v| v.as_()).collect::<Vec<f32>>();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));

    let rank = (q.clamp(0.0, 100.0) as f64 / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = (rank - lower as f64) as f32;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

pub fn mean<I, T>(values: I) -> Option<f32>
where
    I: IntoIterator<Item = T>,
    T: AsPrimitive<f32>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0f64, 0usize), |(sum, count), v| (sum + v.as_() as f64, count + 1));
    (count > 0).then(|| (sum / count as f64) as f32)
}
