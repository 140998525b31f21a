pub mod rolling_window;

pub use rolling_window::{RollingWindow, WindowSummary};

use crate::config::MAD_SCALE;

/// Median of `values`, averaging the middle pair for even lengths. `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median absolute deviation: `median(|x - median(x)|)`.
/// `None` with fewer than 2 values.
pub fn mad(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    mad_around(values, median(values)?)
}

/// MAD around an already computed median.
pub(crate) fn mad_around(values: &[f64], center: f64) -> Option<f64> {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Robust z-score `(current - median) / (1.4826 * mad)`.
/// `None` when the scaled MAD is zero.
pub fn robust_zscore(current: f64, median: f64, mad: f64) -> Option<f64> {
    let robust_std = MAD_SCALE * mad;
    if robust_std == 0.0 {
        return None;
    }
    Some((current - median) / robust_std)
}
