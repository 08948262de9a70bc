//! Log-rank design vector for the rank-scaling regression.

use crate::types::{RankWindow, RegressionDataset};
use ndarray::Array1;

/// `x[k] = ln(m0 + k + 1)`, the log of the 1-based rank of each window column.
///
/// Depends only on the window, so every ensemble size and split that shares a
/// window shares the same design.
pub fn log_ranks(window: &RankWindow) -> Array1<f64> {
    window
        .columns()
        .map(|column| ((column + 1) as f64).ln())
        .collect()
}

/// Pairs the window's log-ranks with the log-moments estimated over it.
pub fn regression_dataset(window: &RankWindow, log_moments: Array1<f64>) -> RegressionDataset {
    let dataset = RegressionDataset {
        x: log_ranks(window),
        y: log_moments,
    };
    debug_assert_eq!(dataset.len(), window.len);
    dataset
}
