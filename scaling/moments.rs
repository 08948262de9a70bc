//! # Empirical Inverse Moments
//!
//! Reduces a block of sorted eigenvalue samples to one log-moment per rank:
//! `y[k] = ln(mean_rows(value[row, m0 + k] ^ s))`.
//!
//! The mean is taken in the original scale and only then logged. Averaging the
//! logarithms instead would estimate `E[s ln λ]`, a different quantity with a
//! different rank scaling.

use crate::types::{RankWindow, SampleMatrix, WindowError};
use ndarray::{Array1, Axis};
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MomentError {
    #[error("Cannot estimate a moment from an empty set of samples.")]
    EmptySubset,
    #[error("Sample rows [{start}, {end}) exceed the {num_samples} loaded samples.")]
    RowsOutOfBounds {
        start: usize,
        end: usize,
        num_samples: usize,
    },
    #[error(
        "Sample {row} has the non-positive value {value} at rank {rank}; negative powers and logarithms need strictly positive eigenvalues."
    )]
    NonPositiveValue { row: usize, rank: usize, value: f64 },
    #[error(
        "The empirical moment E[x^{exponent}] at rank {rank} evaluated to {value}, which has no finite logarithm."
    )]
    NonFiniteMoment { rank: usize, exponent: f64, value: f64 },
    #[error(transparent)]
    Window(#[from] WindowError),
}

/// Estimates `ln E[λ_rank ^ exponent]` for every rank in `window`, averaging over
/// the samples in `rows`.
///
/// Every selected entry is validated before any power is taken, so a bad input
/// is reported by position rather than surfacing later as `NaN`.
pub fn estimate_log_moments(
    matrix: &SampleMatrix,
    rows: Range<usize>,
    window: &RankWindow,
    exponent: f64,
) -> Result<Array1<f64>, MomentError> {
    if rows.is_empty() {
        return Err(MomentError::EmptySubset);
    }
    if rows.end > matrix.num_samples() {
        return Err(MomentError::RowsOutOfBounds {
            start: rows.start,
            end: rows.end,
            num_samples: matrix.num_samples(),
        });
    }

    let row_offset = rows.start;
    let block = matrix.window_view(rows, window)?;

    for ((row, col), &value) in block.indexed_iter() {
        if value.is_nan() || value <= 0.0 {
            return Err(MomentError::NonPositiveValue {
                row: row_offset + row,
                rank: window.first_rank() + col,
                value,
            });
        }
    }

    let count = block.nrows() as f64;
    let mut log_moments = Array1::zeros(window.len);
    for (col, column) in block.axis_iter(Axis(1)).enumerate() {
        let sum: f64 = column.iter().map(|&value| value.powf(exponent)).sum();
        let mean = sum / count;
        if !mean.is_finite() || mean <= 0.0 {
            return Err(MomentError::NonFiniteMoment {
                rank: window.first_rank() + col,
                exponent,
                value: mean,
            });
        }
        log_moments[col] = mean.ln();
    }

    log::debug!(
        "Estimated {} log-moments over {} samples for {window} (s = {exponent})",
        window.len,
        block.nrows()
    );

    Ok(log_moments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn small_matrix() -> SampleMatrix {
        SampleMatrix::new(array![
            [1.0, 2.0, 4.0],
            [2.0, 2.0, 8.0],
            [0.5, 1.0, 2.0],
        ])
    }

    #[test]
    fn log_of_mean_not_mean_of_log() {
        let matrix = small_matrix();
        let window = RankWindow::new(0, 2).unwrap();
        let y = estimate_log_moments(&matrix, 0..3, &window, -1.0).unwrap();

        let expected_rank1 = ((1.0 + 0.5 + 2.0) / 3.0_f64).ln();
        let expected_rank2 = ((0.5 + 0.5 + 1.0) / 3.0_f64).ln();
        assert_abs_diff_eq!(y[0], expected_rank1, epsilon = 1e-12);
        assert_abs_diff_eq!(y[1], expected_rank2, epsilon = 1e-12);

        let mean_of_logs = ((1.0_f64).ln() + (0.5_f64).ln() + (2.0_f64).ln()) / 3.0;
        assert!((y[0] - mean_of_logs).abs() > 1e-3);
    }

    #[test]
    fn respects_row_subset_and_window_offset() {
        let matrix = small_matrix();
        let window = RankWindow::new(1, 2).unwrap();
        let y = estimate_log_moments(&matrix, 1..2, &window, -2.0).unwrap();
        assert_abs_diff_eq!(y[0], (2.0_f64).powf(-2.0).ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(y[1], (8.0_f64).powf(-2.0).ln(), epsilon = 1e-12);
    }

    #[test]
    fn empty_subset_is_rejected() {
        let matrix = small_matrix();
        let window = RankWindow::new(0, 2).unwrap();
        assert_eq!(
            estimate_log_moments(&matrix, 2..2, &window, -2.0),
            Err(MomentError::EmptySubset)
        );
    }

    #[test]
    fn non_positive_entries_are_reported_with_position() {
        let matrix = SampleMatrix::new(array![[1.0, 2.0, 3.0], [0.0, 2.0, 3.0]]);
        let window = RankWindow::new(0, 3).unwrap();
        match estimate_log_moments(&matrix, 0..2, &window, -2.0) {
            Err(MomentError::NonPositiveValue { row, rank, value }) => {
                assert_eq!(row, 1);
                assert_eq!(rank, 1);
                assert_eq!(value, 0.0);
            }
            other => panic!("Expected NonPositiveValue, got {other:?}"),
        }
    }

    #[test]
    fn non_positive_entries_outside_window_are_ignored() {
        let matrix = SampleMatrix::new(array![[-1.0, 2.0, 3.0], [-1.0, 2.5, 3.0]]);
        let window = RankWindow::new(1, 2).unwrap();
        assert!(estimate_log_moments(&matrix, 0..2, &window, -2.0).is_ok());
    }

    #[test]
    fn overflowing_moment_is_an_error() {
        let matrix = SampleMatrix::new(array![[1e-200, 1.0], [1e-200, 1.0]]);
        let window = RankWindow::new(0, 2).unwrap();
        assert!(matches!(
            estimate_log_moments(&matrix, 0..2, &window, -4.0),
            Err(MomentError::NonFiniteMoment { rank: 1, .. })
        ));
    }

    #[test]
    fn rows_beyond_matrix_are_rejected() {
        let matrix = small_matrix();
        let window = RankWindow::new(0, 2).unwrap();
        assert!(matches!(
            estimate_log_moments(&matrix, 1..4, &window, -2.0),
            Err(MomentError::RowsOutOfBounds { .. })
        ));
    }

    #[test]
    fn log_moments_are_non_increasing_for_sorted_rows() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for trial in 0..50 {
            let num_samples = rng.gen_range(1..40);
            let num_ranks = rng.gen_range(2..25);
            let mut values = Array2::zeros((num_samples, num_ranks));
            for mut row in values.rows_mut() {
                let mut current = rng.gen_range(1e-3..1.0);
                for value in row.iter_mut() {
                    *value = current;
                    if rng.gen_bool(0.8) {
                        current += rng.gen_range(0.0..2.0);
                    }
                }
            }
            let matrix = SampleMatrix::new(values);
            let window = RankWindow::new(0, num_ranks).unwrap();
            let exponent = -rng.gen_range(0.1..4.0);
            let y = estimate_log_moments(&matrix, 0..num_samples, &window, exponent).unwrap();
            for k in 1..y.len() {
                assert!(
                    y[k] <= y[k - 1],
                    "trial {trial}: log-moment increased from {} to {} at rank {}",
                    y[k - 1],
                    y[k],
                    k + 1
                );
            }
        }
    }
}
