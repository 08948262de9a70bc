//! # Coefficient of Determination
//!
//! Scores a fitted line against any set of points, in-sample or held out:
//!
//! `R² = 1 − SS_res / SS_tot`, where `SS_tot` is measured around the mean of the
//! evaluation set's own responses. Using the training mean as the baseline
//! would credit the model for any shift between the two subsets and misreport
//! generalization.
//!
//! `R²` below zero is a legitimate result: the line explains the evaluation
//! points worse than their own mean does.

use crate::regression::FittedModel;
use crate::types::RegressionDataset;
use ndarray::ArrayView1;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GoodnessError {
    #[error("Cannot score a model against an empty evaluation set.")]
    EmptySet,
    #[error(
        "R² is undefined for this evaluation set of {0} point(s): its responses have zero variance."
    )]
    UndefinedR2(usize),
    #[error("Evaluation predictor has {x_len} values but response has {y_len}.")]
    LengthMismatch { x_len: usize, y_len: usize },
}

/// Sum of squared residuals of `model` over the points.
pub fn residual_sum_of_squares(model: &FittedModel, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    x.iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| {
            let residual = yi - model.predict(xi);
            residual * residual
        })
        .sum()
}

/// `R²` of `model` on the points `(x, y)`, baselined on the mean of `y`.
pub fn r_squared(
    model: &FittedModel,
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
) -> Result<f64, GoodnessError> {
    if x.len() != y.len() {
        return Err(GoodnessError::LengthMismatch {
            x_len: x.len(),
            y_len: y.len(),
        });
    }
    let n = y.len();
    if n == 0 {
        return Err(GoodnessError::EmptySet);
    }
    // A constant response rarely has an exact mean, so its total sum of squares
    // can come out as rounding noise rather than zero.
    if y.iter().all(|&yi| yi == y[0]) {
        return Err(GoodnessError::UndefinedR2(n));
    }

    let y_mean = y.sum() / n as f64;
    let ss_tot: f64 = y.iter().map(|&yi| (yi - y_mean) * (yi - y_mean)).sum();
    if ss_tot <= 0.0 {
        return Err(GoodnessError::UndefinedR2(n));
    }

    Ok(1.0 - residual_sum_of_squares(model, x, y) / ss_tot)
}

/// `R²` of `model` on a regression dataset.
pub fn score(model: &FittedModel, dataset: &RegressionDataset) -> Result<f64, GoodnessError> {
    if dataset.is_empty() {
        return Err(GoodnessError::EmptySet);
    }
    r_squared(model, dataset.x.view(), dataset.y.view())
}
