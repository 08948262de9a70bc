//! # Single-Predictor Ordinary Least Squares
//!
//! Fits `y ≈ intercept + slope·x` in closed form:
//!
//! - `slope = Σ(x − x̄)(y − ȳ) / Σ(x − x̄)²`
//! - `intercept = ȳ − slope·x̄`
//!
//! Inferential statistics (standard errors, t-statistics, p-values and Student-t
//! confidence intervals) are optional and need at least one residual degree of
//! freedom, i.e. three or more points.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegressionError {
    #[error("Predictor has {x_len} values but response has {y_len}.")]
    LengthMismatch { x_len: usize, y_len: usize },
    #[error("At least 2 points are required to fit a line, but {0} were provided.")]
    TooFewPoints(usize),
    #[error("All {0} predictor values are identical, so the slope is undefined.")]
    DegenerateDesign(usize),
    #[error("Confidence level {0} must lie strictly between 0 and 1.")]
    InvalidConfidenceLevel(f64),
    #[error("Could not build the Student t distribution with {degrees_of_freedom} degrees of freedom: {reason}")]
    Distribution {
        degrees_of_freedom: usize,
        reason: String,
    },
}

/// Uncertainty summary for one coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoefficientInference {
    pub standard_error: f64,
    /// Absent when the standard error is zero (an exact fit).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_statistic: Option<f64>,
    /// Two-sided p-value for a zero coefficient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    pub confidence_interval: (f64, f64),
}

/// Residual-based inference attached to a fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Inference {
    pub confidence_level: f64,
    pub degrees_of_freedom: usize,
    pub residual_standard_error: f64,
    pub intercept: CoefficientInference,
    pub slope: CoefficientInference,
}

/// A fitted line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub intercept: f64,
    pub slope: f64,
    pub num_points: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference: Option<Inference>,
}

impl FittedModel {
    #[inline]
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Sufficient statistics shared by the point fit and the inference.
struct Moments {
    n: usize,
    x_mean: f64,
    sxx: f64,
    intercept: f64,
    slope: f64,
}

fn compute_moments(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Result<Moments, RegressionError> {
    if x.len() != y.len() {
        return Err(RegressionError::LengthMismatch {
            x_len: x.len(),
            y_len: y.len(),
        });
    }
    let n = x.len();
    if n < 2 {
        return Err(RegressionError::TooFewPoints(n));
    }
    let first = x[0];
    if x.iter().all(|&value| value == first) {
        return Err(RegressionError::DegenerateDesign(n));
    }

    let count = n as f64;
    let x_mean = x.sum() / count;
    let y_mean = y.sum() / count;

    let (sxx, sxy) = x
        .iter()
        .zip(y.iter())
        .fold((0.0, 0.0), |(sxx, sxy), (&xi, &yi)| {
            let dx = xi - x_mean;
            (sxx + dx * dx, sxy + dx * (yi - y_mean))
        });
    if sxx <= 0.0 {
        return Err(RegressionError::DegenerateDesign(n));
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    Ok(Moments {
        n,
        x_mean,
        sxx,
        intercept,
        slope,
    })
}

/// Fits intercept and slope by ordinary least squares.
pub fn fit_ols(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Result<FittedModel, RegressionError> {
    let moments = compute_moments(x, y)?;
    Ok(FittedModel {
        intercept: moments.intercept,
        slope: moments.slope,
        num_points: moments.n,
        inference: None,
    })
}

/// Fits by ordinary least squares and attaches standard errors, t-statistics,
/// p-values and confidence intervals at `confidence_level`.
///
/// With exactly two points the line interpolates both and there are no residual
/// degrees of freedom; the fit is returned without inference.
pub fn fit_ols_with_inference(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    confidence_level: f64,
) -> Result<FittedModel, RegressionError> {
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(RegressionError::InvalidConfidenceLevel(confidence_level));
    }
    let moments = compute_moments(x, y)?;
    let mut model = FittedModel {
        intercept: moments.intercept,
        slope: moments.slope,
        num_points: moments.n,
        inference: None,
    };
    if moments.n <= 2 {
        log::debug!("Skipping regression inference: no residual degrees of freedom");
        return Ok(model);
    }

    let degrees_of_freedom = moments.n - 2;
    let sse: f64 = x
        .iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| {
            let residual = yi - model.predict(xi);
            residual * residual
        })
        .sum();
    let residual_standard_error = (sse / degrees_of_freedom as f64).sqrt();

    let t_dist = StudentsT::new(0.0, 1.0, degrees_of_freedom as f64).map_err(|e| {
        RegressionError::Distribution {
            degrees_of_freedom,
            reason: e.to_string(),
        }
    })?;
    let critical = t_dist.inverse_cdf(0.5 + confidence_level / 2.0);

    let count = moments.n as f64;
    let slope_se = residual_standard_error / moments.sxx.sqrt();
    let intercept_se = residual_standard_error
        * (1.0 / count + moments.x_mean * moments.x_mean / moments.sxx).sqrt();

    let coefficient = |estimate: f64, standard_error: f64| {
        let (t_statistic, p_value) = if standard_error > 0.0 {
            let t = estimate / standard_error;
            (Some(t), Some(2.0 * (1.0 - t_dist.cdf(t.abs()))))
        } else {
            (None, None)
        };
        CoefficientInference {
            standard_error,
            t_statistic,
            p_value,
            confidence_interval: (
                estimate - critical * standard_error,
                estimate + critical * standard_error,
            ),
        }
    };

    model.inference = Some(Inference {
        confidence_level,
        degrees_of_freedom,
        residual_standard_error,
        intercept: coefficient(model.intercept, intercept_se),
        slope: coefficient(model.slope, slope_se),
    });
    Ok(model)
}
