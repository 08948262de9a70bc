//! # Experiment Driver
//!
//! Runs the estimation-and-validation pipeline over the Cartesian product of
//! ensemble sizes, rank windows and splits:
//!
//! 1. The sample matrix of each ensemble size is loaded once, projected to the
//!    union of the windows that fit it, and shared read-only by every
//!    configuration of that size.
//! 2. Each configuration is independent. Configurations of one size are fitted
//!    in parallel on the rayon pool and collected back in plan order, so the
//!    report is identical to a sequential run.
//! 3. A failing configuration is recorded against its key and never aborts the
//!    rest of the batch.

use crate::data::{DataError, LoadRequest, SampleSource};
use crate::design;
use crate::goodness::{self, GoodnessError};
use crate::moments::{MomentError, estimate_log_moments};
use crate::progress::ExperimentProgress;
use crate::regression::{FittedModel, RegressionError, fit_ols, fit_ols_with_inference};
use crate::split::{self, Partition, SplitError};
use crate::types::{ConfigKey, RankWindow, RegressionDataset, SampleMatrix, SplitPlan, WindowError};
use itertools::{Itertools, iproduct};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Everything the driver needs besides the samples themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentPlan {
    /// Ensemble shape parameter. Informational: it selects datasets upstream
    /// and is carried into the report, but never enters the regression.
    pub alpha: f64,
    /// Moment exponent `s`, typically negative.
    pub exponent: f64,
    pub ensemble_sizes: Vec<usize>,
    pub windows: Vec<RankWindow>,
    pub splits: Vec<SplitPlan>,
    pub num_samples_cap: Option<usize>,
    /// Attach inferential statistics at this level when set.
    pub confidence_level: Option<f64>,
}

impl ExperimentPlan {
    /// Every configuration, ordered by ensemble size, then window, then split.
    /// Repeated ensemble sizes are run once.
    pub fn configurations(&self) -> Vec<ConfigKey> {
        iproduct!(
            self.ensemble_sizes.iter().copied().unique(),
            self.windows.iter().copied(),
            self.splits.iter().copied()
        )
        .map(|(ensemble_size, window, split)| ConfigKey {
            ensemble_size,
            window,
            split,
        })
        .collect()
    }

    /// The columns to read for `ensemble_size`, or `None` when no window fits it.
    pub fn load_request(&self, ensemble_size: usize) -> Option<LoadRequest> {
        let fitting = self
            .windows
            .iter()
            .filter(|window| window.check_within(ensemble_size).is_ok());
        RankWindow::span(fitting).map(|columns| LoadRequest {
            ensemble_size,
            columns,
            num_samples_cap: self.num_samples_cap,
        })
    }
}

/// Any failure of a single configuration.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Moment(#[from] MomentError),
    #[error(transparent)]
    Regression(#[from] RegressionError),
    #[error(transparent)]
    Goodness(#[from] GoodnessError),
}

/// Coarse classification of a configuration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingData,
    Io,
    MalformedRow,
    UnsortedRow,
    InvalidWindow,
    InvalidSplit,
    EmptySubset,
    NonPositiveValue,
    NonFiniteMoment,
    DegenerateDesign,
    InvalidRegressionInput,
    EmptySet,
    UndefinedR2,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingData => "missing_data",
            Self::Io => "io",
            Self::MalformedRow => "malformed_row",
            Self::UnsortedRow => "unsorted_row",
            Self::InvalidWindow => "invalid_window",
            Self::InvalidSplit => "invalid_split",
            Self::EmptySubset => "empty_subset",
            Self::NonPositiveValue => "non_positive_value",
            Self::NonFiniteMoment => "non_finite_moment",
            Self::DegenerateDesign => "degenerate_design",
            Self::InvalidRegressionInput => "invalid_regression_input",
            Self::EmptySet => "empty_set",
            Self::UndefinedR2 => "undefined_r2",
        })
    }
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Data(err) => match err {
                DataError::MissingData(_) | DataError::NoDatasetForSize(_) => {
                    FailureKind::MissingData
                }
                DataError::Io { .. } => FailureKind::Io,
                DataError::MalformedRow { .. } => FailureKind::MalformedRow,
                DataError::UnsortedRow { .. } => FailureKind::UnsortedRow,
                DataError::ColumnsOutOfRange { .. } | DataError::Window(_) => {
                    FailureKind::InvalidWindow
                }
            },
            Self::Window(_) => FailureKind::InvalidWindow,
            Self::Split(_) => FailureKind::InvalidSplit,
            Self::Moment(err) => match err {
                MomentError::EmptySubset => FailureKind::EmptySubset,
                MomentError::RowsOutOfBounds { .. } => FailureKind::InvalidSplit,
                MomentError::NonPositiveValue { .. } => FailureKind::NonPositiveValue,
                MomentError::NonFiniteMoment { .. } => FailureKind::NonFiniteMoment,
                MomentError::Window(_) => FailureKind::InvalidWindow,
            },
            Self::Regression(err) => match err {
                RegressionError::DegenerateDesign(_) => FailureKind::DegenerateDesign,
                _ => FailureKind::InvalidRegressionInput,
            },
            Self::Goodness(err) => match err {
                GoodnessError::EmptySet => FailureKind::EmptySet,
                GoodnessError::UndefinedR2(_) => FailureKind::UndefinedR2,
                GoodnessError::LengthMismatch { .. } => FailureKind::InvalidRegressionInput,
            },
        }
    }
}

/// A recorded configuration failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&PipelineError> for ConfigFailure {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ConfigFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// The outcome of one successful configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub key: ConfigKey,
    pub model: FittedModel,
    pub r2_train: f64,
    pub r2_eval: f64,
    pub partition: Partition,
    pub train: RegressionDataset,
    pub eval: RegressionDataset,
}

impl EvaluationResult {
    #[inline]
    pub fn intercept(&self) -> f64 {
        self.model.intercept
    }

    #[inline]
    pub fn slope(&self) -> f64 {
        self.model.slope
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRecord {
    pub key: ConfigKey,
    pub outcome: Result<EvaluationResult, ConfigFailure>,
}

/// Results of a whole experiment, in plan order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentReport {
    pub alpha: f64,
    pub exponent: f64,
    pub records: Vec<ConfigRecord>,
}

impl ExperimentReport {
    pub fn get(&self, key: &ConfigKey) -> Option<&Result<EvaluationResult, ConfigFailure>> {
        self.records
            .iter()
            .find(|record| &record.key == key)
            .map(|record| &record.outcome)
    }

    pub fn successes(&self) -> impl Iterator<Item = &EvaluationResult> {
        self.records
            .iter()
            .filter_map(|record| record.outcome.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ConfigKey, &ConfigFailure)> {
        self.records
            .iter()
            .filter_map(|record| record.outcome.as_ref().err().map(|e| (&record.key, e)))
    }
}

/// Runs the full pipeline for one configuration on an already loaded matrix.
pub fn evaluate_configuration(
    matrix: &SampleMatrix,
    key: &ConfigKey,
    exponent: f64,
    confidence_level: Option<f64>,
) -> Result<EvaluationResult, PipelineError> {
    key.window.check_within(matrix.num_ranks())?;
    let partition = split::partition(matrix.num_samples(), &key.split)?;

    let train_moments = estimate_log_moments(matrix, partition.train.clone(), &key.window, exponent)?;
    let train = design::regression_dataset(&key.window, train_moments);
    let eval = if partition.is_in_sample() {
        train.clone()
    } else {
        let eval_moments =
            estimate_log_moments(matrix, partition.eval.clone(), &key.window, exponent)?;
        design::regression_dataset(&key.window, eval_moments)
    };

    let model = match confidence_level {
        Some(level) => fit_ols_with_inference(train.x.view(), train.y.view(), level)?,
        None => fit_ols(train.x.view(), train.y.view())?,
    };

    let r2_train = goodness::score(&model, &train)?;
    let r2_eval = goodness::score(&model, &eval)?;

    log::debug!(
        "{key}: slope {:.4}, intercept {:.4}, R² train {r2_train:.6}, eval {r2_eval:.6}",
        model.slope,
        model.intercept
    );

    Ok(EvaluationResult {
        key: *key,
        model,
        r2_train,
        r2_eval,
        partition,
        train,
        eval,
    })
}

/// Runs every configuration of `plan` against samples from `source`.
pub fn run_experiment<S>(
    plan: &ExperimentPlan,
    source: &S,
    progress: &dyn ExperimentProgress,
) -> ExperimentReport
where
    S: SampleSource + ?Sized,
{
    let keys = plan.configurations();
    let sizes: Vec<usize> = plan.ensemble_sizes.iter().copied().unique().collect();
    log::info!(
        "Running {} configurations over {} ensemble size(s) (alpha = {}, s = {})",
        keys.len(),
        sizes.len(),
        plan.alpha,
        plan.exponent
    );
    progress.on_experiment_start(keys.len());

    let mut records = Vec::with_capacity(keys.len());
    for ensemble_size in sizes {
        let group: Vec<ConfigKey> = keys
            .iter()
            .filter(|key| key.ensemble_size == ensemble_size)
            .copied()
            .collect();
        let matrix = load_matrix(plan, source, ensemble_size, progress);

        let group_records: Vec<ConfigRecord> = group
            .par_iter()
            .map(|key| {
                let outcome = run_one(matrix.as_ref(), key, plan);
                if let Err(failure) = &outcome {
                    log::warn!("{key} failed: {failure}");
                }
                progress.on_configuration_done(key, outcome.is_ok());
                ConfigRecord { key: *key, outcome }
            })
            .collect();
        records.extend(group_records);
    }

    progress.on_experiment_finish();
    let report = ExperimentReport {
        alpha: plan.alpha,
        exponent: plan.exponent,
        records,
    };
    log::info!(
        "Experiment finished: {} succeeded, {} failed",
        report.successes().count(),
        report.failures().count()
    );
    report
}

fn run_one(
    matrix: Option<&Result<SampleMatrix, ConfigFailure>>,
    key: &ConfigKey,
    plan: &ExperimentPlan,
) -> Result<EvaluationResult, ConfigFailure> {
    if let Err(err) = key.window.check_within(key.ensemble_size) {
        return Err(ConfigFailure::from(&PipelineError::from(err)));
    }
    match matrix {
        Some(Ok(matrix)) => {
            evaluate_configuration(matrix, key, plan.exponent, plan.confidence_level)
                .map_err(|err| ConfigFailure::from(&err))
        }
        Some(Err(failure)) => Err(failure.clone()),
        None => Err(ConfigFailure {
            kind: FailureKind::InvalidWindow,
            message: format!("No requested window fits an ensemble of size {}.", key.ensemble_size),
        }),
    }
}

fn load_matrix<S>(
    plan: &ExperimentPlan,
    source: &S,
    ensemble_size: usize,
    progress: &dyn ExperimentProgress,
) -> Option<Result<SampleMatrix, ConfigFailure>>
where
    S: SampleSource + ?Sized,
{
    let request = plan.load_request(ensemble_size)?;
    progress.on_load_start(ensemble_size);
    let loaded = source
        .load(&request)
        .map_err(|err| ConfigFailure::from(&PipelineError::from(err)));
    match &loaded {
        Ok(matrix) => progress.on_load_finish(ensemble_size, Some(matrix.num_samples())),
        Err(failure) => {
            log::error!("Could not load samples for N={ensemble_size}: {failure}");
            progress.on_load_finish(ensemble_size, None);
        }
    }
    Some(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use crate::types::SplitOrientation;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Rows `c_r * rank^power`, so every log-moment is linear in `ln(rank)`.
    fn power_law_matrix(num_samples: usize, num_ranks: usize, power: f64) -> SampleMatrix {
        SampleMatrix::new(Array2::from_shape_fn((num_samples, num_ranks), |(r, c)| {
            (0.5 + 0.01 * r as f64) * ((c + 1) as f64).powf(power)
        }))
    }

    struct MemorySource {
        matrices: HashMap<usize, SampleMatrix>,
        requests: Mutex<Vec<LoadRequest>>,
    }

    impl SampleSource for MemorySource {
        fn load(&self, request: &LoadRequest) -> Result<SampleMatrix, DataError> {
            self.requests.lock().unwrap().push(request.clone());
            self.matrices
                .get(&request.ensemble_size)
                .cloned()
                .ok_or(DataError::NoDatasetForSize(request.ensemble_size))
        }
    }

    fn plan(ensemble_sizes: Vec<usize>, windows: Vec<RankWindow>, splits: Vec<SplitPlan>) -> ExperimentPlan {
        ExperimentPlan {
            alpha: 1.0,
            exponent: -2.0,
            ensemble_sizes,
            windows,
            splits,
            num_samples_cap: None,
            confidence_level: None,
        }
    }

    #[test]
    fn configurations_follow_plan_order() {
        let windows = vec![RankWindow::new(0, 3).unwrap(), RankWindow::new(2, 4).unwrap()];
        let splits = vec![
            SplitPlan::Full,
            SplitPlan::holdout_fraction(0.5, SplitOrientation::SuffixTrain),
        ];
        let keys = plan(vec![20, 10, 20], windows.clone(), splits.clone()).configurations();
        assert_eq!(keys.len(), 8);
        assert_eq!(keys[0].ensemble_size, 20);
        assert_eq!(keys[0].window, windows[0]);
        assert_eq!(keys[1].split, splits[1]);
        assert_eq!(keys[2].window, windows[1]);
        assert_eq!(keys[4].ensemble_size, 10);
    }

    #[test]
    fn load_request_spans_only_fitting_windows() {
        let windows = vec![
            RankWindow::new(2, 3).unwrap(),
            RankWindow::new(5, 4).unwrap(),
            RankWindow::new(40, 5).unwrap(),
        ];
        let plan = plan(vec![10], windows, vec![SplitPlan::Full]);
        assert_eq!(plan.load_request(10).unwrap().columns, 2..9);
        assert!(plan.load_request(3).is_none());
    }

    #[test]
    fn power_law_is_recovered_in_and_out_of_sample() {
        let matrix = power_law_matrix(100, 20, 1.774);
        let key = ConfigKey {
            ensemble_size: 20,
            window: RankWindow::new(0, 15).unwrap(),
            split: SplitPlan::holdout_fraction(0.6, SplitOrientation::PrefixTrain),
        };
        let result = evaluate_configuration(&matrix, &key, -2.0, Some(0.95)).unwrap();
        assert_abs_diff_eq!(result.slope(), -3.548, epsilon = 1e-9);
        assert_abs_diff_eq!(result.r2_train, 1.0, epsilon = 1e-12);

        // Both subsets follow the same power law, so the held-out points are the
        // training line shifted by the difference of their log prefactors.
        let log_mean = |rows: std::ops::Range<usize>| {
            let count = rows.len() as f64;
            (rows.map(|r| (0.5 + 0.01 * r as f64).powi(-2)).sum::<f64>() / count).ln()
        };
        let shift = log_mean(0..60) - log_mean(60..100);
        let x = &result.eval.x;
        let x_mean = x.sum() / x.len() as f64;
        let ss_tot: f64 = x.iter().map(|v| (3.548 * (v - x_mean)).powi(2)).sum();
        let expected = 1.0 - x.len() as f64 * shift * shift / ss_tot;
        assert_abs_diff_eq!(result.r2_eval, expected, epsilon = 1e-9);
        assert!(result.r2_eval < 1.0);
        assert_eq!(result.partition.train, 0..60);
        assert!(result.model.inference.is_some());
    }

    #[test]
    fn one_bad_configuration_does_not_abort_the_batch() {
        let mut matrices = HashMap::new();
        matrices.insert(20, power_law_matrix(50, 20, 1.5));
        let source = MemorySource {
            matrices,
            requests: Mutex::new(Vec::new()),
        };
        let windows = vec![RankWindow::new(0, 10).unwrap(), RankWindow::new(15, 10).unwrap()];
        let splits = vec![
            SplitPlan::Full,
            SplitPlan::holdout_fraction(0.01, SplitOrientation::PrefixTrain),
        ];
        let report = run_experiment(&plan(vec![20, 30], windows, splits), &source, &NoopProgress);

        assert_eq!(report.records.len(), 8);
        assert_eq!(report.successes().count(), 1);

        let kinds: Vec<FailureKind> = report.failures().map(|(_, failure)| failure.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FailureKind::InvalidSplit,
                FailureKind::InvalidWindow,
                FailureKind::InvalidWindow,
                FailureKind::MissingData,
                FailureKind::MissingData,
                FailureKind::MissingData,
                FailureKind::MissingData,
            ]
        );

        let requests = source.requests.lock().unwrap();
        assert_eq!(requests.len(), 2, "each ensemble size is loaded once");
        assert_eq!(requests[0].columns, 0..10);
    }

    #[test]
    fn non_positive_samples_are_recorded_per_window() {
        let mut values = Array2::from_shape_fn((10, 6), |(r, c)| 1.0 + r as f64 + c as f64);
        values[[3, 0]] = 0.0;
        let matrix = SampleMatrix::new(values);
        let key = ConfigKey {
            ensemble_size: 6,
            window: RankWindow::new(0, 3).unwrap(),
            split: SplitPlan::Full,
        };
        let err = evaluate_configuration(&matrix, &key, -2.0, None).unwrap_err();
        assert_eq!(err.kind(), FailureKind::NonPositiveValue);

        let shifted = ConfigKey {
            window: RankWindow::new(1, 3).unwrap(),
            ..key
        };
        assert!(evaluate_configuration(&matrix, &shifted, -2.0, None).is_ok());
    }

    #[test]
    fn tied_window_has_undefined_r2() {
        // Every draw is flat across the window, so each log-moment is the same value.
        let matrix = SampleMatrix::new(Array2::from_shape_fn((7, 5), |(r, c)| {
            if c < 3 { 0.3 + r as f64 * 0.37 } else { 10.0 + c as f64 }
        }));
        let key = ConfigKey {
            ensemble_size: 5,
            window: RankWindow::new(0, 3).unwrap(),
            split: SplitPlan::Full,
        };
        let err = evaluate_configuration(&matrix, &key, -2.0, None).unwrap_err();
        assert_eq!(err.kind(), FailureKind::UndefinedR2);

        let held_out = ConfigKey {
            split: SplitPlan::holdout_fraction(0.5, SplitOrientation::PrefixTrain),
            ..key
        };
        let err = evaluate_configuration(&matrix, &held_out, -2.0, None).unwrap_err();
        assert_eq!(err.kind(), FailureKind::UndefinedR2);
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let mut matrices = HashMap::new();
        matrices.insert(
            25,
            SampleMatrix::new(Array2::from_shape_fn((200, 25), |(r, c)| {
                let jitter = ((r * 7919 + c * 104729) % 1000) as f64 / 1000.0;
                (c as f64 + 1.0 + jitter * 0.5) * (1.0 + (r % 13) as f64 / 10.0)
            })),
        );
        let source = MemorySource {
            matrices,
            requests: Mutex::new(Vec::new()),
        };
        let experiment = ExperimentPlan {
            confidence_level: Some(0.9),
            ..plan(
                vec![25],
                vec![RankWindow::new(0, 12).unwrap(), RankWindow::new(5, 20).unwrap()],
                vec![
                    SplitPlan::Full,
                    SplitPlan::holdout_fraction(0.7, SplitOrientation::SuffixTrain),
                ],
            )
        };
        let first = run_experiment(&experiment, &source, &NoopProgress);
        let second = run_experiment(&experiment, &source, &NoopProgress);
        assert_eq!(first, second);
        assert_eq!(first.successes().count(), 4);
    }
}
