// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are shared between pipeline stages.

use ndarray::{Array1, Array2, ArrayView2, s};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Errors raised when a rank window cannot be applied to an ensemble.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("A rank window needs at least 2 ranks to fit a slope, but this one spans {0}.")]
    TooShort(usize),
    #[error("Rank window [{start}, {end}) exceeds the {num_ranks} ranks of the ensemble.")]
    OutOfBounds {
        start: usize,
        end: usize,
        num_ranks: usize,
    },
    #[error(
        "Rank window [{start}, {end}) lies outside the loaded columns [{loaded_start}, {loaded_end})."
    )]
    NotLoaded {
        start: usize,
        end: usize,
        loaded_start: usize,
        loaded_end: usize,
    },
}

/// A contiguous block of rank columns `[start, start + len)`.
///
/// Columns are 0-based, ranks are 1-based: column `c` holds rank `c + 1`, the
/// `(c + 1)`-th smallest eigenvalue of each draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RankWindow {
    pub start: usize,
    pub len: usize,
}

impl RankWindow {
    pub fn new(start: usize, len: usize) -> Result<Self, WindowError> {
        let window = Self { start, len };
        window.check_shape()?;
        Ok(window)
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    #[inline]
    pub fn columns(&self) -> Range<usize> {
        self.start..self.end()
    }

    /// The 1-based rank of the first column in the window.
    #[inline]
    pub fn first_rank(&self) -> usize {
        self.start + 1
    }

    pub fn check_shape(&self) -> Result<(), WindowError> {
        if self.len < 2 {
            return Err(WindowError::TooShort(self.len));
        }
        Ok(())
    }

    /// Verifies the window fits inside an ensemble of `num_ranks` eigenvalues.
    pub fn check_within(&self, num_ranks: usize) -> Result<(), WindowError> {
        self.check_shape()?;
        if self.end() > num_ranks {
            return Err(WindowError::OutOfBounds {
                start: self.start,
                end: self.end(),
                num_ranks,
            });
        }
        Ok(())
    }

    /// Smallest column range covering every window in `windows`.
    pub fn span<'a, I>(windows: I) -> Option<Range<usize>>
    where
        I: IntoIterator<Item = &'a RankWindow>,
    {
        windows.into_iter().fold(None, |acc, window| match acc {
            None => Some(window.columns()),
            Some(range) => Some(range.start.min(window.start)..range.end.max(window.end())),
        })
    }
}

impl fmt::Display for RankWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ranks {}..={}", self.first_rank(), self.end())
    }
}

/// Which end of the row ordering is used for training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitOrientation {
    /// Train on the leading rows, evaluate on the rest.
    PrefixTrain,
    /// Train on the trailing rows, evaluate on the leading remainder.
    SuffixTrain,
}

impl fmt::Display for SplitOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PrefixTrain => "prefix_train",
            Self::SuffixTrain => "suffix_train",
        })
    }
}

/// Size of the training subset of a holdout split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitSize {
    /// `floor(fraction * num_samples)` training rows.
    Fraction(f64),
    /// An absolute number of training rows.
    Count(usize),
}

/// How the sample rows are divided between fitting and evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitPlan {
    /// Fit and evaluate on every row.
    Full,
    /// Fit on one contiguous block of rows and evaluate on the complementary block.
    Holdout {
        size: SplitSize,
        orientation: SplitOrientation,
    },
}

impl SplitPlan {
    pub fn holdout_fraction(fraction: f64, orientation: SplitOrientation) -> Self {
        Self::Holdout {
            size: SplitSize::Fraction(fraction),
            orientation,
        }
    }
}

impl fmt::Display for SplitPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Holdout {
                size: SplitSize::Fraction(p),
                orientation,
            } => write!(f, "{orientation}:{p}"),
            Self::Holdout {
                size: SplitSize::Count(n),
                orientation,
            } => write!(f, "{orientation}:n={n}"),
        }
    }
}

/// Identifies one unit of work: an ensemble size, a rank window, and a split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfigKey {
    pub ensemble_size: usize,
    pub window: RankWindow,
    pub split: SplitPlan,
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N={} {} split={}", self.ensemble_size, self.window, self.split)
    }
}

/// Sorted eigenvalue samples: one row per draw, one column per rank.
///
/// A matrix may hold only a projection of the ensemble's columns. `first_column`
/// records where the projection starts so that windows are always addressed by
/// absolute column index.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMatrix {
    values: Array2<f64>,
    first_column: usize,
    num_ranks: usize,
}

impl SampleMatrix {
    /// Wraps a matrix holding every rank of the ensemble.
    pub fn new(values: Array2<f64>) -> Self {
        let num_ranks = values.ncols();
        Self {
            values,
            first_column: 0,
            num_ranks,
        }
    }

    /// Wraps the columns `[first_column, first_column + values.ncols())` of an
    /// ensemble with `num_ranks` eigenvalues per draw.
    pub fn from_projection(
        values: Array2<f64>,
        first_column: usize,
        num_ranks: usize,
    ) -> Result<Self, WindowError> {
        let end = first_column + values.ncols();
        if end > num_ranks {
            return Err(WindowError::OutOfBounds {
                start: first_column,
                end,
                num_ranks,
            });
        }
        Ok(Self {
            values,
            first_column,
            num_ranks,
        })
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.values.nrows()
    }

    #[inline]
    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    #[inline]
    pub fn loaded_columns(&self) -> Range<usize> {
        self.first_column..self.first_column + self.values.ncols()
    }

    /// Borrow the block of `rows` by the window's columns.
    ///
    /// Callers are responsible for `rows` lying inside `0..num_samples()`.
    pub fn window_view(
        &self,
        rows: Range<usize>,
        window: &RankWindow,
    ) -> Result<ArrayView2<'_, f64>, WindowError> {
        window.check_within(self.num_ranks)?;
        let loaded = self.loaded_columns();
        if window.start < loaded.start || window.end() > loaded.end {
            return Err(WindowError::NotLoaded {
                start: window.start,
                end: window.end(),
                loaded_start: loaded.start,
                loaded_end: loaded.end,
            });
        }
        let local_start = window.start - self.first_column;
        Ok(self
            .values
            .slice(s![rows, local_start..local_start + window.len]))
    }
}

/// Paired regression points for one window: `x = ln(rank)`, `y = ln(E[value^s])`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionDataset {
    pub x: Array1<f64>,
    pub y: Array1<f64>,
}

impl RegressionDataset {
    #[inline]
    pub fn len(&self) -> usize {
        self.y.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}
