//! Deterministic train/evaluation partitioning of sample rows.
//!
//! Splits are always contiguous index ranges over the rows as loaded. Nothing
//! is shuffled, so a split is reproducible from the configuration alone.

use crate::types::{SplitOrientation, SplitPlan, SplitSize};
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SplitError {
    #[error("Split fraction {0} must lie strictly between 0 and 1.")]
    InvalidFraction(f64),
    #[error(
        "Splitting {num_samples} samples with {train_rows} training rows leaves the {subset} subset empty."
    )]
    EmptyPartition {
        subset: &'static str,
        train_rows: usize,
        num_samples: usize,
    },
}

/// The row ranges used for fitting and for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub train: Range<usize>,
    pub eval: Range<usize>,
}

impl Partition {
    /// True when the evaluation rows are the training rows.
    pub fn is_in_sample(&self) -> bool {
        self.train == self.eval
    }
}

/// Partitions `0..num_samples` according to `plan`.
pub fn partition(num_samples: usize, plan: &SplitPlan) -> Result<Partition, SplitError> {
    let (size, orientation) = match plan {
        SplitPlan::Full => {
            return Ok(Partition {
                train: 0..num_samples,
                eval: 0..num_samples,
            });
        }
        SplitPlan::Holdout { size, orientation } => (size, orientation),
    };

    let train_rows = match *size {
        SplitSize::Fraction(p) => {
            if !(p > 0.0 && p < 1.0) {
                return Err(SplitError::InvalidFraction(p));
            }
            (p * num_samples as f64).floor() as usize
        }
        SplitSize::Count(count) => count,
    };

    if train_rows == 0 {
        return Err(SplitError::EmptyPartition {
            subset: "training",
            train_rows,
            num_samples,
        });
    }
    if train_rows >= num_samples {
        return Err(SplitError::EmptyPartition {
            subset: "evaluation",
            train_rows,
            num_samples,
        });
    }

    Ok(match orientation {
        SplitOrientation::PrefixTrain => Partition {
            train: 0..train_rows,
            eval: train_rows..num_samples,
        },
        SplitOrientation::SuffixTrain => {
            let boundary = num_samples - train_rows;
            Partition {
                train: boundary..num_samples,
                eval: 0..boundary,
            }
        }
    })
}
