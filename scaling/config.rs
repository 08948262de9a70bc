//! # Experiment Configuration
//!
//! A TOML file describing one experiment: the moment exponent, the ensemble
//! sizes with their sample shards, the rank windows and the splits to try.
//!
//! ```toml
//! alpha = 1.0
//! exponent = -2.0
//! num_samples_cap = 1000
//! confidence_level = 0.95
//! ensemble_sizes = [1000]
//!
//! [[windows]]
//! start = 0
//! len = 15
//!
//! [[splits]]
//! kind = "full"
//!
//! [[splits]]
//! kind = "holdout"
//! size = { fraction = 0.6 }
//! orientation = "prefix_train"
//!
//! [[datasets]]
//! ensemble_size = 1000
//! shards = ["samples/lue_1000.txt.gz"]
//! ```
//!
//! Relative shard paths are resolved against the directory holding the file.

use crate::data::ShardedFiles;
use crate::experiment::ExperimentPlan;
use crate::types::{RankWindow, SplitPlan, SplitSize};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read experiment configuration '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse experiment configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid experiment configuration: {0}")]
    Invalid(String),
}

/// Sample shards for one ensemble size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub ensemble_size: usize,
    pub shards: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    pub alpha: f64,
    pub exponent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_samples_cap: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<f64>,
    /// Ensemble sizes to run, in order. Defaults to every configured dataset.
    #[serde(default)]
    pub ensemble_sizes: Vec<usize>,
    pub windows: Vec<RankWindow>,
    pub splits: Vec<SplitPlan>,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

impl ExperimentConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(message))
        };

        if !self.alpha.is_finite() {
            return invalid(format!("alpha must be finite, got {}", self.alpha));
        }
        if !self.exponent.is_finite() || self.exponent == 0.0 {
            return invalid(format!(
                "exponent must be finite and nonzero, got {}",
                self.exponent
            ));
        }
        if self.num_samples_cap == Some(0) {
            return invalid("num_samples_cap must be positive".to_string());
        }
        if let Some(level) = self.confidence_level {
            if !(level > 0.0 && level < 1.0) {
                return invalid(format!(
                    "confidence_level must lie strictly between 0 and 1, got {level}"
                ));
            }
        }
        if self.windows.is_empty() {
            return invalid("at least one rank window is required".to_string());
        }
        for window in &self.windows {
            window
                .check_shape()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.splits.is_empty() {
            return invalid("at least one split is required".to_string());
        }
        for split in &self.splits {
            match split {
                SplitPlan::Full => {}
                SplitPlan::Holdout {
                    size: SplitSize::Fraction(p),
                    ..
                } if !(*p > 0.0 && *p < 1.0) => {
                    return invalid(format!(
                        "split fraction must lie strictly between 0 and 1, got {p}"
                    ));
                }
                SplitPlan::Holdout {
                    size: SplitSize::Count(0),
                    ..
                } => return invalid("split training count must be positive".to_string()),
                SplitPlan::Holdout { .. } => {}
            }
        }
        if self.ensemble_sizes().is_empty() {
            return invalid("no ensemble sizes or datasets are configured".to_string());
        }
        if let Some(size) = self.ensemble_sizes().into_iter().find(|&n| n == 0) {
            return invalid(format!("ensemble size must be positive, got {size}"));
        }
        if let Some(duplicate) = self
            .datasets
            .iter()
            .map(|dataset| dataset.ensemble_size)
            .duplicates()
            .next()
        {
            return invalid(format!(
                "ensemble size {duplicate} has more than one [[datasets]] entry"
            ));
        }
        Ok(())
    }

    /// Explicit `ensemble_sizes`, or else every dataset in file order.
    pub fn ensemble_sizes(&self) -> Vec<usize> {
        if self.ensemble_sizes.is_empty() {
            self.datasets
                .iter()
                .map(|dataset| dataset.ensemble_size)
                .collect()
        } else {
            self.ensemble_sizes.clone()
        }
    }

    pub fn plan(&self) -> ExperimentPlan {
        ExperimentPlan {
            alpha: self.alpha,
            exponent: self.exponent,
            ensemble_sizes: self.ensemble_sizes(),
            windows: self.windows.clone(),
            splits: self.splits.clone(),
            num_samples_cap: self.num_samples_cap,
            confidence_level: self.confidence_level,
        }
    }

    /// Shard sets for every dataset, with relative paths joined onto `base_dir`.
    pub fn source(&self, base_dir: &Path) -> ShardedFiles {
        self.datasets
            .iter()
            .fold(ShardedFiles::new(), |files, dataset| {
                let shards = dataset
                    .shards
                    .iter()
                    .map(|shard| {
                        if shard.is_absolute() {
                            shard.clone()
                        } else {
                            base_dir.join(shard)
                        }
                    })
                    .collect();
                files.with_dataset(dataset.ensemble_size, shards)
            })
    }
}
