//! Persistence of experiment reports.
//!
//! Two formats are written: a TOML document with one `[[results]]` table per
//! configuration, including inference and failure details, and a flat
//! tab-separated summary with one row per configuration for quick inspection.

use crate::experiment::{ConfigFailure, ConfigRecord, ExperimentReport};
use crate::regression::Inference;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to read or write report file: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize report to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Failed to parse TOML report file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to write summary table: {0}")]
    Csv(#[from] csv::Error),
}

/// One configuration as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub ensemble_size: usize,
    pub window_start: usize,
    pub window_len: usize,
    pub first_rank: usize,
    pub last_rank: usize,
    pub split: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intercept: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r2_train: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r2_eval: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference: Option<Inference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ConfigFailure>,
}

impl From<&ConfigRecord> for ResultEntry {
    fn from(record: &ConfigRecord) -> Self {
        let key = &record.key;
        let mut entry = ResultEntry {
            ensemble_size: key.ensemble_size,
            window_start: key.window.start,
            window_len: key.window.len,
            first_rank: key.window.first_rank(),
            last_rank: key.window.end(),
            split: key.split.to_string(),
            intercept: None,
            slope: None,
            r2_train: None,
            r2_eval: None,
            train_rows: None,
            eval_rows: None,
            inference: None,
            failure: None,
        };
        match &record.outcome {
            Ok(result) => {
                entry.intercept = Some(result.model.intercept);
                entry.slope = Some(result.model.slope);
                entry.r2_train = Some(result.r2_train);
                entry.r2_eval = Some(result.r2_eval);
                entry.train_rows = Some(result.partition.train.len());
                entry.eval_rows = Some(result.partition.eval.len());
                entry.inference = result.model.inference;
            }
            Err(failure) => entry.failure = Some(failure.clone()),
        }
        entry
    }
}

/// The TOML document written for a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFile {
    pub alpha: f64,
    pub exponent: f64,
    pub results: Vec<ResultEntry>,
}

impl From<&ExperimentReport> for ReportFile {
    fn from(report: &ExperimentReport) -> Self {
        Self {
            alpha: report.alpha,
            exponent: report.exponent,
            results: report.records.iter().map(ResultEntry::from).collect(),
        }
    }
}

impl ReportFile {
    /// Saves the report in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let toml_string = fs::read_to_string(path)?;
        Ok(toml::from_str(&toml_string)?)
    }
}

const SUMMARY_HEADER: [&str; 12] = [
    "ensemble_size",
    "first_rank",
    "last_rank",
    "split",
    "status",
    "intercept",
    "slope",
    "r2_train",
    "r2_eval",
    "train_rows",
    "eval_rows",
    "error",
];

/// Writes one tab-separated row per configuration. Numeric cells of failed
/// configurations are left empty and the failure goes in the last column.
pub fn write_summary_tsv<W: Write>(report: &ExperimentReport, writer: W) -> Result<(), ReportError> {
    let mut tsv = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    tsv.write_record(SUMMARY_HEADER)?;

    let mut ryu_buffer = ryu::Buffer::new();
    let mut float = |value: f64| ryu_buffer.format(value).to_string();

    for record in &report.records {
        let key = &record.key;
        let mut row = vec![
            key.ensemble_size.to_string(),
            key.window.first_rank().to_string(),
            key.window.end().to_string(),
            key.split.to_string(),
        ];
        match &record.outcome {
            Ok(result) => row.extend([
                "ok".to_string(),
                float(result.model.intercept),
                float(result.model.slope),
                float(result.r2_train),
                float(result.r2_eval),
                result.partition.train.len().to_string(),
                result.partition.eval.len().to_string(),
                String::new(),
            ]),
            Err(failure) => {
                row.push("failed".to_string());
                row.extend(std::iter::repeat_n(String::new(), 6));
                row.push(failure.to_string());
            }
        }
        tsv.write_record(&row)?;
    }
    tsv.flush()?;
    Ok(())
}

pub fn save_summary_tsv(report: &ExperimentReport, path: &Path) -> Result<(), ReportError> {
    let file = BufWriter::new(fs::File::create(path)?);
    write_summary_tsv(report, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataError, LoadRequest, SampleSource};
    use crate::experiment::{ExperimentPlan, FailureKind, run_experiment};
    use crate::progress::NoopProgress;
    use crate::types::{RankWindow, SampleMatrix, SplitOrientation, SplitPlan};
    use ndarray::Array2;
    use tempfile::tempdir;

    struct OneSize(SampleMatrix);

    impl SampleSource for OneSize {
        fn load(&self, request: &LoadRequest) -> Result<SampleMatrix, DataError> {
            if request.ensemble_size == self.0.num_ranks() {
                Ok(self.0.clone())
            } else {
                Err(DataError::NoDatasetForSize(request.ensemble_size))
            }
        }
    }

    fn sample_report() -> ExperimentReport {
        let matrix = SampleMatrix::new(Array2::from_shape_fn((40, 8), |(r, c)| {
            (1.0 + (r % 5) as f64 * 0.1) * ((c + 1) as f64).powf(1.5)
        }));
        let plan = ExperimentPlan {
            alpha: 0.0,
            exponent: -1.0,
            ensemble_sizes: vec![8, 12],
            windows: vec![RankWindow::new(0, 6).unwrap()],
            splits: vec![
                SplitPlan::Full,
                SplitPlan::holdout_fraction(0.5, SplitOrientation::SuffixTrain),
            ],
            num_samples_cap: None,
            confidence_level: Some(0.95),
        };
        run_experiment(&plan, &OneSize(matrix), &NoopProgress)
    }

    #[test]
    fn toml_report_survives_save_and_load() {
        let report = sample_report();
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.toml");
        let file = ReportFile::from(&report);
        file.save(&path).unwrap();

        let loaded = ReportFile::load(&path).unwrap();
        assert_eq!(loaded, file);
        assert_eq!(loaded.results.len(), 4);

        let ok = &loaded.results[1];
        assert_eq!(ok.split, "suffix_train:0.5");
        assert_eq!((ok.first_rank, ok.last_rank), (1, 6));
        assert_eq!((ok.train_rows, ok.eval_rows), (Some(20), Some(20)));
        assert!(ok.inference.is_some());

        let failed = &loaded.results[2];
        assert_eq!(failed.ensemble_size, 12);
        assert!(failed.slope.is_none());
        assert_eq!(failed.failure.as_ref().unwrap().kind, FailureKind::MissingData);
    }

    #[test]
    fn summary_has_one_row_per_configuration() {
        let report = sample_report();
        let mut buffer = Vec::new();
        write_summary_tsv(&report, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("ensemble_size\tfirst_rank\tlast_rank\tsplit\tstatus"));

        let ok: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(ok.len(), SUMMARY_HEADER.len());
        assert_eq!(ok[4], "ok");
        let slope: f64 = ok[6].parse().unwrap();
        assert_eq!(slope, report.records[0].outcome.as_ref().unwrap().model.slope);

        let failed: Vec<&str> = lines[4].split('\t').collect();
        assert_eq!(failed[4], "failed");
        assert!(failed[5].is_empty());
        assert!(failed[11].starts_with("[missing_data]"));
    }
}
