//! # Sample Matrix Loading
//!
//! Reads sorted eigenvalue samples from whitespace-delimited text shards. Each
//! line is one draw holding `N` values in non-decreasing order. The shards listed
//! for one ensemble size are concatenated, in order, into one logical matrix.
//!
//! - Projection: only the requested column range is stored. Ensembles reach tens
//!   of thousands of ranks while a study usually needs a few dozen.
//! - Validation: every line must hold exactly `N` tokens, every token must be a
//!   finite number, and stored values must be non-decreasing. Positivity is
//!   left to the moment estimator, which reports it per window.
//! - I/O: plain shards are memory-mapped and split with `memchr`; shards ending
//!   in `.gz` are decompressed into memory first.

use crate::types::{SampleMatrix, WindowError};
use flate2::read::MultiGzDecoder;
use memmap2::Mmap;
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A comprehensive error type for all sample loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Sample file '{}' does not exist.", .0.display())]
    MissingData(PathBuf),
    #[error("No sample files are configured for ensemble size N={0}.")]
    NoDatasetForSize(usize),
    #[error("I/O error while reading '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed row at {}:{line}: {detail}", .path.display())]
    MalformedRow {
        path: PathBuf,
        line: usize,
        detail: String,
    },
    #[error(
        "Row at {}:{line} is not sorted: rank {rank} is smaller than the rank before it.",
        .path.display()
    )]
    UnsortedRow {
        path: PathBuf,
        line: usize,
        rank: usize,
    },
    #[error(
        "Requested columns [{start}, {end}) do not fit in an ensemble with {ensemble_size} ranks."
    )]
    ColumnsOutOfRange {
        start: usize,
        end: usize,
        ensemble_size: usize,
    },
    #[error(transparent)]
    Window(#[from] WindowError),
}

impl DataError {
    fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::MissingData(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// What to read for one ensemble size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    /// Number of eigenvalues per draw; every line must hold exactly this many.
    pub ensemble_size: usize,
    /// Absolute columns to keep.
    pub columns: Range<usize>,
    /// Stop after this many draws.
    pub num_samples_cap: Option<usize>,
}

impl LoadRequest {
    pub fn all_columns(ensemble_size: usize) -> Self {
        Self {
            ensemble_size,
            columns: 0..ensemble_size,
            num_samples_cap: None,
        }
    }
}

/// Anything that can produce the sample matrix for an ensemble size.
pub trait SampleSource {
    fn load(&self, request: &LoadRequest) -> Result<SampleMatrix, DataError>;
}

/// Text shards on disk, grouped by ensemble size.
#[derive(Debug, Clone, Default)]
pub struct ShardedFiles {
    datasets: BTreeMap<usize, Vec<PathBuf>>,
}

impl ShardedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the shards for `ensemble_size`. A directory entry stands for
    /// every file inside it, in natural filename order.
    pub fn insert(&mut self, ensemble_size: usize, shards: Vec<PathBuf>) {
        self.datasets.entry(ensemble_size).or_default().extend(shards);
    }

    pub fn with_dataset(mut self, ensemble_size: usize, shards: Vec<PathBuf>) -> Self {
        self.insert(ensemble_size, shards);
        self
    }

    pub fn shards(&self, ensemble_size: usize) -> Option<&[PathBuf]> {
        self.datasets.get(&ensemble_size).map(Vec::as_slice)
    }
}

impl SampleSource for ShardedFiles {
    fn load(&self, request: &LoadRequest) -> Result<SampleMatrix, DataError> {
        let shards = self
            .shards(request.ensemble_size)
            .ok_or(DataError::NoDatasetForSize(request.ensemble_size))?;
        let files = expand_shard_paths(shards)?;
        load_shards(&files, request)
    }
}

/// Replaces every directory in `paths` by the regular files it contains,
/// ordered naturally so that `part2` precedes `part10`.
pub fn expand_shard_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>, DataError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| DataError::io(path, e))? {
            let entry = entry.map_err(|e| DataError::io(path, e))?;
            let entry_path = entry.path();
            if entry_path.is_file() {
                entries.push(entry_path);
            }
        }
        entries.sort_by(|a, b| {
            natord::compare(&a.to_string_lossy(), &b.to_string_lossy())
        });
        files.extend(entries);
    }
    Ok(files)
}

/// Loads and concatenates the shards into one projected sample matrix.
pub fn load_shards(paths: &[PathBuf], request: &LoadRequest) -> Result<SampleMatrix, DataError> {
    if request.columns.end > request.ensemble_size || request.columns.is_empty() {
        return Err(DataError::ColumnsOutOfRange {
            start: request.columns.start,
            end: request.columns.end,
            ensemble_size: request.ensemble_size,
        });
    }

    let mut builder = MatrixBuilder::new(request);
    for path in paths {
        if builder.is_full() {
            break;
        }
        let before = builder.num_rows;
        read_shard(path, &mut builder)?;
        log::debug!(
            "Read {} samples from '{}'",
            builder.num_rows - before,
            path.display()
        );
    }

    let num_rows = builder.num_rows;
    let width = request.columns.len();
    let values = Array2::from_shape_vec((num_rows, width), builder.values).map_err(|e| {
        DataError::MalformedRow {
            path: paths.last().cloned().unwrap_or_default(),
            line: 0,
            detail: format!("internal shape error: {e}"),
        }
    })?;

    log::info!(
        "Loaded {num_rows} samples of N={} (columns {}..{}) from {} shard(s)",
        request.ensemble_size,
        request.columns.start,
        request.columns.end,
        paths.len()
    );

    Ok(SampleMatrix::from_projection(
        values,
        request.columns.start,
        request.ensemble_size,
    )?)
}

fn read_shard(path: &Path, builder: &mut MatrixBuilder) -> Result<(), DataError> {
    let file = File::open(path).map_err(|e| DataError::io(path, e))?;

    if path.extension().is_some_and(|ext| ext == "gz") {
        let mut bytes = Vec::new();
        MultiGzDecoder::new(file)
            .read_to_end(&mut bytes)
            .map_err(|e| DataError::io(path, e))?;
        return builder.parse(path, &bytes);
    }

    let len = file.metadata().map_err(|e| DataError::io(path, e))?.len();
    if len == 0 {
        return Ok(());
    }
    // The mapping is read-only and dropped before this function returns.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| DataError::io(path, e))?;
    builder.parse(path, &mmap)
}

/// Accumulates projected rows across shards in row-major order.
struct MatrixBuilder<'a> {
    request: &'a LoadRequest,
    values: Vec<f64>,
    num_rows: usize,
}

impl<'a> MatrixBuilder<'a> {
    fn new(request: &'a LoadRequest) -> Self {
        Self {
            request,
            values: Vec::new(),
            num_rows: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.request
            .num_samples_cap
            .is_some_and(|cap| self.num_rows >= cap)
    }

    fn parse(&mut self, path: &Path, bytes: &[u8]) -> Result<(), DataError> {
        let mut line_start = 0;
        let mut line_number = 0;
        let line_ends = memchr::memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
        for line_end in line_ends {
            if line_start > bytes.len() || self.is_full() {
                break;
            }
            line_number += 1;
            let line = &bytes[line_start..line_end];
            line_start = line_end + 1;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            self.push_row(path, line_number, line)?;
        }
        Ok(())
    }

    fn push_row(&mut self, path: &Path, line: usize, text: &[u8]) -> Result<(), DataError> {
        let columns = &self.request.columns;
        let row_start = self.values.len();
        let mut found = 0;
        let mut previous = f64::NEG_INFINITY;

        let tokens = text
            .split(u8::is_ascii_whitespace)
            .filter(|token| !token.is_empty());
        for (column, token) in tokens.enumerate() {
            found += 1;
            let value = match lexical_core::parse::<f64>(token) {
                Ok(value) if value.is_finite() => value,
                _ => {
                    self.values.truncate(row_start);
                    return Err(DataError::MalformedRow {
                        path: path.to_path_buf(),
                        line,
                        detail: format!(
                            "token '{}' at rank {} is not a finite number",
                            String::from_utf8_lossy(token),
                            column + 1
                        ),
                    });
                }
            };
            if !columns.contains(&column) {
                continue;
            }
            if value < previous {
                self.values.truncate(row_start);
                return Err(DataError::UnsortedRow {
                    path: path.to_path_buf(),
                    line,
                    rank: column + 1,
                });
            }
            previous = value;
            self.values.push(value);
        }

        if found != self.request.ensemble_size {
            self.values.truncate(row_start);
            return Err(DataError::MalformedRow {
                path: path.to_path_buf(),
                line,
                detail: format!(
                    "expected {} values, found {found}",
                    self.request.ensemble_size
                ),
            });
        }

        self.num_rows += 1;
        Ok(())
    }
}
