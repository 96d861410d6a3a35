//! Flat text data files: one row per line, values separated by whitespace.

use std::fs;
use std::path::Path;

use snafu::{ensure, ResultExt};
use tracing::debug;
use xgboost_bindings::{DMatrix, SharedLibrary};

use crate::error::{EmptyFile, ParseValue, RaggedRow, ReadFile, Result};

/// Row-major feature values of a file, with its row and column counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    pub data: Vec<f32>,
    pub num_rows: usize,
    pub num_cols: usize,
}

/// Read a feature file. Every row must have as many values as the first one.
pub fn read_features(path: &Path) -> Result<Features> {
    let text = fs::read_to_string(path).context(ReadFile { path })?;

    let mut data = Vec::new();
    let mut num_rows = 0;
    let mut num_cols = 0;
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = parse_line(path, i + 1, line)?;
        if num_rows == 0 {
            num_cols = row.len();
        }
        ensure!(
            row.len() == num_cols,
            RaggedRow {
                path,
                line: i + 1,
                expected: num_cols,
                found: row.len(),
            }
        );
        data.extend(row);
        num_rows += 1;
    }
    ensure!(num_rows > 0, EmptyFile { path });

    debug!("Read {} x {} features from {}", num_rows, num_cols, path.display());
    Ok(Features {
        data,
        num_rows,
        num_cols,
    })
}

/// Read a label file, one value per line.
pub fn read_labels(path: &Path) -> Result<Vec<f32>> {
    let text = fs::read_to_string(path).context(ReadFile { path })?;

    let mut labels = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        labels.push(line.parse().context(ParseValue { path, line: i + 1 })?);
    }
    ensure!(!labels.is_empty(), EmptyFile { path });
    Ok(labels)
}

fn parse_line(path: &Path, line_number: usize, line: &str) -> Result<Vec<f32>> {
    line.split_whitespace()
        .map(|value| {
            value.parse::<f32>().context(ParseValue {
                path,
                line: line_number,
            })
        })
        .collect()
}

/// Build a labelled matrix from a feature file and its label file.
///
/// Zero is a regular feature value in these files, so `NaN` is used as the missing sentinel.
pub fn load_matrix(lib: SharedLibrary, features: &Path, labels: &Path) -> Result<DMatrix> {
    let Features {
        data,
        num_rows,
        num_cols,
    } = read_features(features)?;
    let labels = read_labels(labels)?;

    let mut dmat = DMatrix::from_dense(lib, &data, num_rows, num_cols, Some(f32::NAN))?;
    dmat.set_labels(&labels)?;
    Ok(dmat)
}
