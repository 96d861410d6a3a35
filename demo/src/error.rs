use std::num::ParseFloatError;
use std::path::PathBuf;

use snafu::Snafu;
use xgboost_bindings::XGBError;

pub type Result<T, E = DemoError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))] // disables default `Snafu` suffix
pub enum DemoError {
    #[snafu(display("Unable to read {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("{}:{line}: invalid number: {source}", path.display()))]
    ParseValue {
        path: PathBuf,
        line: usize,
        source: ParseFloatError,
    },

    #[snafu(display(
        "{}:{line}: expected {expected} values like the first row, found {found}",
        path.display()
    ))]
    RaggedRow {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[snafu(display("{} contains no data", path.display()))]
    EmptyFile { path: PathBuf },

    #[snafu(display("Invalid booster parameters: {source}"))]
    Params { source: serde_json::Error },

    #[snafu(display("{predictions} predictions can't be matched to {labels} labels"))]
    PredictionShape { predictions: usize, labels: usize },

    #[snafu(display("This build has no native XGBoost backend, rebuild with `--features native`"))]
    NativeUnavailable,

    #[snafu(display("This build has no in-memory backend, rebuild with `--features mock`"))]
    MockUnavailable,

    #[snafu(display("XGBoost error: {source}"))]
    XGBoost { source: XGBError },
}

impl From<XGBError> for DemoError {
    fn from(source: XGBError) -> Self {
        DemoError::XGBoost { source }
    }
}
