//! Train a binary classifier on flat text files and report its confusion matrix on a test set.
//!
//! The data directory holds `x_train.txt`, `y_train.txt`, `x_test.txt` and `y_test.txt`: feature
//! rows separated by whitespace and one `0`/`1` label per line. A sample set ships in `demo/data`.
//!
//! Training runs on the system libxgboost. Builds with the `mock` feature can also select the
//! in-memory backend with `--backend mock`.

mod error;
mod loader;
mod report;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use snafu::ResultExt;
use tracing::{error, info, span, Level};
use tracing_subscriber::EnvFilter;
use xgboost_bindings::{train, BoosterParameters, EvaluationHistory, SharedLibrary, TrainingParameters};

use crate::error::{Params, ReadFile, Result};
use crate::report::ConfusionMatrix;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Directory with x_train.txt, y_train.txt, x_test.txt and y_test.txt
    #[arg(long)]
    data_dir: PathBuf,

    /// Number of boosting rounds
    #[arg(long, default_value_t = 200, value_parser = clap::value_parser!(u32).range(1..))]
    rounds: u32,

    /// JSON object of booster parameters applied over the defaults
    #[arg(long)]
    params: Option<String>,

    /// File holding a JSON object of booster parameters, applied before `--params`
    #[arg(long)]
    params_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Backend::Native)]
    backend: Backend,

    /// Probability above which a test row counts as positive
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,

    /// Save the trained model to this file
    #[arg(long)]
    model_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// The system libxgboost
    Native,
    /// In-memory stand-in fitting one-split trees, needs the `mock` feature
    Mock,
}

fn library(backend: Backend) -> Result<SharedLibrary> {
    match backend {
        Backend::Native => native_library(),
        Backend::Mock => mock_library(),
    }
}

#[cfg(feature = "native")]
fn native_library() -> Result<SharedLibrary> {
    Ok(xgboost_bindings::native::xgboost())
}

#[cfg(not(feature = "native"))]
fn native_library() -> Result<SharedLibrary> {
    error::NativeUnavailable.fail()
}

#[cfg(any(test, feature = "mock"))]
fn mock_library() -> Result<SharedLibrary> {
    let lib: SharedLibrary = xgboost_bindings::native::mock::MockLibrary::new();
    Ok(lib)
}

#[cfg(not(any(test, feature = "mock")))]
fn mock_library() -> Result<SharedLibrary> {
    error::MockUnavailable.fail()
}

/// Linear booster with a 2-class softprob objective.
fn default_params() -> BoosterParameters {
    BoosterParameters::new()
        .with("booster", "gblinear")
        .with("eta", 0.1)
        .with("alpha", 0.0)
        .with("lambda", 0.8)
        .with("eval_metric", "merror")
        .with("objective", "multi:softprob")
        .with("num_class", 2)
}

fn booster_params(args: &Args) -> Result<BoosterParameters> {
    let mut params = default_params();
    if let Some(path) = &args.params_file {
        let json = fs::read_to_string(path).context(ReadFile { path })?;
        params.merge(&serde_json::from_str(&json).context(Params)?);
    }
    if let Some(json) = &args.params {
        params.merge(&serde_json::from_str(json).context(Params)?);
    }
    Ok(params)
}

fn data_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.txt"))
}

fn run(args: &Args) -> Result<ConfusionMatrix> {
    let lib = library(args.backend)?;
    let params = booster_params(args)?;

    info!("Loading data from {}", args.data_dir.display());
    let mut dtrain = loader::load_matrix(
        lib.clone(),
        &data_file(&args.data_dir, "x_train"),
        &data_file(&args.data_dir, "y_train"),
    )?;
    let mut dtest = loader::load_matrix(
        lib,
        &data_file(&args.data_dir, "x_test"),
        &data_file(&args.data_dir, "y_test"),
    )?;
    let (train_rows, train_cols) = dtrain.shape()?;
    let (test_rows, test_cols) = dtest.shape()?;
    info!("Train matrix: {} x {}", train_rows, train_cols);
    info!("Test matrix:  {} x {}", test_rows, test_cols);

    let (mut booster, history) = {
        let span = span!(Level::INFO, "training", rounds = args.rounds);
        let _enter = span.enter();

        let evaluation_sets = [(&dtrain, "train"), (&dtest, "test")];
        let mut training_params = TrainingParameters::new(&dtrain, args.rounds, params);
        training_params.evaluation_sets = Some(&evaluation_sets[..]);

        let mut history = EvaluationHistory::new();
        let booster = train(&training_params, Some(&mut history))?;
        (booster, history)
    };
    for name in history.names() {
        if let Some(last) = history.get(name).and_then(|values| values.last()) {
            info!("Final {} metric: {}", name, last);
        }
    }

    if let Some(path) = &args.model_out {
        booster.save(path)?;
        info!("Model saved to {}", path.display());
    }

    let predictions = booster.predict(&dtest, false, 0, false)?;
    let labels = dtest.labels()?;
    let confusion = ConfusionMatrix::from_predictions(&predictions, &labels, args.threshold)?;

    booster.release()?;
    dtest.release()?;
    dtrain.release()?;
    Ok(confusion)
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(&args) {
        Ok(confusion) => {
            println!("{confusion}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
