//! Safe wrappers around the XGBoost C API.
//!
//! [`DMatrix`] and [`Booster`] each own exactly one native handle and release it exactly once.
//! Every native call goes through a [`NativeLibrary`] so the same wrappers run against the system
//! libxgboost (feature `native`) or the in-memory [`native::mock::MockLibrary`] (feature `mock`).
//!
//! ```ignore
//! let lib = xgboost_bindings::native::xgboost();
//! let mut dtrain = DMatrix::from_dense(lib.clone(), &data, rows, cols, None)?;
//! dtrain.set_labels(&labels)?;
//!
//! let params = TrainingParameters::new(&dtrain, 10, BoosterParameters::default());
//! let booster = training::train(&params, None)?;
//! let preds = booster.predict(&dtrain, false, 0, false)?;
//! ```

/// Issue one call through a [`NativeLibrary`] and translate its status code.
///
/// `xgb_call!(lib, method(args..))` evaluates to `XGBResult<()>`.
macro_rules! xgb_call {
    ($lib:expr, $call:ident($($arg:expr),* $(,)?)) => {{
        let lib: &dyn $crate::native::NativeLibrary = &*$lib;
        $crate::error::XGBError::check_return_value(lib, lib.$call($($arg),*))
    }};
}

pub mod booster;
pub mod dmatrix;
pub mod error;
pub mod native;
pub mod parameters;
pub mod training;

pub use booster::{Booster, CustomObjective, FeatureMap, FeatureType};
pub use dmatrix::DMatrix;
pub use error::{XGBError, XGBResult};
pub use native::{NativeLibrary, RawHandle, SharedLibrary};
pub use parameters::{BoosterParameters, TrainingParameters};
pub use training::{train, train_with, EvaluationHistory, RoundEvaluation};
