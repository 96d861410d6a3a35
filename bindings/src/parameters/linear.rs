//! Parameters for the linear booster (`gblinear`).

use std::fmt;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Algorithm used to fit the linear model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinearUpdate {
    /// Parallel coordinate descent.
    #[default]
    Shotgun,

    /// Ordinary coordinate descent.
    CoordDescent,
}

impl fmt::Display for LinearUpdate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LinearUpdate::Shotgun => write!(f, "shotgun"),
            LinearUpdate::CoordDescent => write!(f, "coord_descent"),
        }
    }
}

/// BoosterParameters for the linear booster.
#[derive(Debug, Clone, Default, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate"))]
pub struct LinearBoosterParameters {
    /// L2 regularization term on weights.
    pub lambda: f32,

    /// L1 regularization term on weights.
    pub alpha: f32,

    pub updater: LinearUpdate,
}

impl LinearBoosterParameters {
    pub(crate) fn as_string_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("booster".to_owned(), "gblinear".to_owned()),
            ("lambda".to_owned(), self.lambda.to_string()),
            ("alpha".to_owned(), self.alpha.to_string()),
            ("updater".to_owned(), self.updater.to_string()),
        ]
    }
}

impl LinearBoosterParametersBuilder {
    fn validate(&self) -> Result<(), String> {
        for (name, value) in [("lambda", self.lambda), ("alpha", self.alpha)] {
            if let Some(v) = value {
                if v < 0.0 {
                    return Err(format!("{name} must be non-negative, got {v}"));
                }
            }
        }
        Ok(())
    }
}
