//! Parameters for the tree booster (`gbtree`).

use std::fmt;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// The tree construction algorithm used in XGBoost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeMethod {
    /// Let XGBoost choose the fastest method.
    #[default]
    Auto,

    /// Exact greedy algorithm.
    Exact,

    /// Approximate greedy algorithm using quantile sketch and gradient histogram.
    Approx,

    /// Fast histogram optimized approximate greedy algorithm.
    Hist,
}

impl fmt::Display for TreeMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            TreeMethod::Auto => "auto",
            TreeMethod::Exact => "exact",
            TreeMethod::Approx => "approx",
            TreeMethod::Hist => "hist",
        };
        write!(f, "{}", s)
    }
}

/// BoosterParameters for the tree booster.
///
/// Built with [`TreeBoosterParametersBuilder`], which rejects out-of-range values:
///
/// ```ignore
/// let tree_params = TreeBoosterParametersBuilder::default()
///     .max_depth(2)
///     .eta(1.0)
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate"))]
pub struct TreeBoosterParameters {
    /// Step size shrinkage used in update to prevent overfitting, range [0,1]. Default 0.3.
    pub eta: f32,

    /// Minimum loss reduction required to make a further partition on a leaf node, range [0,∞].
    pub gamma: f32,

    /// Maximum depth of a tree, at least 1. Default 6.
    pub max_depth: u32,

    /// Minimum sum of instance weight (hessian) needed in a child, range [0,∞]. Default 1.
    pub min_child_weight: f32,

    /// Maximum delta step allowed for each tree's weight estimation, range [0,∞]. 0 means no
    /// constraint.
    pub max_delta_step: f32,

    /// Subsample ratio of the training instances, range (0,1]. Default 1.
    pub subsample: f32,

    /// Subsample ratio of columns when constructing each tree, range (0,1].
    pub colsample_bytree: f32,

    /// Subsample ratio of columns for each split, in each level, range (0,1].
    pub colsample_bylevel: f32,

    /// Subsample ratio of columns for each node, range (0,1].
    pub colsample_bynode: f32,

    /// L2 regularization term on weights. Default 1.
    pub lambda: f32,

    /// L1 regularization term on weights.
    pub alpha: f32,

    pub tree_method: TreeMethod,

    /// Balance of positive and negative weights, useful for unbalanced classes.
    pub scale_pos_weight: f32,
}

impl Default for TreeBoosterParameters {
    fn default() -> Self {
        TreeBoosterParameters {
            eta: 0.3,
            gamma: 0.0,
            max_depth: 6,
            min_child_weight: 1.0,
            max_delta_step: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            colsample_bylevel: 1.0,
            colsample_bynode: 1.0,
            lambda: 1.0,
            alpha: 0.0,
            tree_method: TreeMethod::default(),
            scale_pos_weight: 1.0,
        }
    }
}

impl TreeBoosterParameters {
    pub(crate) fn as_string_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("booster".to_owned(), "gbtree".to_owned()),
            ("eta".to_owned(), self.eta.to_string()),
            ("gamma".to_owned(), self.gamma.to_string()),
            ("max_depth".to_owned(), self.max_depth.to_string()),
            ("min_child_weight".to_owned(), self.min_child_weight.to_string()),
            ("max_delta_step".to_owned(), self.max_delta_step.to_string()),
            ("subsample".to_owned(), self.subsample.to_string()),
            ("colsample_bytree".to_owned(), self.colsample_bytree.to_string()),
            ("colsample_bylevel".to_owned(), self.colsample_bylevel.to_string()),
            ("colsample_bynode".to_owned(), self.colsample_bynode.to_string()),
            ("lambda".to_owned(), self.lambda.to_string()),
            ("alpha".to_owned(), self.alpha.to_string()),
            ("tree_method".to_owned(), self.tree_method.to_string()),
            ("scale_pos_weight".to_owned(), self.scale_pos_weight.to_string()),
        ]
    }
}

fn check_range(
    name: &str,
    value: Option<f32>,
    ok: impl Fn(f32) -> bool,
    range: &str,
) -> Result<(), String> {
    match value {
        Some(v) if !ok(v) => Err(format!("{name} must be in {range}, got {v}")),
        _ => Ok(()),
    }
}

impl TreeBoosterParametersBuilder {
    fn validate(&self) -> Result<(), String> {
        check_range("eta", self.eta, |v| (0.0..=1.0).contains(&v), "[0, 1]")?;
        check_range("gamma", self.gamma, |v| v >= 0.0, "[0, inf)")?;
        check_range("min_child_weight", self.min_child_weight, |v| v >= 0.0, "[0, inf)")?;
        check_range("max_delta_step", self.max_delta_step, |v| v >= 0.0, "[0, inf)")?;
        check_range("lambda", self.lambda, |v| v >= 0.0, "[0, inf)")?;
        check_range("alpha", self.alpha, |v| v >= 0.0, "[0, inf)")?;
        check_range("scale_pos_weight", self.scale_pos_weight, |v| v >= 0.0, "[0, inf)")?;

        let unit = |v: f32| v > 0.0 && v <= 1.0;
        check_range("subsample", self.subsample, unit, "(0, 1]")?;
        check_range("colsample_bytree", self.colsample_bytree, unit, "(0, 1]")?;
        check_range("colsample_bylevel", self.colsample_bylevel, unit, "(0, 1]")?;
        check_range("colsample_bynode", self.colsample_bynode, unit, "(0, 1]")?;

        if let Some(0) = self.max_depth {
            return Err("max_depth must be at least 1".to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let params = TreeBoosterParametersBuilder::default().build().unwrap();
        assert_eq!(params, TreeBoosterParameters::default());
        assert_eq!(params.max_depth, 6);
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(TreeBoosterParametersBuilder::default().eta(1.5).build().is_err());
        assert!(TreeBoosterParametersBuilder::default().gamma(-1.0).build().is_err());
        assert!(TreeBoosterParametersBuilder::default().max_depth(0).build().is_err());
        assert!(TreeBoosterParametersBuilder::default().subsample(0.0).build().is_err());
        assert!(TreeBoosterParametersBuilder::default()
            .colsample_bytree(1.1)
            .build()
            .is_err());
        assert!(TreeBoosterParametersBuilder::default()
            .max_delta_step(-0.5)
            .build()
            .is_err());
    }

    #[test]
    fn string_pairs() {
        let params = TreeBoosterParametersBuilder::default()
            .max_depth(2)
            .eta(1.0)
            .tree_method(TreeMethod::Hist)
            .build()
            .unwrap();
        let pairs = params.as_string_pairs();
        assert_eq!(pairs[0], ("booster".to_owned(), "gbtree".to_owned()));
        assert!(pairs.contains(&("max_depth".to_owned(), "2".to_owned())));
        assert!(pairs.contains(&("eta".to_owned(), "1".to_owned())));
        assert!(pairs.contains(&("tree_method".to_owned(), "hist".to_owned())));
    }
}
