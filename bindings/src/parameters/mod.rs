//! Parameters passed to a [`Booster`](crate::Booster) and to the training loop.
//!
//! [`BoosterParameters`] is what actually reaches XGBoost: an ordered list of string pairs, each
//! written with one `XGBoosterSetParam` call. It can be filled from the typed, validated
//! containers in [`tree`], [`linear`] and [`learning`], from raw pairs, or from JSON.

use derive_builder::Builder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::booster::CustomObjective;
use crate::DMatrix;

pub mod learning;
pub mod linear;
pub mod tree;

use learning::LearningTaskParameters;
use linear::LinearBoosterParameters;
use tree::TreeBoosterParameters;

const EVAL_METRIC: &str = "eval_metric";

/// Type of booster to use, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoosterType {
    Tree(TreeBoosterParameters),
    Linear(LinearBoosterParameters),
}

impl Default for BoosterType {
    fn default() -> Self {
        BoosterType::Tree(TreeBoosterParameters::default())
    }
}

impl BoosterType {
    fn as_string_pairs(&self) -> Vec<(String, String)> {
        match self {
            BoosterType::Tree(p) => p.as_string_pairs(),
            BoosterType::Linear(p) => p.as_string_pairs(),
        }
    }
}

/// Ordered string parameters for a booster.
///
/// Setting a key again replaces its value but keeps its position. `eval_metric` is the
/// exception: XGBoost accumulates metrics, so every distinct value is kept and written in turn.
///
/// ```ignore
/// let params = BoosterParameters::default()
///     .with_booster(&BoosterType::Tree(tree_params))
///     .with_learning_params(&learning_params)
///     .with("verbosity", 0);
/// ```
///
/// In JSON the parameters are a flat object; scalar values of any type are accepted and
/// `eval_metric` may be a list:
///
/// ```json
/// {"objective": "binary:logistic", "max_depth": 3, "eval_metric": ["logloss", "error"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "IndexMap<String, Value>",
    into = "IndexMap<String, Value>"
)]
pub struct BoosterParameters {
    params: IndexMap<String, String>,
    eval_metrics: Vec<String>,
}

impl BoosterParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let mut params = Self::new();
        for (key, value) in pairs {
            params.set(key, value);
        }
        params
    }

    pub fn set<K: Into<String>, V: ToString>(&mut self, key: K, value: V) -> &mut Self {
        let key = key.into();
        let value = value.to_string();
        if key == EVAL_METRIC {
            if !self.eval_metrics.contains(&value) {
                self.eval_metrics.push(value);
            }
        } else {
            self.params.insert(key, value);
        }
        self
    }

    pub fn with<K: Into<String>, V: ToString>(mut self, key: K, value: V) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_booster(mut self, booster: &BoosterType) -> Self {
        self.extend_pairs(booster.as_string_pairs());
        self
    }

    pub fn with_learning_params(mut self, learning: &LearningTaskParameters) -> Self {
        self.extend_pairs(learning.as_string_pairs());
        self
    }

    /// Apply every entry of `other` on top of these parameters.
    pub fn merge(&mut self, other: &BoosterParameters) {
        self.extend_pairs(other.as_string_pairs());
    }

    fn extend_pairs(&mut self, pairs: Vec<(String, String)>) {
        for (key, value) in pairs {
            self.set(key, value);
        }
    }

    /// Value of a parameter; for `eval_metric` the first metric.
    pub fn get(&self, key: &str) -> Option<&str> {
        if key == EVAL_METRIC {
            return self.eval_metrics.first().map(String::as_str);
        }
        self.params.get(key).map(String::as_str)
    }

    pub fn eval_metrics(&self) -> &[String] {
        &self.eval_metrics
    }

    pub fn len(&self) -> usize {
        self.params.len() + self.eval_metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `XGBoosterSetParam` calls these parameters stand for, in order.
    pub fn as_string_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .chain(
                self.eval_metrics
                    .iter()
                    .map(|m| (EVAL_METRIC.to_owned(), m.clone())),
            )
            .collect()
    }
}

fn scalar_to_string(key: &str, value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("parameter {key} must be a scalar, got {other}")),
    }
}

impl TryFrom<IndexMap<String, Value>> for BoosterParameters {
    type Error = String;

    fn try_from(map: IndexMap<String, Value>) -> Result<Self, Self::Error> {
        let mut params = BoosterParameters::new();
        for (key, value) in &map {
            match value {
                Value::Array(metrics) if key == EVAL_METRIC => {
                    for metric in metrics {
                        params.set(key.as_str(), scalar_to_string(key, metric)?);
                    }
                }
                scalar => {
                    params.set(key.as_str(), scalar_to_string(key, scalar)?);
                }
            }
        }
        Ok(params)
    }
}

impl From<BoosterParameters> for IndexMap<String, Value> {
    fn from(params: BoosterParameters) -> Self {
        let mut map: IndexMap<String, Value> = params
            .params
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        match params.eval_metrics.len() {
            0 => {}
            1 => {
                map.insert(EVAL_METRIC.to_owned(), Value::String(params.eval_metrics[0].clone()));
            }
            _ => {
                let metrics = params.eval_metrics.into_iter().map(Value::String).collect();
                map.insert(EVAL_METRIC.to_owned(), Value::Array(metrics));
            }
        }
        map
    }
}

/// Everything the training loop needs for one run.
///
/// ```ignore
/// let training_params = TrainingParametersBuilder::default()
///     .dtrain(&dtrain)
///     .boost_rounds(50)
///     .booster_params(params)
///     .evaluation_sets(&[(&dtrain, "train"), (&dtest, "test")][..])
///     .build()?;
/// ```
#[derive(Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct TrainingParameters<'a> {
    /// Matrix to train on; it is cached by the booster and updated against every round.
    pub dtrain: &'a DMatrix,

    /// Number of boosting rounds, at least 1.
    #[builder(default = "10")]
    pub boost_rounds: u32,

    #[builder(default)]
    pub booster_params: BoosterParameters,

    /// Watch-list evaluated after every round, in this order.
    #[builder(default, setter(strip_option))]
    pub evaluation_sets: Option<&'a [(&'a DMatrix, &'a str)]>,

    /// Replaces the objective configured in `booster_params` for the gradient computation.
    #[builder(default, setter(strip_option))]
    pub custom_objective_fn: Option<CustomObjective>,
}

impl<'a> TrainingParameters<'a> {
    pub fn new(dtrain: &'a DMatrix, boost_rounds: u32, booster_params: BoosterParameters) -> Self {
        TrainingParameters {
            dtrain,
            boost_rounds,
            booster_params,
            evaluation_sets: None,
            custom_objective_fn: None,
        }
    }
}

impl<'a> TrainingParametersBuilder<'a> {
    fn validate(&self) -> Result<(), String> {
        if let Some(0) = self.boost_rounds {
            return Err("boost_rounds must be at least 1".to_owned());
        }
        Ok(())
    }
}
