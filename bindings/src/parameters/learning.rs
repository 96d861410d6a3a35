//! Learning task parameters: objective, evaluation metrics and base score.

use std::fmt;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Learning objective used when training.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Objective {
    /// Linear regression.
    #[default]
    RegSquaredError,

    /// Logistic regression.
    RegLogistic,

    /// Logistic regression for binary classification, outputs probability.
    BinaryLogistic,

    /// Logistic regression for binary classification, outputs score before logistic
    /// transformation.
    BinaryLogitRaw,

    /// Hinge loss for binary classification, outputs 0 or 1.
    BinaryHinge,

    /// Poisson regression for count data, outputs mean of poisson distribution.
    CountPoisson,

    /// Multiclass classification using the softmax objective, with given number of classes.
    /// Outputs the predicted class.
    MultiSoftmax(u32),

    /// Like `MultiSoftmax`, but outputs one probability per class and row.
    MultiSoftprob(u32),

    /// Ranking task which minimizes the pairwise loss.
    RankPairwise,
}

impl Objective {
    pub fn num_class(&self) -> Option<u32> {
        match self {
            Objective::MultiSoftmax(n) | Objective::MultiSoftprob(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Objective::RegSquaredError => "reg:squarederror",
            Objective::RegLogistic => "reg:logistic",
            Objective::BinaryLogistic => "binary:logistic",
            Objective::BinaryLogitRaw => "binary:logitraw",
            Objective::BinaryHinge => "binary:hinge",
            Objective::CountPoisson => "count:poisson",
            Objective::MultiSoftmax(_) => "multi:softmax",
            Objective::MultiSoftprob(_) => "multi:softprob",
            Objective::RankPairwise => "rank:pairwise",
        };
        write!(f, "{}", s)
    }
}

/// Metrics to evaluate the model with on each round.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Metrics {
    /// Let XGBoost pick the default metric for the objective.
    #[default]
    Auto,

    Custom(Vec<EvaluationMetric>),
}

/// Type of evaluation metrics to use during learning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EvaluationMetric {
    /// Root Mean Square Error.
    RMSE,

    /// Mean Absolute Error.
    MAE,

    /// Negative log-likelihood.
    LogLoss,

    /// Binary classification error rate, with the given threshold for positive instances.
    BinaryErrorRate(f32),

    /// Multiclass classification error rate.
    MultiClassErrorRate,

    /// Multiclass logloss.
    MultiClassLogLoss,

    /// Area under the curve for ranking evaluation.
    AUC,

    /// Normalized Discounted Cumulative Gain.
    NDCG,

    /// Mean average precision.
    MAP,

    /// Mean average precision over the top n positions, treating lists without positive
    /// samples as 0.
    MapCutNegative(u32),
}

impl fmt::Display for EvaluationMetric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EvaluationMetric::RMSE => write!(f, "rmse"),
            EvaluationMetric::MAE => write!(f, "mae"),
            EvaluationMetric::LogLoss => write!(f, "logloss"),
            EvaluationMetric::BinaryErrorRate(t) if (*t - 0.5).abs() < f32::EPSILON => {
                write!(f, "error")
            }
            EvaluationMetric::BinaryErrorRate(t) => write!(f, "error@{}", t),
            EvaluationMetric::MultiClassErrorRate => write!(f, "merror"),
            EvaluationMetric::MultiClassLogLoss => write!(f, "mlogloss"),
            EvaluationMetric::AUC => write!(f, "auc"),
            EvaluationMetric::NDCG => write!(f, "ndcg"),
            EvaluationMetric::MAP => write!(f, "map"),
            EvaluationMetric::MapCutNegative(n) => write!(f, "map@{}-", n),
        }
    }
}

/// Parameters describing the learning task.
///
/// ```ignore
/// let learning_params = LearningTaskParametersBuilder::default()
///     .objective(Objective::BinaryLogistic)
///     .eval_metrics(Metrics::Custom(vec![EvaluationMetric::LogLoss]))
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate"))]
pub struct LearningTaskParameters {
    pub objective: Objective,

    /// Initial prediction score of all instances, global bias. Default 0.5.
    pub base_score: f32,

    pub eval_metrics: Metrics,

    /// Random number seed. Left to the booster's own default when `None`.
    #[builder(setter(strip_option))]
    pub seed: Option<u64>,
}

impl Default for LearningTaskParameters {
    fn default() -> Self {
        LearningTaskParameters {
            objective: Objective::default(),
            base_score: 0.5,
            eval_metrics: Metrics::default(),
            seed: None,
        }
    }
}

impl LearningTaskParameters {
    pub(crate) fn as_string_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("objective".to_owned(), self.objective.to_string())];
        if let Some(num_class) = self.objective.num_class() {
            pairs.push(("num_class".to_owned(), num_class.to_string()));
        }
        pairs.push(("base_score".to_owned(), self.base_score.to_string()));
        if let Metrics::Custom(metrics) = &self.eval_metrics {
            for metric in metrics {
                pairs.push(("eval_metric".to_owned(), metric.to_string()));
            }
        }
        if let Some(seed) = self.seed {
            pairs.push(("seed".to_owned(), seed.to_string()));
        }
        pairs
    }
}

impl LearningTaskParametersBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(Some(0)) = self.objective.map(|o| o.num_class()) {
            return Err("multi-class objectives need at least one class".to_owned());
        }
        if let Some(base_score) = self.base_score {
            if !base_score.is_finite() {
                return Err(format!("base_score must be finite, got {base_score}"));
            }
        }
        Ok(())
    }
}
