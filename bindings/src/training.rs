//! The training loop: one booster, one update and one evaluation per round.

use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::Serialize;
use snafu::ensure;

use crate::booster::check_eval_names;
use crate::error::{Validation, XGBResult};
use crate::{Booster, DMatrix, TrainingParameters};

/// What one round of training reported for the watch-list.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundEvaluation {
    pub round: u32,

    /// XGBoost's summary line for the round.
    pub eval: String,

    /// Watch name to metric value, in watch-list order. Empty unless metrics were requested.
    pub metrics: IndexMap<String, f32>,
}

/// Per-round metrics of a training run, keyed by watch name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationHistory {
    metrics: IndexMap<String, Vec<f32>>,
    evals: Vec<String>,
}

impl EvaluationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, round: RoundEvaluation) {
        for (name, value) in round.metrics {
            self.metrics.entry(name).or_default().push(value);
        }
        self.evals.push(round.eval);
    }

    /// Metric values of one watched matrix, indexed by round.
    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.metrics.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    /// Evaluation lines, one per round.
    pub fn evals(&self) -> &[String] {
        &self.evals
    }

    pub fn rounds(&self) -> usize {
        self.evals.len()
    }
}

/// Train a booster, optionally collecting every round's metrics into `history`.
///
/// The training matrix is cached by the booster but only evaluated when it is part of the
/// watch-list. Any failure aborts the run, frees the booster and is returned unchanged.
pub fn train(
    params: &TrainingParameters,
    history: Option<&mut EvaluationHistory>,
) -> XGBResult<Booster> {
    match history {
        Some(history) => run(params, true, |round| history.record(round)),
        None => run(params, false, |_| {}),
    }
}

/// Train a booster, handing each round's evaluation to `on_round` as soon as it is available.
///
/// `on_round` is only called when a watch-list is set.
pub fn train_with<F>(params: &TrainingParameters, on_round: F) -> XGBResult<Booster>
where
    F: FnMut(RoundEvaluation),
{
    run(params, true, on_round)
}

fn run<F>(params: &TrainingParameters, with_metrics: bool, mut on_round: F) -> XGBResult<Booster>
where
    F: FnMut(RoundEvaluation),
{
    ensure!(
        params.boost_rounds >= 1 && i32::try_from(params.boost_rounds).is_ok(),
        Validation {
            reason: format!("invalid number of boosting rounds: {}", params.boost_rounds),
        }
    );

    let eval_sets = params.evaluation_sets.unwrap_or(&[]);
    let eval_dmats: Vec<&DMatrix> = eval_sets.iter().map(|(dmat, _)| *dmat).collect();
    let eval_names: Vec<&str> = eval_sets.iter().map(|(_, name)| *name).collect();
    check_eval_names(&eval_names)?;

    let cached_dmats = {
        let mut dmats = vec![params.dtrain];
        dmats.extend(&eval_dmats);
        dmats
    };

    let mut bst = Booster::new_with_cached_dmats(
        params.dtrain.library(),
        &params.booster_params,
        &cached_dmats,
    )?;

    for round in 0..params.boost_rounds {
        let result = boost_round(
            &mut bst,
            params,
            round,
            &eval_dmats,
            &eval_names,
            with_metrics,
        );
        match result {
            Ok(Some(evaluation)) => on_round(evaluation),
            Ok(None) => {}
            Err(err) => {
                if let Err(free_err) = bst.release() {
                    warn!("Failed to free Booster after aborted training: {}", free_err);
                }
                return Err(err);
            }
        }
    }

    Ok(bst)
}

fn boost_round(
    bst: &mut Booster,
    params: &TrainingParameters,
    round: u32,
    eval_dmats: &[&DMatrix],
    eval_names: &[&str],
    with_metrics: bool,
) -> XGBResult<Option<RoundEvaluation>> {
    // checked against i32::MAX before the loop
    let iteration = round as i32;

    if let Some(objective_fn) = params.custom_objective_fn {
        debug!("Boosting in round: {}", round);
        bst.update_custom(params.dtrain, objective_fn)?;
    } else {
        debug!("Updating in round: {}", round);
        bst.update(params.dtrain, iteration)?;
    }

    if eval_dmats.is_empty() {
        return Ok(None);
    }

    let (eval, metrics) = if with_metrics {
        let (eval, values) = bst.eval_set_with_metrics(eval_dmats, eval_names, iteration)?;
        let metrics = eval_names
            .iter()
            .map(|name| (*name).to_owned())
            .zip(values)
            .collect();
        (eval, metrics)
    } else {
        (bst.eval_set(eval_dmats, eval_names, iteration)?, IndexMap::new())
    };
    info!("{}", eval);

    Ok(Some(RoundEvaluation {
        round,
        eval,
        metrics,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::native::mock::MockLibrary;
    use crate::parameters::learning::{LearningTaskParametersBuilder, Objective};
    use crate::parameters::tree::TreeBoosterParameters;
    use crate::parameters::{BoosterType, TrainingParametersBuilder};
    use crate::{BoosterParameters, XGBError};

    /// `rows` x 4 features with a label that depends on the first two.
    fn synthetic_matrix(lib: &Arc<MockLibrary>, rows: usize) -> DMatrix {
        let mut data = Vec::with_capacity(rows * 4);
        let mut labels = Vec::with_capacity(rows);
        for i in 0..rows {
            let row: Vec<f32> = (0..4)
                .map(|j| ((i * 7 + j * 13) % 17) as f32 / 17.0)
                .collect();
            labels.push(if row[0] + row[1] > 1.0 { 1.0 } else { 0.0 });
            data.extend(row);
        }
        let mut dmat = DMatrix::from_dense(lib.clone(), &data, rows, 4, Some(f32::NAN)).unwrap();
        dmat.set_labels(&labels).unwrap();
        dmat
    }

    fn logistic_params() -> BoosterParameters {
        let learning_params = LearningTaskParametersBuilder::default()
            .objective(Objective::BinaryLogistic)
            .build()
            .unwrap();
        BoosterParameters::default()
            .with_booster(&BoosterType::Tree(TreeBoosterParameters::default()))
            .with_learning_params(&learning_params)
    }

    #[test]
    fn history_has_one_value_per_round_and_matrix() {
        let lib = MockLibrary::new();
        let mut dtrain = synthetic_matrix(&lib, 40);
        let mut dtest = dtrain.slice(&(0..10).collect::<Vec<_>>()).unwrap();

        let evaluation_sets = &[(&dtrain, "train"), (&dtest, "test")];
        let params = TrainingParametersBuilder::default()
            .dtrain(&dtrain)
            .boost_rounds(7)
            .booster_params(logistic_params())
            .evaluation_sets(&evaluation_sets[..])
            .build()
            .unwrap();

        let mut history = EvaluationHistory::new();
        let mut bst = train(&params, Some(&mut history)).unwrap();

        assert_eq!(history.rounds(), 7);
        assert_eq!(history.names().collect::<Vec<_>>(), vec!["train", "test"]);
        assert_eq!(history.get("train").unwrap().len(), 7);
        assert_eq!(history.get("test").unwrap().len(), 7);
        for (i, eval) in history.evals().iter().enumerate() {
            assert!(eval.starts_with(&format!("[{i}]\ttrain-logloss:")));
        }
        let train_loss = history.get("train").unwrap();
        assert!(train_loss[6] < train_loss[0]);

        assert_eq!(lib.call_count("XGBoosterUpdateOneIter"), 7);
        assert_eq!(lib.call_count("XGBoosterEvalOneIter"), 7);

        bst.release().unwrap();
        dtest.release().unwrap();
        dtrain.release().unwrap();
    }

    #[test]
    fn no_watch_list_no_evaluation() {
        let lib = MockLibrary::new();
        let mut dtrain = synthetic_matrix(&lib, 20);
        let params = TrainingParameters::new(&dtrain, 3, logistic_params());

        let mut rounds = 0;
        let mut bst = train_with(&params, |_| rounds += 1).unwrap();

        assert_eq!(rounds, 0);
        assert_eq!(lib.call_count("XGBoosterUpdateOneIter"), 3);
        assert_eq!(lib.call_count("XGBoosterEvalOneIter"), 0);
        assert_eq!(lib.tree_count(bst.handle().unwrap()), 3);

        bst.release().unwrap();
        dtrain.release().unwrap();
    }

    #[test]
    fn failure_aborts_and_frees_booster() {
        let lib = MockLibrary::new();
        let mut dtrain = synthetic_matrix(&lib, 20);
        let evaluation_sets = [(&dtrain, "train")];
        let params = TrainingParametersBuilder::default()
            .dtrain(&dtrain)
            .boost_rounds(5)
            .evaluation_sets(&evaluation_sets[..])
            .build()
            .unwrap();

        lib.fail_next("XGBoosterEvalOneIter", "[12:00:00] Unknown metric function");
        let err = train(&params, None).unwrap_err();

        assert!(err.is_native());
        assert!(err.to_string().contains("Unknown metric function"));
        assert_eq!(lib.call_count("XGBoosterUpdateOneIter"), 1);
        assert_eq!(lib.live_boosters(), 0);

        dtrain.release().unwrap();
    }

    #[test]
    fn update_failure_aborts_and_frees_booster() {
        let lib = MockLibrary::new();
        let mut dtrain = synthetic_matrix(&lib, 20);
        let evaluation_sets = [(&dtrain, "train")];
        let params = TrainingParametersBuilder::default()
            .dtrain(&dtrain)
            .boost_rounds(5)
            .booster_params(logistic_params())
            .evaluation_sets(&evaluation_sets[..])
            .build()
            .unwrap();

        lib.fail_next("XGBoosterUpdateOneIter", "[12:00:00] Check failed: labels");
        let mut history = EvaluationHistory::new();
        let err = train(&params, Some(&mut history)).unwrap_err();

        assert!(matches!(
            &err,
            XGBError::Native { message } if message == "[12:00:00] Check failed: labels"
        ));
        assert_eq!(lib.call_count("XGBoosterUpdateOneIter"), 1);
        assert_eq!(lib.call_count("XGBoosterEvalOneIter"), 0);
        assert_eq!(history.rounds(), 0);
        assert_eq!(lib.live_boosters(), 0);

        dtrain.release().unwrap();
    }

    #[test]
    fn boost_failure_aborts_and_frees_booster() {
        fn squared_error(preds: &[f32], dtrain: &DMatrix) -> (Vec<f32>, Vec<f32>) {
            let labels = dtrain.labels().unwrap();
            let gradient = preds.iter().zip(&labels).map(|(p, y)| p - y).collect();
            (gradient, vec![1.0; preds.len()])
        }

        let lib = MockLibrary::new();
        let mut dtrain = synthetic_matrix(&lib, 20);
        let evaluation_sets = [(&dtrain, "train")];
        let params = TrainingParametersBuilder::default()
            .dtrain(&dtrain)
            .boost_rounds(5)
            .evaluation_sets(&evaluation_sets[..])
            .custom_objective_fn(squared_error)
            .build()
            .unwrap();

        let mut rounds = Vec::new();
        let mut bst = train_with(&params, |round| rounds.push(round.round)).unwrap();
        assert_eq!(rounds, vec![0, 1, 2, 3, 4]);
        bst.release().unwrap();

        lib.clear_calls();
        lib.fail_next("XGBoosterBoostOneIter", "[12:00:00] gradient out of range");
        let mut rounds = Vec::new();
        let err = train_with(&params, |round| rounds.push(round.round)).unwrap_err();

        assert!(err.is_native());
        assert!(err.to_string().contains("gradient out of range"));
        assert!(rounds.is_empty());
        assert_eq!(lib.call_count("XGBoosterBoostOneIter"), 1);
        assert_eq!(lib.call_count("XGBoosterEvalOneIter"), 0);
        assert_eq!(lib.live_boosters(), 0);

        dtrain.release().unwrap();
    }

    #[test]
    fn rejects_duplicate_watch_names() {
        let lib = MockLibrary::new();
        let mut dtrain = synthetic_matrix(&lib, 20);
        let mut dslice = dtrain.slice(&[0, 1, 2, 3]).unwrap();
        lib.clear_calls();

        let evaluation_sets = [(&dtrain, "train"), (&dslice, "train")];
        let params = TrainingParametersBuilder::default()
            .dtrain(&dtrain)
            .boost_rounds(3)
            .booster_params(logistic_params())
            .evaluation_sets(&evaluation_sets[..])
            .build()
            .unwrap();

        let mut history = EvaluationHistory::new();
        let err = train(&params, Some(&mut history)).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("duplicate evaluation name: train"));
        assert_eq!(history.rounds(), 0);
        assert!(lib.calls().is_empty());

        dslice.release().unwrap();
        dtrain.release().unwrap();
    }

    #[test]
    fn rejects_zero_rounds() {
        let lib = MockLibrary::new();
        let mut dtrain = synthetic_matrix(&lib, 5);
        lib.clear_calls();

        let params = TrainingParameters::new(&dtrain, 0, BoosterParameters::default());
        assert!(train(&params, None).unwrap_err().is_validation());
        assert!(lib.calls().is_empty());

        dtrain.release().unwrap();
    }

    #[test]
    fn custom_objective_replaces_update() {
        fn squared_error(preds: &[f32], dtrain: &DMatrix) -> (Vec<f32>, Vec<f32>) {
            let labels = dtrain.labels().unwrap();
            let gradient = preds.iter().zip(&labels).map(|(p, y)| p - y).collect();
            (gradient, vec![1.0; preds.len()])
        }

        let lib = MockLibrary::new();
        let mut dtrain = synthetic_matrix(&lib, 30);
        let evaluation_sets = [(&dtrain, "train")];
        let params = TrainingParametersBuilder::default()
            .dtrain(&dtrain)
            .boost_rounds(4)
            .evaluation_sets(&evaluation_sets[..])
            .custom_objective_fn(squared_error)
            .build()
            .unwrap();

        let mut history = EvaluationHistory::new();
        let mut bst = train(&params, Some(&mut history)).unwrap();

        assert_eq!(lib.call_count("XGBoosterBoostOneIter"), 4);
        assert_eq!(lib.call_count("XGBoosterUpdateOneIter"), 0);
        let rmse = history.get("train").unwrap();
        assert!(rmse[3] < rmse[0]);

        bst.release().unwrap();
        dtrain.release().unwrap();
    }

    #[test]
    fn binary_logistic_end_to_end() {
        let lib = MockLibrary::new();
        let mut dtrain = synthetic_matrix(&lib, 100);
        let evaluation_sets = [(&dtrain, "train")];
        let params = TrainingParametersBuilder::default()
            .dtrain(&dtrain)
            .boost_rounds(50)
            .booster_params(logistic_params())
            .evaluation_sets(&evaluation_sets[..])
            .build()
            .unwrap();

        let mut evaluations = Vec::new();
        let mut bst = train_with(&params, |round| evaluations.push(round)).unwrap();

        assert_eq!(evaluations.len(), 50);
        for (i, evaluation) in evaluations.iter().enumerate() {
            assert_eq!(evaluation.round as usize, i);
            assert!(!evaluation.eval.is_empty());
            assert!(evaluation.metrics.contains_key("train"));
        }

        let preds = bst.predict(&dtrain, false, 0, false).unwrap();
        assert_eq!(preds.len(), 100);
        assert!(preds.iter().all(|p| (0.0..=1.0).contains(p)));

        bst.release().unwrap();
        dtrain.release().unwrap();
        assert_eq!(lib.live_boosters(), 0);
        assert_eq!(lib.live_matrices(), 0);
    }
}
