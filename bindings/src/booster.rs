use indexmap::IndexMap;
use log::{debug, warn};
use ndarray::Array2;
use snafu::{ensure, OptionExt, ResultExt};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Io, MalformedEvaluation, Released, Unsupported, Validation, XGBResult};
use crate::native::{path_to_cstring, to_cstring, RawHandle, SharedLibrary};
use crate::parameters::BoosterParameters;
use crate::DMatrix;

const KIND: &str = "Booster";

/// Seed written to every new booster before the caller's parameters.
pub const DEFAULT_SEED: &str = "0";

/// Computes `(gradient, hessian)` from the current margin predictions on the training matrix.
pub type CustomObjective = fn(&[f32], &DMatrix) -> (Vec<f32>, Vec<f32>);

/// Used to control the return type of predictions made by C Booster API.
enum PredictOption {
    OutputMargin,
    PredictLeaf,
}

impl PredictOption {
    /// Convert list of options into a bit mask.
    fn options_as_mask(options: &[PredictOption]) -> i32 {
        let mut option_mask = 0x00;
        for option in options {
            let value = match *option {
                PredictOption::OutputMargin => 0x01,
                PredictOption::PredictLeaf => 0x02,
            };
            option_mask |= value;
        }

        option_mask
    }

    /// Leaf indices take precedence over margins when both are requested.
    fn for_request(output_margin: bool, pred_leaf: bool) -> i32 {
        if pred_leaf {
            Self::options_as_mask(&[PredictOption::PredictLeaf])
        } else if output_margin {
            Self::options_as_mask(&[PredictOption::OutputMargin])
        } else {
            Self::options_as_mask(&[])
        }
    }
}

/// Core model in `XGBoost`, containing functions for training, evaluating and predicting.
///
/// Usually created through the [`train`](crate::training::train) function, which creates and
/// trains a Booster in a single call.
///
/// For more fine grained usage, can be created using [`new`](Booster::new) or
/// [`new_with_cached_dmats`](Booster::new_with_cached_dmats), then trained by calling
/// [`update`](Booster::update) or [`update_custom`](Booster::update_custom) in a loop.
///
/// A `Booster` borrows the matrices it is created with or called on only for the duration of each
/// call. Matrices registered as cache must outlive the booster.
pub struct Booster {
    lib: SharedLibrary,
    handle: Option<RawHandle>,
    _not_sync: PhantomData<Cell<()>>,
}

impl Booster {
    fn from_handle(lib: SharedLibrary, handle: RawHandle) -> Self {
        Booster {
            lib,
            handle: Some(handle),
            _not_sync: PhantomData,
        }
    }

    /// Create a new Booster model with given parameters.
    ///
    /// This model can then be trained using calls to update/boost as appropriate.
    pub fn new(lib: SharedLibrary, params: &BoosterParameters) -> XGBResult<Self> {
        Self::new_with_cached_dmats(lib, params, &[])
    }

    /// Create a new booster model with given parameters and list of `DMatrix` to cache.
    ///
    /// Cached `DMatrix` can sometimes be used internally by `XGBoost` to speed up certain operations.
    ///
    /// `seed` is set to [`DEFAULT_SEED`] first, so a `seed` in `params` always wins.
    pub fn new_with_cached_dmats(
        lib: SharedLibrary,
        params: &BoosterParameters,
        dmats: &[&DMatrix],
    ) -> XGBResult<Self> {
        let cache = dmats
            .iter()
            .map(|dmat| dmat.handle())
            .collect::<XGBResult<Vec<RawHandle>>>()?;

        let mut handle = RawHandle::null();
        xgb_call!(lib, booster_create(&cache, &mut handle))?;

        let mut booster = Booster::from_handle(lib, handle);
        let configured = booster
            .set_param("seed", DEFAULT_SEED)
            .and_then(|()| booster.set_params(Some(params)));
        if let Err(err) = configured {
            if let Err(free_err) = booster.release() {
                warn!("Failed to free Booster after rejected parameters: {}", free_err);
            }
            return Err(err);
        }
        Ok(booster)
    }

    /// Save this Booster as a binary file at given path.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> XGBResult<()> {
        let handle = self.handle()?;
        debug!("Writing Booster to: {}", path.as_ref().display());
        let fname = path_to_cstring(path.as_ref())?;
        xgb_call!(self.lib, booster_save_model(handle, &fname))
    }

    /// Load a `Booster` from a binary file at given path.
    ///
    /// An empty booster is created first and then overwritten with the file's contents.
    pub fn load<P: AsRef<Path>>(lib: SharedLibrary, path: P) -> XGBResult<Self> {
        let path = path.as_ref();
        debug!("Loading Booster from: {}", path.display());

        // gives more control over error messages, avoids stack trace dump from C++
        ensure!(
            !path.as_os_str().is_empty() && path.exists(),
            Validation {
                reason: format!("File not found: {}", path.display()),
            }
        );

        let fname = path_to_cstring(path)?;
        let booster = Booster::new(lib, &BoosterParameters::default())?;
        xgb_call!(booster.lib, booster_load_model(booster.handle()?, &fname))?;
        Ok(booster)
    }

    /// Set a single parameter.
    pub fn set_param(&mut self, name: &str, value: &str) -> XGBResult<()> {
        let handle = self.handle()?;
        let name = to_cstring(name)?;
        let value = to_cstring(value)?;
        xgb_call!(self.lib, booster_set_param(handle, &name, &value))
    }

    /// Update this Booster's parameters. `None` sets nothing.
    pub fn set_params(&mut self, params: Option<&BoosterParameters>) -> XGBResult<()> {
        let Some(params) = params else {
            return Ok(());
        };
        for (key, value) in params.as_string_pairs() {
            debug!("Setting parameter: {}={}", &key, &value);
            self.set_param(&key, &value)?;
        }
        Ok(())
    }

    /// Update this model by training it for one round with given training matrix.
    ///
    /// Uses `XGBoost`'s objective function that was specified in this Booster's learning objective parameters.
    ///
    /// * `dtrain` - matrix to train the model with for a single iteration
    /// * `iteration` - current iteration number, tracked by the caller
    pub fn update(&mut self, dtrain: &DMatrix, iteration: i32) -> XGBResult<()> {
        let handle = self.handle()?;
        xgb_call!(
            self.lib,
            booster_update_one_iter(handle, iteration, dtrain.handle()?)
        )
    }

    /// Update this model by training it for one round with a custom objective function.
    ///
    /// The objective receives the current margin predictions on `dtrain`.
    pub fn update_custom(
        &mut self,
        dtrain: &DMatrix,
        objective_fn: CustomObjective,
    ) -> XGBResult<()> {
        let pred = self.predict_margin(dtrain)?;
        let (gradient, hessian) = objective_fn(&pred, dtrain);
        self.boost(dtrain, &gradient, &hessian)
    }

    /// Update this model by directly specifying the first and second order gradients.
    ///
    /// This is typically used instead of `update` when using a customised loss function.
    ///
    /// * `dtrain` - matrix to train the model with for a single iteration
    /// * `gradient` - first order gradient
    /// * `hessian` - second order gradient
    pub fn boost(&mut self, dtrain: &DMatrix, gradient: &[f32], hessian: &[f32]) -> XGBResult<()> {
        ensure!(
            gradient.len() == hessian.len(),
            Validation {
                reason: format!(
                    "Mismatch between length of gradient and hessian arrays ({} != {})",
                    gradient.len(),
                    hessian.len()
                ),
            }
        );

        let handle = self.handle()?;
        xgb_call!(
            self.lib,
            booster_boost_one_iter(handle, dtrain.handle()?, gradient, hessian)
        )
    }

    /// Evaluate the given matrices for one round; `names[i]` labels `dmats[i]` in the output.
    ///
    /// Returns XGBoost's summary line, e.g. `[3]\ttrain-logloss:0.271\ttest-logloss:0.302`.
    ///
    /// Names must be unique, otherwise their metrics can't be told apart.
    pub fn eval_set(&self, dmats: &[&DMatrix], names: &[&str], iteration: i32) -> XGBResult<String> {
        ensure!(
            dmats.len() == names.len(),
            Validation {
                reason: format!(
                    "{} evaluation matrices given with {} names",
                    dmats.len(),
                    names.len()
                ),
            }
        );
        check_eval_names(names)?;

        let handle = self.handle()?;
        let handles = dmats
            .iter()
            .map(|dmat| dmat.handle())
            .collect::<XGBResult<Vec<RawHandle>>>()?;

        // owned C strings must outlive the borrowed slice passed down
        let evnames = names
            .iter()
            .map(|name| to_cstring(name))
            .collect::<XGBResult<Vec<_>>>()?;
        let evptrs: Vec<_> = evnames.iter().map(|name| name.as_c_str()).collect();

        let mut out = String::new();
        xgb_call!(
            self.lib,
            booster_eval_one_iter(handle, iteration, &handles, &evptrs, &mut out)
        )?;
        Ok(out)
    }

    /// Like [`eval_set`](Booster::eval_set), also returning one metric value per matrix.
    ///
    /// Each token after the leading `[iteration]` is split at its last `:` into `<name>-<metric>`
    /// and a value. A token belongs to the longest watch name it starts with (followed by `-`);
    /// the value reported for a matrix is its last token, so with several metrics configured
    /// it is the last metric.
    pub fn eval_set_with_metrics(
        &self,
        dmats: &[&DMatrix],
        names: &[&str],
        iteration: i32,
    ) -> XGBResult<(String, Vec<f32>)> {
        let eval = self.eval_set(dmats, names, iteration)?;
        let metrics = Self::parse_eval_metrics(&eval, names)?;
        Ok((eval, metrics))
    }

    /// Evaluate given matrix against this model using metrics defined in this model's parameters.
    ///
    /// See `parameters::learning::EvaluationMetric` for a full list.
    ///
    /// Returns a map of evaluation metric name to score.
    pub fn evaluate(&self, dmat: &DMatrix, name: &str) -> XGBResult<IndexMap<String, f32>> {
        let eval = self.eval_set(&[dmat], &[name], 0)?;
        let mut parsed = Self::parse_eval_string(&eval, &[name])?;
        parsed
            .swap_remove(name)
            .context(MalformedEvaluation { eval })
    }

    /// Predict results for given data.
    ///
    /// * `output_margin` - raw scores before the objective's transformation
    /// * `ntree_limit` - number of boosting rounds to use, `0` for all
    /// * `pred_leaf` - leaf index of every tree per row; wins over `output_margin`
    ///
    /// The flat result is returned as is; its shape depends on the options and the objective.
    pub fn predict(
        &self,
        dmat: &DMatrix,
        output_margin: bool,
        ntree_limit: u32,
        pred_leaf: bool,
    ) -> XGBResult<Vec<f32>> {
        let handle = self.handle()?;
        let option_mask = PredictOption::for_request(output_margin, pred_leaf);
        let mut out = Vec::new();
        xgb_call!(
            self.lib,
            booster_predict(handle, dmat.handle()?, option_mask, ntree_limit, &mut out)
        )?;
        Ok(out)
    }

    /// Predict margin for given data.
    ///
    /// Returns an array containing one entry per row and output group in the given data.
    pub fn predict_margin(&self, dmat: &DMatrix) -> XGBResult<Vec<f32>> {
        self.predict(dmat, true, 0, false)
    }

    /// Predictions shaped as (number of rows, outputs per row).
    ///
    /// `output_margin` and `ntree_limit` work as in [`predict`](Booster::predict).
    pub fn predict_2d(
        &self,
        dmat: &DMatrix,
        output_margin: bool,
        ntree_limit: u32,
    ) -> XGBResult<Array2<f32>> {
        let data = self.predict(dmat, output_margin, ntree_limit, false)?;
        Self::reshape_rows(data, dmat.num_rows()?)
    }

    /// Get predicted leaf index for each sample in given data, using the first `ntree_limit`
    /// rounds of trees (`0` for all).
    ///
    /// Returns an array of shape (number of samples, number of trees).
    ///
    /// Note: the leaf index of a tree is unique per tree, so e.g. leaf 1 could be found in both tree 1 and tree 0.
    pub fn predict_leaf(&self, dmat: &DMatrix, ntree_limit: u32) -> XGBResult<Array2<u32>> {
        let data = self.predict(dmat, false, ntree_limit, true)?;
        let leaves = data.into_iter().map(|leaf| leaf as u32).collect();
        Self::reshape_rows(leaves, dmat.num_rows()?)
    }

    fn reshape_rows<T>(data: Vec<T>, num_rows: usize) -> XGBResult<Array2<T>> {
        ensure!(
            num_rows > 0 && data.len() % num_rows == 0,
            Validation {
                reason: format!(
                    "{} predicted values can't be split into {num_rows} rows",
                    data.len()
                ),
            }
        );
        let num_cols = data.len() / num_rows;
        Array2::from_shape_vec((num_rows, num_cols), data).map_err(|err| {
            Validation {
                reason: err.to_string(),
            }
            .build()
        })
    }

    /// Get a dump of this model, one string per tree.
    ///
    /// * `with_statistics` - whether to include statistics in output dump
    /// * `feature_map` - if given, map feature IDs to feature names from given map
    pub fn dump_model(
        &self,
        with_statistics: bool,
        feature_map: Option<&FeatureMap>,
    ) -> XGBResult<Vec<String>> {
        if let Some(fmap) = feature_map {
            let tmp_dir = tempfile::tempdir().context(Io)?;

            let file_path = tmp_dir.path().join("fmap.txt");
            let mut file = File::create(&file_path).context(Io)?;
            for (feature_num, (feature_name, feature_type)) in &fmap.0 {
                writeln!(file, "{}\t{}\t{}", feature_num, feature_name, feature_type).context(Io)?;
            }
            file.flush().context(Io)?;

            self.dump_model_fmap(with_statistics, Some(&file_path))
        } else {
            self.dump_model_fmap(with_statistics, None)
        }
    }

    fn dump_model_fmap(
        &self,
        with_statistics: bool,
        feature_map_path: Option<&Path>,
    ) -> XGBResult<Vec<String>> {
        let handle = self.handle()?;
        let fmap = match feature_map_path {
            Some(path) => path_to_cstring(path)?,
            None => to_cstring("")?,
        };
        let mut out = Vec::new();
        xgb_call!(
            self.lib,
            booster_dump_model(handle, &fmap, i32::from(with_statistics), &mut out)
        )?;
        Ok(out)
    }

    /// Number of splits using each feature, over all trees.
    ///
    /// Features are named by `feature_map` when given, `f<index>` otherwise. Features never used
    /// in a split are absent. Linear models have no splits and report
    /// [`XGBError::Unsupported`](crate::XGBError::Unsupported).
    pub fn feature_score(&self, feature_map: Option<&FeatureMap>) -> XGBResult<BTreeMap<String, u32>> {
        let dump = self.dump_model(false, feature_map)?;
        ensure!(
            !dump.iter().any(|tree| tree.starts_with("bias:")),
            Unsupported {
                operation: "feature_score on a linear booster",
            }
        );

        let mut scores = BTreeMap::new();
        for line in dump.iter().flat_map(|tree| tree.lines()) {
            let Some(start) = line.find('[') else {
                continue;
            };
            let split = &line[start + 1..];
            let end = split.find(|c: char| c == '<' || c == ']').unwrap_or(split.len());
            *scores.entry(split[..end].to_owned()).or_insert(0) += 1;
        }
        Ok(scores)
    }

    /// Split an evaluation line into `(<name>-<metric>, value)` tokens.
    fn eval_tokens(eval: &str) -> XGBResult<Vec<(&str, f32)>> {
        let mut tokens = eval.split_whitespace().peekable();
        if tokens.peek().map_or(false, |t| t.starts_with('[')) {
            tokens.next();
        }
        let mut parsed = Vec::new();
        for token in tokens {
            let (key, value) = token
                .rsplit_once(':')
                .context(MalformedEvaluation { eval })?;
            let value = value
                .parse::<f32>()
                .ok()
                .context(MalformedEvaluation { eval })?;
            parsed.push((key, value));
        }
        Ok(parsed)
    }

    /// The longest watch name that `key` starts with, followed by `-`.
    fn owner<'n>(key: &str, evnames: &[&'n str]) -> Option<&'n str> {
        evnames
            .iter()
            .filter(|name| {
                key.len() > name.len() + 1
                    && key.starts_with(**name)
                    && key.as_bytes()[name.len()] == b'-'
            })
            .max_by_key(|name| name.len())
            .copied()
    }

    fn parse_eval_string(
        eval: &str,
        evnames: &[&str],
    ) -> XGBResult<IndexMap<String, IndexMap<String, f32>>> {
        let mut result: IndexMap<String, IndexMap<String, f32>> = IndexMap::new();

        debug!("Parsing evaluation line: {}", &eval);
        for (key, score) in Self::eval_tokens(eval)? {
            if let Some(evname) = Self::owner(key, evnames) {
                let metric = &key[evname.len() + 1..];
                let metric_map = result
                    .entry(String::from(evname))
                    .or_insert_with(IndexMap::new);
                metric_map.insert(metric.to_owned(), score);
            }
        }

        debug!("result: {:?}", &result);
        Ok(result)
    }

    fn parse_eval_metrics(eval: &str, evnames: &[&str]) -> XGBResult<Vec<f32>> {
        let tokens = Self::eval_tokens(eval)?;
        evnames
            .iter()
            .map(|name| {
                tokens
                    .iter()
                    .rev()
                    .find(|(key, _)| Self::owner(key, evnames) == Some(*name))
                    .map(|(_, value)| *value)
                    .context(MalformedEvaluation { eval })
            })
            .collect()
    }

    pub(crate) fn handle(&self) -> XGBResult<RawHandle> {
        self.handle.context(Released { kind: KIND })
    }

    /// Free the native model now. Further calls, and dropping, do nothing.
    pub fn release(&mut self) -> XGBResult<()> {
        if let Some(handle) = self.handle.take() {
            debug!("Freeing Booster handle {:?}", handle);
            xgb_call!(self.lib, booster_free(handle))?;
        }
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }
}

impl fmt::Debug for Booster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Booster").field("handle", &self.handle).finish()
    }
}

impl Drop for Booster {
    fn drop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        if cfg!(debug_assertions) {
            warn!("Booster dropped without release, freeing it now");
        }
        if let Err(err) = self.release() {
            warn!("Failed to free Booster: {}", err);
        }
    }
}

pub(crate) fn check_eval_names(names: &[&str]) -> XGBResult<()> {
    for (i, name) in names.iter().enumerate() {
        ensure!(
            !names[..i].contains(name),
            Validation {
                reason: format!("duplicate evaluation name: {name}"),
            }
        );
    }
    Ok(())
}

/// Maps a feature index to a name and type, used when dumping models as text.
///
/// See [`dump_model`](Booster::dump_model) for usage.
#[derive(Debug, Clone, Default)]
pub struct FeatureMap(BTreeMap<u32, (String, FeatureType)>);

impl FeatureMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name feature `index`.
    pub fn insert(&mut self, index: u32, name: &str, feature_type: FeatureType) -> &mut Self {
        self.0.insert(index, (name.to_owned(), feature_type));
        self
    }

    /// Read a `FeatureMap` from a file at given path.
    ///
    /// File should contain one feature definition per line, and be of the form:
    /// ```text
    /// <number>\t<name>\t<type>\n
    /// ```
    ///
    /// Type should be one of:
    /// * `i` - binary feature
    /// * `q` - quantitative feature
    /// * `int` - integer features
    ///
    /// E.g.:
    /// ```text
    /// 0   age int
    /// 1   is-parent?=yes  i
    /// 2   is-parent?=no   i
    /// 3   income  int
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<FeatureMap> {
        let file = File::open(path)?;
        let mut features: FeatureMap = FeatureMap(BTreeMap::new());

        for (i, line) in BufReader::new(&file).lines().enumerate() {
            let line = line?;
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() != 3 {
                let msg = format!(
                    "Unable to parse features from line {}, expected 3 tab separated values",
                    i + 1
                );
                return Err(io::Error::new(io::ErrorKind::InvalidData, msg));
            }

            let feature_num: u32 = parts[0].parse().map_err(|err| {
                let msg = format!(
                    "Unable to parse features from line {}, could not parse feature number: {}",
                    i + 1,
                    err
                );
                io::Error::new(io::ErrorKind::InvalidData, msg)
            })?;

            let feature_type = FeatureType::from_str(parts[2]).map_err(|msg| {
                let msg = format!("Unable to parse features from line {}: {}", i + 1, msg);
                io::Error::new(io::ErrorKind::InvalidData, msg)
            })?;
            features
                .0
                .insert(feature_num, (parts[1].to_string(), feature_type));
        }
        Ok(features)
    }
}

/// Indicates the type of a feature, used when dumping models as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureType {
    /// Binary indicator feature.
    Binary,

    /// Quantitative feature (e.g. age, time, etc.), can be missing.
    Quantitative,

    /// Integer feature (when hinted, decision boundary will be integer).
    Integer,
}

impl FromStr for FeatureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i" => Ok(FeatureType::Binary),
            "q" => Ok(FeatureType::Quantitative),
            "int" => Ok(FeatureType::Integer),
            _ => Err(format!(
                "unrecognised feature type '{}', must be one of: 'i', 'q', 'int'",
                s
            )),
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            FeatureType::Binary => "i",
            FeatureType::Quantitative => "q",
            FeatureType::Integer => "int",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::{arr2, s};

    use super::*;
    use crate::native::mock::MockLibrary;
    use crate::parameters::learning::{
        EvaluationMetric, LearningTaskParametersBuilder, Metrics, Objective,
    };
    use crate::parameters::{tree, BoosterType};

    /// Eight rows where the label is 1 exactly when the first feature exceeds 0.5.
    fn read_train_matrix(lib: &Arc<MockLibrary>) -> DMatrix {
        let data = arr2(&[
            [0.1, 3.0],
            [0.9, 1.0],
            [0.2, 2.0],
            [0.8, 2.0],
            [0.3, 1.0],
            [0.7, 3.0],
            [0.4, 2.0],
            [0.6, 1.0],
        ]);
        let mut dmat = DMatrix::from_array(lib.clone(), &data, Some(f32::NAN)).unwrap();
        dmat.set_labels(&[0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0])
            .unwrap();
        dmat
    }

    fn binary_params() -> BoosterParameters {
        let tree_params = tree::TreeBoosterParametersBuilder::default()
            .max_depth(2)
            .eta(1.0)
            .build()
            .unwrap();
        let learning_params = LearningTaskParametersBuilder::default()
            .objective(Objective::BinaryLogistic)
            .eval_metrics(Metrics::Custom(vec![
                EvaluationMetric::BinaryErrorRate(0.5),
                EvaluationMetric::LogLoss,
            ]))
            .build()
            .unwrap();
        BoosterParameters::default()
            .with_booster(&BoosterType::Tree(tree_params))
            .with_learning_params(&learning_params)
    }

    fn load_test_booster(lib: &Arc<MockLibrary>, dmat: &DMatrix, rounds: i32) -> Booster {
        let mut booster =
            Booster::new_with_cached_dmats(lib.clone(), &binary_params(), &[dmat]).unwrap();
        for i in 0..rounds {
            booster.update(dmat, i).expect("update failed");
        }
        booster
    }

    #[test]
    fn default_seed_is_written_first() {
        let lib = MockLibrary::new();
        let mut booster = Booster::new(lib.clone(), &BoosterParameters::default()).unwrap();
        let handle = booster.handle().unwrap();

        assert_eq!(lib.param(handle, "seed"), Some("0".to_owned()));
        assert_eq!(lib.param_log(handle), vec![("seed".to_owned(), "0".to_owned())]);
        booster.release().unwrap();
    }

    #[test]
    fn caller_seed_overrides_default() {
        let lib = MockLibrary::new();
        let params = BoosterParameters::new().with("seed", 42).with("eta", 0.1);
        let mut booster = Booster::new(lib.clone(), &params).unwrap();
        let handle = booster.handle().unwrap();

        assert_eq!(lib.param(handle, "seed"), Some("42".to_owned()));
        let log = lib.param_log(handle);
        assert_eq!(log[0], ("seed".to_owned(), "0".to_owned()));
        assert_eq!(log[1], ("seed".to_owned(), "42".to_owned()));
        booster.release().unwrap();
    }

    #[test]
    fn failed_create_sets_no_params() {
        let lib = MockLibrary::new();
        lib.fail_next("XGBoosterCreate", "cannot create booster");
        let err = Booster::new(lib.clone(), &binary_params()).unwrap_err();

        assert!(err.is_native());
        assert_eq!(lib.call_count("XGBoosterSetParam"), 0);
        assert_eq!(lib.live_boosters(), 0);
    }

    #[test]
    fn rejected_param_frees_booster() {
        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        lib.clear_calls();

        lib.fail_next("XGBoosterSetParam", "unknown parameter");
        let err = Booster::new_with_cached_dmats(lib.clone(), &binary_params(), &[&dmat])
            .unwrap_err();

        assert!(matches!(
            &err,
            crate::XGBError::Native { message } if message == "unknown parameter"
        ));
        assert_eq!(lib.call_count("XGBoosterSetParam"), 1);
        assert_eq!(lib.call_count("XGBoosterFree"), 1);
        assert_eq!(lib.live_boosters(), 0);

        dmat.release().unwrap();
    }

    #[test]
    fn released_cache_matrix_is_rejected() {
        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        dmat.release().unwrap();
        lib.clear_calls();

        let err = Booster::new_with_cached_dmats(lib.clone(), &binary_params(), &[&dmat])
            .unwrap_err();
        assert!(err.is_released());
        assert!(lib.calls().is_empty());
    }

    #[test]
    fn set_params_none_is_noop() {
        let lib = MockLibrary::new();
        let mut booster = Booster::new(lib.clone(), &BoosterParameters::default()).unwrap();
        lib.clear_calls();
        booster.set_params(None).unwrap();
        assert!(lib.calls().is_empty());
        booster.release().unwrap();
    }

    #[test]
    fn set_booster_param() {
        let lib = MockLibrary::new();
        let mut booster = Booster::new(lib.clone(), &BoosterParameters::default()).unwrap();
        booster.set_param("key", "value").unwrap();
        assert_eq!(
            lib.param(booster.handle().unwrap(), "key"),
            Some("value".to_owned())
        );
        assert!(booster.set_param("bad\0key", "value").unwrap_err().to_string().contains("nul"));
        booster.release().unwrap();
    }

    #[test]
    fn mismatched_gradients_make_no_native_call() {
        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        let mut booster = Booster::new(lib.clone(), &binary_params()).unwrap();
        lib.clear_calls();

        let err = booster.boost(&dmat, &[0.1; 8], &[1.0; 7]).unwrap_err();
        assert!(err.is_validation());
        assert!(lib.calls().is_empty());

        booster.boost(&dmat, &[0.1; 8], &[1.0; 8]).unwrap();
        assert_eq!(lib.call_count("XGBoosterBoostOneIter"), 1);

        booster.release().unwrap();
        dmat.release().unwrap();
    }

    #[test]
    fn mismatched_eval_names_make_no_native_call() {
        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        let mut booster = load_test_booster(&lib, &dmat, 1);
        lib.clear_calls();

        let err = booster.eval_set(&[&dmat, &dmat], &["train"], 0).unwrap_err();
        assert!(err.is_validation());
        assert!(lib.calls().is_empty());

        booster.release().unwrap();
        dmat.release().unwrap();
    }

    #[test]
    fn duplicate_eval_names_make_no_native_call() {
        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        let mut booster = load_test_booster(&lib, &dmat, 1);
        lib.clear_calls();

        let err = booster
            .eval_set(&[&dmat, &dmat], &["train", "train"], 0)
            .unwrap_err();
        assert!(err.is_validation());
        assert!(lib.calls().is_empty());

        booster.eval_set(&[&dmat, &dmat], &["train", "train-copy"], 0).unwrap();
        assert_eq!(lib.call_count("XGBoosterEvalOneIter"), 1);

        booster.release().unwrap();
        dmat.release().unwrap();
    }

    #[test]
    fn predict() {
        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        let mut booster = load_test_booster(&lib, &dmat, 10);

        let train_metrics = booster.evaluate(&dmat, "default").unwrap();
        assert_eq!(train_metrics.keys().collect::<Vec<_>>(), vec!["error", "logloss"]);
        assert!(train_metrics["error"] < 1e-6);
        assert!(train_metrics["logloss"] < 0.1);

        let v = booster.predict(&dmat, false, 0, false).unwrap();
        assert_eq!(v.len(), dmat.num_rows().unwrap());
        let labels = dmat.labels().unwrap();
        for (pred, label) in v.iter().zip(&labels) {
            assert!((0.0..=1.0).contains(pred));
            assert_eq!(*pred > 0.5, *label > 0.5);
        }

        booster.release().unwrap();
        dmat.release().unwrap();
    }

    #[test]
    fn margin_and_leaf_masks() {
        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        let mut booster = load_test_booster(&lib, &dmat, 3);

        let probs = booster.predict(&dmat, false, 0, false).unwrap();
        let margins = booster.predict(&dmat, true, 0, false).unwrap();
        assert_eq!(margins, booster.predict_margin(&dmat).unwrap());
        for (p, m) in probs.iter().zip(&margins) {
            assert!((p - 1.0 / (1.0 + (-m).exp())).abs() < 1e-6);
        }

        // leaf bit wins over margin bit
        let leaves = booster.predict(&dmat, true, 0, true).unwrap();
        assert_eq!(leaves, booster.predict(&dmat, false, 0, true).unwrap());
        assert_eq!(leaves.len(), 8 * 3);
        assert!(leaves.iter().all(|leaf| *leaf == 1.0 || *leaf == 2.0));

        // limit to the first round only
        let first_round = booster.predict(&dmat, true, 1, false).unwrap();
        assert_ne!(first_round, margins);

        booster.release().unwrap();
        dmat.release().unwrap();
    }

    #[test]
    fn predict_leaf() {
        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        let num_rounds = 15;
        let mut booster = load_test_booster(&lib, &dmat, num_rounds);

        let leaves = booster.predict_leaf(&dmat, 0).unwrap();
        assert_eq!(leaves.dim(), (8, num_rounds as usize));
        assert!(leaves.iter().all(|leaf| *leaf <= 2));

        let first_rounds = booster.predict_leaf(&dmat, 4).unwrap();
        assert_eq!(first_rounds.dim(), (8, 4));
        assert_eq!(first_rounds, leaves.slice(s![.., ..4]));
        assert_eq!(booster.predict_leaf(&dmat, 100).unwrap(), leaves);

        booster.release().unwrap();
        dmat.release().unwrap();
    }

    #[test]
    fn predict_2d_multiclass() {
        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        let params = BoosterParameters::new()
            .with("objective", "multi:softprob")
            .with("num_class", 2);
        let mut booster = Booster::new_with_cached_dmats(lib.clone(), &params, &[&dmat]).unwrap();
        for i in 0..5 {
            booster.update(&dmat, i).unwrap();
        }

        let preds = booster.predict_2d(&dmat, false, 0).unwrap();
        assert_eq!(preds.dim(), (8, 2));
        for row in preds.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
        assert_eq!(booster.predict_leaf(&dmat, 0).unwrap().dim(), (8, 10));
        assert_eq!(booster.predict_leaf(&dmat, 2).unwrap().dim(), (8, 4));

        let margins = booster.predict_2d(&dmat, true, 0).unwrap();
        assert_eq!(margins.dim(), (8, 2));
        assert_eq!(
            margins.iter().copied().collect::<Vec<_>>(),
            booster.predict(&dmat, true, 0, false).unwrap()
        );
        let first_round = booster.predict_2d(&dmat, true, 1).unwrap();
        assert_eq!(first_round.dim(), (8, 2));
        assert_ne!(first_round, margins);
        assert_eq!(
            first_round.iter().copied().collect::<Vec<_>>(),
            booster.predict(&dmat, true, 1, false).unwrap()
        );

        booster.release().unwrap();
        dmat.release().unwrap();
    }

    #[test]
    fn reshape_needs_whole_rows() {
        let err = Booster::reshape_rows(vec![1.0_f32; 7], 2).unwrap_err();
        assert!(err.is_validation());
        let err = Booster::reshape_rows(Vec::<f32>::new(), 0).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn update_custom() {
        fn logistic(preds: &[f32], dtrain: &DMatrix) -> (Vec<f32>, Vec<f32>) {
            let labels = dtrain.labels().unwrap();
            preds
                .iter()
                .zip(&labels)
                .map(|(margin, label)| {
                    let p = 1.0 / (1.0 + (-margin).exp());
                    (p - label, p * (1.0 - p))
                })
                .unzip()
        }

        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        let mut booster = Booster::new_with_cached_dmats(lib.clone(), &binary_params(), &[&dmat])
            .unwrap();
        let before = booster.evaluate(&dmat, "train").unwrap()["logloss"];
        for _ in 0..5 {
            booster.update_custom(&dmat, logistic).unwrap();
        }
        let after = booster.evaluate(&dmat, "train").unwrap()["logloss"];

        assert!(after < before);
        assert_eq!(lib.call_count("XGBoosterBoostOneIter"), 5);
        assert_eq!(lib.call_count("XGBoosterUpdateOneIter"), 0);

        booster.release().unwrap();
        dmat.release().unwrap();
    }

    #[test]
    fn save_and_load() {
        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        let mut booster = load_test_booster(&lib, &dmat, 10);
        let expected = booster.predict(&dmat, false, 0, false).unwrap();

        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("test-xgboost-model");
        booster.save(&path).expect("saving booster failed");
        booster.release().unwrap();

        let mut loaded = Booster::load(lib.clone(), &path).expect("loading booster failed");
        assert_eq!(loaded.predict(&dmat, false, 0, false).unwrap(), expected);

        loaded.release().unwrap();
        dmat.release().unwrap();
        assert_eq!(lib.live_boosters(), 0);
    }

    #[test]
    fn load_missing_file() {
        let lib = MockLibrary::new();
        let dir = tempfile::tempdir().unwrap();
        let err = Booster::load(lib.clone(), dir.path().join("nope")).unwrap_err();
        assert!(err.is_validation());
        assert!(Booster::load(lib.clone(), "").unwrap_err().is_validation());
        assert!(lib.calls().is_empty());
    }

    #[test]
    fn release_is_idempotent() {
        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        let mut booster = load_test_booster(&lib, &dmat, 1);

        booster.release().unwrap();
        booster.release().unwrap();
        drop(booster);
        assert_eq!(lib.call_count("XGBoosterFree"), 1);

        let mut booster = load_test_booster(&lib, &dmat, 1);
        booster.release().unwrap();
        lib.clear_calls();
        assert!(booster.update(&dmat, 1).unwrap_err().is_released());
        assert!(booster.predict_margin(&dmat).unwrap_err().is_released());
        assert!(booster.save("model.bin").unwrap_err().is_released());
        assert!(lib.calls().is_empty());

        dmat.release().unwrap();
    }

    #[test]
    fn parse_eval_string() {
        let s = "[0]\ttrain-map@4-:0.5\ttrain-logloss:1.0\ttest-map@4-:0.25\ttest-logloss:0.75";
        let mut metrics = IndexMap::new();

        let mut train_metrics = IndexMap::new();
        train_metrics.insert("map@4-".to_owned(), 0.5);
        train_metrics.insert("logloss".to_owned(), 1.0);

        let mut test_metrics = IndexMap::new();
        test_metrics.insert("map@4-".to_owned(), 0.25);
        test_metrics.insert("logloss".to_owned(), 0.75);

        metrics.insert("train".to_owned(), train_metrics);
        metrics.insert("test".to_owned(), test_metrics);
        assert_eq!(
            Booster::parse_eval_string(s, &["train", "test"]).unwrap(),
            metrics
        );
        assert_eq!(
            Booster::parse_eval_metrics(s, &["test", "train"]).unwrap(),
            vec![0.75, 1.0]
        );
    }

    #[test]
    fn eval_metrics_prefer_longest_name() {
        let s = "[7]\ttrain-rmse:0.5\ttrain-full-rmse:0.25";
        assert_eq!(
            Booster::parse_eval_metrics(s, &["train", "train-full"]).unwrap(),
            vec![0.5, 0.25]
        );
    }

    #[test]
    fn eval_metrics_need_every_name() {
        let s = "[0]\ttrain-rmse:0.5";
        let err = Booster::parse_eval_metrics(s, &["train", "test"]).unwrap_err();
        assert!(matches!(err, crate::XGBError::MalformedEvaluation { .. }));

        let err = Booster::parse_eval_metrics("[0]\ttrain-rmse=0.5", &["train"]).unwrap_err();
        assert!(matches!(err, crate::XGBError::MalformedEvaluation { .. }));
    }

    #[test]
    fn eval_set_with_metrics() {
        let lib = MockLibrary::new();
        let mut dtrain = read_train_matrix(&lib);
        let mut dtest = dtrain.slice(&[0, 1, 2, 3]).unwrap();
        let mut booster = load_test_booster(&lib, &dtrain, 2);

        let (eval, metrics) = booster
            .eval_set_with_metrics(&[&dtrain, &dtest], &["train", "test"], 1)
            .unwrap();
        assert!(eval.starts_with("[1]\ttrain-error:"));
        assert_eq!(metrics.len(), 2);
        let parsed = Booster::parse_eval_string(&eval, &["train", "test"]).unwrap();
        assert_eq!(metrics[1], parsed["test"]["logloss"]);

        booster.release().unwrap();
        dtest.release().unwrap();
        dtrain.release().unwrap();
    }

    #[test]
    fn dump_model_and_feature_score() {
        let lib = MockLibrary::new();
        let mut dmat = read_train_matrix(&lib);
        let mut booster = load_test_booster(&lib, &dmat, 4);

        let dump = booster.dump_model(true, None).unwrap();
        assert_eq!(dump.len(), 4);
        assert!(dump[0].starts_with("0:[f0<"));
        assert!(dump[0].contains("gain="));

        let mut fmap = FeatureMap::new();
        fmap.insert(0, "ratio", FeatureType::Quantitative)
            .insert(1, "count", FeatureType::Integer);
        let named = booster.dump_model(false, Some(&fmap)).unwrap();
        assert!(named[0].starts_with("0:[ratio<"));
        assert!(!named[0].contains("gain="));

        let scores = booster.feature_score(Some(&fmap)).unwrap();
        assert_eq!(scores.get("ratio"), Some(&4));
        assert_eq!(booster.feature_score(None).unwrap().get("f0"), Some(&4));

        booster.release().unwrap();
        dmat.release().unwrap();
    }

    #[test]
    fn feature_score_unsupported_for_linear() {
        let lib = MockLibrary::new();
        let mut booster =
            Booster::new(lib.clone(), &BoosterParameters::new().with("booster", "gblinear"))
                .unwrap();
        let err = booster.feature_score(None).unwrap_err();
        assert!(err.is_unsupported());
        booster.release().unwrap();
    }

    #[test]
    fn feature_map_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fmap.txt");
        std::fs::write(&path, "0\tage\tint\n1\tis-parent?=yes\ti\n").unwrap();
        let fmap = FeatureMap::from_file(&path).unwrap();
        assert_eq!(fmap.0[&1], ("is-parent?=yes".to_owned(), FeatureType::Binary));

        std::fs::write(&path, "0\tage\n").unwrap();
        assert!(FeatureMap::from_file(&path).is_err());
        std::fs::write(&path, "0\tage\tfloat\n").unwrap();
        assert!(FeatureMap::from_file(&path).is_err());
    }
}
