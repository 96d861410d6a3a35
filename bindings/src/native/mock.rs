//! In-memory stand-in for libxgboost.
//!
//! [`MockLibrary`] implements the full [`NativeLibrary`] table without touching native code. Every
//! call is recorded under the name of the C function it stands in for, handles are tracked so a
//! double free or a use-after-free is reported as a native error, and the next call of any
//! function can be made to fail on demand.
//!
//! Boosting is modelled with one-split trees ("stumps") fitted by a Newton step, which is enough
//! for training, evaluation, prediction, persistence and dumps to behave plausibly.

use std::collections::HashMap;
use std::ffi::{c_void, CStr};
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{NativeLibrary, RawHandle, KEY_BASE_MARGIN, KEY_LABEL, KEY_WEIGHT};

const FAILURE: i32 = -1;

#[derive(Default)]
pub struct MockLibrary {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    next_id: usize,
    matrices: HashMap<usize, MockMatrix>,
    boosters: HashMap<usize, MockBooster>,
    calls: Vec<&'static str>,
    last_error: String,
    failures: HashMap<&'static str, String>,
}

#[derive(Debug, Clone, Default)]
struct MockMatrix {
    num_row: usize,
    num_col: usize,
    /// Row-major, `NaN` marks a missing value.
    data: Vec<f32>,
    label: Vec<f32>,
    weight: Vec<f32>,
    base_margin: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MockBooster {
    params: IndexMap<String, String>,
    eval_metrics: Vec<String>,
    trees: Vec<Stump>,
    num_feature: usize,
    #[serde(skip)]
    param_log: Vec<(String, String)>,
    #[serde(skip)]
    cache: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Stump {
    group: usize,
    split: Option<Split>,
    left: f32,
    right: f32,
    cover: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Split {
    feature: usize,
    threshold: f32,
    gain: f32,
    left_cover: f32,
    right_cover: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Metric {
    Rmse,
    Mae,
    LogLoss,
    Error(f32),
    MLogLoss,
    MError,
}

impl Metric {
    fn parse(name: &str) -> Result<Self, String> {
        match name {
            "rmse" => Ok(Metric::Rmse),
            "mae" => Ok(Metric::Mae),
            "logloss" => Ok(Metric::LogLoss),
            "error" => Ok(Metric::Error(0.5)),
            "mlogloss" => Ok(Metric::MLogLoss),
            "merror" => Ok(Metric::MError),
            other => other
                .strip_prefix("error@")
                .and_then(|t| t.parse().ok())
                .map(Metric::Error)
                .ok_or_else(|| format!("Unknown metric function {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Loss {
    Squared,
    Logistic,
    LogitRaw,
    SoftProb,
    SoftMax,
}

impl MockLibrary {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Names of all recorded calls, oldest first.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, function: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == function).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn set_last_error(&self, message: &str) {
        self.state().last_error = message.to_owned();
    }

    /// Make the next call of `function` fail with `message`.
    pub fn fail_next(&self, function: &'static str, message: &str) {
        self.state().failures.insert(function, message.to_owned());
    }

    pub fn live_matrices(&self) -> usize {
        self.state().matrices.len()
    }

    pub fn live_boosters(&self) -> usize {
        self.state().boosters.len()
    }

    /// Current value of a booster parameter.
    pub fn param(&self, booster: RawHandle, key: &str) -> Option<String> {
        self.state()
            .boosters
            .get(&id(booster))
            .and_then(|b| b.params.get(key).cloned())
    }

    /// Every parameter write a booster received, in order.
    pub fn param_log(&self, booster: RawHandle) -> Vec<(String, String)> {
        self.state()
            .boosters
            .get(&id(booster))
            .map(|b| b.param_log.clone())
            .unwrap_or_default()
    }

    /// Number of trees a booster holds.
    pub fn tree_count(&self, booster: RawHandle) -> usize {
        self.state()
            .boosters
            .get(&id(booster))
            .map_or(0, |b| b.trees.len())
    }

    fn call<F>(&self, function: &'static str, body: F) -> i32
    where
        F: FnOnce(&mut MockState) -> Result<(), String>,
    {
        let mut state = self.state();
        state.calls.push(function);

        let result = match state.failures.remove(function) {
            Some(message) => Err(message),
            None => body(&mut *state),
        };

        match result {
            Ok(()) => 0,
            Err(message) => {
                state.last_error = message;
                FAILURE
            }
        }
    }
}

fn id(handle: RawHandle) -> usize {
    handle.as_ptr() as usize
}

fn cstr(s: &CStr) -> Result<&str, String> {
    s.to_str().map_err(|e| format!("invalid UTF-8 argument: {e}"))
}

impl MockState {
    fn insert_matrix(&mut self, matrix: MockMatrix) -> RawHandle {
        self.next_id += 1;
        self.matrices.insert(self.next_id, matrix);
        RawHandle::from_ptr(self.next_id as *mut c_void)
    }

    fn insert_booster(&mut self, booster: MockBooster) -> RawHandle {
        self.next_id += 1;
        self.boosters.insert(self.next_id, booster);
        RawHandle::from_ptr(self.next_id as *mut c_void)
    }

    fn matrix(&self, handle: RawHandle) -> Result<&MockMatrix, String> {
        self.matrices
            .get(&id(handle))
            .ok_or_else(|| format!("Invalid DMatrix handle {:?}", handle.as_ptr()))
    }

    fn matrix_mut(&mut self, handle: RawHandle) -> Result<&mut MockMatrix, String> {
        self.matrices
            .get_mut(&id(handle))
            .ok_or_else(|| format!("Invalid DMatrix handle {:?}", handle.as_ptr()))
    }

    fn booster(&self, handle: RawHandle) -> Result<&MockBooster, String> {
        self.boosters
            .get(&id(handle))
            .ok_or_else(|| format!("Invalid Booster handle {:?}", handle.as_ptr()))
    }

    fn booster_mut(&mut self, handle: RawHandle) -> Result<&mut MockBooster, String> {
        self.boosters
            .get_mut(&id(handle))
            .ok_or_else(|| format!("Invalid Booster handle {:?}", handle.as_ptr()))
    }
}

impl MockMatrix {
    fn dense(data: Vec<f32>, num_row: usize, num_col: usize) -> Self {
        MockMatrix {
            num_row,
            num_col,
            data,
            ..Default::default()
        }
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.num_col..(i + 1) * self.num_col]
    }

    fn field(&self, field: &str) -> Result<&Vec<f32>, String> {
        match field {
            KEY_LABEL => Ok(&self.label),
            KEY_WEIGHT => Ok(&self.weight),
            KEY_BASE_MARGIN => Ok(&self.base_margin),
            other => Err(format!("Unknown float field name: {other}")),
        }
    }

    fn field_mut(&mut self, field: &str) -> Result<&mut Vec<f32>, String> {
        match field {
            KEY_LABEL => Ok(&mut self.label),
            KEY_WEIGHT => Ok(&mut self.weight),
            KEY_BASE_MARGIN => Ok(&mut self.base_margin),
            other => Err(format!("Unknown float field name: {other}")),
        }
    }

    fn weight_of(&self, i: usize) -> f32 {
        if self.weight.len() == self.num_row {
            self.weight[i]
        } else {
            1.0
        }
    }

    fn check_labels(&self) -> Result<(), String> {
        if self.label.len() == self.num_row {
            Ok(())
        } else {
            Err(format!(
                "Check failed: labels.Size() == num_row ({} vs. {}) : Invalid shape of labels.",
                self.label.len(),
                self.num_row
            ))
        }
    }

    fn from_libsvm(text: &str) -> Result<Self, String> {
        let mut rows: Vec<Vec<(usize, f32)>> = Vec::new();
        let mut label = Vec::new();
        let mut num_col = 0;

        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let target = tokens
                .next()
                .and_then(|t| t.parse::<f32>().ok())
                .ok_or_else(|| format!("line {}: missing label", n + 1))?;

            let mut row = Vec::new();
            for token in tokens {
                let (index, value) = token
                    .split_once(':')
                    .ok_or_else(|| format!("line {}: malformed entry {token:?}", n + 1))?;
                let index: usize = index
                    .parse()
                    .map_err(|_| format!("line {}: bad feature index {index:?}", n + 1))?;
                let value: f32 = value
                    .parse()
                    .map_err(|_| format!("line {}: bad value {value:?}", n + 1))?;
                num_col = num_col.max(index + 1);
                row.push((index, value));
            }
            rows.push(row);
            label.push(target);
        }

        let mut data = vec![f32::NAN; rows.len() * num_col];
        for (i, row) in rows.iter().enumerate() {
            for (j, value) in row {
                data[i * num_col + j] = *value;
            }
        }

        let mut matrix = MockMatrix::dense(data, rows.len(), num_col);
        matrix.label = label;
        Ok(matrix)
    }
}

fn check_indptr(indptr: &[usize], indices: &[u32], nnz: usize) -> Result<usize, String> {
    if indices.len() != nnz {
        return Err("Check failed: indices and data differ in length".to_owned());
    }
    if indptr.is_empty() || indptr[indptr.len() - 1] != nnz {
        return Err("Check failed: indptr does not cover the data array".to_owned());
    }
    Ok(indptr.len() - 1)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(margins: &[f32]) -> Vec<f32> {
    let max = margins.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = margins.iter().map(|m| (m - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

impl Stump {
    fn leaf_index(&self, row: &[f32]) -> usize {
        match &self.split {
            None => 0,
            Some(split) => {
                let value = row[split.feature];
                if value.is_nan() || value < split.threshold {
                    1
                } else {
                    2
                }
            }
        }
    }

    fn value(&self, row: &[f32]) -> f32 {
        if self.leaf_index(row) == 2 {
            self.right
        } else {
            self.left
        }
    }

    fn dump(&self, feature_name: &dyn Fn(usize) -> String, with_stats: bool) -> String {
        match &self.split {
            None if with_stats => format!("0:leaf={},cover={}\n", self.left, self.cover),
            None => format!("0:leaf={}\n", self.left),
            Some(split) => {
                let name = feature_name(split.feature);
                if with_stats {
                    format!(
                        "0:[{}<{}] yes=1,no=2,missing=1,gain={},cover={}\n\t1:leaf={},cover={}\n\t2:leaf={},cover={}\n",
                        name,
                        split.threshold,
                        split.gain,
                        self.cover,
                        self.left,
                        split.left_cover,
                        self.right,
                        split.right_cover
                    )
                } else {
                    format!(
                        "0:[{}<{}] yes=1,no=2,missing=1\n\t1:leaf={}\n\t2:leaf={}\n",
                        name, split.threshold, self.left, self.right
                    )
                }
            }
        }
    }
}

impl MockBooster {
    fn param_f32(&self, keys: &[&str], default: f32) -> Result<f32, String> {
        for key in keys {
            if let Some(value) = self.params.get(*key) {
                return value
                    .parse()
                    .map_err(|_| format!("Invalid value {value:?} for parameter {key}"));
            }
        }
        Ok(default)
    }

    fn loss(&self) -> Result<Loss, String> {
        let objective = self
            .params
            .get("objective")
            .map_or("reg:squarederror", String::as_str);
        match objective {
            "reg:squarederror" | "reg:linear" => Ok(Loss::Squared),
            "binary:logistic" | "reg:logistic" => Ok(Loss::Logistic),
            "binary:logitraw" => Ok(Loss::LogitRaw),
            "multi:softprob" => Ok(Loss::SoftProb),
            "multi:softmax" => Ok(Loss::SoftMax),
            other => Err(format!("Unknown objective function: `{other}`")),
        }
    }

    fn num_group(&self, loss: Loss) -> Result<usize, String> {
        match loss {
            Loss::SoftProb | Loss::SoftMax => {
                let num_class: usize = self
                    .params
                    .get("num_class")
                    .ok_or("Check failed: num_class is required for multi-class objectives")?
                    .parse()
                    .map_err(|_| "Invalid value for parameter num_class".to_owned())?;
                if num_class < 1 {
                    return Err("Check failed: num_class >= 1".to_owned());
                }
                Ok(num_class)
            }
            _ => Ok(1),
        }
    }

    fn initial_margin(&self, loss: Loss) -> Result<f32, String> {
        let base_score = self.param_f32(&["base_score"], 0.5)?;
        Ok(match loss {
            Loss::Squared => base_score,
            Loss::Logistic | Loss::LogitRaw => {
                let p = base_score.clamp(1e-6, 1.0 - 1e-6);
                (p / (1.0 - p)).ln()
            }
            Loss::SoftProb | Loss::SoftMax => 0.0,
        })
    }

    /// Raw scores, `num_row * num_group` values, using the first `rounds` rounds of trees.
    fn margins(&self, matrix: &MockMatrix, rounds: Option<usize>) -> Result<Vec<f32>, String> {
        let loss = self.loss()?;
        let groups = self.num_group(loss)?;
        let mut margins = if matrix.base_margin.len() == matrix.num_row * groups {
            matrix.base_margin.clone()
        } else {
            vec![self.initial_margin(loss)?; matrix.num_row * groups]
        };

        let limit = rounds.map_or(self.trees.len(), |r| (r * groups).min(self.trees.len()));
        for tree in &self.trees[..limit] {
            if tree.split.as_ref().map_or(false, |s| s.feature >= matrix.num_col) {
                return Err("Check failed: feature index out of bounds for DMatrix".to_owned());
            }
            if tree.group >= groups {
                return Err(format!(
                    "Check failed: tree group {} out of bounds for num_class {groups}",
                    tree.group
                ));
            }
            for i in 0..matrix.num_row {
                margins[i * groups + tree.group] += tree.value(matrix.row(i));
            }
        }
        Ok(margins)
    }

    /// Margins passed through the objective's link function, still `num_row * num_group` values.
    fn probabilities(&self, matrix: &MockMatrix) -> Result<Vec<f32>, String> {
        let loss = self.loss()?;
        let groups = self.num_group(loss)?;
        let margins = self.margins(matrix, None)?;
        Ok(match loss {
            Loss::Squared => margins,
            Loss::Logistic | Loss::LogitRaw => margins.into_iter().map(sigmoid).collect(),
            Loss::SoftProb | Loss::SoftMax => {
                margins.chunks(groups).flat_map(softmax).collect()
            }
        })
    }

    fn gradients(&self, matrix: &MockMatrix) -> Result<(Vec<f32>, Vec<f32>), String> {
        matrix.check_labels()?;
        let loss = self.loss()?;
        let groups = self.num_group(loss)?;
        let margins = self.margins(matrix, None)?;

        let mut grad = vec![0.0; margins.len()];
        let mut hess = vec![0.0; margins.len()];
        for i in 0..matrix.num_row {
            let w = matrix.weight_of(i);
            let y = matrix.label[i];
            match loss {
                Loss::Squared => {
                    grad[i] = w * (margins[i] - y);
                    hess[i] = w;
                }
                Loss::Logistic | Loss::LogitRaw => {
                    let p = sigmoid(margins[i]);
                    grad[i] = w * (p - y);
                    hess[i] = w * (p * (1.0 - p)).max(1e-16);
                }
                Loss::SoftProb | Loss::SoftMax => {
                    let p = softmax(&margins[i * groups..(i + 1) * groups]);
                    for (k, pk) in p.iter().enumerate() {
                        let target = if y as usize == k { 1.0 } else { 0.0 };
                        grad[i * groups + k] = w * (pk - target);
                        hess[i * groups + k] = w * (2.0 * pk * (1.0 - pk)).max(1e-16);
                    }
                }
            }
        }
        Ok((grad, hess))
    }

    /// Add one stump per output group fitted to the given gradient pairs.
    fn grow(&mut self, matrix: &MockMatrix, grad: &[f32], hess: &[f32]) -> Result<(), String> {
        let loss = self.loss()?;
        let groups = self.num_group(loss)?;
        if grad.len() != matrix.num_row * groups || hess.len() != grad.len() {
            return Err(format!(
                "Check failed: gradient size {} does not match {} rows x {} groups",
                grad.len(),
                matrix.num_row,
                groups
            ));
        }
        let eta = self.param_f32(&["eta", "learning_rate"], 0.3)?;
        let lambda = self.param_f32(&["lambda", "reg_lambda"], 1.0)?;

        for group in 0..groups {
            let g: Vec<f32> = (0..matrix.num_row).map(|i| grad[i * groups + group]).collect();
            let h: Vec<f32> = (0..matrix.num_row).map(|i| hess[i * groups + group]).collect();
            self.trees.push(fit_stump(matrix, &g, &h, group, eta, lambda));
        }
        self.num_feature = self.num_feature.max(matrix.num_col);
        Ok(())
    }

    fn metric(&self, name: &str, matrix: &MockMatrix) -> Result<f32, String> {
        let metric = Metric::parse(name)?;
        matrix.check_labels()?;
        let loss = self.loss()?;
        let groups = self.num_group(loss)?;
        let probs = self.probabilities(matrix)?;

        let mut total = 0.0_f64;
        let mut weight_sum = 0.0_f64;
        for i in 0..matrix.num_row {
            let w = f64::from(matrix.weight_of(i));
            let y = matrix.label[i];
            let row = &probs[i * groups..(i + 1) * groups];
            let term = match metric {
                Metric::Rmse => f64::from(row[0] - y).powi(2),
                Metric::Mae => f64::from((row[0] - y).abs()),
                Metric::LogLoss => {
                    let p = f64::from(row[0]).clamp(1e-16, 1.0 - 1e-16);
                    let y = f64::from(y);
                    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
                }
                Metric::Error(threshold) => f64::from(u8::from((row[0] > threshold) != (y > 0.5))),
                Metric::MLogLoss => {
                    let p = row.get(y as usize).copied().unwrap_or(0.0);
                    -f64::from(p).clamp(1e-16, 1.0).ln()
                }
                Metric::MError => f64::from(u8::from(argmax(row) != y as usize)),
            };
            total += w * term;
            weight_sum += w;
        }

        let mean = if weight_sum > 0.0 { total / weight_sum } else { 0.0 };
        let value = match metric {
            Metric::Rmse => mean.sqrt(),
            _ => mean,
        };
        Ok(value as f32)
    }

    fn default_metric(&self) -> Result<&'static str, String> {
        Ok(match self.loss()? {
            Loss::Squared => "rmse",
            Loss::Logistic | Loss::LogitRaw => "logloss",
            Loss::SoftProb | Loss::SoftMax => "mlogloss",
        })
    }
}

fn fit_stump(
    matrix: &MockMatrix,
    grad: &[f32],
    hess: &[f32],
    group: usize,
    eta: f32,
    lambda: f32,
) -> Stump {
    let score = |g: f32, h: f32| g * g / (h + lambda);
    let leaf = |g: f32, h: f32| -g / (h + lambda) * eta;

    let total_g: f32 = grad.iter().sum();
    let total_h: f32 = hess.iter().sum();
    let root_score = score(total_g, total_h);

    let mut best: Option<(Split, f32, f32)> = None;
    for feature in 0..matrix.num_col {
        let mut missing_g = 0.0;
        let mut missing_h = 0.0;
        let mut present = Vec::with_capacity(matrix.num_row);
        for i in 0..matrix.num_row {
            let value = matrix.row(i)[feature];
            if value.is_nan() {
                missing_g += grad[i];
                missing_h += hess[i];
            } else {
                present.push((value, grad[i], hess[i]));
            }
        }
        present.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_g = missing_g;
        let mut left_h = missing_h;
        for pair in present.windows(2) {
            left_g += pair[0].1;
            left_h += pair[0].2;
            if pair[0].0 == pair[1].0 {
                continue;
            }
            let right_g = total_g - left_g;
            let right_h = total_h - left_h;
            let gain = score(left_g, left_h) + score(right_g, right_h) - root_score;
            if best.as_ref().map_or(gain > 1e-9, |(s, _, _)| gain > s.gain + 1e-9) {
                let split = Split {
                    feature,
                    threshold: (pair[0].0 + pair[1].0) / 2.0,
                    gain,
                    left_cover: left_h,
                    right_cover: right_h,
                };
                best = Some((split, leaf(left_g, left_h), leaf(right_g, right_h)));
            }
        }
    }

    match best {
        Some((split, left, right)) => Stump {
            group,
            split: Some(split),
            left,
            right,
            cover: total_h,
        },
        None => Stump {
            group,
            split: None,
            left: leaf(total_g, total_h),
            right: 0.0,
            cover: total_h,
        },
    }
}

fn read_feature_names(fmap: &str) -> Result<HashMap<usize, String>, String> {
    let mut names = HashMap::new();
    if fmap.is_empty() {
        return Ok(names);
    }
    let text = fs::read_to_string(fmap).map_err(|e| format!("Cannot read feature map {fmap}: {e}"))?;
    for line in text.lines() {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 3 {
            return Err(format!("Malformed feature map line: {line:?}"));
        }
        let index = parts[0]
            .parse()
            .map_err(|_| format!("Malformed feature index: {:?}", parts[0]))?;
        names.insert(index, parts[1].to_owned());
    }
    Ok(names)
}

impl NativeLibrary for MockLibrary {
    fn last_error(&self) -> String {
        let mut state = self.state();
        state.calls.push("XGBGetLastError");
        state.last_error.clone()
    }

    fn dmatrix_create_from_file(&self, fname: &CStr, _silent: i32, out: &mut RawHandle) -> i32 {
        self.call("XGDMatrixCreateFromFile", |state| {
            let fname = cstr(fname)?;
            let path = fname.split('?').next().unwrap_or(fname);
            let text = fs::read_to_string(path).map_err(|e| format!("Cannot read {path}: {e}"))?;
            let matrix = MockMatrix::from_libsvm(&text)?;
            *out = state.insert_matrix(matrix);
            Ok(())
        })
    }

    fn dmatrix_create_from_mat(
        &self,
        data: &[f32],
        nrow: u64,
        ncol: u64,
        missing: f32,
        out: &mut RawHandle,
    ) -> i32 {
        self.call("XGDMatrixCreateFromMat", |state| {
            let (nrow, ncol) = (nrow as usize, ncol as usize);
            if data.len() != nrow * ncol {
                return Err(format!(
                    "Check failed: data size {} != {nrow} x {ncol}",
                    data.len()
                ));
            }
            let data = data
                .iter()
                .map(|v| {
                    if *v == missing || (v.is_nan() && missing.is_nan()) {
                        f32::NAN
                    } else {
                        *v
                    }
                })
                .collect();
            *out = state.insert_matrix(MockMatrix::dense(data, nrow, ncol));
            Ok(())
        })
    }

    fn dmatrix_create_from_csr(
        &self,
        indptr: &[usize],
        indices: &[u32],
        data: &[f32],
        num_col: usize,
        out: &mut RawHandle,
    ) -> i32 {
        self.call("XGDMatrixCreateFromCSREx", |state| {
            let num_row = check_indptr(indptr, indices, data.len())?;
            let inferred = indices.iter().map(|j| *j as usize + 1).max().unwrap_or(0);
            let num_col = if num_col == 0 { inferred } else { num_col };
            if inferred > num_col {
                return Err("Check failed: column index out of range".to_owned());
            }
            let mut dense = vec![f32::NAN; num_row * num_col];
            for i in 0..num_row {
                for k in indptr[i]..indptr[i + 1] {
                    dense[i * num_col + indices[k] as usize] = data[k];
                }
            }
            *out = state.insert_matrix(MockMatrix::dense(dense, num_row, num_col));
            Ok(())
        })
    }

    fn dmatrix_create_from_csc(
        &self,
        indptr: &[usize],
        indices: &[u32],
        data: &[f32],
        num_row: usize,
        out: &mut RawHandle,
    ) -> i32 {
        self.call("XGDMatrixCreateFromCSCEx", |state| {
            let num_col = check_indptr(indptr, indices, data.len())?;
            let inferred = indices.iter().map(|i| *i as usize + 1).max().unwrap_or(0);
            let num_row = if num_row == 0 { inferred } else { num_row };
            if inferred > num_row {
                return Err("Check failed: row index out of range".to_owned());
            }
            let mut dense = vec![f32::NAN; num_row * num_col];
            for j in 0..num_col {
                for k in indptr[j]..indptr[j + 1] {
                    dense[indices[k] as usize * num_col + j] = data[k];
                }
            }
            *out = state.insert_matrix(MockMatrix::dense(dense, num_row, num_col));
            Ok(())
        })
    }

    fn dmatrix_num_row(&self, handle: RawHandle, out: &mut u64) -> i32 {
        self.call("XGDMatrixNumRow", |state| {
            *out = state.matrix(handle)?.num_row as u64;
            Ok(())
        })
    }

    fn dmatrix_num_col(&self, handle: RawHandle, out: &mut u64) -> i32 {
        self.call("XGDMatrixNumCol", |state| {
            *out = state.matrix(handle)?.num_col as u64;
            Ok(())
        })
    }

    fn dmatrix_free(&self, handle: RawHandle) -> i32 {
        self.call("XGDMatrixFree", |state| {
            state
                .matrices
                .remove(&id(handle))
                .map(|_| ())
                .ok_or_else(|| format!("Free of unknown DMatrix handle {:?}", handle.as_ptr()))
        })
    }

    fn dmatrix_get_float_info(&self, handle: RawHandle, field: &CStr, out: &mut Vec<f32>) -> i32 {
        self.call("XGDMatrixGetFloatInfo", |state| {
            let field = cstr(field)?;
            *out = state.matrix(handle)?.field(field)?.clone();
            Ok(())
        })
    }

    fn dmatrix_set_float_info(&self, handle: RawHandle, field: &CStr, array: &[f32]) -> i32 {
        self.call("XGDMatrixSetFloatInfo", |state| {
            let field = cstr(field)?;
            *state.matrix_mut(handle)?.field_mut(field)? = array.to_vec();
            Ok(())
        })
    }

    fn dmatrix_slice(&self, handle: RawHandle, idxset: &[i32], out: &mut RawHandle) -> i32 {
        self.call("XGDMatrixSliceDMatrix", |state| {
            let source = state.matrix(handle)?;
            let mut sliced = MockMatrix::dense(Vec::new(), idxset.len(), source.num_col);
            let margin_groups = if source.num_row > 0 {
                source.base_margin.len() / source.num_row
            } else {
                0
            };

            for index in idxset {
                let i = usize::try_from(*index)
                    .ok()
                    .filter(|i| *i < source.num_row)
                    .ok_or_else(|| format!("Check failed: slice index {index} out of range"))?;
                sliced.data.extend_from_slice(source.row(i));
                if source.label.len() == source.num_row {
                    sliced.label.push(source.label[i]);
                }
                if source.weight.len() == source.num_row {
                    sliced.weight.push(source.weight[i]);
                }
                if margin_groups > 0 {
                    sliced.base_margin.extend_from_slice(
                        &source.base_margin[i * margin_groups..(i + 1) * margin_groups],
                    );
                }
            }
            *out = state.insert_matrix(sliced);
            Ok(())
        })
    }

    fn booster_create(&self, dmats: &[RawHandle], out: &mut RawHandle) -> i32 {
        self.call("XGBoosterCreate", |state| {
            let mut booster = MockBooster::default();
            for dmat in dmats {
                let matrix = state.matrix(*dmat)?;
                booster.num_feature = booster.num_feature.max(matrix.num_col);
                booster.cache.push(id(*dmat));
            }
            *out = state.insert_booster(booster);
            Ok(())
        })
    }

    fn booster_free(&self, handle: RawHandle) -> i32 {
        self.call("XGBoosterFree", |state| {
            state
                .boosters
                .remove(&id(handle))
                .map(|_| ())
                .ok_or_else(|| format!("Free of unknown Booster handle {:?}", handle.as_ptr()))
        })
    }

    fn booster_set_param(&self, handle: RawHandle, name: &CStr, value: &CStr) -> i32 {
        self.call("XGBoosterSetParam", |state| {
            let (name, value) = (cstr(name)?.to_owned(), cstr(value)?.to_owned());
            let booster = state.booster_mut(handle)?;
            booster.param_log.push((name.clone(), value.clone()));
            if name == "eval_metric" {
                if !booster.eval_metrics.contains(&value) {
                    booster.eval_metrics.push(value);
                }
            } else {
                booster.params.insert(name, value);
            }
            Ok(())
        })
    }

    fn booster_update_one_iter(&self, handle: RawHandle, _iter: i32, dtrain: RawHandle) -> i32 {
        self.call("XGBoosterUpdateOneIter", |state| {
            let MockState {
                matrices, boosters, ..
            } = state;
            let matrix = matrices
                .get(&id(dtrain))
                .ok_or_else(|| format!("Invalid DMatrix handle {:?}", dtrain.as_ptr()))?;
            let booster = boosters
                .get_mut(&id(handle))
                .ok_or_else(|| format!("Invalid Booster handle {:?}", handle.as_ptr()))?;
            let (grad, hess) = booster.gradients(matrix)?;
            booster.grow(matrix, &grad, &hess)
        })
    }

    fn booster_boost_one_iter(
        &self,
        handle: RawHandle,
        dtrain: RawHandle,
        grad: &[f32],
        hess: &[f32],
    ) -> i32 {
        self.call("XGBoosterBoostOneIter", |state| {
            let MockState {
                matrices, boosters, ..
            } = state;
            let matrix = matrices
                .get(&id(dtrain))
                .ok_or_else(|| format!("Invalid DMatrix handle {:?}", dtrain.as_ptr()))?;
            let booster = boosters
                .get_mut(&id(handle))
                .ok_or_else(|| format!("Invalid Booster handle {:?}", handle.as_ptr()))?;
            booster.grow(matrix, grad, hess)
        })
    }

    fn booster_eval_one_iter(
        &self,
        handle: RawHandle,
        iter: i32,
        dmats: &[RawHandle],
        evnames: &[&CStr],
        out: &mut String,
    ) -> i32 {
        self.call("XGBoosterEvalOneIter", |state| {
            if dmats.len() != evnames.len() {
                return Err("Check failed: number of matrices and names differ".to_owned());
            }
            let booster = state.booster(handle)?;
            let metrics = if booster.eval_metrics.is_empty() {
                vec![booster.default_metric()?.to_owned()]
            } else {
                booster.eval_metrics.clone()
            };

            let mut line = format!("[{iter}]");
            for (dmat, name) in dmats.iter().zip(evnames) {
                let name = cstr(name)?;
                let matrix = state.matrix(*dmat)?;
                for metric in &metrics {
                    let value = booster.metric(metric, matrix)?;
                    line.push_str(&format!("\t{name}-{metric}:{value:.6}"));
                }
            }
            *out = line;
            Ok(())
        })
    }

    fn booster_predict(
        &self,
        handle: RawHandle,
        dmat: RawHandle,
        option_mask: i32,
        ntree_limit: u32,
        out: &mut Vec<f32>,
    ) -> i32 {
        self.call("XGBoosterPredict", |state| {
            let booster = state.booster(handle)?;
            let matrix = state.matrix(dmat)?;
            let loss = booster.loss()?;
            let groups = booster.num_group(loss)?;
            let rounds = (ntree_limit > 0).then_some(ntree_limit as usize);

            if option_mask & 0x02 != 0 {
                let limit = rounds.map_or(booster.trees.len(), |r| (r * groups).min(booster.trees.len()));
                let mut leaves = Vec::with_capacity(matrix.num_row * limit);
                for i in 0..matrix.num_row {
                    for tree in &booster.trees[..limit] {
                        leaves.push(tree.leaf_index(matrix.row(i)) as f32);
                    }
                }
                *out = leaves;
                return Ok(());
            }

            let margins = booster.margins(matrix, rounds)?;
            *out = if option_mask & 0x01 != 0 {
                margins
            } else {
                match loss {
                    Loss::Squared | Loss::LogitRaw => margins,
                    Loss::Logistic => margins.into_iter().map(sigmoid).collect(),
                    Loss::SoftProb => margins.chunks(groups).flat_map(softmax).collect(),
                    Loss::SoftMax => margins.chunks(groups).map(|m| argmax(m) as f32).collect(),
                }
            };
            Ok(())
        })
    }

    fn booster_save_model(&self, handle: RawHandle, fname: &CStr) -> i32 {
        self.call("XGBoosterSaveModel", |state| {
            let fname = cstr(fname)?;
            let booster = state.booster(handle)?;
            let json = serde_json::to_string(booster).map_err(|e| e.to_string())?;
            fs::write(fname, json).map_err(|e| format!("Cannot write {fname}: {e}"))
        })
    }

    fn booster_load_model(&self, handle: RawHandle, fname: &CStr) -> i32 {
        self.call("XGBoosterLoadModel", |state| {
            let fname = cstr(fname)?;
            let json = fs::read_to_string(fname).map_err(|e| format!("Cannot read {fname}: {e}"))?;
            let loaded: MockBooster =
                serde_json::from_str(&json).map_err(|e| format!("Invalid model file: {e}"))?;
            let booster = state.booster_mut(handle)?;
            let cache = std::mem::take(&mut booster.cache);
            *booster = MockBooster { cache, ..loaded };
            Ok(())
        })
    }

    fn booster_dump_model(
        &self,
        handle: RawHandle,
        fmap: &CStr,
        with_stats: i32,
        out: &mut Vec<String>,
    ) -> i32 {
        self.call("XGBoosterDumpModel", |state| {
            let names = read_feature_names(cstr(fmap)?)?;
            let booster = state.booster(handle)?;

            if booster.params.get("booster").map(String::as_str) == Some("gblinear") {
                let loss = booster.loss()?;
                let mut dump = format!("bias:\n{}\nweight:\n", booster.initial_margin(loss)?);
                for _ in 0..booster.num_feature {
                    dump.push_str("0\n");
                }
                *out = vec![dump];
                return Ok(());
            }

            let feature_name = |f: usize| names.get(&f).cloned().unwrap_or_else(|| format!("f{f}"));
            *out = booster
                .trees
                .iter()
                .map(|tree| tree.dump(&feature_name, with_stats != 0))
                .collect();
            Ok(())
        })
    }
}
