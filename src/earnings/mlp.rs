//! Feed-forward regression network trained with Adam.
//!
//! Dense ReLU hidden layers and an identity output unit, fit on half mean
//! squared error plus an L2 penalty. Training is deterministic for a given
//! `random_state`: the same seed drives weight init, the validation split,
//! and per-epoch shuffling.

use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::LabError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpParams {
    pub hidden_layer_sizes: Vec<usize>,
    /// L2 penalty on weights (not biases).
    pub alpha: f64,
    pub learning_rate_init: f64,
    pub beta_1: f64,
    pub beta_2: f64,
    pub epsilon: f64,
    /// Upper bound on mini-batch size; capped at the training row count.
    pub batch_size: usize,
    /// Maximum number of epochs.
    pub max_iter: usize,
    pub early_stopping: bool,
    pub validation_fraction: f64,
    pub n_iter_no_change: usize,
    pub tol: f64,
    pub random_state: u64,
}

impl Default for MlpParams {
    fn default() -> Self {
        Self {
            hidden_layer_sizes: vec![64, 32, 16],
            alpha: 1e-4,
            learning_rate_init: 1e-3,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-8,
            batch_size: 1024,
            max_iter: 200,
            early_stopping: true,
            validation_fraction: 0.1,
            n_iter_no_change: 10,
            tol: 1e-4,
            random_state: 0,
        }
    }
}

impl MlpParams {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_layer_sizes.iter().any(|n| *n == 0) {
            bail!("hidden_layer_sizes entries must be > 0");
        }
        if self.alpha < 0.0 {
            bail!("alpha must be >= 0");
        }
        if !(self.learning_rate_init > 0.0) {
            bail!("learning_rate_init must be > 0");
        }
        if !(0.0..1.0).contains(&self.beta_1) || !(0.0..1.0).contains(&self.beta_2) {
            bail!("beta_1 and beta_2 must be in [0, 1)");
        }
        if self.batch_size == 0 || self.max_iter == 0 {
            bail!("batch_size and max_iter must be > 0");
        }
        if self.early_stopping && !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            bail!("validation_fraction must be in (0, 1)");
        }
        Ok(())
    }
}

/// Per-feature standardisation with population standard deviation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<'_, f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let mean = x.sum_axis(Axis(0)) / n;
        let mut var = Array1::<f64>::zeros(x.ncols());
        for row in x.rows() {
            for (j, v) in row.iter().enumerate() {
                let d = v - mean[j];
                var[j] += d * d;
            }
        }
        let scale = var.mapv(|s| {
            let sd = (s / n).sqrt();
            if sd > 0.0 && sd.is_finite() {
                sd
            } else {
                1.0
            }
        });
        Self { mean, scale }
    }

    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for mut row in out.rows_mut() {
            row -= &self.mean;
            row /= &self.scale;
        }
        out
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }
}

#[derive(Debug, Clone)]
struct Dense {
    weights: Array2<f64>,
    biases: Array1<f64>,
}

#[derive(Debug, Clone)]
struct AdamState {
    m_w: Vec<Array2<f64>>,
    v_w: Vec<Array2<f64>>,
    m_b: Vec<Array1<f64>>,
    v_b: Vec<Array1<f64>>,
    t: i32,
}

impl AdamState {
    fn new(layers: &[Dense]) -> Self {
        Self {
            m_w: layers.iter().map(|l| Array2::zeros(l.weights.dim())).collect(),
            v_w: layers.iter().map(|l| Array2::zeros(l.weights.dim())).collect(),
            m_b: layers.iter().map(|l| Array1::zeros(l.biases.len())).collect(),
            v_b: layers.iter().map(|l| Array1::zeros(l.biases.len())).collect(),
            t: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MlpRegressor {
    params: MlpParams,
    layers: Vec<Dense>,
    n_iter: usize,
    loss_curve: Vec<f64>,
    best_validation_score: Option<f64>,
}

impl MlpRegressor {
    pub fn new(params: MlpParams) -> Self {
        Self {
            params,
            layers: Vec::new(),
            n_iter: 0,
            loss_curve: Vec::new(),
            best_validation_score: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.layers.is_empty()
    }

    /// Epochs run by the last `fit`.
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn loss_curve(&self) -> &[f64] {
        &self.loss_curve
    }

    pub fn best_validation_score(&self) -> Option<f64> {
        self.best_validation_score
    }

    /// Fits from scratch; any previous weights are discarded.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), LabError> {
        check_training_data(x, y)?;
        let p = self.params.clone();
        let mut rng = StdRng::seed_from_u64(p.random_state);
        self.layers = init_layers(x.ncols(), &p.hidden_layer_sizes, &mut rng);
        self.loss_curve.clear();
        self.best_validation_score = None;
        self.n_iter = 0;

        let n = x.nrows();
        let n_val = (p.validation_fraction * n as f64).ceil() as usize;
        let use_validation = p.early_stopping && n_val >= 1 && n_val < n;
        let (train_idx, val_idx): (Vec<usize>, Vec<usize>) = if use_validation {
            let mut perm: Vec<usize> = (0..n).collect();
            perm.shuffle(&mut rng);
            let val = perm[..n_val].to_vec();
            (perm[n_val..].to_vec(), val)
        } else {
            ((0..n).collect(), Vec::new())
        };
        let x_train = x.select(Axis(0), &train_idx);
        let y_train = y.select(Axis(0), &train_idx);
        let x_val = x.select(Axis(0), &val_idx);
        let y_val = y.select(Axis(0), &val_idx);

        let n_train = train_idx.len();
        let batch = p.batch_size.clamp(1, n_train);
        let mut adam = AdamState::new(&self.layers);
        let mut order: Vec<usize> = (0..n_train).collect();

        let mut best_loss = f64::INFINITY;
        let mut best_score = f64::NEG_INFINITY;
        let mut best_layers = self.layers.clone();
        let mut no_improvement = 0usize;

        for epoch in 0..p.max_iter {
            order.shuffle(&mut rng);
            let mut accumulated = 0.0;
            for chunk in order.chunks(batch) {
                let xb = x_train.select(Axis(0), chunk);
                let yb = y_train.select(Axis(0), chunk);
                let batch_loss = self.train_batch(xb.view(), yb.view(), &mut adam);
                accumulated += batch_loss * chunk.len() as f64;
            }
            let epoch_loss = accumulated / n_train as f64;
            self.loss_curve.push(epoch_loss);
            self.n_iter = epoch + 1;

            if use_validation {
                let score = r2_score(y_val.view(), self.forward(x_val.view()).view());
                if score < best_score + p.tol {
                    no_improvement += 1;
                } else {
                    no_improvement = 0;
                }
                if score > best_score {
                    best_score = score;
                    best_layers = self.layers.clone();
                }
            } else {
                if epoch_loss > best_loss - p.tol {
                    no_improvement += 1;
                } else {
                    no_improvement = 0;
                }
                if epoch_loss < best_loss {
                    best_loss = epoch_loss;
                }
            }

            if !epoch_loss.is_finite() {
                tracing::warn!(epoch, "training loss diverged; stopping early");
                break;
            }
            if no_improvement > p.n_iter_no_change {
                break;
            }
        }

        if use_validation {
            self.layers = best_layers;
            self.best_validation_score = Some(best_score);
        }
        Ok(())
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, LabError> {
        let Some(first) = self.layers.first() else {
            return Err(LabError::Validation("model must be fit before predict".to_string()));
        };
        if x.ncols() != first.weights.nrows() {
            return Err(LabError::Validation(format!(
                "expected {} features, got {}",
                first.weights.nrows(),
                x.ncols()
            )));
        }
        Ok(self.forward(x))
    }

    fn forward(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut a = x.to_owned();
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            let mut z = a.dot(&layer.weights);
            z += &layer.biases;
            if i < last {
                z.mapv_inplace(relu);
            }
            a = z;
        }
        a.column(0).to_owned()
    }

    /// One Adam step on a mini-batch. Returns the penalised batch loss.
    fn train_batch(
        &mut self,
        xb: ArrayView2<'_, f64>,
        yb: ArrayView1<'_, f64>,
        adam: &mut AdamState,
    ) -> f64 {
        let p = &self.params;
        let nb = xb.nrows() as f64;
        let last = self.layers.len() - 1;

        let mut activations: Vec<Array2<f64>> = Vec::with_capacity(self.layers.len() + 1);
        activations.push(xb.to_owned());
        for (i, layer) in self.layers.iter().enumerate() {
            let mut z = activations[i].dot(&layer.weights);
            z += &layer.biases;
            if i < last {
                z.mapv_inplace(relu);
            }
            activations.push(z);
        }

        let output = &activations[self.layers.len()];
        let mut delta = output.clone();
        for (r, target) in yb.iter().enumerate() {
            delta[[r, 0]] -= target;
        }
        let squared = delta.iter().map(|d| d * d).sum::<f64>() / nb / 2.0;
        let penalty: f64 = self
            .layers
            .iter()
            .map(|l| l.weights.iter().map(|w| w * w).sum::<f64>())
            .sum();
        let loss = squared + 0.5 * p.alpha * penalty / nb;

        let mut grads_w: Vec<Array2<f64>> = Vec::with_capacity(self.layers.len());
        let mut grads_b: Vec<Array1<f64>> = Vec::with_capacity(self.layers.len());
        for i in (0..self.layers.len()).rev() {
            let layer = &self.layers[i];
            let gw = (activations[i].t().dot(&delta) + &(&layer.weights * p.alpha)) / nb;
            let gb = delta.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(layer.biases.len()));
            if i > 0 {
                let mut back = delta.dot(&layer.weights.t());
                back.zip_mut_with(&activations[i], |d, a| {
                    if *a <= 0.0 {
                        *d = 0.0;
                    }
                });
                delta = back;
            }
            grads_w.push(gw);
            grads_b.push(gb);
        }
        grads_w.reverse();
        grads_b.reverse();

        adam.t += 1;
        let lr = p.learning_rate_init * (1.0 - p.beta_2.powi(adam.t)).sqrt()
            / (1.0 - p.beta_1.powi(adam.t));
        let (b1, b2, eps) = (p.beta_1, p.beta_2, p.epsilon);
        for (i, layer) in self.layers.iter_mut().enumerate() {
            adam_step(&mut layer.weights, &grads_w[i], &mut adam.m_w[i], &mut adam.v_w[i], lr, b1, b2, eps);
            adam_step(&mut layer.biases, &grads_b[i], &mut adam.m_b[i], &mut adam.v_b[i], lr, b1, b2, eps);
        }
        loss
    }
}

#[allow(clippy::too_many_arguments)]
fn adam_step<D: ndarray::Dimension>(
    param: &mut ndarray::Array<f64, D>,
    grad: &ndarray::Array<f64, D>,
    m: &mut ndarray::Array<f64, D>,
    v: &mut ndarray::Array<f64, D>,
    lr: f64,
    beta_1: f64,
    beta_2: f64,
    epsilon: f64,
) {
    m.zip_mut_with(grad, |m, g| *m = beta_1 * *m + (1.0 - beta_1) * g);
    v.zip_mut_with(grad, |v, g| *v = beta_2 * *v + (1.0 - beta_2) * g * g);
    ndarray::Zip::from(param)
        .and(&*m)
        .and(&*v)
        .for_each(|w, m, v| *w -= lr * m / (v.sqrt() + epsilon));
}

fn relu(v: f64) -> f64 {
    v.max(0.0)
}

/// Glorot-uniform weights and biases, bound `sqrt(6 / (fan_in + fan_out))`.
fn init_layers(n_features: usize, hidden: &[usize], rng: &mut StdRng) -> Vec<Dense> {
    let mut sizes = Vec::with_capacity(hidden.len() + 2);
    sizes.push(n_features);
    sizes.extend_from_slice(hidden);
    sizes.push(1);
    sizes
        .windows(2)
        .map(|pair| {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
            let weights = Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-bound..bound));
            let biases = Array1::from_shape_fn(fan_out, |_| rng.gen_range(-bound..bound));
            Dense { weights, biases }
        })
        .collect()
}

fn check_training_data(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), LabError> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(LabError::Validation("training set is empty".to_string()));
    }
    if x.nrows() != y.len() {
        return Err(LabError::Validation(format!(
            "feature rows ({}) and targets ({}) differ",
            x.nrows(),
            y.len()
        )));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(LabError::Validation(
            "training data contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

/// Coefficient of determination. A constant target scores 1 when matched
/// exactly and 0 otherwise.
pub fn r2_score(y: ArrayView1<'_, f64>, yhat: ArrayView1<'_, f64>) -> f64 {
    if y.is_empty() {
        return f64::NAN;
    }
    let mean = y.mean().unwrap_or(0.0);
    let sse: f64 = y.iter().zip(yhat.iter()).map(|(a, b)| (a - b).powi(2)).sum();
    let sst: f64 = y.iter().map(|a| (a - mean).powi(2)).sum();
    if sst <= 0.0 {
        return if sse == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - sse / sst
}

/// Scaler plus network, refit together.
#[derive(Debug, Clone)]
pub struct MlpPipeline {
    scaler: StandardScaler,
    model: MlpRegressor,
}

impl MlpPipeline {
    pub fn new(params: MlpParams) -> Self {
        Self {
            scaler: StandardScaler::default(),
            model: MlpRegressor::new(params),
        }
    }

    pub fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), LabError> {
        check_training_data(x, y)?;
        self.scaler = StandardScaler::fit(x);
        let scaled = self.scaler.transform(x);
        self.model.fit(scaled.view(), y)
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, LabError> {
        if !self.model.is_fitted() {
            return Err(LabError::Validation("model must be fit before predict".to_string()));
        }
        if x.ncols() != self.scaler.mean.len() {
            return Err(LabError::Validation(format!(
                "expected {} features, got {}",
                self.scaler.mean.len(),
                x.ncols()
            )));
        }
        let scaled = self.scaler.transform(x);
        self.model.predict(scaled.view())
    }

    pub fn model(&self) -> &MlpRegressor {
        &self.model
    }
}
