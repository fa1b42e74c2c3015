//! Embedding-based matrix factorization with bias terms and a small
//! feed-forward residual branch.
//!
//! `score(u, i) = sigmoid(e_u · e_i + b_u + b_i + w2 · dropout(relu([e_u; e_i] W1 + b1)) + b2)`

use super::initializer::{make_rng, InitializationMethod};
use super::optimizer::{Adam, Optimizer};
use super::{FitHistory, FitOptions, ModelArtifact, ScoringModel, Topology, WeightSpec};
use crate::error::{RecommenderError, Result};
use crate::models::{EpochMetrics, TrainingSample};
use crate::utils::metrics::{mean_absolute_error, mean_squared_error};
use crate::utils::{relu, sigmoid};
use ndarray::{s, Array1, Array2, ArrayViewD, ArrayViewMutD, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const TOPOLOGY_FORMAT: &str = "shoprec-neural-mf";
pub const TOPOLOGY_VERSION: u32 = 1;

/// Tensors that receive the L2 penalty.
const REGULARIZED: [&str; 4] = ["user_embedding", "item_embedding", "dense_kernel", "output_kernel"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub num_users: usize,
    pub num_products: usize,
    pub embedding_dim: usize,
    pub hidden_units: usize,
    pub dropout: f32,
    pub l2: f32,
}

impl ModelConfig {
    pub fn new(num_users: usize, num_products: usize) -> Self {
        Self {
            num_users,
            num_products,
            embedding_dim: 64,
            hidden_units: 32,
            dropout: 0.2,
            l2: 0.001,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_users == 0 || self.num_products == 0 {
            return Err(RecommenderError::Backend(format!(
                "model needs at least one user and one product (got {}x{})",
                self.num_users, self.num_products
            )));
        }
        if self.embedding_dim == 0 || self.hidden_units == 0 {
            return Err(RecommenderError::Backend(
                "embedding_dim and hidden_units must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(RecommenderError::Backend(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !self.l2.is_finite() || self.l2 < 0.0 {
            return Err(RecommenderError::Backend(format!("invalid l2 weight {}", self.l2)));
        }
        Ok(())
    }

    /// Total number of `f32` weights, or `None` when the shapes overflow `usize`.
    fn weight_count(&self) -> Option<usize> {
        let (u, p, d, h) = (self.num_users, self.num_products, self.embedding_dim, self.hidden_units);
        let embeddings = u.checked_add(p)?.checked_mul(d)?;
        let dense = d.checked_mul(2)?.checked_mul(h)?;
        embeddings
            .checked_add(u)?
            .checked_add(p)?
            .checked_add(dense)?
            .checked_add(h)?
            .checked_add(h)?
            .checked_add(1)
    }

    fn expected_specs(&self) -> Vec<WeightSpec> {
        let (u, p, d, h) = (self.num_users, self.num_products, self.embedding_dim, self.hidden_units);
        [
            ("user_embedding", vec![u, d]),
            ("item_embedding", vec![p, d]),
            ("user_bias", vec![u]),
            ("item_bias", vec![p]),
            ("dense_kernel", vec![2 * d, h]),
            ("dense_bias", vec![h]),
            ("output_kernel", vec![h]),
            ("output_bias", vec![1]),
        ]
        .into_iter()
        .map(|(name, shape)| WeightSpec {
            name: name.to_string(),
            shape,
        })
        .collect()
    }
}

#[derive(Debug, Clone)]
struct Parameters {
    user_embedding: Array2<f32>,
    item_embedding: Array2<f32>,
    user_bias: Array1<f32>,
    item_bias: Array1<f32>,
    dense_kernel: Array2<f32>,
    dense_bias: Array1<f32>,
    output_kernel: Array1<f32>,
    output_bias: Array1<f32>,
}

impl Parameters {
    fn initialize(config: &ModelConfig, rng: &mut StdRng) -> Self {
        let (d, h) = (config.embedding_dim, config.hidden_units);
        let embedding = InitializationMethod::EMBEDDING;
        let glorot = InitializationMethod::GlorotUniform;
        let zeros = InitializationMethod::Zeros;

        Self {
            user_embedding: embedding.initialize_matrix(config.num_users, d, rng),
            item_embedding: embedding.initialize_matrix(config.num_products, d, rng),
            user_bias: zeros.initialize_vector(config.num_users, rng),
            item_bias: zeros.initialize_vector(config.num_products, rng),
            dense_kernel: glorot.initialize_matrix(2 * d, h, rng),
            dense_bias: zeros.initialize_vector(h, rng),
            // A (h x 1) kernel, stored flat.
            output_kernel: glorot
                .initialize_matrix(h, 1, rng)
                .into_shape(h)
                .unwrap_or_else(|_| Array1::zeros(h)),
            output_bias: zeros.initialize_vector(1, rng),
        }
    }

    fn zeros_like(&self) -> Self {
        Self {
            user_embedding: Array2::zeros(self.user_embedding.raw_dim()),
            item_embedding: Array2::zeros(self.item_embedding.raw_dim()),
            user_bias: Array1::zeros(self.user_bias.raw_dim()),
            item_bias: Array1::zeros(self.item_bias.raw_dim()),
            dense_kernel: Array2::zeros(self.dense_kernel.raw_dim()),
            dense_bias: Array1::zeros(self.dense_bias.raw_dim()),
            output_kernel: Array1::zeros(self.output_kernel.raw_dim()),
            output_bias: Array1::zeros(self.output_bias.raw_dim()),
        }
    }

    fn tensors(&self) -> Vec<(&'static str, ArrayViewD<'_, f32>)> {
        vec![
            ("user_embedding", self.user_embedding.view().into_dyn()),
            ("item_embedding", self.item_embedding.view().into_dyn()),
            ("user_bias", self.user_bias.view().into_dyn()),
            ("item_bias", self.item_bias.view().into_dyn()),
            ("dense_kernel", self.dense_kernel.view().into_dyn()),
            ("dense_bias", self.dense_bias.view().into_dyn()),
            ("output_kernel", self.output_kernel.view().into_dyn()),
            ("output_bias", self.output_bias.view().into_dyn()),
        ]
    }

    fn tensors_mut(&mut self) -> Vec<(&'static str, ArrayViewMutD<'_, f32>)> {
        vec![
            ("user_embedding", self.user_embedding.view_mut().into_dyn()),
            ("item_embedding", self.item_embedding.view_mut().into_dyn()),
            ("user_bias", self.user_bias.view_mut().into_dyn()),
            ("item_bias", self.item_bias.view_mut().into_dyn()),
            ("dense_kernel", self.dense_kernel.view_mut().into_dyn()),
            ("dense_bias", self.dense_bias.view_mut().into_dyn()),
            ("output_kernel", self.output_kernel.view_mut().into_dyn()),
            ("output_bias", self.output_bias.view_mut().into_dyn()),
        ]
    }

    fn fill_zero(&mut self) {
        for (_, mut tensor) in self.tensors_mut() {
            tensor.fill(0.0);
        }
    }

    fn from_flat(config: &ModelConfig, values: &[f32]) -> Result<Self> {
        let (u, p, d, h) = (config.num_users, config.num_products, config.embedding_dim, config.hidden_units);
        let overflow = || RecommenderError::InvalidArtifact("weight shapes overflow".to_string());
        let mut cursor = 0usize;
        let mut take = |len: usize| -> Result<Vec<f32>> {
            let end = cursor.checked_add(len).ok_or_else(overflow)?;
            let chunk = values.get(cursor..end).ok_or_else(|| {
                RecommenderError::InvalidArtifact("weight payload is truncated".to_string())
            })?;
            cursor = end;
            Ok(chunk.to_vec())
        };
        let matrix = |rows: usize, cols: usize, data: Vec<f32>| {
            Array2::from_shape_vec((rows, cols), data)
                .map_err(|e| RecommenderError::InvalidArtifact(e.to_string()))
        };
        let size = |rows: usize, cols: usize| rows.checked_mul(cols).ok_or_else(overflow);
        let dense_rows = d.checked_mul(2).ok_or_else(overflow)?;

        let user_embedding = matrix(u, d, take(size(u, d)?)?)?;
        let item_embedding = matrix(p, d, take(size(p, d)?)?)?;
        let user_bias = Array1::from(take(u)?);
        let item_bias = Array1::from(take(p)?);
        let dense_kernel = matrix(dense_rows, h, take(size(dense_rows, h)?)?)?;
        let dense_bias = Array1::from(take(h)?);
        let output_kernel = Array1::from(take(h)?);
        let output_bias = Array1::from(take(1)?);

        Ok(Self {
            user_embedding,
            item_embedding,
            user_bias,
            item_bias,
            dense_kernel,
            dense_bias,
            output_kernel,
            output_bias,
        })
    }
}

/// Intermediate values of one forward pass, kept for backpropagation.
struct Activations {
    input: Array1<f32>,
    hidden_pre: Array1<f32>,
    hidden: Array1<f32>,
    mask: Option<Array1<f32>>,
    output: f32,
}

pub struct NeuralMf {
    config: ModelConfig,
    params: Parameters,
    optimizer: Box<dyn Optimizer>,
}

impl std::fmt::Debug for NeuralMf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeuralMf").field("config", &self.config).finish()
    }
}

impl NeuralMf {
    pub fn new(config: ModelConfig, optimizer: Box<dyn Optimizer>, seed: Option<u64>) -> Result<Self> {
        config.validate()?;
        let mut rng = make_rng(seed);
        let params = Parameters::initialize(&config, &mut rng);
        Ok(Self {
            config,
            params,
            optimizer,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn topology(&self) -> Topology {
        Topology {
            format: TOPOLOGY_FORMAT.to_string(),
            format_version: TOPOLOGY_VERSION,
            model: self.config,
            weight_specs: self.config.expected_specs(),
        }
    }

    /// Rebuilds the model described by `artifact.topology` and attaches its weights.
    pub fn from_artifact(artifact: &ModelArtifact) -> Result<Self> {
        let topology = &artifact.topology;
        if topology.format != TOPOLOGY_FORMAT || topology.format_version != TOPOLOGY_VERSION {
            return Err(RecommenderError::InvalidArtifact(format!(
                "unsupported topology {} v{}",
                topology.format, topology.format_version
            )));
        }
        topology.model.validate()?;

        let expected_bytes = topology
            .model
            .weight_count()
            .and_then(|count| count.checked_mul(4))
            .ok_or_else(|| RecommenderError::InvalidArtifact("weight shapes overflow".to_string()))?;

        if topology.weight_specs != topology.model.expected_specs() {
            return Err(RecommenderError::InvalidArtifact(
                "weight specs do not match the model configuration".to_string(),
            ));
        }

        if artifact.weights.len() != expected_bytes {
            return Err(RecommenderError::InvalidArtifact(format!(
                "expected {} weight bytes, found {}",
                expected_bytes,
                artifact.weights.len()
            )));
        }

        let values: Vec<f32> = artifact
            .weights
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let params = Parameters::from_flat(&topology.model, &values)?;

        Ok(Self {
            config: topology.model,
            params,
            optimizer: Box::new(Adam::default()),
        })
    }

    fn forward<R: Rng>(&self, user: usize, product: usize, dropout_rng: Option<&mut R>) -> Activations {
        let d = self.config.embedding_dim;
        let p = &self.params;
        let eu = p.user_embedding.row(user);
        let ei = p.item_embedding.row(product);

        let mut input = Array1::<f32>::zeros(2 * d);
        input.slice_mut(s![..d]).assign(&eu);
        input.slice_mut(s![d..]).assign(&ei);

        let hidden_pre = input.dot(&p.dense_kernel) + &p.dense_bias;
        let mut hidden = hidden_pre.mapv(relu);

        let rate = self.config.dropout;
        let mask = match dropout_rng {
            Some(rng) if rate > 0.0 => {
                let keep = 1.0 / (1.0 - rate);
                let mask = Array1::from_shape_fn(hidden.len(), |_| {
                    if rng.gen::<f32>() < rate {
                        0.0
                    } else {
                        keep
                    }
                });
                hidden *= &mask;
                Some(mask)
            }
            _ => None,
        };

        let logit = eu.dot(&ei)
            + p.user_bias[user]
            + p.item_bias[product]
            + hidden.dot(&p.output_kernel)
            + p.output_bias[0];

        Activations {
            input,
            hidden_pre,
            hidden,
            mask,
            output: sigmoid(logit),
        }
    }

    /// Accumulates the gradient of `scale * (output - target)^2` into `grads`.
    fn backward(&self, sample: &TrainingSample, act: &Activations, scale: f32, grads: &mut Parameters) {
        let d = self.config.embedding_dim;
        let p = &self.params;
        let (u, i) = (sample.user, sample.product);

        let d_output = 2.0 * (act.output - sample.target) * scale;
        let d_logit = d_output * act.output * (1.0 - act.output);

        grads.user_bias[u] += d_logit;
        grads.item_bias[i] += d_logit;
        grads.output_bias[0] += d_logit;
        grads.output_kernel.scaled_add(d_logit, &act.hidden);

        let mut d_hidden = &p.output_kernel * d_logit;
        if let Some(mask) = &act.mask {
            d_hidden *= mask;
        }
        let d_pre = Zip::from(&d_hidden)
            .and(&act.hidden_pre)
            .map_collect(|&g, &z| if z > 0.0 { g } else { 0.0 });

        for (row, mut grad_row) in grads.dense_kernel.rows_mut().into_iter().enumerate() {
            grad_row.scaled_add(act.input[row], &d_pre);
        }
        grads.dense_bias += &d_pre;

        let d_input = p.dense_kernel.dot(&d_pre);

        let mut gu = grads.user_embedding.row_mut(u);
        gu.scaled_add(d_logit, &p.item_embedding.row(i));
        gu += &d_input.slice(s![..d]);

        let mut gi = grads.item_embedding.row_mut(i);
        gi.scaled_add(d_logit, &p.user_embedding.row(u));
        gi += &d_input.slice(s![d..]);
    }

    fn add_l2_gradient(&self, grads: &mut Parameters) {
        let factor = 2.0 * self.config.l2;
        if factor == 0.0 {
            return;
        }
        let params = self.params.tensors();
        for ((name, mut grad), (_, param)) in grads.tensors_mut().into_iter().zip(params) {
            if REGULARIZED.contains(&name) {
                grad.scaled_add(factor, &param);
            }
        }
    }

    fn l2_penalty(&self) -> f32 {
        self.params
            .tensors()
            .into_iter()
            .filter(|(name, _)| REGULARIZED.contains(name))
            .map(|(_, t)| t.iter().map(|w| w * w).sum::<f32>())
            .sum::<f32>()
            * self.config.l2
    }

    fn apply_gradients(&mut self, grads: &Parameters) {
        let Self {
            params, optimizer, ..
        } = self;
        optimizer.begin_step();
        for ((name, param), (_, grad)) in params.tensors_mut().into_iter().zip(grads.tensors()) {
            optimizer.update(name, param, grad);
        }
    }

    fn evaluate(&self, samples: &[TrainingSample], indices: &[usize]) -> f32 {
        let (outputs, targets): (Vec<f32>, Vec<f32>) = indices
            .iter()
            .map(|&i| {
                let s = &samples[i];
                (self.forward::<StdRng>(s.user, s.product, None).output, s.target)
            })
            .unzip();
        mean_squared_error(&outputs, &targets)
    }

    fn check_index(&self, user: usize, product: usize) -> Result<()> {
        if user >= self.config.num_users || product >= self.config.num_products {
            return Err(RecommenderError::Backend(format!(
                "index ({}, {}) outside model capacity {}x{}",
                user, product, self.config.num_users, self.config.num_products
            )));
        }
        Ok(())
    }
}

impl ScoringModel for NeuralMf {
    fn num_users(&self) -> usize {
        self.config.num_users
    }

    fn num_products(&self) -> usize {
        self.config.num_products
    }

    fn fit(
        &mut self,
        samples: &[TrainingSample],
        options: &FitOptions,
        on_epoch: &mut dyn FnMut(&EpochMetrics),
    ) -> Result<FitHistory> {
        if samples.is_empty() {
            return Err(RecommenderError::Backend("no training samples".to_string()));
        }
        if options.batch_size == 0 {
            return Err(RecommenderError::Backend("batch size must be positive".to_string()));
        }
        for sample in samples {
            self.check_index(sample.user, sample.product)?;
            if !sample.target.is_finite() {
                return Err(RecommenderError::Backend("non-finite training target".to_string()));
            }
        }

        let mut rng = make_rng(options.seed);
        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.shuffle(&mut rng);

        let n = samples.len();
        let val_len = if n >= 2 {
            ((n as f32 * options.validation_split.clamp(0.0, 1.0)).floor() as usize).min(n - 1)
        } else {
            0
        };
        let val_indices = order.split_off(n - val_len);
        let mut train_indices = order;

        // One scratch buffer for the whole fit, zeroed per batch.
        let mut grads = self.params.zeros_like();
        let mut outputs = Vec::with_capacity(train_indices.len());
        let mut targets = Vec::with_capacity(train_indices.len());
        let mut history = FitHistory::default();

        for epoch in 1..=options.epochs {
            train_indices.shuffle(&mut rng);
            outputs.clear();
            targets.clear();

            for batch in train_indices.chunks(options.batch_size) {
                grads.fill_zero();
                let scale = 1.0 / batch.len() as f32;
                for &index in batch {
                    let sample = &samples[index];
                    let act = self.forward(sample.user, sample.product, Some(&mut rng));
                    outputs.push(act.output);
                    targets.push(sample.target);
                    self.backward(sample, &act, scale, &mut grads);
                }
                self.add_l2_gradient(&mut grads);
                self.apply_gradients(&grads);
            }

            let mse = mean_squared_error(&outputs, &targets);
            let penalty = self.l2_penalty();
            let val_loss = if val_indices.is_empty() {
                None
            } else {
                Some(self.evaluate(samples, &val_indices) + penalty)
            };

            let metrics = EpochMetrics {
                epoch,
                loss: mse + penalty,
                mse,
                mae: mean_absolute_error(&outputs, &targets),
                val_loss,
            };
            debug!(
                "epoch {}: loss={:.5} mse={:.5} mae={:.5} val_loss={:?}",
                epoch, metrics.loss, metrics.mse, metrics.mae, metrics.val_loss
            );
            on_epoch(&metrics);
            history.epochs.push(metrics);
        }

        Ok(history)
    }

    fn predict(&self, users: &[usize], products: &[usize]) -> Result<Vec<f32>> {
        if users.len() != products.len() {
            return Err(RecommenderError::Backend(format!(
                "batch length mismatch: {} users vs {} products",
                users.len(),
                products.len()
            )));
        }
        for (&u, &p) in users.iter().zip(products) {
            self.check_index(u, p)?;
        }

        Ok(users
            .par_iter()
            .zip(products.par_iter())
            .map(|(&u, &p)| self.forward::<StdRng>(u, p, None).output)
            .collect())
    }

    fn to_artifact(&self) -> Result<ModelArtifact> {
        let tensors = self.params.tensors();
        let total: usize = tensors.iter().map(|(_, t)| t.len()).sum();
        let mut weights = Vec::with_capacity(total * 4);
        for (_, tensor) in &tensors {
            for value in tensor.iter() {
                weights.extend_from_slice(&value.to_le_bytes());
            }
        }

        Ok(ModelArtifact {
            topology: self.topology(),
            weights,
        })
    }
}
