pub mod codec;
pub mod cold_start;
pub mod ecosystem;
pub mod inference;
pub mod initializer;
pub mod matrix;
pub mod neural_mf;
pub mod optimizer;
pub mod sampling;

pub use codec::IdentifierCodec;
pub use cold_start::{ColdStartResolver, ColdStartWeights};
pub use ecosystem::{Ecosystem, EcosystemReranker, EcosystemTable};
pub use inference::{InferenceEngine, Ranking, SnapshotView};
pub use matrix::{InteractionMatrix, RatingStats};
pub use neural_mf::{ModelConfig, NeuralMf};
pub use sampling::NegativeSampler;

use crate::error::Result;
use crate::models::{EpochMetrics, TrainingSample};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f32,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl FitHistory {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

/// Weight-free description of a model, persisted as `model.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub format: String,
    pub format_version: u32,
    pub model: ModelConfig,
    pub weight_specs: Vec<WeightSpec>,
}

/// Topology plus the raw little-endian `f32` weight payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub topology: Topology,
    pub weights: Vec<u8>,
}

/// Trainable `score(user_index, product_index) -> [0, 1]` function.
pub trait ScoringModel: Send + Sync {
    fn num_users(&self) -> usize;

    fn num_products(&self) -> usize;

    fn fit(
        &mut self,
        samples: &[TrainingSample],
        options: &FitOptions,
        on_epoch: &mut dyn FnMut(&EpochMetrics),
    ) -> Result<FitHistory>;

    /// Scores aligned `(users[i], products[i])` pairs. Pure.
    fn predict(&self, users: &[usize], products: &[usize]) -> Result<Vec<f32>>;

    fn to_artifact(&self) -> Result<ModelArtifact>;
}
