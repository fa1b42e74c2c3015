use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// A single observed purchase or rating event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user: String,
    pub product: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    #[serde(default, alias = "productName", skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
}

impl Interaction {
    pub fn new(user: impl Into<String>, product: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            product: product.into(),
            quantity: None,
            rating: None,
            product_name: None,
        }
    }

    pub fn with_quantity(mut self, quantity: f32) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_rating(mut self, rating: f32) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_product_name(mut self, name: impl Into<String>) -> Self {
        self.product_name = Some(name.into());
        self
    }

    /// Quantity, else rating, else 1.
    pub fn weight(&self) -> f32 {
        self.quantity.or(self.rating).unwrap_or(1.0)
    }

    pub fn is_positive(&self) -> bool {
        let weight = self.weight();
        weight.is_finite() && weight > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Model,
    ColdStart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub product: String,
    pub score: f32,
    pub source: RecommendationSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub user: String,
    pub top_k: usize,
    pub exclude_purchased: bool,
}

impl RecommendationRequest {
    pub fn new(user: impl Into<String>, top_k: usize) -> Self {
        Self {
            user: user.into(),
            top_k,
            exclude_purchased: true,
        }
    }

    pub fn including_purchased(mut self) -> Self {
        self.exclude_purchased = false;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user: String,
    pub recommendations: Vec<Recommendation>,
    pub cold_start: bool,
    pub generation: u64,
    pub generated_at: DateTime<Utc>,
}

/// Codec and matrix snapshot persisted next to the model weights.
///
/// Key names are part of the on-disk format shared with other consumers of
/// `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaSnapshot {
    #[serde(rename = "usuarios")]
    pub users: Vec<String>,
    #[serde(rename = "productos")]
    pub products: Vec<String>,
    #[serde(rename = "matrizOriginal")]
    pub interaction_matrix: Vec<Vec<f32>>,
    #[serde(
        rename = "nombresProductos",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub product_names: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStage {
    Idle,
    Preprocessing,
    ModelBuilding,
    MetaPersisting,
    Fitting,
    Saving,
    Done,
    Failed,
}

impl fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrainingStage::Idle => "idle",
            TrainingStage::Preprocessing => "preprocessing",
            TrainingStage::ModelBuilding => "model building",
            TrainingStage::MetaPersisting => "meta persisting",
            TrainingStage::Fitting => "fitting",
            TrainingStage::Saving => "saving",
            TrainingStage::Done => "done",
            TrainingStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingOptions {
    /// Requested epochs; raised to the training floor when lower.
    pub epochs: Option<usize>,
}

impl TrainingOptions {
    pub fn with_epochs(epochs: usize) -> Self {
        Self {
            epochs: Some(epochs),
        }
    }
}

/// One `(user, product, target)` triple fed to the scoring model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSample {
    pub user: usize,
    pub product: usize,
    pub target: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub mse: f32,
    pub mae: f32,
    pub val_loss: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub generation: u64,
    pub num_users: usize,
    pub num_products: usize,
    pub positives: usize,
    pub negatives: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub final_metrics: Option<EpochMetrics>,
    pub best_val_loss: Option<f32>,
    pub best_epoch: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingStatus {
    pub stage: TrainingStage,
    pub run_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_report: Option<TrainingReport>,
}

impl Default for TrainingStatus {
    fn default() -> Self {
        Self {
            stage: TrainingStage::Idle,
            run_id: None,
            started_at: None,
            last_error: None,
            last_report: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveReceipt {
    pub files: Vec<PathBuf>,
    pub bytes_written: u64,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub model_loaded: bool,
    pub meta_loaded: bool,
    pub generation: u64,
    pub num_users: usize,
    pub num_products: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub ready: bool,
    pub generation: u64,
    pub num_users: usize,
    pub num_products: usize,
    pub model_users: Option<usize>,
    pub model_products: Option<usize>,
}
