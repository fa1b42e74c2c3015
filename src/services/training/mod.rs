use crate::algorithms::neural_mf::ModelConfig;
use crate::algorithms::sampling::{batch_size_for, build_training_set};
use crate::algorithms::{initializer, optimizer, FitHistory, FitOptions, NegativeSampler, NeuralMf, ScoringModel};
use crate::config::{Config, TrainingConfig};
use crate::error::{RecommenderError, Result};
use crate::models::*;
use crate::services::context::EngineContext;
use crate::services::dataset::DatasetSource;
use crate::services::recommendation::RecommendationService;
use crate::services::storage::ArtifactStore;
use crate::utils::metrics::{EarlyStopping, PatienceSignal};
use crate::utils::validation::screen_interactions;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Training never runs for fewer epochs than this.
pub const MIN_EPOCHS: usize = 50;

/// Exclusive right to run one training pass; released on drop.
pub struct TrainingSlot {
    _guard: OwnedMutexGuard<()>,
}

pub struct TrainingService {
    config: Arc<Config>,
    store: Arc<dyn ArtifactStore>,
    recommendation_service: Arc<RecommendationService>,
    slot: Arc<Mutex<()>>,
    status: RwLock<TrainingStatus>,
}

impl TrainingService {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ArtifactStore>,
        recommendation_service: Arc<RecommendationService>,
    ) -> Self {
        Self {
            config,
            store,
            recommendation_service,
            slot: Arc::new(Mutex::new(())),
            status: RwLock::new(TrainingStatus::default()),
        }
    }

    pub fn status(&self) -> TrainingStatus {
        self.status.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.slot.try_lock().is_err()
    }

    /// Claims the slot without waiting; `None` while another pass holds it.
    pub fn try_reserve(&self) -> Option<TrainingSlot> {
        Arc::clone(&self.slot)
            .try_lock_owned()
            .ok()
            .map(|guard| TrainingSlot { _guard: guard })
    }

    async fn reserve(&self) -> TrainingSlot {
        TrainingSlot {
            _guard: Arc::clone(&self.slot).lock_owned().await,
        }
    }

    pub async fn train_from_source(
        &self,
        source: &dyn DatasetSource,
        options: TrainingOptions,
    ) -> Result<TrainingReport> {
        let slot = self.reserve().await;
        self.train_from_source_reserved(slot, source, options).await
    }

    /// Fetches a snapshot and trains on it while holding `slot`.
    pub async fn train_from_source_reserved(
        &self,
        slot: TrainingSlot,
        source: &dyn DatasetSource,
        options: TrainingOptions,
    ) -> Result<TrainingReport> {
        info!("Fetching training data from {}", source.describe());
        let interactions = match source.fetch().await {
            Ok(interactions) => interactions,
            Err(e) => {
                let err = e.at_stage(TrainingStage::Preprocessing);
                self.record_failure(&err);
                return Err(err);
            }
        };
        self.train_reserved(slot, interactions, options).await
    }

    /// Runs one full training pass. Concurrent calls wait for the slot.
    ///
    /// The new generation is installed only after artifacts are saved; on
    /// failure the previous generation keeps serving.
    pub async fn train(&self, interactions: Vec<Interaction>, options: TrainingOptions) -> Result<TrainingReport> {
        let slot = self.reserve().await;
        self.train_reserved(slot, interactions, options).await
    }

    async fn train_reserved(
        &self,
        _slot: TrainingSlot,
        interactions: Vec<Interaction>,
        options: TrainingOptions,
    ) -> Result<TrainingReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        {
            let mut status = self.status.write();
            status.run_id = Some(run_id);
            status.started_at = Some(started_at);
            status.last_error = None;
        }
        info!("Starting training run {} with {} records", run_id, interactions.len());

        match self.run(run_id, started_at, &interactions, &options).await {
            Ok(report) => {
                let mut status = self.status.write();
                status.stage = TrainingStage::Done;
                status.last_report = Some(report.clone());
                info!(
                    "Training run {} finished: generation {}, {} users, {} products",
                    run_id, report.generation, report.num_users, report.num_products
                );
                Ok(report)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        run_id: Uuid,
        started_at: chrono::DateTime<Utc>,
        interactions: &[Interaction],
        options: &TrainingOptions,
    ) -> Result<TrainingReport> {
        let training = &self.config.training;

        self.enter(TrainingStage::Preprocessing);
        let context = self
            .preprocess(interactions)
            .map_err(|e| e.at_stage(TrainingStage::Preprocessing))?;
        let context = Arc::new(context);

        self.enter(TrainingStage::ModelBuilding);
        let model = build_model(&context, training).map_err(|e| e.at_stage(TrainingStage::ModelBuilding))?;

        self.enter(TrainingStage::MetaPersisting);
        self.store
            .save_meta(&context.to_meta())
            .await
            .map_err(|e| e.at_stage(TrainingStage::MetaPersisting))?;

        self.enter(TrainingStage::Fitting);
        let epochs = options.epochs.unwrap_or(training.epochs).max(MIN_EPOCHS);
        let fit = self
            .fit(Arc::clone(&context), model, epochs)
            .await
            .map_err(|e| e.at_stage(TrainingStage::Fitting))?;

        self.enter(TrainingStage::Saving);
        self.save(&context, &fit.model)
            .await
            .map_err(|e| e.at_stage(TrainingStage::Saving))?;

        let report = TrainingReport {
            run_id,
            generation: context.generation(),
            num_users: context.num_users(),
            num_products: context.num_products(),
            positives: fit.positives,
            negatives: fit.negatives,
            epochs,
            batch_size: fit.batch_size,
            final_metrics: fit.history.last().copied(),
            best_val_loss: fit.tracker.best_loss(),
            best_epoch: fit.tracker.best_epoch(),
            started_at,
            finished_at: Utc::now(),
        };

        self.recommendation_service
            .install(context, Some(Arc::new(fit.model) as Arc<dyn ScoringModel>));
        Ok(report)
    }

    fn preprocess(&self, interactions: &[Interaction]) -> Result<EngineContext> {
        let screened = screen_interactions(interactions);
        if let Some((position, reason)) = screened.rejected.first() {
            warn!(
                "Dropped {} invalid records (first at position {}: {})",
                screened.rejected.len(),
                position,
                reason
            );
        }
        let generation = self.recommendation_service.next_generation();
        let context = EngineContext::from_interactions(generation, &screened.valid)?;

        let stats = context.matrix().stats();
        info!(
            "Interaction matrix {}x{} (min={}, max={}, mean={:.4})",
            context.num_users(),
            context.num_products(),
            stats.min,
            stats.max,
            stats.mean
        );
        Ok(context)
    }

    async fn fit(&self, context: Arc<EngineContext>, model: NeuralMf, epochs: usize) -> Result<FitOutcome> {
        let training = self.config.training.clone();

        tokio::task::spawn_blocking(move || -> Result<FitOutcome> {
            let mut rng = initializer::make_rng(training.seed);
            let sampler = NegativeSampler::new(training.negative_ratio, training.max_negative_attempts);
            let negatives = sampler.sample(context.matrix(), &mut rng);
            let samples = build_training_set(context.matrix(), &negatives);
            let positives = samples.len() - negatives.len();
            let batch_size = batch_size_for(samples.len(), training.min_batch_size, training.max_batch_size);
            info!(
                "Fitting on {} positives and {} negatives for {} epochs (batch size {})",
                positives,
                negatives.len(),
                epochs,
                batch_size
            );

            let options = FitOptions {
                epochs,
                batch_size,
                validation_split: training.validation_split,
                seed: training.seed,
            };

            let mut model = model;
            let mut tracker = EarlyStopping::new(training.patience);
            let mut reported = false;
            let history = model.fit(&samples, &options, &mut |metrics: &EpochMetrics| {
                let loss = metrics.val_loss.unwrap_or(metrics.loss);
                if tracker.observe(metrics.epoch, loss) == PatienceSignal::Exhausted && !reported {
                    warn!(
                        "Validation loss has not improved for {} epochs (best {:?} at epoch {:?}), continuing",
                        training.patience,
                        tracker.best_loss(),
                        tracker.best_epoch()
                    );
                    reported = true;
                }
            })?;

            Ok(FitOutcome {
                model,
                history,
                tracker,
                positives,
                negatives: negatives.len(),
                batch_size,
            })
        })
        .await
        .map_err(|e| RecommenderError::Backend(format!("fit task failed: {}", e)))?
    }

    async fn save(&self, context: &EngineContext, model: &NeuralMf) -> Result<()> {
        let artifact = model.to_artifact()?;
        let receipt = self.store.save_model(&artifact).await?;
        self.store.save_meta(&context.to_meta()).await?;
        info!(
            "Persisted {} bytes of model artifacts to {}",
            receipt.bytes_written,
            self.store.location()
        );
        Ok(())
    }

    fn enter(&self, stage: TrainingStage) {
        self.status.write().stage = stage;
        info!("Training stage: {}", stage);
    }

    fn record_failure(&self, err: &RecommenderError) {
        error!("Training failed: {}", err);
        let mut status = self.status.write();
        status.stage = TrainingStage::Failed;
        status.last_error = Some(err.to_string());
    }
}

struct FitOutcome {
    model: NeuralMf,
    history: FitHistory,
    tracker: EarlyStopping,
    positives: usize,
    negatives: usize,
    batch_size: usize,
}

fn build_model(context: &EngineContext, training: &TrainingConfig) -> Result<NeuralMf> {
    let config = ModelConfig {
        num_users: context.num_users(),
        num_products: context.num_products(),
        embedding_dim: training.embedding_dim,
        hidden_units: training.hidden_units,
        dropout: training.dropout,
        l2: training.l2,
    };
    NeuralMf::new(config, optimizer::from_config(training), training.seed)
}
