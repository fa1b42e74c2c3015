use crate::algorithms::{ColdStartResolver, EcosystemReranker, InferenceEngine, NeuralMf, ScoringModel};
use crate::config::Config;
use crate::error::{RecommenderError, Result};
use crate::models::*;
use crate::services::context::EngineContext;
use crate::services::storage::ArtifactStore;
use crate::utils::validation::validate_recommendation_request;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
struct EngineState {
    context: Arc<EngineContext>,
    model: Option<Arc<dyn ScoringModel>>,
}

/// Serves recommendations from the currently installed generation.
///
/// Readers clone the state `Arc`s once per call; installing a new generation
/// swaps the whole state at once.
pub struct RecommendationService {
    config: Arc<Config>,
    engine: Arc<InferenceEngine>,
    state: RwLock<EngineState>,
    generation: AtomicU64,
}

impl RecommendationService {
    pub fn new(config: Arc<Config>) -> Self {
        let engine = InferenceEngine::new(
            ColdStartResolver::default(),
            EcosystemReranker::default(),
            config.recommendation.prediction_batch_size,
        );

        Self {
            config,
            engine: Arc::new(engine),
            state: RwLock::new(EngineState {
                context: Arc::new(EngineContext::empty(0)),
                model: None,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Reserves the next generation number. Monotonic per service.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn install(&self, context: Arc<EngineContext>, model: Option<Arc<dyn ScoringModel>>) {
        if let Some(model) = &model {
            if model.num_users() != context.num_users() || model.num_products() != context.num_products() {
                warn!(
                    "Model capacity {}x{} differs from codec {}x{}",
                    model.num_users(),
                    model.num_products(),
                    context.num_users(),
                    context.num_products()
                );
            }
        }

        info!(
            "Installing generation {} ({} users, {} products, model {})",
            context.generation(),
            context.num_users(),
            context.num_products(),
            if model.is_some() { "ready" } else { "absent" }
        );
        *self.state.write() = EngineState { context, model };
    }

    pub fn context(&self) -> Arc<EngineContext> {
        Arc::clone(&self.state.read().context)
    }

    pub fn is_ready(&self) -> bool {
        self.state.read().model.is_some()
    }

    pub async fn get_recommendations(&self, request: &RecommendationRequest) -> Result<RecommendationResponse> {
        validate_recommendation_request(request, self.config.recommendation.max_top_k)?;

        let EngineState { context, model } = self.state.read().clone();
        let engine = Arc::clone(&self.engine);
        let user = request.user.clone();
        let (top_k, exclude_purchased) = (request.top_k, request.exclude_purchased);

        let generation = context.generation();
        let ranking = tokio::task::spawn_blocking(move || {
            engine.recommend(context.view(), model.as_deref(), &user, top_k, exclude_purchased)
        })
        .await
        .map_err(|e| RecommenderError::Backend(format!("inference task failed: {}", e)))??;

        Ok(RecommendationResponse {
            user: request.user.clone(),
            recommendations: ranking.recommendations,
            cold_start: ranking.cold_start,
            generation,
            generated_at: Utc::now(),
        })
    }

    /// Restores the last saved generation: model first, then meta.
    ///
    /// A missing meta file leaves empty codecs (cold start returns nothing);
    /// a missing model leaves known users unservable until training runs.
    pub async fn load_from_store(&self, store: &dyn ArtifactStore) -> Result<LoadOutcome> {
        let model: Option<Arc<dyn ScoringModel>> = match store.load_model().await? {
            Some(artifact) => {
                let model = NeuralMf::from_artifact(&artifact)?;
                info!(
                    "Loaded model {}x{} from {}",
                    model.num_users(),
                    model.num_products(),
                    store.location()
                );
                Some(Arc::new(model) as Arc<dyn ScoringModel>)
            }
            None => {
                warn!("No model artifact in {}", store.location());
                None
            }
        };

        let generation = self.next_generation();
        let (context, meta_loaded) = match store.load_meta().await? {
            Some(meta) => (EngineContext::from_meta(generation, meta)?, true),
            None => {
                warn!("No meta snapshot in {}, starting with empty codecs", store.location());
                (EngineContext::empty(generation), false)
            }
        };

        let outcome = LoadOutcome {
            model_loaded: model.is_some(),
            meta_loaded,
            generation,
            num_users: context.num_users(),
            num_products: context.num_products(),
        };
        self.install(Arc::new(context), model);
        Ok(outcome)
    }

    pub fn model_info(&self) -> ModelInfo {
        let state = self.state.read();
        ModelInfo {
            ready: state.model.is_some(),
            generation: state.context.generation(),
            num_users: state.context.num_users(),
            num_products: state.context.num_products(),
            model_users: state.model.as_ref().map(|m| m.num_users()),
            model_products: state.model.as_ref().map(|m| m.num_products()),
        }
    }
}
