pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{RecommenderError, Result};
pub use models::*;

use services::recommendation::RecommendationService;
use services::serving::ServingService;
use services::storage::{ArtifactStore, FsArtifactStore};
use services::training::TrainingService;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ArtifactStore>,
    pub recommendation_service: Arc<RecommendationService>,
    pub training_service: Arc<TrainingService>,
    pub serving_service: Arc<ServingService>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(&config.storage.model_dir));
        Self::with_store(config, store).await
    }

    pub async fn with_store(config: Config, store: Arc<dyn ArtifactStore>) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let recommendation_service = Arc::new(RecommendationService::new(config.clone()));

        if config.storage.load_on_startup {
            let outcome = recommendation_service.load_from_store(store.as_ref()).await?;
            info!(
                "Startup load from {}: model={}, meta={}, {} users, {} products",
                store.location(),
                outcome.model_loaded,
                outcome.meta_loaded,
                outcome.num_users,
                outcome.num_products
            );
        }

        let training_service = Arc::new(TrainingService::new(
            config.clone(),
            store.clone(),
            recommendation_service.clone(),
        ));

        let serving_service = Arc::new(ServingService::new(recommendation_service.clone()));

        Ok(Self {
            config,
            store,
            recommendation_service,
            training_service,
            serving_service,
        })
    }
}

/// Installs the global subscriber; `RUST_LOG` controls the filter (default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
