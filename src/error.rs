use crate::models::TrainingStage;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecommenderError>;

#[derive(Debug, Error)]
pub enum RecommenderError {
    #[error("model is not trained or loaded")]
    ModelNotReady,

    #[error("no positive interactions available for training")]
    EmptyDataset,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("training failed during {stage}: {source}")]
    Training {
        stage: TrainingStage,
        #[source]
        source: Box<RecommenderError>,
    },

    #[error("model backend error: {0}")]
    Backend(String),

    #[error("invalid model artifact: {0}")]
    InvalidArtifact(String),

    #[error("artifact storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("dataset source error: {0}")]
    Dataset(String),
}

impl RecommenderError {
    pub fn at_stage(self, stage: TrainingStage) -> Self {
        match self {
            // Already attributed to a stage; keep the innermost one.
            err @ RecommenderError::Training { .. } => err,
            other => RecommenderError::Training {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage a training failure was attributed to, if any.
    pub fn stage(&self) -> Option<TrainingStage> {
        match self {
            RecommenderError::Training { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
