use crate::algorithms::{ModelArtifact, Topology};
use crate::error::{RecommenderError, Result};
use crate::models::{MetaSnapshot, SaveReceipt};
use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MODEL_FILE: &str = "model.json";
pub const WEIGHTS_FILE: &str = "weights.bin";
pub const META_FILE: &str = "meta.json";

/// Durable home for the model artifact and the meta snapshot.
///
/// `load_*` returns `Ok(None)` when nothing has been saved yet.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save_model(&self, artifact: &ModelArtifact) -> Result<SaveReceipt>;

    async fn load_model(&self) -> Result<Option<ModelArtifact>>;

    async fn save_meta(&self, meta: &MetaSnapshot) -> Result<SaveReceipt>;

    async fn load_meta(&self) -> Result<Option<MetaSnapshot>>;

    fn location(&self) -> String;
}

/// Directory layout: `model.json`, `weights.bin`, `meta.json`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(name);
        tokio::fs::write(&path, bytes).await?;
        debug!("wrote {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }

    async fn read_optional(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save_model(&self, artifact: &ModelArtifact) -> Result<SaveReceipt> {
        let topology = serde_json::to_vec_pretty(&artifact.topology)?;
        let model_path = self.write(MODEL_FILE, &topology).await?;
        let weights_path = self.write(WEIGHTS_FILE, &artifact.weights).await?;

        info!("Saved model artifact to {}", self.dir.display());
        Ok(SaveReceipt {
            files: vec![model_path, weights_path],
            bytes_written: (topology.len() + artifact.weights.len()) as u64,
            saved_at: Utc::now(),
        })
    }

    async fn load_model(&self) -> Result<Option<ModelArtifact>> {
        let Some(topology) = self.read_optional(MODEL_FILE).await? else {
            return Ok(None);
        };
        let topology: Topology = serde_json::from_slice(&topology)?;

        let weights = self.read_optional(WEIGHTS_FILE).await?.ok_or_else(|| {
            RecommenderError::InvalidArtifact(format!(
                "{} present without {} in {}",
                MODEL_FILE,
                WEIGHTS_FILE,
                self.dir.display()
            ))
        })?;

        Ok(Some(ModelArtifact { topology, weights }))
    }

    async fn save_meta(&self, meta: &MetaSnapshot) -> Result<SaveReceipt> {
        let json = serde_json::to_string_pretty(meta)?;
        let path = self.write(META_FILE, json.as_bytes()).await?;

        Ok(SaveReceipt {
            files: vec![path],
            bytes_written: json.len() as u64,
            saved_at: Utc::now(),
        })
    }

    async fn load_meta(&self) -> Result<Option<MetaSnapshot>> {
        match self.read_optional(META_FILE).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::optimizer::Adam;
    use crate::algorithms::{ModelConfig, NeuralMf, ScoringModel};
    use std::collections::BTreeMap;

    fn meta() -> MetaSnapshot {
        MetaSnapshot {
            users: vec!["a".into(), "b".into()],
            products: vec!["X".into()],
            interaction_matrix: vec![vec![3.0], vec![2.0]],
            product_names: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_missing_artifacts_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("absent"));

        assert!(store.load_model().await.unwrap().is_none());
        assert!(store.load_meta().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_meta_written_with_two_space_indent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("nested/model"));

        let receipt = store.save_meta(&meta()).await.unwrap();
        assert_eq!(receipt.files.len(), 1);

        let raw = std::fs::read_to_string(dir.path().join("nested/model").join(META_FILE)).unwrap();
        assert!(raw.contains("\n  \"usuarios\""));
        assert_eq!(store.load_meta().await.unwrap(), Some(meta()));
    }

    #[tokio::test]
    async fn test_model_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        let mut config = ModelConfig::new(3, 4);
        config.embedding_dim = 4;
        config.hidden_units = 2;
        let model = NeuralMf::new(config, Box::new(Adam::default()), Some(9)).unwrap();
        let artifact = model.to_artifact().unwrap();

        let receipt = store.save_model(&artifact).await.unwrap();
        assert_eq!(receipt.files.len(), 2);
        assert!(receipt.bytes_written >= artifact.weights.len() as u64);

        let loaded = store.load_model().await.unwrap().unwrap();
        assert_eq!(loaded, artifact);
    }

    #[tokio::test]
    async fn test_topology_without_weights_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        let model = NeuralMf::new(ModelConfig::new(1, 1), Box::new(Adam::default()), Some(1)).unwrap();
        store.save_model(&model.to_artifact().unwrap()).await.unwrap();
        std::fs::remove_file(dir.path().join(WEIGHTS_FILE)).unwrap();

        let err = store.load_model().await.unwrap_err();
        assert!(matches!(err, RecommenderError::InvalidArtifact(_)));
    }
}
