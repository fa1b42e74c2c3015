use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub dataset: DatasetConfig,
    pub recommendation: RecommendationConfig,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `model.json`, `weights.bin` and `meta.json`.
    pub model_dir: PathBuf,
    pub load_on_startup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    File,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub kind: DatasetKind,
    pub path: PathBuf,
    pub postgres_url: String,
    pub max_connections: u32,
    /// Must return `user_id`, `product_id`, `quantity` and optionally `product_name`.
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub prediction_batch_size: usize,
    pub exclude_purchased: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub embedding_dim: usize,
    pub hidden_units: usize,
    pub dropout: f32,
    pub l2: f32,
    pub optimizer: OptimizerKind,
    pub learning_rate: f32,
    pub epochs: usize,
    pub patience: usize,
    pub validation_split: f32,
    pub negative_ratio: f32,
    pub max_negative_attempts: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: num_cpus::get(),
            },
            storage: StorageConfig {
                model_dir: PathBuf::from("model"),
                load_on_startup: true,
            },
            dataset: DatasetConfig {
                kind: DatasetKind::File,
                path: PathBuf::from("data/interactions.json"),
                postgres_url: "postgresql://localhost:5432/shop".to_string(),
                max_connections: 5,
                query: "SELECT o.customer_id::text AS user_id, \
                        oi.product_id::text AS product_id, \
                        oi.quantity::float8 AS quantity, \
                        p.name AS product_name \
                        FROM order_items oi \
                        JOIN orders o ON o.id = oi.order_id \
                        JOIN products p ON p.id = oi.product_id \
                        ORDER BY o.created_at"
                    .to_string(),
            },
            recommendation: RecommendationConfig {
                default_top_k: 10,
                max_top_k: 100,
                prediction_batch_size: 32,
                exclude_purchased: true,
            },
            training: TrainingConfig::default(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 64,
            hidden_units: 32,
            dropout: 0.2,
            l2: 0.001,
            optimizer: OptimizerKind::Adam,
            learning_rate: 0.001,
            epochs: 50,
            patience: 10,
            validation_split: 0.1,
            negative_ratio: 0.1,
            max_negative_attempts: 100,
            min_batch_size: 16,
            max_batch_size: 64,
            seed: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SHOPREC").prefix_separator("_").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Loads `path` when it exists, otherwise falls back to defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::info!("Config file {} not found, using default configuration", path);
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_training_contract() {
        let config = Config::default();
        assert_eq!(config.training.embedding_dim, 64);
        assert_eq!(config.training.hidden_units, 32);
        assert_eq!(config.training.patience, 10);
        assert_eq!(config.recommendation.prediction_batch_size, 32);
        assert!(config.server.socket_addr().is_ok());
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[training]\nembedding_dim = 8\nseed = 7\n\n[storage]\nmodel_dir = \"/tmp/shoprec\"").unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.training.embedding_dim, 8);
        assert_eq!(config.training.seed, Some(7));
        assert_eq!(config.training.hidden_units, 32);
        assert_eq!(config.storage.model_dir, PathBuf::from("/tmp/shoprec"));
    }
}
