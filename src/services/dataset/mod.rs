use crate::config::{DatasetConfig, DatasetKind};
use crate::error::{RecommenderError, Result};
use crate::models::Interaction;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::path::PathBuf;
use tracing::info;

/// Supplies an immutable snapshot of interaction records per call.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Interaction>>;

    fn describe(&self) -> String;
}

pub fn from_config(config: &DatasetConfig) -> Result<Box<dyn DatasetSource>> {
    match config.kind {
        DatasetKind::File => Ok(Box::new(JsonFileDataset::new(&config.path))),
        DatasetKind::Postgres => Ok(Box::new(PostgresDataset::connect_lazy(config)?)),
    }
}

/// JSON array of interaction records on disk.
#[derive(Debug, Clone)]
pub struct JsonFileDataset {
    path: PathBuf,
}

impl JsonFileDataset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DatasetSource for JsonFileDataset {
    async fn fetch(&self) -> Result<Vec<Interaction>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            RecommenderError::Dataset(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let interactions: Vec<Interaction> = serde_json::from_slice(&bytes)?;
        info!("Loaded {} interactions from {}", interactions.len(), self.path.display());
        Ok(interactions)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticDataset {
    interactions: Vec<Interaction>,
}

impl StaticDataset {
    pub fn new(interactions: Vec<Interaction>) -> Self {
        Self { interactions }
    }
}

#[async_trait]
impl DatasetSource for StaticDataset {
    async fn fetch(&self) -> Result<Vec<Interaction>> {
        Ok(self.interactions.clone())
    }

    fn describe(&self) -> String {
        format!("static:{} records", self.interactions.len())
    }
}

const USER_COLUMN: &str = "user_id";
const PRODUCT_COLUMN: &str = "product_id";
const QUANTITY_COLUMN: &str = "quantity";
const NAME_COLUMN: &str = "product_name";

/// Order history read from the shop database.
pub struct PostgresDataset {
    pool: PgPool,
    query: String,
}

impl PostgresDataset {
    /// Builds the pool without opening a connection; the first `fetch` connects.
    pub fn connect_lazy(config: &DatasetConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy(&config.postgres_url)
            .map_err(|e| RecommenderError::Dataset(format!("invalid postgres url: {}", e)))?;

        Ok(Self {
            pool,
            query: config.query.clone(),
        })
    }
}

#[async_trait]
impl DatasetSource for PostgresDataset {
    async fn fetch(&self) -> Result<Vec<Interaction>> {
        let rows = sqlx::query(&self.query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RecommenderError::Dataset(e.to_string()))?;

        let interactions = rows
            .iter()
            .enumerate()
            .map(|(position, row)| {
                interaction_from_row(row)
                    .map_err(|e| RecommenderError::Dataset(format!("row {}: {}", position, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        info!("Loaded {} interactions from postgres", interactions.len());
        Ok(interactions)
    }

    fn describe(&self) -> String {
        "postgres".to_string()
    }
}

fn interaction_from_row(row: &PgRow) -> std::result::Result<Interaction, String> {
    let user = required(USER_COLUMN, row.try_get::<String, _>(USER_COLUMN))?;
    let product = required(PRODUCT_COLUMN, row.try_get::<String, _>(PRODUCT_COLUMN))?;
    let quantity = required(QUANTITY_COLUMN, quantity_from_row(row))?;
    let product_name = optional(NAME_COLUMN, row.try_get::<Option<String>, _>(NAME_COLUMN))?;

    Ok(Interaction {
        user,
        product,
        quantity: quantity.map(|q| q as f32),
        rating: None,
        product_name,
    })
}

/// Decodes `quantity` from any float or integer column.
fn quantity_from_row(row: &PgRow) -> sqlx::Result<Option<f64>> {
    row.try_get::<Option<f64>, _>(QUANTITY_COLUMN)
        .or_else(|e| on_type_mismatch(e, || row.try_get::<Option<f32>, _>(QUANTITY_COLUMN).map(|q| q.map(f64::from))))
        .or_else(|e| on_type_mismatch(e, || row.try_get::<Option<i64>, _>(QUANTITY_COLUMN).map(|q| q.map(|v| v as f64))))
        .or_else(|e| on_type_mismatch(e, || row.try_get::<Option<i32>, _>(QUANTITY_COLUMN).map(|q| q.map(f64::from))))
        .or_else(|e| on_type_mismatch(e, || row.try_get::<Option<i16>, _>(QUANTITY_COLUMN).map(|q| q.map(f64::from))))
}

/// Retries with `next` only when the column exists but has another type.
fn on_type_mismatch<T>(err: sqlx::Error, next: impl FnOnce() -> sqlx::Result<T>) -> sqlx::Result<T> {
    match err {
        sqlx::Error::ColumnDecode { .. } => next(),
        other => Err(other),
    }
}

fn required<T>(column: &str, value: sqlx::Result<T>) -> std::result::Result<T, String> {
    value.map_err(|e| match e {
        sqlx::Error::ColumnNotFound(_) => format!("query must return a `{}` column", column),
        sqlx::Error::ColumnDecode { .. } if column == QUANTITY_COLUMN => {
            format!("`{}` must be float8, float4, int8, int4 or int2: {}", column, e)
        }
        other => format!("cannot decode `{}`: {}", column, other),
    })
}

/// An absent column reads as `None`; a present one must decode.
fn optional<T>(column: &str, value: sqlx::Result<Option<T>>) -> std::result::Result<Option<T>, String> {
    match value {
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        other => required(column, other),
    }
}
