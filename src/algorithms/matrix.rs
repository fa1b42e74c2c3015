use super::codec::IdentifierCodec;
use crate::error::{RecommenderError, Result};
use crate::models::Interaction;
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl RatingStats {
    pub fn range(&self) -> f32 {
        self.max - self.min
    }

    /// Maps a raw weight into `[0, 1]`; a degenerate range maps to 0.
    pub fn normalize(&self, weight: f32) -> f32 {
        let range = self.range();
        if range <= 0.0 {
            0.0
        } else {
            (weight - self.min) / range
        }
    }

    pub fn denormalize(&self, score: f32) -> f32 {
        score * self.range() + self.min
    }
}

/// Dense `users × products` weight matrix; 0 means no observed interaction.
#[derive(Debug, Clone)]
pub struct InteractionMatrix {
    cells: Array2<f32>,
    stats: RatingStats,
    user_bias: Vec<f32>,
    item_bias: Vec<f32>,
}

impl InteractionMatrix {
    pub fn empty() -> Self {
        Self {
            cells: Array2::zeros((0, 0)),
            stats: RatingStats::default(),
            user_bias: Vec::new(),
            item_bias: Vec::new(),
        }
    }

    /// Builds the matrix for `interactions` using indices from `codec`.
    ///
    /// Later records for the same pair overwrite earlier ones.
    pub fn build(interactions: &[Interaction], codec: &IdentifierCodec) -> Result<Self> {
        if interactions.is_empty() {
            return Err(RecommenderError::EmptyDataset);
        }

        let mut cells = Array2::<f32>::zeros((codec.num_users(), codec.num_products()));
        for interaction in interactions {
            let (Some(u), Some(p)) = (
                codec.encode_user(&interaction.user),
                codec.encode_product(&interaction.product),
            ) else {
                return Err(RecommenderError::Validation(format!(
                    "interaction ({}, {}) is not covered by the codec",
                    interaction.user, interaction.product
                )));
            };
            cells[[u, p]] = interaction.weight();
        }

        Ok(Self::from_cells(cells))
    }

    /// Restores a matrix from persisted rows, checking them against the codec size.
    pub fn from_rows(rows: &[Vec<f32>], num_users: usize, num_products: usize) -> Result<Self> {
        if rows.len() != num_users {
            return Err(RecommenderError::InvalidArtifact(format!(
                "matrix has {} rows, expected {}",
                rows.len(),
                num_users
            )));
        }

        let mut cells = Array2::<f32>::zeros((num_users, num_products));
        for (u, row) in rows.iter().enumerate() {
            if row.len() != num_products {
                return Err(RecommenderError::InvalidArtifact(format!(
                    "matrix row {} has {} columns, expected {}",
                    u,
                    row.len(),
                    num_products
                )));
            }
            for (p, &weight) in row.iter().enumerate() {
                if !weight.is_finite() {
                    return Err(RecommenderError::InvalidArtifact(format!(
                        "non-finite weight at ({}, {})",
                        u, p
                    )));
                }
                cells[[u, p]] = weight;
            }
        }

        Ok(Self::from_cells(cells))
    }

    fn from_cells(cells: Array2<f32>) -> Self {
        let stats = compute_stats(&cells);

        let user_bias = (0..cells.nrows())
            .into_par_iter()
            .map(|u| nonzero_mean(cells.row(u)).map_or(0.0, |avg| avg - stats.mean))
            .collect();
        let item_bias = (0..cells.ncols())
            .into_par_iter()
            .map(|p| nonzero_mean(cells.column(p)).map_or(0.0, |avg| avg - stats.mean))
            .collect();

        Self {
            cells,
            stats,
            user_bias,
            item_bias,
        }
    }

    pub fn num_users(&self) -> usize {
        self.cells.nrows()
    }

    pub fn num_products(&self) -> usize {
        self.cells.ncols()
    }

    pub fn stats(&self) -> RatingStats {
        self.stats
    }

    pub fn get(&self, user: usize, product: usize) -> f32 {
        self.cells.get((user, product)).copied().unwrap_or(0.0)
    }

    pub fn is_observed(&self, user: usize, product: usize) -> bool {
        self.get(user, product) > 0.0
    }

    pub fn user_bias(&self, user: usize) -> Option<f32> {
        self.user_bias.get(user).copied()
    }

    pub fn item_bias(&self, product: usize) -> Option<f32> {
        self.item_bias.get(product).copied()
    }

    /// Products the user has a positive weight for, in index order.
    pub fn purchased_by(&self, user: usize) -> Vec<usize> {
        if user >= self.num_users() {
            return Vec::new();
        }
        self.cells
            .row(user)
            .iter()
            .enumerate()
            .filter(|(_, &w)| w > 0.0)
            .map(|(p, _)| p)
            .collect()
    }

    /// All observed `(user, product, weight)` cells in row-major order.
    pub fn observed(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.cells
            .indexed_iter()
            .filter(|(_, &w)| w > 0.0)
            .map(|((u, p), &w)| (u, p, w))
    }

    pub fn num_observed(&self) -> usize {
        self.cells.iter().filter(|&&w| w > 0.0).count()
    }

    /// Summed weight per product.
    pub fn item_totals(&self) -> Vec<f32> {
        self.cells
            .columns()
            .into_iter()
            .map(|col| col.iter().filter(|&&w| w > 0.0).sum())
            .collect()
    }

    /// Mean weight per product over the users who interacted with it.
    pub fn item_averages(&self) -> Vec<f32> {
        self.cells
            .columns()
            .into_iter()
            .map(|col| nonzero_mean(col).unwrap_or(0.0))
            .collect()
    }

    /// Number of distinct users per product.
    pub fn unique_buyers(&self) -> Vec<usize> {
        self.cells
            .columns()
            .into_iter()
            .map(|col| col.iter().filter(|&&w| w > 0.0).count())
            .collect()
    }

    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        self.cells.rows().into_iter().map(|row| row.to_vec()).collect()
    }
}

fn nonzero_mean(values: ArrayView1<'_, f32>) -> Option<f32> {
    let (sum, count) = values
        .iter()
        .filter(|&&w| w > 0.0)
        .fold((0.0f32, 0usize), |(s, c), &w| (s + w, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f32)
    }
}

fn compute_stats(cells: &Array2<f32>) -> RatingStats {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0f64;
    let mut count = 0usize;

    for &w in cells.iter().filter(|&&w| w > 0.0) {
        min = min.min(w);
        max = max.max(w);
        sum += w as f64;
        count += 1;
    }

    if count == 0 {
        return RatingStats::default();
    }

    RatingStats {
        min,
        max,
        mean: (sum / count as f64) as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> (Vec<Interaction>, IdentifierCodec) {
        let interactions = vec![
            Interaction::new("a", "X").with_quantity(3.0),
            Interaction::new("a", "Y").with_quantity(1.0),
            Interaction::new("b", "X").with_quantity(2.0),
        ];
        let codec = IdentifierCodec::from_interactions(&interactions);
        (interactions, codec)
    }

    #[test]
    fn test_scenario_stats_and_bias() {
        let (interactions, codec) = scenario();
        let matrix = InteractionMatrix::build(&interactions, &codec).unwrap();

        assert_eq!(matrix.num_users(), 2);
        assert_eq!(matrix.num_products(), 2);

        let stats = matrix.stats();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 3.0);
        assert!((stats.mean - 2.0).abs() < 1e-6);

        let a = codec.encode_user("a").unwrap();
        let x = codec.encode_product("X").unwrap();
        assert!(matrix.user_bias(a).unwrap().abs() < 1e-6);
        assert!((matrix.item_bias(x).unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_last_write_wins() {
        let interactions = vec![
            Interaction::new("a", "X").with_quantity(5.0),
            Interaction::new("a", "X").with_quantity(2.0),
        ];
        let codec = IdentifierCodec::from_interactions(&interactions);
        let matrix = InteractionMatrix::build(&interactions, &codec).unwrap();

        assert_eq!(matrix.get(0, 0), 2.0);
        assert_eq!(matrix.stats().max, 2.0);
    }

    #[test]
    fn test_empty_interactions_rejected() {
        let codec = IdentifierCodec::new();
        let result = InteractionMatrix::build(&[], &codec);
        assert!(matches!(result, Err(RecommenderError::EmptyDataset)));
    }

    #[test]
    fn test_degenerate_range_normalizes_to_zero() {
        let interactions = vec![
            Interaction::new("a", "X").with_quantity(2.0),
            Interaction::new("b", "Y").with_quantity(2.0),
        ];
        let codec = IdentifierCodec::from_interactions(&interactions);
        let matrix = InteractionMatrix::build(&interactions, &codec).unwrap();
        let stats = matrix.stats();

        for (_, _, w) in matrix.observed() {
            let n = stats.normalize(w);
            assert!(n.is_finite());
            assert_eq!(n, 0.0);
        }
    }

    #[test]
    fn test_column_aggregates() {
        let (interactions, codec) = scenario();
        let matrix = InteractionMatrix::build(&interactions, &codec).unwrap();

        assert_eq!(matrix.item_totals(), vec![5.0, 1.0]);
        assert_eq!(matrix.item_averages(), vec![2.5, 1.0]);
        assert_eq!(matrix.unique_buyers(), vec![2, 1]);
        assert_eq!(matrix.purchased_by(0), vec![0, 1]);
        assert_eq!(matrix.num_observed(), 3);
    }

    #[test]
    fn test_rows_round_trip() {
        let (interactions, codec) = scenario();
        let matrix = InteractionMatrix::build(&interactions, &codec).unwrap();

        let restored = InteractionMatrix::from_rows(&matrix.to_rows(), 2, 2).unwrap();
        assert_eq!(restored.to_rows(), matrix.to_rows());
        assert_eq!(restored.stats(), matrix.stats());

        assert!(InteractionMatrix::from_rows(&matrix.to_rows(), 3, 2).is_err());
    }
}
