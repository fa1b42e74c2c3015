use super::matrix::InteractionMatrix;
use crate::models::TrainingSample;
use rand::Rng;
use std::collections::HashSet;

/// Draws synthetic `(user, product)` pairs from unobserved matrix cells.
#[derive(Debug, Clone, Copy)]
pub struct NegativeSampler {
    ratio: f32,
    max_attempts: usize,
}

impl Default for NegativeSampler {
    fn default() -> Self {
        Self::new(0.1, 100)
    }
}

impl NegativeSampler {
    pub fn new(ratio: f32, max_attempts: usize) -> Self {
        Self {
            ratio: ratio.max(0.0),
            max_attempts,
        }
    }

    pub fn target_count(&self, positives: usize) -> usize {
        (self.ratio * positives as f32).floor() as usize
    }

    /// Returns at most `floor(ratio * positives)` distinct unobserved pairs.
    ///
    /// A draw that finds no free cell within `max_attempts` is skipped.
    pub fn sample<R: Rng>(&self, matrix: &InteractionMatrix, rng: &mut R) -> Vec<(usize, usize)> {
        let (num_users, num_products) = (matrix.num_users(), matrix.num_products());
        if num_users == 0 || num_products == 0 {
            return Vec::new();
        }

        let target = self.target_count(matrix.num_observed());
        let mut seen = HashSet::with_capacity(target);
        let mut negatives = Vec::with_capacity(target);

        for _ in 0..target {
            for _ in 0..self.max_attempts {
                let user = rng.gen_range(0..num_users);
                let product = rng.gen_range(0..num_products);
                if !matrix.is_observed(user, product) && seen.insert((user, product)) {
                    negatives.push((user, product));
                    break;
                }
            }
        }

        negatives
    }
}

/// Positives scaled into `[0, 1]` by the matrix rating range; negatives fixed at 0.
pub fn build_training_set(matrix: &InteractionMatrix, negatives: &[(usize, usize)]) -> Vec<TrainingSample> {
    let stats = matrix.stats();
    matrix
        .observed()
        .map(|(user, product, weight)| TrainingSample {
            user,
            product,
            target: stats.normalize(weight),
        })
        .chain(negatives.iter().map(|&(user, product)| TrainingSample {
            user,
            product,
            target: 0.0,
        }))
        .collect()
}

/// `clamp(samples / 10, min, max)`.
pub fn batch_size_for(samples: usize, min: usize, max: usize) -> usize {
    (samples / 10).clamp(min, max.max(min))
}
