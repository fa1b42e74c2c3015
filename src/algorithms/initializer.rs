use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn glorot_uniform<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    let fan_sum = (rows + cols).max(1) as f32;
    let limit = (6.0 / fan_sum).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
}

pub fn uniform<R: Rng>(rows: usize, cols: usize, low: f32, high: f32, rng: &mut R) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(low..high))
}

pub fn zeros(size: usize) -> Array1<f32> {
    Array1::zeros(size)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitializationMethod {
    GlorotUniform,
    Uniform { low: f32, high: f32 },
    Zeros,
}

impl InitializationMethod {
    /// Keras-style default for embedding tables.
    pub const EMBEDDING: InitializationMethod = InitializationMethod::Uniform {
        low: -0.05,
        high: 0.05,
    };

    pub fn initialize_matrix<R: Rng>(&self, rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
        match *self {
            InitializationMethod::GlorotUniform => glorot_uniform(rows, cols, rng),
            InitializationMethod::Uniform { low, high } => uniform(rows, cols, low, high, rng),
            InitializationMethod::Zeros => Array2::zeros((rows, cols)),
        }
    }

    pub fn initialize_vector<R: Rng>(&self, size: usize, rng: &mut R) -> Array1<f32> {
        match *self {
            InitializationMethod::Zeros => zeros(size),
            _ => self
                .initialize_matrix(1, size, rng)
                .into_shape(size)
                .unwrap_or_else(|_| zeros(size)),
        }
    }
}

/// Seeded when a seed is configured, entropy-backed otherwise.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glorot_limits() {
        let mut rng = make_rng(Some(1));
        let weights = glorot_uniform(64, 32, &mut rng);
        let limit = (6.0 / 96.0_f32).sqrt();

        assert_eq!(weights.dim(), (64, 32));
        assert!(weights.iter().all(|&w| w >= -limit && w <= limit));
    }

    #[test]
    fn test_embedding_range() {
        let mut rng = make_rng(Some(2));
        let table = InitializationMethod::EMBEDDING.initialize_matrix(10, 8, &mut rng);
        assert!(table.iter().all(|&w| (-0.05..0.05).contains(&w)));
    }

    #[test]
    fn test_seeded_reproducibility() {
        let a = InitializationMethod::GlorotUniform.initialize_matrix(4, 4, &mut make_rng(Some(9)));
        let b = InitializationMethod::GlorotUniform.initialize_matrix(4, 4, &mut make_rng(Some(9)));
        assert_eq!(a, b);
    }

    #[test]
    fn test_vector_initialization() {
        let mut rng = make_rng(Some(3));
        assert_eq!(InitializationMethod::Zeros.initialize_vector(5, &mut rng), zeros(5));
        assert_eq!(InitializationMethod::EMBEDDING.initialize_vector(5, &mut rng).len(), 5);
    }
}
