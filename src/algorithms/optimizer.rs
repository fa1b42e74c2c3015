use crate::config::{OptimizerKind, TrainingConfig};
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, IxDyn, Zip};
use std::collections::HashMap;

/// Applies gradients to named parameter tensors.
///
/// `begin_step` is called once per batch before the per-tensor updates.
pub trait Optimizer: Send + Sync {
    fn begin_step(&mut self);
    fn update(&mut self, key: &str, params: ArrayViewMutD<'_, f32>, gradients: ArrayViewD<'_, f32>);
}

pub fn from_config(config: &TrainingConfig) -> Box<dyn Optimizer> {
    match config.optimizer {
        OptimizerKind::Adam => Box::new(Adam::new(config.learning_rate, 0.9, 0.999, 1e-7)),
        OptimizerKind::Sgd => Box::new(Sgd::new(config.learning_rate)),
    }
}

#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f32,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn begin_step(&mut self) {}

    fn update(&mut self, _key: &str, params: ArrayViewMutD<'_, f32>, gradients: ArrayViewD<'_, f32>) {
        let lr = self.learning_rate;
        Zip::from(params)
            .and(gradients)
            .for_each(|p, &g| *p -= lr * g);
    }
}

#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: i32,
    m: HashMap<String, ArrayD<f32>>,
    v: HashMap<String, ArrayD<f32>>,
}

impl Adam {
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.001, 0.9, 0.999, 1e-7)
    }
}

impl Optimizer for Adam {
    fn begin_step(&mut self) {
        self.t += 1;
    }

    fn update(&mut self, key: &str, params: ArrayViewMutD<'_, f32>, gradients: ArrayViewD<'_, f32>) {
        let shape = IxDyn(params.shape());
        let m = self
            .m
            .entry(key.to_string())
            .or_insert_with(|| ArrayD::zeros(shape.clone()));
        let v = self
            .v
            .entry(key.to_string())
            .or_insert_with(|| ArrayD::zeros(shape));

        let (beta1, beta2, eps, lr) = (self.beta1, self.beta2, self.epsilon, self.learning_rate);
        let t = self.t.max(1);
        let m_correction = 1.0 - beta1.powi(t);
        let v_correction = 1.0 - beta2.powi(t);

        Zip::from(params)
            .and(gradients)
            .and(m.view_mut())
            .and(v.view_mut())
            .for_each(|p, &g, m, v| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / m_correction;
                let v_hat = *v / v_correction;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn test_sgd_step() {
        let mut sgd = Sgd::new(0.1);
        let mut params = array![1.0f32, 2.0, 3.0];
        let grads = array![1.0f32, 0.0, -1.0];

        sgd.begin_step();
        sgd.update("w", params.view_mut().into_dyn(), grads.view().into_dyn());

        let expected = [0.9f32, 2.0, 3.1];
        for (p, e) in params.iter().zip(expected.iter()) {
            assert!((p - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_adam_moves_against_gradient() {
        let mut adam = Adam::default();
        let mut params = Array1::from(vec![1.0f32, -1.0]);
        let grads = Array1::from(vec![0.5f32, -0.5]);

        adam.begin_step();
        adam.update("w", params.view_mut().into_dyn(), grads.view().into_dyn());

        // First Adam step moves each parameter by roughly the learning rate.
        assert!((params[0] - 0.999).abs() < 1e-4);
        assert!((params[1] + 0.999).abs() < 1e-4);

        // Bias correction keeps a constant gradient moving at the same rate.
        adam.begin_step();
        adam.update("w", params.view_mut().into_dyn(), grads.view().into_dyn());
        assert!((params[0] - 0.998).abs() < 1e-4);
    }
}
