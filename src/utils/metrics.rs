use serde::{Deserialize, Serialize};

pub fn mean_squared_error(predictions: &[f32], targets: &[f32]) -> f32 {
    if predictions.is_empty() || predictions.len() != targets.len() {
        return 0.0;
    }
    let sum: f32 = predictions
        .iter()
        .zip(targets)
        .map(|(p, t)| (p - t).powi(2))
        .sum();
    sum / predictions.len() as f32
}

pub fn mean_absolute_error(predictions: &[f32], targets: &[f32]) -> f32 {
    if predictions.is_empty() || predictions.len() != targets.len() {
        return 0.0;
    }
    let sum: f32 = predictions.iter().zip(targets).map(|(p, t)| (p - t).abs()).sum();
    sum / predictions.len() as f32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatienceSignal {
    Improved,
    Waiting,
    Exhausted,
}

/// Tracks the best validation loss and how long it has not improved.
///
/// Bookkeeping only: callers decide what to do with `Exhausted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    patience: usize,
    best_loss: Option<f32>,
    best_epoch: Option<usize>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_loss: None,
            best_epoch: None,
            wait: 0,
        }
    }

    pub fn observe(&mut self, epoch: usize, loss: f32) -> PatienceSignal {
        if !loss.is_finite() {
            self.wait += 1;
        } else if self.best_loss.map_or(true, |best| loss < best) {
            self.best_loss = Some(loss);
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return PatienceSignal::Improved;
        } else {
            self.wait += 1;
        }

        if self.wait >= self.patience {
            PatienceSignal::Exhausted
        } else {
            PatienceSignal::Waiting
        }
    }

    pub fn best_loss(&self) -> Option<f32> {
        self.best_loss
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metrics() {
        let predictions = [0.5, 1.0, 0.0];
        let targets = [1.0, 1.0, 0.5];
        assert!((mean_squared_error(&predictions, &targets) - 0.5 / 3.0).abs() < 1e-6);
        assert!((mean_absolute_error(&predictions, &targets) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(mean_squared_error(&[], &[]), 0.0);
    }

    #[test]
    fn test_patience_tracking() {
        let mut tracker = EarlyStopping::new(2);

        assert_eq!(tracker.observe(1, 0.5), PatienceSignal::Improved);
        assert_eq!(tracker.observe(2, 0.6), PatienceSignal::Waiting);
        assert_eq!(tracker.observe(3, 0.7), PatienceSignal::Exhausted);
        assert_eq!(tracker.observe(4, 0.4), PatienceSignal::Improved);

        assert_eq!(tracker.best_epoch(), Some(4));
        assert_eq!(tracker.best_loss(), Some(0.4));
        // Patience restarts after an improvement.
        assert_eq!(tracker.observe(5, 0.5), PatienceSignal::Waiting);
    }

    #[test]
    fn test_non_finite_loss_counts_as_no_improvement() {
        let mut tracker = EarlyStopping::new(1);
        assert_eq!(tracker.observe(1, f32::NAN), PatienceSignal::Exhausted);
        assert_eq!(tracker.best_loss(), None);
    }
}
