//! Linear fare regressor
//!
//! Features are standardized with training-set statistics, weights are fitted
//! by mini-batch gradient descent on squared error, and training stops after
//! `patience` epochs without a lower validation MAE. The weights of the best
//! epoch are kept.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::num::Wrapping;
use tracing::{debug, info};

/// Training configuration
#[derive(Clone, Debug)]
pub struct TrainConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub patience: usize,
    pub max_epochs: usize,
    /// Seed of the per-epoch batch shuffle
    pub seed: i64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.0005,
            batch_size: 256,
            patience: 2,
            max_epochs: 500,
            seed: 42,
        }
    }
}

/// Per-epoch validation MAE of a fit
#[derive(Clone, Debug, Default)]
pub struct History {
    pub val_mae: Vec<f64>,
    /// Epoch whose weights were kept; `None` if no epoch beat the initial model
    pub best_epoch: Option<usize>,
    /// Validation MAE of the kept weights
    pub best_val_mae: f64,
}

/// Linear model over standardized features
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LinearModel {
    /// Untrained model for `feature_count` inputs
    pub fn initialize(features: &[Vec<f64>], feature_count: usize) -> Self {
        let (means, scales) = standardization(features, feature_count);
        Self {
            means,
            scales,
            weights: vec![0.0; feature_count],
            bias: 0.0,
        }
    }

    pub fn feature_count(&self) -> usize {
        self.weights.len()
    }

    fn standardize(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(x, (mean, scale))| (x - mean) / scale)
            .collect()
    }

    fn predict_standardized(&self, z: &[f64]) -> f64 {
        self.bias + z.iter().zip(&self.weights).map(|(x, w)| x * w).sum::<f64>()
    }

    pub fn predict_one(&self, row: &[f64]) -> f64 {
        self.predict_standardized(&self.standardize(row))
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_one(row)).collect()
    }

    /// Mean absolute error on `rows`
    pub fn evaluate(&self, rows: &[Vec<f64>], targets: &[f64]) -> Result<f64> {
        if rows.is_empty() || rows.len() != targets.len() {
            bail!(
                "cannot evaluate on {} rows with {} targets",
                rows.len(),
                targets.len()
            );
        }
        let total: f64 = rows
            .iter()
            .zip(targets)
            .map(|(row, y)| (self.predict_one(row) - y).abs())
            .sum();
        Ok(total / rows.len() as f64)
    }

    /// Fit on the training rows, early-stopping on the validation rows
    pub fn fit(
        train_x: &[Vec<f64>],
        train_y: &[f64],
        val_x: &[Vec<f64>],
        val_y: &[f64],
        config: &TrainConfig,
    ) -> Result<(Self, History)> {
        if train_x.is_empty() || val_x.is_empty() {
            bail!(
                "need training and validation rows, got {} and {}",
                train_x.len(),
                val_x.len()
            );
        }
        if config.batch_size == 0 || config.learning_rate <= 0.0 {
            bail!("batch size and learning rate must be positive");
        }
        let feature_count = train_x[0].len();
        if train_x.iter().chain(val_x).any(|row| row.len() != feature_count) {
            bail!("all rows must have {feature_count} features");
        }

        let mut model = Self::initialize(train_x, feature_count);
        // start from the mean fare
        model.bias = train_y.iter().sum::<f64>() / train_y.len() as f64;
        let standardized: Vec<Vec<f64>> = train_x.iter().map(|r| model.standardize(r)).collect();

        let mut rng = LcgRng::new(config.seed);
        let mut order: Vec<usize> = (0..train_x.len()).collect();
        let mut history = History::default();
        let mut best = model.clone();
        let mut best_mae = model.evaluate(val_x, val_y)?;
        let mut stale = 0;

        for epoch in 0..config.max_epochs {
            rng.shuffle(&mut order);
            for batch in order.chunks(config.batch_size) {
                model.step(&standardized, train_y, batch, config.learning_rate);
            }

            let mae = model.evaluate(val_x, val_y)?;
            if !mae.is_finite() {
                bail!("training diverged at epoch {epoch}; lower the learning rate");
            }
            history.val_mae.push(mae);
            debug!(epoch, val_mae = mae, "epoch done");

            if mae < best_mae {
                best_mae = mae;
                best = model.clone();
                history.best_epoch = Some(epoch);
                stale = 0;
            } else {
                stale += 1;
                if stale >= config.patience {
                    info!(epoch, "early stopping");
                    break;
                }
            }
        }

        history.best_val_mae = best_mae;
        info!(
            epochs = history.val_mae.len(),
            best_epoch = ?history.best_epoch,
            val_mae = best_mae,
            "training finished"
        );
        Ok((best, history))
    }

    /// One gradient step on the squared error of `batch`
    fn step(&mut self, z: &[Vec<f64>], y: &[f64], batch: &[usize], learning_rate: f64) {
        let mut grad_w = vec![0.0; self.weights.len()];
        let mut grad_b = 0.0;
        for &i in batch {
            let err = self.predict_standardized(&z[i]) - y[i];
            for (g, x) in grad_w.iter_mut().zip(&z[i]) {
                *g += err * x;
            }
            grad_b += err;
        }
        let scale = 2.0 * learning_rate / batch.len() as f64;
        for (w, g) in self.weights.iter_mut().zip(grad_w) {
            *w -= scale * g;
        }
        self.bias -= scale * grad_b;
    }
}

fn standardization(features: &[Vec<f64>], feature_count: usize) -> (Vec<f64>, Vec<f64>) {
    let n = features.len().max(1) as f64;
    let mut means = vec![0.0; feature_count];
    for row in features {
        for (m, x) in means.iter_mut().zip(row) {
            *m += x / n;
        }
    }
    let mut scales = vec![0.0; feature_count];
    for row in features {
        for ((s, x), m) in scales.iter_mut().zip(row).zip(&means) {
            *s += (x - m).powi(2) / n;
        }
    }
    // constant columns keep a unit scale
    for s in &mut scales {
        *s = if *s > f64::EPSILON { s.sqrt() } else { 1.0 };
    }
    (means, scales)
}

/// Linear congruential generator (glibc constants) for reproducible shuffles
#[derive(Clone, Debug)]
struct LcgRng {
    state: Wrapping<i64>,
}

impl LcgRng {
    const MULTIPLIER: i64 = 1103515245;
    const INCREMENT: i64 = 12345;
    const MODULUS: i64 = 1 << 31;

    fn new(seed: i64) -> Self {
        Self {
            state: Wrapping(seed.wrapping_abs() % Self::MODULUS),
        }
    }

    fn next_range(&mut self, max: usize) -> usize {
        self.state = self.state * Wrapping(Self::MULTIPLIER) + Wrapping(Self::INCREMENT);
        ((self.state.0 & (Self::MODULUS - 1)) as usize) % max.max(1)
    }

    /// Fisher-Yates
    fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_range(i + 1);
            items.swap(i, j);
        }
    }
}
