//! Adam optimizer with L2 weight decay.
//!
//! Weight decay is added to the gradient before the moment updates
//! (`g + λθ`), not decoupled from them.

use cyclewatch_core::config::TrainingConfig;
use cyclewatch_core::error::{CycleWatchError, Result, Stage};

/// Adam (Adaptive Moment Estimation) over a flat parameter sequence.
///
/// Moments are allocated on the first step; every later step must present
/// the same number of parameters in the same order.
#[derive(Debug, Clone)]
pub struct Adam {
    /// Step size.
    pub learning_rate: f64,
    /// First moment decay.
    pub beta1: f64,
    /// Second moment decay.
    pub beta2: f64,
    /// Numerical stability term.
    pub epsilon: f64,
    /// L2 penalty coefficient.
    pub weight_decay: f64,
    t: i32,
    m: Vec<f64>,
    v: Vec<f64>,
}

impl Adam {
    /// Create an optimizer with default betas and no weight decay.
    #[must_use]
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Optimizer from a training configuration.
    #[must_use]
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            beta1: config.beta1,
            beta2: config.beta2,
            epsilon: config.epsilon,
            weight_decay: config.weight_decay,
            ..Self::new(config.learning_rate)
        }
    }

    /// Steps taken so far.
    #[must_use]
    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Apply one update.
    pub fn step<'a>(
        &mut self,
        params: impl Iterator<Item = &'a mut f64>,
        grads: impl Iterator<Item = f64>,
    ) -> Result<()> {
        let params: Vec<&mut f64> = params.collect();
        let grads: Vec<f64> = grads.collect();
        if params.len() != grads.len() {
            return Err(CycleWatchError::input(
                Stage::Train,
                format!("{} gradients for {} parameters", grads.len(), params.len()),
            ));
        }
        if self.m.is_empty() {
            self.m = vec![0.0; params.len()];
            self.v = vec![0.0; params.len()];
        } else if self.m.len() != params.len() {
            return Err(CycleWatchError::internal(
                Stage::Train,
                format!(
                    "optimizer state holds {} parameters, got {}",
                    self.m.len(),
                    params.len()
                ),
            ));
        }

        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);

        for (i, (param, grad)) in params.into_iter().zip(grads).enumerate() {
            let g = grad + self.weight_decay * *param;
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;

            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;
            *param -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
        Ok(())
    }
}
