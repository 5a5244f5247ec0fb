//! The synthetic collaboration environment.
//!
//! Stands in for the real federated system's decision layer: each arm is a
//! candidate collaboration with a hidden linear reward model over the round
//! context. The distributions are fixed and documented so that a seed fully
//! determines a run:
//!
//! - hidden per-arm parameters: standard normal, scaled to unit norm;
//! - round contexts: standard normal, scaled to unit norm;
//! - reward noise: zero-mean Gaussian with configured standard deviation.

use ndarray::Array1;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use rand_distr::StandardNormal;

/// Hidden true reward models for one trial.
#[derive(Debug, Clone)]
pub struct PairEnvironment {
    true_theta: Vec<Array1<f64>>,
    context_dim: usize,
    noise_sigma: f64,
}

impl PairEnvironment {
    /// Draws one hidden unit-norm parameter vector per arm.
    pub fn generate(
        rng: &mut ChaCha20Rng,
        num_arms: usize,
        context_dim: usize,
        noise_sigma: f64,
    ) -> Self {
        let true_theta = (0..num_arms)
            .map(|_| unit_normal_vector(rng, context_dim))
            .collect();
        Self {
            true_theta,
            context_dim,
            noise_sigma,
        }
    }

    /// Gets the number of arms.
    pub fn num_arms(&self) -> usize {
        self.true_theta.len()
    }

    /// Gets the context dimension.
    pub fn context_dim(&self) -> usize {
        self.context_dim
    }

    /// Gets the hidden parameter vector of an arm.
    ///
    /// Oracle knowledge; used for regret accounting only and never revealed
    /// to a bandit.
    pub fn true_theta(&self, arm: usize) -> &Array1<f64> {
        &self.true_theta[arm]
    }

    /// Samples a fresh round context.
    pub fn sample_context(&self, rng: &mut ChaCha20Rng) -> Array1<f64> {
        unit_normal_vector(rng, self.context_dim)
    }

    /// Gets the noise-free expected reward of an arm under `context`.
    pub fn expected_reward(&self, arm: usize, context: &Array1<f64>) -> f64 {
        context.dot(&self.true_theta[arm])
    }

    /// Draws the realized (noisy) reward of an arm under `context`.
    pub fn realized_reward(
        &self,
        rng: &mut ChaCha20Rng,
        arm: usize,
        context: &Array1<f64>,
    ) -> f64 {
        let noise: f64 = rng.sample(StandardNormal);
        self.expected_reward(arm, context) + self.noise_sigma * noise
    }

    /// Gets the best achievable noise-free reward under `context`.
    ///
    /// Oracle quantity used only for regret accounting.
    pub fn best_reward(&self, context: &Array1<f64>) -> f64 {
        (0..self.num_arms())
            .map(|arm| self.expected_reward(arm, context))
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

fn unit_normal_vector(rng: &mut ChaCha20Rng, dim: usize) -> Array1<f64> {
    let mut v = Array1::from_iter((0..dim).map(|_| rng.sample::<f64, _>(StandardNormal)));
    let norm = v.dot(&v).sqrt();
    if norm > f64::EPSILON {
        v /= norm;
    }
    v
}
