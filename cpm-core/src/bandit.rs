//! The per-client LinUCB collaboration-policy bandit.
//!
//! One estimator is kept per arm (candidate collaborating peer). Selection
//! scores every arm by its estimated reward plus an exploration bonus and is
//! free of side effects; learning happens exclusively through [`update`].
//!
//! [`update`]: LinUcb::update

use ndarray::{Array1, Array2};
use thiserror::Error;

use crate::linalg::{Cholesky, LinAlgError};

#[derive(Debug, Error, PartialEq)]
/// Errors related to bandit selection and updates.
pub enum BanditError {
    #[error("context has length {actual} but the bandit is configured for dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("arm {arm} is out of range for a bandit with {num_arms} arms")]
    UnknownArm { arm: usize, num_arms: usize },

    #[error("design matrix is ill-conditioned: {0}")]
    IllConditioned(#[from] LinAlgError),
}

#[derive(Debug, Clone)]
/// Running sufficient statistics for the linear regression of one arm.
pub struct ArmState {
    /// Design-matrix accumulator, prior `λ·I`.
    a: Array2<f64>,
    /// Response-vector accumulator, prior zero.
    b: Array1<f64>,
}

impl ArmState {
    fn new(context_dim: usize, lambda: f64) -> Self {
        Self {
            a: Array2::eye(context_dim) * lambda,
            b: Array1::zeros(context_dim),
        }
    }

    /// Gets the design-matrix accumulator.
    pub fn design_matrix(&self) -> &Array2<f64> {
        &self.a
    }

    /// Gets the response-vector accumulator.
    pub fn response_vector(&self) -> &Array1<f64> {
        &self.b
    }
}

#[derive(Debug, Clone)]
/// A LinUCB bandit over a fixed set of arms.
pub struct LinUcb {
    alpha: f64,
    context_dim: usize,
    arms: Vec<ArmState>,
}

impl LinUcb {
    /// Creates a bandit with `num_arms` fresh estimators.
    ///
    /// `lambda` is the ridge prior on every design matrix and must be
    /// strictly positive to keep the matrices positive-definite before any
    /// observation arrives; `alpha` scales the exploration bonus and must be
    /// non-negative. Both are validated by the simulation settings before a
    /// bandit is ever constructed.
    pub fn new(num_arms: usize, context_dim: usize, alpha: f64, lambda: f64) -> Self {
        debug_assert!(lambda > 0.);
        debug_assert!(alpha >= 0.);
        Self {
            alpha,
            context_dim,
            arms: (0..num_arms)
                .map(|_| ArmState::new(context_dim, lambda))
                .collect(),
        }
    }

    /// Gets the number of arms.
    pub fn num_arms(&self) -> usize {
        self.arms.len()
    }

    /// Gets the configured context dimension.
    pub fn context_dim(&self) -> usize {
        self.context_dim
    }

    /// Gets the statistics of an arm, if it exists.
    pub fn arm(&self, arm: usize) -> Option<&ArmState> {
        self.arms.get(arm)
    }

    /// Selects the arm with the highest upper-confidence score for `context`.
    ///
    /// The score of arm `a` is `x·θ_a + α·√(xᵀ A_a⁻¹ x)` with
    /// `θ_a = A_a⁻¹ b_a`. Ties break towards the lowest arm index so that
    /// selection is deterministic. This is a pure function of the current
    /// statistics and the context.
    ///
    /// # Errors
    /// Fails if the context length does not match the configured dimension.
    /// The positive-definite invariant on the design matrices makes the
    /// factorization itself infallible in practice.
    pub fn select(&self, context: &Array1<f64>) -> Result<usize, BanditError> {
        self.check_context(context)?;

        let mut best_arm = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (arm, state) in self.arms.iter().enumerate() {
            let chol = Cholesky::factorize(&state.a)?;
            let theta = chol.solve(&state.b);
            let score = context.dot(&theta) + self.alpha * chol.quadratic_form(context).sqrt();
            if score > best_score {
                best_score = score;
                best_arm = arm;
            }
        }
        Ok(best_arm)
    }

    /// Feeds the realized reward for the selected arm back into its
    /// statistics: `A ← A + x xᵀ`, `b ← b + r·x`.
    ///
    /// Must be called exactly once per round, for the arm that [`select`]
    /// returned that round.
    ///
    /// # Errors
    /// Fails if the arm index is out of range or the context length does not
    /// match the configured dimension.
    ///
    /// [`select`]: LinUcb::select
    pub fn update(
        &mut self,
        arm: usize,
        context: &Array1<f64>,
        reward: f64,
    ) -> Result<(), BanditError> {
        self.check_context(context)?;
        let num_arms = self.arms.len();
        let state = self
            .arms
            .get_mut(arm)
            .ok_or(BanditError::UnknownArm { arm, num_arms })?;

        for i in 0..self.context_dim {
            for j in 0..self.context_dim {
                state.a[[i, j]] += context[i] * context[j];
            }
            state.b[i] += reward * context[i];
        }
        Ok(())
    }

    fn check_context(&self, context: &Array1<f64>) -> Result<(), BanditError> {
        if context.len() == self.context_dim {
            Ok(())
        } else {
            Err(BanditError::DimensionMismatch {
                expected: self.context_dim,
                actual: context.len(),
            })
        }
    }
}
