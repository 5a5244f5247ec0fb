//! Dense linear algebra for the bandit's sufficient statistics.
//!
//! The design matrices involved are small (the context dimension of the
//! simulation), so a fresh Cholesky factorization per solve is cheap and
//! avoids forming an explicit inverse.

use ndarray::{Array1, Array2};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
/// Errors related to factorizing a design matrix.
pub enum LinAlgError {
    #[error("the matrix is not square: {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("the matrix is not positive-definite (pivot {pivot} is not positive)")]
    NotPositiveDefinite { pivot: usize },
}

#[derive(Debug, Clone)]
/// The lower-triangular Cholesky factor `L` of a symmetric positive-definite
/// matrix `A = L Lᵀ`.
pub struct Cholesky {
    l: Array2<f64>,
}

impl Cholesky {
    /// Factorizes a symmetric positive-definite matrix.
    ///
    /// Only the lower triangle of `a` is read, which makes the factorization
    /// insensitive to floating-point asymmetry in the upper triangle.
    ///
    /// # Errors
    /// Fails if the matrix is not square or a pivot is not strictly positive.
    pub fn factorize(a: &Array2<f64>) -> Result<Self, LinAlgError> {
        let (rows, cols) = a.dim();
        if rows != cols {
            return Err(LinAlgError::NotSquare { rows, cols });
        }

        let n = rows;
        let mut l = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..=i {
                let mut sum = a[[i, j]];
                for k in 0..j {
                    sum -= l[[i, k]] * l[[j, k]];
                }
                if i == j {
                    if sum <= 0. {
                        return Err(LinAlgError::NotPositiveDefinite { pivot: i });
                    }
                    l[[i, j]] = sum.sqrt();
                } else {
                    l[[i, j]] = sum / l[[j, j]];
                }
            }
        }
        Ok(Self { l })
    }

    /// Gets the dimension of the factorized matrix.
    pub fn dim(&self) -> usize {
        self.l.nrows()
    }

    /// Solves `A x = b` via forward and backward substitution.
    pub fn solve(&self, b: &Array1<f64>) -> Array1<f64> {
        let mut x = self.forward_substitute(b);
        let n = self.dim();
        // L^T x = y
        for i in (0..n).rev() {
            let mut sum = x[i];
            for k in (i + 1)..n {
                sum -= self.l[[k, i]] * x[k];
            }
            x[i] = sum / self.l[[i, i]];
        }
        x
    }

    /// Computes the quadratic form `xᵀ A⁻¹ x` as `‖L⁻¹ x‖²`.
    pub fn quadratic_form(&self, x: &Array1<f64>) -> f64 {
        let y = self.forward_substitute(x);
        y.dot(&y)
    }

    /// Solves `L y = b`.
    fn forward_substitute(&self, b: &Array1<f64>) -> Array1<f64> {
        let n = self.dim();
        let mut y = b.clone();
        for i in 0..n {
            let mut sum = y[i];
            for k in 0..i {
                sum -= self.l[[i, k]] * y[k];
            }
            y[i] = sum / self.l[[i, i]];
        }
        y
    }
}
