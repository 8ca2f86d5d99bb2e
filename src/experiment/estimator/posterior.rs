//! Joint normal over treatment effects.
//!
//! The clustered covariance can be rank deficient (few dates, arms observed
//! in a single cell), so sampling goes through the eigen decomposition
//! `Σ = B D Bᵀ` with negative eigenvalues clamped to zero:
//!
//! ```text
//! x = μ + B √D z,   z ~ N(0, I)
//! ```
//!
//! A zero eigenvalue means the draw is constant along that direction.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::consts::EPSILON;
use crate::errors::{Error, Result};

/// Multivariate normal, possibly singular.
#[derive(Debug, Clone)]
pub struct MultivariateNormal {
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
    /// B √D
    transform: DMatrix<f64>,
    singular: bool,
}

impl MultivariateNormal {
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> Result<Self> {
        let n = mean.len();
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(Error::Estimation(format!(
                "covariance is {}x{}, mean has {n} entries",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        if mean.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
            return Err(Error::Estimation("non-finite posterior parameters".into()));
        }

        let covariance = (&covariance + covariance.transpose()) * 0.5;
        let eigen = SymmetricEigen::new(covariance.clone());
        let scale = eigen.eigenvalues.iter().fold(1.0_f64, |m, v| m.max(v.abs()));
        let singular = eigen.eigenvalues.iter().any(|v| *v <= EPSILON * scale);

        let sqrt_eigenvalues = eigen.eigenvalues.map(|v| v.max(0.0).sqrt());
        let transform = &eigen.eigenvectors * DMatrix::from_diagonal(&sqrt_eigenvalues);

        Ok(Self {
            mean,
            covariance,
            transform,
            singular,
        })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Whether the covariance has a (numerically) zero eigenvalue.
    pub fn is_singular(&self) -> bool {
        self.singular
    }

    /// Marginal standard deviations.
    pub fn std_devs(&self) -> Vec<f64> {
        self.covariance
            .diagonal()
            .iter()
            .map(|v| v.max(0.0).sqrt())
            .collect()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> DVector<f64> {
        let z = DVector::from_iterator(
            self.dim(),
            (0..self.dim()).map(|_| StandardNormal.sample(&mut *rng)),
        );
        &self.mean + &self.transform * z
    }
}
