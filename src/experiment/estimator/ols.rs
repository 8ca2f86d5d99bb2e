//! OLS via pseudo-inverse with date-clustered sandwich covariance.
//!
//! ```text
//! β    = X⁺ y
//! bread = X⁺ X⁺ᵀ           (= (XᵀX)⁺)
//! meat  = Σ_g s_g s_gᵀ      s_g = X_gᵀ e_g
//! V     = c · bread · meat · bread
//! c     = G/(G−1) · (N−1)/(N−K)
//! ```
//!
//! K is the numerical rank of X. Either factor of `c` is dropped when its
//! denominator would be non-positive (a single cluster, or N ≤ K).

use nalgebra::{DMatrix, DVector};

use crate::errors::{Error, Result};

/// Singular value threshold for pseudo-inverse and rank.
const RANK_EPS: f64 = 1e-10;

#[derive(Debug, Clone)]
pub(crate) struct OlsFit {
    pub(crate) beta: DVector<f64>,
    pub(crate) covariance: DMatrix<f64>,
    pub(crate) rank: usize,
    pub(crate) n_obs: usize,
    pub(crate) n_clusters: usize,
}

/// Small-sample correction for clustered covariance.
pub(crate) fn cluster_correction(n_clusters: usize, n_obs: usize, rank: usize) -> f64 {
    let g = n_clusters as f64;
    let n = n_obs as f64;
    let k = rank as f64;
    let mut c = 1.0;
    if n_clusters > 1 {
        c *= g / (g - 1.0);
    }
    if n_obs > rank {
        c *= (n - 1.0) / (n - k);
    }
    c
}

/// Fit `y ~ X` with covariance clustered on `clusters[i]`.
///
/// Cluster ids must be dense: every id in `0..=max` labels at least one row.
pub(crate) fn fit_clustered(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    clusters: &[usize],
) -> Result<OlsFit> {
    let n_obs = x.nrows();
    if n_obs == 0 || x.ncols() == 0 {
        return Err(Error::Estimation("empty design matrix".into()));
    }
    if y.len() != n_obs || clusters.len() != n_obs {
        return Err(Error::Estimation(format!(
            "dimension mismatch: X has {n_obs} rows, y {} and clusters {}",
            y.len(),
            clusters.len()
        )));
    }

    let pinv = x
        .clone()
        .pseudo_inverse(RANK_EPS)
        .map_err(|e| Error::Estimation(e.to_string()))?;
    let beta = &pinv * y;
    if beta.iter().any(|b| !b.is_finite()) {
        return Err(Error::Estimation("non-finite coefficients".into()));
    }
    let rank = x.rank(RANK_EPS);

    let residuals = y - x * &beta;
    let k = x.ncols();
    let n_clusters = clusters.iter().max().map_or(0, |m| m + 1);

    let mut scores = vec![DVector::<f64>::zeros(k); n_clusters];
    for (i, &g) in clusters.iter().enumerate() {
        scores[g] += x.row(i).transpose() * residuals[i];
    }

    let mut meat = DMatrix::<f64>::zeros(k, k);
    for s in &scores {
        meat += s * s.transpose();
    }

    let bread = &pinv * pinv.transpose();
    let covariance = &bread * meat * &bread * cluster_correction(n_clusters, n_obs, rank);

    Ok(OlsFit {
        beta,
        covariance,
        rank,
        n_obs,
        n_clusters,
    })
}
