//! Base-learners
//!
//! A [`BaseLearner`] is a short-lived, uniquely-owned borrow of a factory's
//! [`DesignData`]: `newLearner()` hands one out, `train` fits it against a
//! residual vector, and only the winner's fitted `theta` survives past the
//! candidate-evaluation step (copied out into the parameter tracker). This
//! is what lets `Optimizer::GreedyLineSearch` evaluate every factory's
//! candidate learner in parallel: each one reads immutable, shared
//! `DesignData` and writes only into its own private `theta`.

#![forbid(unsafe_code)]

use nalgebra::DVector;
use nalgebra_sparse::csc::CscMatrix;

use crate::data::{DesignData, DesignMatrix, FactorizationCache};
use crate::error::BoostError;
use crate::kernels;

fn bin_aggregate(residuals: &DVector<f64>, bin: &[usize], u: usize) -> DVector<f64> {
    let mut out = DVector::zeros(u);
    for (i, &b) in bin.iter().enumerate() {
        out[b] += residuals[i];
    }
    out
}

/// `m * v` where `m` is `p x k` sparse (a transposed design, or a transposed
/// design's unique-row slice) and `v` has length `k`: exactly `X^T r` for the
/// design `X` that `m` is the transpose of.
fn csc_cols_to_rows(m: &CscMatrix<f64>, v: &DVector<f64>) -> DVector<f64> {
    let mut out = DVector::zeros(m.nrows());
    for col in 0..m.ncols() {
        if let Some(view) = m.get_col(col) {
            let vc = v[col];
            for (&row, &val) in view.row_indices().iter().zip(view.values().iter()) {
                out[row] += val * vc;
            }
        }
    }
    out
}

/// `X^T residuals`, honoring the binning fast path when the design uses one.
fn design_transpose_times(design: &DesignData, residuals: &DVector<f64>) -> DVector<f64> {
    match (&design.design, &design.binning_index) {
        (DesignMatrix::Dense(m), None) => m.transpose() * residuals,
        (DesignMatrix::Dense(m), Some(bin)) => {
            kernels::binned_xtwy(m, &vec![1.0; residuals.len()], residuals.as_slice(), bin)
        }
        (DesignMatrix::SparseTransposed(m), None) => csc_cols_to_rows(m, residuals),
        (DesignMatrix::SparseTransposed(m), Some(bin)) => {
            let cy = bin_aggregate(residuals, bin, m.ncols());
            csc_cols_to_rows(m, &cy)
        }
    }
}

/// Sum, per sparse row, of `residuals[col]` over every column with a nonzero
/// in that row. Used by the categorical ridge/binary "identity" solves,
/// where the nonzero pattern of the (one-hot or indicator) design already
/// encodes class membership.
fn accumulate_by_sparse_row(m: &CscMatrix<f64>, residuals: &DVector<f64>, p: usize) -> DVector<f64> {
    let mut acc = DVector::zeros(p);
    for col in 0..m.ncols() {
        if let Some(view) = m.get_col(col) {
            for (&row, &val) in view.row_indices().iter().zip(view.values().iter()) {
                acc[row] += val * residuals[col];
            }
        }
    }
    acc
}

/// A transiently-owned fit against one factory's [`DesignData`]. `train`
/// must be called before `theta`/`predict`.
pub struct BaseLearner<'a> {
    design: &'a DesignData,
    theta: Option<DVector<f64>>,
}

impl<'a> BaseLearner<'a> {
    pub fn new(design: &'a DesignData) -> Self {
        BaseLearner { design, theta: None }
    }

    pub fn train(&mut self, residuals: &DVector<f64>, component: &str) -> Result<(), BoostError> {
        let theta = match &self.design.cache {
            FactorizationCache::IdentityPolynomialSlope { mean_x, sxx } => {
                let DesignMatrix::Dense(m) = &self.design.design else {
                    unreachable!("polynomial slope cache always backs a dense design")
                };
                let x = m.column(1);
                let r_bar = residuals.mean();
                let numer: f64 =
                    x.iter().zip(residuals.iter()).map(|(&xi, &ri)| (xi - mean_x) * (ri - r_bar)).sum();
                let slope = numer / sxx;
                let intercept = r_bar - slope * mean_x;
                DVector::from_vec(vec![intercept, slope])
            }
            FactorizationCache::IdentityRidgeDiagonal(reciprocals) => {
                let DesignMatrix::SparseTransposed(m) = &self.design.design else {
                    unreachable!("categorical ridge cache always backs a sparse design")
                };
                let sums = accumulate_by_sparse_row(m, residuals, reciprocals.len());
                DVector::from_iterator(reciprocals.len(), reciprocals.iter().zip(sums.iter()).map(|(&r, &s)| r * s))
            }
            FactorizationCache::IdentityBinaryReciprocal(reciprocal) => {
                let DesignMatrix::SparseTransposed(m) = &self.design.design else {
                    unreachable!("categorical binary cache always backs a sparse design")
                };
                let sum = accumulate_by_sparse_row(m, residuals, 1)[0];
                DVector::from_vec(vec![reciprocal * sum])
            }
            FactorizationCache::Inverse(system) => {
                let rhs = design_transpose_times(self.design, residuals);
                kernels::cholesky_solve(system, &rhs, component)?
            }
            FactorizationCache::Cholesky(r) => {
                let rhs = design_transpose_times(self.design, residuals);
                kernels::cholesky_solve_from_factor(r, &rhs, component)?
            }
        };
        self.theta = Some(theta);
        Ok(())
    }

    pub fn theta(&self) -> &DVector<f64> {
        self.theta.as_ref().expect("train must be called before theta/predict")
    }

    /// `design * theta` on training data, honoring the binning fast path.
    pub fn predict(&self) -> DVector<f64> {
        let theta = self.theta();
        let unique_pred = self.design.design.predict(theta);
        match self.design.binning_index() {
            Some(bin) => DVector::from_iterator(bin.len(), bin.iter().map(|&b| unique_pred[b])),
            None => unique_pred,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CacheTag;
    use nalgebra::DMatrix;

    fn slope_design(x: &[f64]) -> DesignData {
        let n = x.len();
        let mut m = DMatrix::zeros(n, 2);
        let mean_x = x.iter().sum::<f64>() / n as f64;
        let sxx: f64 = x.iter().map(|&xi| (xi - mean_x) * (xi - mean_x)).sum();
        for (i, &xi) in x.iter().enumerate() {
            m[(i, 0)] = 1.0;
            m[(i, 1)] = xi;
        }
        DesignData {
            design: DesignMatrix::Dense(m),
            penalty: None,
            binning_index: None,
            cache: FactorizationCache::IdentityPolynomialSlope { mean_x, sxx },
        }
    }

    #[test]
    fn slope_learner_recovers_exact_line() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y: Vec<f64> = x.iter().map(|&xi| 2.0 * xi + 1.0).collect();
        let design = slope_design(&x);
        let mut learner = BaseLearner::new(&design);
        learner.train(&DVector::from_vec(y.clone()), "test").unwrap();
        assert!((learner.theta()[0] - 1.0).abs() < 1e-9);
        assert!((learner.theta()[1] - 2.0).abs() < 1e-9);
        let pred = learner.predict();
        for (p, yi) in pred.iter().zip(y.iter()) {
            assert!((p - yi).abs() < 1e-9);
        }
    }

    #[test]
    fn cholesky_and_inverse_tags_agree_on_same_system() {
        let xtx = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 9.0]);
        let m = DMatrix::from_row_slice(3, 2, &[2.0, 3.0, 2.0, 0.0, 0.0, 3.0]);
        let design_inverse = DesignData {
            design: DesignMatrix::Dense(m.clone()),
            penalty: None,
            binning_index: None,
            cache: FactorizationCache::Inverse(xtx.clone()),
        };
        let chol = nalgebra::Cholesky::new(xtx).unwrap();
        let r = chol.l().transpose().into_owned();
        let design_cholesky = DesignData {
            design: DesignMatrix::Dense(m),
            penalty: None,
            binning_index: None,
            cache: FactorizationCache::Cholesky(r),
        };
        let residuals = DVector::from_vec(vec![1.0, 2.0, 3.0]);

        let mut learner_inv = BaseLearner::new(&design_inverse);
        learner_inv.train(&residuals, "test").unwrap();
        let mut learner_chol = BaseLearner::new(&design_cholesky);
        learner_chol.train(&residuals, "test").unwrap();

        assert!((learner_inv.theta() - learner_chol.theta()).norm() < 1e-9);
        assert_eq!(design_inverse.cache.tag(), CacheTag::Inverse);
        assert_eq!(design_cholesky.cache.tag(), CacheTag::Cholesky);
    }
}
