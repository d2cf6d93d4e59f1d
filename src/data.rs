//! Data objects
//!
//! [`FeatureSource`] is the immutable input column a factory is built from.
//! [`DesignData`] is the factory-specific transformed representation: either
//! a dense or sparse design matrix, an optional penalty matrix, an optional
//! binning index, and a [`FactorizationCache`] whose tag tells a base-learner
//! how to solve for its coefficients.

#![forbid(unsafe_code)]

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::csc::CscMatrix;
use serde::{Deserialize, Serialize};

/// One input feature column, identified by a unique `data_id`. Shared
/// read-only by every factory built from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FeatureSource {
    /// A numeric column.
    Numeric { data_id: String, values: Vec<f64> },
    /// A categorical column of string labels.
    Categorical { data_id: String, labels: Vec<String> },
}

impl FeatureSource {
    pub fn data_id(&self) -> &str {
        match self {
            FeatureSource::Numeric { data_id, .. } => data_id,
            FeatureSource::Categorical { data_id, .. } => data_id,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FeatureSource::Numeric { values, .. } => values.len(),
            FeatureSource::Categorical { labels, .. } => labels.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            FeatureSource::Numeric { values, .. } => Some(values),
            FeatureSource::Categorical { .. } => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&[String]> {
        match self {
            FeatureSource::Categorical { labels, .. } => Some(labels),
            FeatureSource::Numeric { .. } => None,
        }
    }
}

/// Which way a [`DesignData`]'s coefficients are solved for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheTag {
    /// Closed-form elementwise solve (e.g. ridge-diagonal reciprocals, or the
    /// OLS slope/intercept pair).
    Identity,
    /// An explicit, precomputed inverse of `XtX (+ lambda P)`.
    Inverse,
    /// The upper-triangular Cholesky factor of `XtX + lambda P`.
    Cholesky,
}

/// The precomputed factor a base-learner's `train` call solves against.
/// Tag and contents are fixed at factory construction and never mutated.
///
/// Three of the variants below all report `tag() == CacheTag::Identity`: one
/// tag covers three unrelated closed forms (OLS slope/intercept,
/// ridge-diagonal reciprocals, and a single binary-indicator reciprocal).
/// `CacheTag` stays three-valued, but each closed form gets its own variant
/// here rather than being forced through one shared numeric encoding.
#[derive(Debug, Clone)]
pub enum FactorizationCache {
    /// `tag = Identity`. Degree-1, intercept-on polynomial: `(mean(x), sum((x-mean)^2))`.
    IdentityPolynomialSlope { mean_x: f64, sxx: f64 },
    /// `tag = Identity`. Categorical ridge: `1 / (count_j + lambda)` per class.
    IdentityRidgeDiagonal(DVector<f64>),
    /// `tag = Identity`. Categorical binary indicator: `1 / n_positives`.
    IdentityBinaryReciprocal(f64),
    /// `tag = Inverse`. The raw `XtX + lambda P`, inverted fresh at every
    /// `train()` call rather than pre-factorized (the polynomial factory's
    /// non-slope case: "factorization done at train time").
    Inverse(DMatrix<f64>),
    /// `tag = Cholesky`, the upper-triangular factor `R` with `R^T R = XtX + lambda P`.
    Cholesky(DMatrix<f64>),
}

impl FactorizationCache {
    pub fn tag(&self) -> CacheTag {
        match self {
            FactorizationCache::IdentityPolynomialSlope { .. }
            | FactorizationCache::IdentityRidgeDiagonal(_)
            | FactorizationCache::IdentityBinaryReciprocal(_) => CacheTag::Identity,
            FactorizationCache::Inverse(_) => CacheTag::Inverse,
            FactorizationCache::Cholesky(_) => CacheTag::Cholesky,
        }
    }
}

/// Either a dense or a sparse design matrix. Sparse matrices are stored
/// transposed (`p x n`, column-major) so that `theta^T * X` is a cheap CSC
/// matvec.
#[derive(Debug, Clone)]
pub enum DesignMatrix {
    Dense(DMatrix<f64>),
    /// Transposed sparse design, shape `p x n`.
    SparseTransposed(CscMatrix<f64>),
}

impl DesignMatrix {
    pub fn is_sparse(&self) -> bool {
        matches!(self, DesignMatrix::SparseTransposed(_))
    }

    /// Number of rows `n` in the (conceptual, non-transposed) design matrix.
    pub fn n_rows(&self) -> usize {
        match self {
            DesignMatrix::Dense(m) => m.nrows(),
            DesignMatrix::SparseTransposed(m) => m.ncols(),
        }
    }

    /// Number of parameters `p`.
    pub fn n_cols(&self) -> usize {
        match self {
            DesignMatrix::Dense(m) => m.ncols(),
            DesignMatrix::SparseTransposed(m) => m.nrows(),
        }
    }

    /// `X * theta`, i.e. the linear predictor on the data this design was
    /// built from.
    pub fn predict(&self, theta: &DVector<f64>) -> DVector<f64> {
        match self {
            DesignMatrix::Dense(m) => m * theta,
            DesignMatrix::SparseTransposed(m) => {
                // (theta^T * X_sp)^T, computed as X_sp^T * theta via the
                // transposed storage: m is p x n, so m^T * theta is n x 1.
                let dense_theta = theta.clone();
                let cols: Vec<f64> = (0..m.ncols())
                    .map(|col| {
                        let mut acc = 0.0;
                        if let Some(view) = m.get_col(col) {
                            for (row, &v) in view.row_indices().iter().zip(view.values().iter()) {
                                acc += v * dense_theta[*row];
                            }
                        }
                        acc
                    })
                    .collect();
                DVector::from_vec(cols)
            }
        }
    }
}

/// One factory's transformed representation of its source: exactly one of a
/// dense or sparse design matrix, an optional penalty matrix, an optional
/// binning index, and the cache that makes `train` fast.
#[derive(Debug, Clone)]
pub struct DesignData {
    pub design: DesignMatrix,
    pub penalty: Option<DMatrix<f64>>,
    /// `bin[i]` is the unique-row index sample `i` maps to, if binning is in use.
    pub binning_index: Option<Vec<usize>>,
    pub cache: FactorizationCache,
}

impl DesignData {
    pub fn uses_binning(&self) -> bool {
        self.binning_index.is_some()
    }

    pub fn binning_index(&self) -> Option<&[usize]> {
        self.binning_index.as_deref()
    }

    pub fn uses_sparse(&self) -> bool {
        self.design.is_sparse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_predict_matches_matrix_vector_product() {
        let m = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let design = DesignMatrix::Dense(m.clone());
        let theta = DVector::from_vec(vec![1.0, 1.0]);
        assert_eq!(design.predict(&theta), m * theta);
    }
}
