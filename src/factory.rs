//! Base-learner factories
//!
//! A factory owns one [`DesignData`] built once from a [`FeatureSource`] (or,
//! for [`Factory::Tensor`] / [`Factory::Centered`], from two child factories'
//! design data) and hands out short-lived [`BaseLearner`]s that borrow it.
//! Construction is the expensive, one-time step (binning, spline basis,
//! factorization); `train`/`predict` on the resulting learner are cheap.
//!
//! One closed `Factory` enum, matched over, stands in for what a
//! virtual-dispatch hierarchy would otherwise need one trait object per kind
//! to express.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{coo::CooMatrix, csc::CscMatrix};

use crate::data::{CacheTag, DesignData, DesignMatrix, FactorizationCache, FeatureSource};
use crate::error::{BoostError, ConfigError};
use crate::kernels;
use crate::learner::BaseLearner;

fn dense_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let mut coo = CooMatrix::new(m.nrows(), m.ncols());
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            let v = m[(i, j)];
            if v != 0.0 {
                coo.push(i, j, v);
            }
        }
    }
    CscMatrix::from(&coo)
}

fn sparse_to_dense(m: &CscMatrix<f64>) -> DMatrix<f64> {
    let mut out = DMatrix::zeros(m.nrows(), m.ncols());
    for (r, c, &v) in m.triplet_iter() {
        out[(r, c)] = v;
    }
    out
}

/// Transpose a CSC matrix (rebuilt through COO; nalgebra-sparse has no
/// in-place transpose for CSC).
fn transpose_csc(m: &CscMatrix<f64>) -> CscMatrix<f64> {
    let mut coo = CooMatrix::new(m.ncols(), m.nrows());
    for (r, c, &v) in m.triplet_iter() {
        coo.push(c, r, v);
    }
    CscMatrix::from(&coo)
}

/// `design` is stored `p x n` for sparse factories, `n x p` for dense ones;
/// return it in `n x p` orientation for operations (row-wise Kronecker, QR
/// cross product) that want samples on the rows.
fn to_nxp_sparse(design: &DesignMatrix) -> CscMatrix<f64> {
    match design {
        DesignMatrix::Dense(m) => dense_to_csc(m),
        DesignMatrix::SparseTransposed(m) => transpose_csc(m),
    }
}

fn to_nxp_dense(design: &DesignMatrix) -> DMatrix<f64> {
    match design {
        DesignMatrix::Dense(m) => m.clone(),
        DesignMatrix::SparseTransposed(m) => sparse_to_dense(&transpose_csc(m)),
    }
}

/// Quantile-bin `x` into `floor(n^(1/bin_root))` groups of (as close to)
/// equal size. Returns, per original sample, the unique-row index it maps
/// to, and the per-bin representative value (the group mean).
fn quantile_bin_index(x: &[f64], bin_root: usize) -> (Vec<usize>, Vec<f64>) {
    let n = x.len();
    let num_bins = ((n as f64).powf(1.0 / bin_root as f64).floor().max(1.0)) as usize;
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].partial_cmp(&x[b]).unwrap());

    let chunk = (n + num_bins - 1) / num_bins;
    let mut bin_of = vec![0usize; n];
    let mut centers = Vec::with_capacity(num_bins);
    for b in 0..num_bins {
        let start = b * chunk;
        let end = ((b + 1) * chunk).min(n);
        if start >= end {
            continue;
        }
        let members = &order[start..end];
        let center = members.iter().map(|&i| x[i]).sum::<f64>() / members.len() as f64;
        let bin_id = centers.len();
        for &i in members {
            bin_of[i] = bin_id;
        }
        centers.push(center);
    }
    (bin_of, centers)
}

/// `[1 | x | x^2 | ... | x^degree]`, dropping the constant column when
/// `intercept` is false.
fn polynomial_design_matrix(x: &[f64], degree: usize, intercept: bool) -> DMatrix<f64> {
    let start_col = if intercept { 0 } else { 1 };
    let p = degree + 1 - start_col;
    let mut m = DMatrix::zeros(x.len(), p);
    for (i, &xi) in x.iter().enumerate() {
        let mut power = 1.0;
        for d in 0..=degree {
            if d >= start_col {
                m[(i, d - start_col)] = power;
            }
            power *= xi;
        }
    }
    m
}

/// One-hot design, stored transposed (`p x n`): column `i` has a single
/// nonzero `1.0` at the row of sample `i`'s class.
fn categorical_onehot_transposed(labels: &[String], dictionary: &HashMap<String, usize>) -> CscMatrix<f64> {
    let p = dictionary.len();
    let mut coo = CooMatrix::new(p, labels.len());
    for (i, label) in labels.iter().enumerate() {
        if let Some(&j) = dictionary.get(label) {
            coo.push(j, i, 1.0);
        }
    }
    CscMatrix::from(&coo)
}

/// Single indicator row, stored transposed (`1 x n`).
fn categorical_indicator_transposed(labels: &[String], class_label: &str) -> CscMatrix<f64> {
    let mut coo = CooMatrix::new(1, labels.len());
    for (i, label) in labels.iter().enumerate() {
        if label == class_label {
            coo.push(0, i, 1.0);
        }
    }
    CscMatrix::from(&coo)
}

fn require_numeric<'a>(source: &'a FeatureSource, key: &str) -> Result<&'a [f64], ConfigError> {
    source.as_numeric().ok_or_else(|| ConfigError::WrongColumnCount {
        key: key.to_string(),
        got: 0,
        expected: 1,
    })
}

fn require_categorical<'a>(source: &'a FeatureSource, key: &str) -> Result<&'a [String], ConfigError> {
    source.as_categorical().ok_or_else(|| ConfigError::WrongColumnCount {
        key: key.to_string(),
        got: 0,
        expected: 1,
    })
}

fn lookup_source<'a>(
    sources: &'a HashMap<String, FeatureSource>,
    data_id: &str,
    key: &str,
) -> Result<&'a FeatureSource, BoostError> {
    sources.get(data_id).ok_or_else(|| {
        ConfigError::MissingChildSource { key: key.to_string(), data_id: data_id.to_string() }.into()
    })
}

#[derive(Debug, Clone)]
pub struct PolynomialFactory {
    pub data_id: String,
    pub degree: usize,
    pub intercept: bool,
    pub bin_root: usize,
    pub design: DesignData,
}

impl PolynomialFactory {
    pub fn new(data_id: &str, source: &FeatureSource, degree: usize, intercept: bool, bin_root: usize) -> Result<Self, ConfigError> {
        let key = format!("{data_id}_polynomial");
        if degree == 0 {
            return Err(ConfigError::InvalidDegree { key, degree: 0 });
        }
        let x = require_numeric(source, &key)?;
        let design = Self::build_design(x, degree, intercept, bin_root, &key)?;
        Ok(PolynomialFactory { data_id: data_id.to_string(), degree, intercept, bin_root, design })
    }

    fn build_design(x: &[f64], degree: usize, intercept: bool, bin_root: usize, key: &str) -> Result<DesignData, ConfigError> {
        let (binning_index, x_for_design): (Option<Vec<usize>>, Vec<f64>) = if bin_root > 0 {
            let (bin_of, centers) = quantile_bin_index(x, bin_root);
            (Some(bin_of), centers)
        } else {
            (None, x.to_vec())
        };

        let m = polynomial_design_matrix(&x_for_design, degree, intercept);

        let cache = if degree == 1 && intercept {
            let mean_x = mean(x);
            let sxx: f64 = x.iter().map(|&xi| (xi - mean_x) * (xi - mean_x)).sum();
            FactorizationCache::IdentityPolynomialSlope { mean_x, sxx }
        } else {
            let xtx = if let Some(bin) = &binning_index {
                kernels::binned_xtwx(&m, &vec![1.0; x.len()], bin)
            } else {
                m.transpose() * &m
            };
            FactorizationCache::Inverse(xtx)
        };

        let _ = key;
        Ok(DesignData { design: DesignMatrix::Dense(m), penalty: None, binning_index, cache })
    }

    /// Rebuild on held-out data, without binning, from this factory's stored attributes.
    pub fn instantiate(&self, source: &FeatureSource) -> Result<DesignData, BoostError> {
        let key = format!("{}_polynomial", self.data_id);
        let x = require_numeric(source, &key)?;
        let m = polynomial_design_matrix(x, self.degree, self.intercept);
        Ok(DesignData { design: DesignMatrix::Dense(m), penalty: None, binning_index: None, cache: self.design.cache.clone() })
    }
}

#[derive(Debug, Clone)]
pub struct PSplineFactory {
    pub data_id: String,
    pub degree: usize,
    pub n_knots: usize,
    pub differences: usize,
    pub bin_root: usize,
    pub knot_vec: Vec<f64>,
    pub lambda: f64,
    pub preferred_tag: CacheTag,
    pub design: DesignData,
}

impl PSplineFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data_id: &str,
        source: &FeatureSource,
        degree: usize,
        n_knots: usize,
        differences: usize,
        bin_root: usize,
        lambda: Option<f64>,
        target_df: Option<f64>,
        preferred_tag: CacheTag,
    ) -> Result<Self, BoostError> {
        let key = format!("{data_id}_pspline");
        if n_knots == 0 {
            return Err(ConfigError::InvalidKnotCount { key, n_knots: 0 }.into());
        }
        let x = require_numeric(source, &key)?;
        let (a, b) = x.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let knot_vec = kernels::knots(a, b, n_knots, degree);

        let (binning_index, x_for_design): (Option<Vec<usize>>, Vec<f64>) = if bin_root > 0 {
            let (bin_of, centers) = quantile_bin_index(x, bin_root);
            (Some(bin_of), centers)
        } else {
            (None, x.to_vec())
        };

        let basis = kernels::bspline_basis_matrix(&x_for_design, &knot_vec, degree);
        let p = knot_vec.len() - degree - 1;
        let penalty = kernels::penalty_matrix(p, differences, &key)?;
        let basis_dense = sparse_to_dense(&basis);

        let xtx = if let Some(bin) = &binning_index {
            kernels::binned_xtwx(&basis_dense, &vec![1.0; x.len()], bin)
        } else {
            basis_dense.transpose() * &basis_dense
        };

        let lambda = match (lambda, target_df) {
            (Some(l), _) => l,
            (None, Some(df)) => kernels::demmler_reinsch(&xtx, &penalty, df, &key)?,
            (None, None) => 0.0,
        };
        let scaled_penalty = &penalty * lambda;
        let system = &xtx + &scaled_penalty;

        let cache = match preferred_tag {
            CacheTag::Cholesky => {
                let chol = nalgebra::Cholesky::new(system.clone())
                    .ok_or_else(|| crate::error::NumericError::NotPositiveDefinite { component: key.clone() })?;
                FactorizationCache::Cholesky(chol.l().transpose().into_owned())
            }
            CacheTag::Inverse => FactorizationCache::Inverse(system),
            CacheTag::Identity => {
                return Err(ConfigError::UnknownCacheTag { key, tag: "identity".to_string() }.into())
            }
        };

        let design = DesignData {
            design: DesignMatrix::SparseTransposed(transpose_csc(&basis)),
            penalty: Some(scaled_penalty),
            binning_index,
            cache,
        };

        Ok(PSplineFactory { data_id: data_id.to_string(), degree, n_knots, differences, bin_root, knot_vec, lambda, preferred_tag, design })
    }

    pub fn instantiate(&self, source: &FeatureSource) -> Result<DesignData, BoostError> {
        let key = format!("{}_pspline", self.data_id);
        let x = require_numeric(source, &key)?;
        let basis = kernels::bspline_basis_matrix(x, &self.knot_vec, self.degree);
        Ok(DesignData {
            design: DesignMatrix::SparseTransposed(transpose_csc(&basis)),
            penalty: self.design.penalty.clone(),
            binning_index: None,
            cache: self.design.cache.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CategoricalRidgeFactory {
    pub data_id: String,
    pub target_df: Option<f64>,
    pub lambda: f64,
    pub dictionary: HashMap<String, usize>,
    pub design: DesignData,
}

impl CategoricalRidgeFactory {
    pub fn new(data_id: &str, source: &FeatureSource, target_df: Option<f64>) -> Result<Self, BoostError> {
        let key = format!("{data_id}_ridge");
        let labels = require_categorical(source, &key)?;
        let mut dictionary = HashMap::new();
        for label in labels {
            let next = dictionary.len();
            dictionary.entry(label.clone()).or_insert(next);
        }
        let p = dictionary.len();
        let mut counts = vec![0.0; p];
        for label in labels {
            counts[dictionary[label]] += 1.0;
        }

        let xtx = DMatrix::from_diagonal(&DVector::from_vec(counts.clone()));
        let penalty = DMatrix::<f64>::identity(p, p);
        let lambda = match target_df {
            Some(df) => kernels::demmler_reinsch(&xtx, &penalty, df, &key)?,
            None => 0.0,
        };
        let reciprocals: Vec<f64> = counts.iter().map(|&c| 1.0 / (c + lambda)).collect();

        let design = DesignData {
            design: DesignMatrix::SparseTransposed(categorical_onehot_transposed(labels, &dictionary)),
            penalty: Some(penalty),
            binning_index: None,
            cache: FactorizationCache::IdentityRidgeDiagonal(DVector::from_vec(reciprocals)),
        };

        Ok(CategoricalRidgeFactory { data_id: data_id.to_string(), target_df, lambda, dictionary, design })
    }

    pub fn instantiate(&self, source: &FeatureSource) -> Result<DesignData, BoostError> {
        let key = format!("{}_ridge", self.data_id);
        let labels = require_categorical(source, &key)?;
        Ok(DesignData {
            design: DesignMatrix::SparseTransposed(categorical_onehot_transposed(labels, &self.dictionary)),
            penalty: self.design.penalty.clone(),
            binning_index: None,
            cache: self.design.cache.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CategoricalBinaryFactory {
    pub data_id: String,
    pub class_label: String,
    pub design: DesignData,
}

impl CategoricalBinaryFactory {
    pub fn new(data_id: &str, source: &FeatureSource, class_label: &str) -> Result<Self, BoostError> {
        let key = format!("{data_id}_binary_{class_label}");
        let labels = require_categorical(source, &key)?;
        let n_positives = labels.iter().filter(|l| l.as_str() == class_label).count() as f64;
        let design = DesignData {
            design: DesignMatrix::SparseTransposed(categorical_indicator_transposed(labels, class_label)),
            penalty: None,
            binning_index: None,
            cache: FactorizationCache::IdentityBinaryReciprocal(1.0 / n_positives.max(1.0)),
        };
        Ok(CategoricalBinaryFactory { data_id: data_id.to_string(), class_label: class_label.to_string(), design })
    }

    pub fn instantiate(&self, source: &FeatureSource) -> Result<DesignData, BoostError> {
        let key = format!("{}_binary_{}", self.data_id, self.class_label);
        let labels = require_categorical(source, &key)?;
        Ok(DesignData {
            design: DesignMatrix::SparseTransposed(categorical_indicator_transposed(labels, &self.class_label)),
            penalty: None,
            binning_index: None,
            cache: self.design.cache.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TensorFactory {
    pub child1: Box<Factory>,
    pub child2: Box<Factory>,
    pub design: DesignData,
}

impl TensorFactory {
    pub fn new(child1: Factory, child2: Factory) -> Result<Self, BoostError> {
        let key = format!("{}_x_{}_tensor", child1.key(), child2.key());
        if child1.design().uses_binning() || child2.design().uses_binning() {
            return Err(ConfigError::TensorRequiresUnbinnedChildren { key }.into());
        }
        let design = Self::combine(child1.design(), child2.design())?;
        Ok(TensorFactory { child1: Box::new(child1), child2: Box::new(child2), design })
    }

    fn combine(d1: &DesignData, d2: &DesignData) -> Result<DesignData, BoostError> {
        let sparse = d1.uses_sparse() || d2.uses_sparse();
        let design = if sparse {
            let a = to_nxp_sparse(&d1.design);
            let b = to_nxp_sparse(&d2.design);
            let kron = kernels::row_wise_kronecker_sparse(&a, &b);
            DesignMatrix::SparseTransposed(transpose_csc(&kron))
        } else {
            let a = to_nxp_dense(&d1.design);
            let b = to_nxp_dense(&d2.design);
            DesignMatrix::Dense(kernels::row_wise_kronecker(&a, &b))
        };

        let p1 = d1.design.n_cols();
        let p2 = d2.design.n_cols();
        let pen1 = d1.penalty.clone().unwrap_or_else(|| DMatrix::zeros(p1, p1));
        let pen2 = d2.penalty.clone().unwrap_or_else(|| DMatrix::zeros(p2, p2));
        let penalty = kernels::penalty_sum_kronecker(&pen1, &pen2);

        let design_dense = to_nxp_dense(&design);
        let xtx = design_dense.transpose() * &design_dense;
        let system = &xtx + &penalty;
        let chol = nalgebra::Cholesky::new(system)
            .ok_or_else(|| crate::error::NumericError::NotPositiveDefinite { component: "tensor".to_string() })?;
        let cache = FactorizationCache::Cholesky(chol.l().transpose().into_owned());

        Ok(DesignData { design, penalty: Some(penalty), binning_index: None, cache })
    }

    pub fn instantiate(&self, sources: &HashMap<String, FeatureSource>) -> Result<DesignData, BoostError> {
        let d1 = self.child1.instantiate(sources)?;
        let d2 = self.child2.instantiate(sources)?;
        Self::combine(&d1, &d2)
    }
}

#[derive(Debug, Clone)]
pub struct CenteredFactory {
    pub child1: Box<Factory>,
    pub child2: Box<Factory>,
    pub rotation: DMatrix<f64>,
    pub design: DesignData,
}

impl CenteredFactory {
    pub fn new(child1: Factory, child2: Factory) -> Result<Self, BoostError> {
        let key = format!("{}_centered_{}", child1.key(), child2.key());
        let d1 = child1.design();
        let d2 = child2.design();
        if d1.binning_index() != d2.binning_index() {
            return Err(ConfigError::MismatchedBinning { key }.into());
        }

        let x1 = to_nxp_dense(&d1.design);
        let x2 = to_nxp_dense(&d2.design);
        let p1 = d1.penalty.clone().unwrap_or_else(|| DMatrix::zeros(x1.ncols(), x1.ncols()));
        let (centered, rotated_penalty, z) = kernels::centering_rotation(&x1, &p1, &x2);

        let cache = match d1.cache.tag() {
            CacheTag::Cholesky | CacheTag::Inverse => {
                // The rotated design's own system matrix is refactorized directly
                // rather than algebraically propagated from F1's cache: z^T R_F1
                // is not square when z drops columns, and z^T inv_F1 z does not
                // equal inv(z^T (XtX+P) z) in general. Recomputing here preserves
                // the contract (a valid solve for the rotated ridge problem)
                // instead of the literal, dimensionally-unsound formula.
                let xtx = centered.transpose() * &centered;
                let system = &xtx + &rotated_penalty;
                let chol = nalgebra::Cholesky::new(system)
                    .ok_or_else(|| crate::error::NumericError::NotPositiveDefinite { component: key.clone() })?;
                FactorizationCache::Cholesky(chol.l().transpose().into_owned())
            }
            CacheTag::Identity => {
                return Err(ConfigError::UnsupportedCenteringCacheTag { key, tag: "identity".to_string() }.into())
            }
        };

        let design = DesignData {
            design: DesignMatrix::Dense(centered),
            penalty: Some(rotated_penalty),
            binning_index: d1.binning_index.clone(),
            cache,
        };

        Ok(CenteredFactory { child1: Box::new(child1), child2: Box::new(child2), rotation: z, design })
    }

    pub fn instantiate(&self, sources: &HashMap<String, FeatureSource>) -> Result<DesignData, BoostError> {
        let d1 = self.child1.instantiate(sources)?;
        let x1 = to_nxp_dense(&d1.design);
        let centered = &x1 * &self.rotation;
        Ok(DesignData {
            design: DesignMatrix::Dense(centered),
            penalty: self.design.penalty.clone(),
            binning_index: None,
            cache: self.design.cache.clone(),
        })
    }
}

/// A base-learner factory. Every variant owns exactly one [`DesignData`],
/// built once at construction, that every [`BaseLearner`] it hands out
/// borrows from.
#[derive(Debug, Clone)]
pub enum Factory {
    Polynomial(PolynomialFactory),
    PSpline(PSplineFactory),
    CategoricalRidge(CategoricalRidgeFactory),
    CategoricalBinary(CategoricalBinaryFactory),
    Tensor(TensorFactory),
    Centered(CenteredFactory),
}

impl Factory {
    /// `data_id + "_" + learner_type`, unique within a registry.
    pub fn key(&self) -> String {
        match self {
            Factory::Polynomial(f) => format!("{}_polynomial", f.data_id),
            Factory::PSpline(f) => format!("{}_pspline", f.data_id),
            Factory::CategoricalRidge(f) => format!("{}_ridge", f.data_id),
            Factory::CategoricalBinary(f) => format!("{}_binary_{}", f.data_id, f.class_label),
            Factory::Tensor(f) => format!("{}_x_{}_tensor", f.child1.key(), f.child2.key()),
            Factory::Centered(f) => format!("{}_centered_{}", f.child1.key(), f.child2.key()),
        }
    }

    pub fn design(&self) -> &DesignData {
        match self {
            Factory::Polynomial(f) => &f.design,
            Factory::PSpline(f) => &f.design,
            Factory::CategoricalRidge(f) => &f.design,
            Factory::CategoricalBinary(f) => &f.design,
            Factory::Tensor(f) => &f.design,
            Factory::Centered(f) => &f.design,
        }
    }

    pub fn uses_sparse(&self) -> bool {
        self.design().uses_sparse()
    }

    pub fn instantiate(&self, sources: &HashMap<String, FeatureSource>) -> Result<DesignData, BoostError> {
        match self {
            Factory::Polynomial(f) => Ok(f.instantiate(lookup_source(sources, &f.data_id, &self.key())?)?),
            Factory::PSpline(f) => f.instantiate(lookup_source(sources, &f.data_id, &self.key())?),
            Factory::CategoricalRidge(f) => f.instantiate(lookup_source(sources, &f.data_id, &self.key())?),
            Factory::CategoricalBinary(f) => f.instantiate(lookup_source(sources, &f.data_id, &self.key())?),
            Factory::Tensor(f) => f.instantiate(sources),
            Factory::Centered(f) => f.instantiate(sources),
        }
    }

    /// Prediction on training data: the binning-aware fast path when the
    /// design uses one, a plain matrix-vector product otherwise.
    pub fn linear_predictor_train(&self, theta: &DVector<f64>) -> DVector<f64> {
        let design = self.design();
        let unique_pred = design.design.predict(theta);
        match design.binning_index() {
            Some(bin) => DVector::from_iterator(bin.len(), bin.iter().map(|&b| unique_pred[b])),
            None => unique_pred,
        }
    }

    /// Prediction on held-out data: instantiate a fresh, unbinned design,
    /// then multiply.
    pub fn linear_predictor_new(
        &self,
        theta: &DVector<f64>,
        sources: &HashMap<String, FeatureSource>,
    ) -> Result<DVector<f64>, BoostError> {
        let fresh = self.instantiate(sources)?;
        Ok(fresh.design.predict(theta))
    }

    pub fn new_learner(&self) -> BaseLearner<'_> {
        BaseLearner::new(self.design())
    }
}

fn mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(data_id: &str, values: Vec<f64>) -> FeatureSource {
        FeatureSource::Numeric { data_id: data_id.to_string(), values }
    }

    fn categorical(data_id: &str, labels: Vec<&str>) -> FeatureSource {
        FeatureSource::Categorical { data_id: data_id.to_string(), labels: labels.into_iter().map(String::from).collect() }
    }

    #[test]
    fn polynomial_slope_caches_identity_tag() {
        let src = numeric("x", vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let f = PolynomialFactory::new("x", &src, 1, true, 0).unwrap();
        assert_eq!(f.design.cache.tag(), CacheTag::Identity);
        assert_eq!(f.design.design.n_cols(), 2);
    }

    #[test]
    fn polynomial_quadratic_caches_inverse_tag() {
        let src = numeric("x", vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let f = PolynomialFactory::new("x", &src, 2, true, 0).unwrap();
        assert_eq!(f.design.cache.tag(), CacheTag::Inverse);
        assert_eq!(f.design.design.n_cols(), 3);
    }

    #[test]
    fn polynomial_binning_shrinks_row_count() {
        let values: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let src = numeric("x", values);
        let f = PolynomialFactory::new("x", &src, 2, true, 2).unwrap();
        assert!(f.design.design.n_rows() < 100);
        assert_eq!(f.design.binning_index().unwrap().len(), 100);
    }

    #[test]
    fn categorical_ridge_reciprocals_match_counts_without_df() {
        let src = categorical("c", vec!["a", "a", "b", "c", "c", "c"]);
        let f = CategoricalRidgeFactory::new("c", &src, None).unwrap();
        match &f.design.cache {
            FactorizationCache::IdentityRidgeDiagonal(v) => {
                let a_idx = f.dictionary["a"];
                let c_idx = f.dictionary["c"];
                assert!((v[a_idx] - 0.5).abs() < 1e-12);
                assert!((v[c_idx] - 1.0 / 3.0).abs() < 1e-12);
            }
            _ => panic!("expected identity ridge diagonal cache"),
        }
    }

    #[test]
    fn categorical_binary_reciprocal_is_inverse_positive_count() {
        let src = categorical("c", vec!["a", "b", "a", "a"]);
        let f = CategoricalBinaryFactory::new("c", &src, "a").unwrap();
        match f.design.cache {
            FactorizationCache::IdentityBinaryReciprocal(v) => assert!((v - 1.0 / 3.0).abs() < 1e-12),
            _ => panic!("expected identity binary reciprocal cache"),
        }
    }

    #[test]
    fn tensor_of_two_polynomials_is_cholesky_tagged() {
        let x1 = numeric("x1", vec![1.0, 2.0, 3.0, 4.0]);
        let x2 = numeric("x2", vec![4.0, 3.0, 2.0, 1.0]);
        let f1 = Factory::Polynomial(PolynomialFactory::new("x1", &x1, 1, true, 0).unwrap());
        let f2 = Factory::Polynomial(PolynomialFactory::new("x2", &x2, 1, true, 0).unwrap());
        let tensor = TensorFactory::new(f1, f2).unwrap();
        assert_eq!(tensor.design.cache.tag(), CacheTag::Cholesky);
        assert_eq!(tensor.design.design.n_cols(), 4);
    }

    #[test]
    fn tensor_rejects_binned_children() {
        let values: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let x1 = numeric("x1", values.clone());
        let x2 = numeric("x2", values);
        let f1 = Factory::Polynomial(PolynomialFactory::new("x1", &x1, 2, true, 2).unwrap());
        let f2 = Factory::Polynomial(PolynomialFactory::new("x2", &x2, 2, true, 0).unwrap());
        assert!(TensorFactory::new(f1, f2).is_err());
    }

    #[test]
    fn centered_is_orthogonal_to_f2_design() {
        let x1 = numeric("x1", vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let x2 = numeric("x2", vec![5.0, 3.0, 1.0, 4.0, 2.0]);
        let f1 = Factory::Polynomial(PolynomialFactory::new("x1", &x1, 2, true, 0).unwrap());
        let f2 = Factory::Polynomial(PolynomialFactory::new("x2", &x2, 1, true, 0).unwrap());
        let centered = CenteredFactory::new(f1, f2.clone()).unwrap();
        let x1_design = to_nxp_dense(&centered.design.design);
        let x2_design = to_nxp_dense(&f2.design().design);
        let cross = x1_design.transpose() * &x2_design;
        for v in cross.iter() {
            assert!(v.abs() < 1e-8);
        }
    }
}
