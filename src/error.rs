//! Crate-wide error taxonomy
//!
//! Five categories, one per failure mode named in the design: invalid
//! configuration, a missing lookup key, a numerical failure inside a solver,
//! an out-of-range iteration index, and a label-domain violation. Every
//! variant carries the factory key or component id where it originated so a
//! caller can tell which part of the registry misbehaved without unwinding
//! a backtrace.
//!
//! [`BoostError`] unifies the five so every fallible `Coordinator` method can
//! return a single type (teacher pattern: `scheduler::ProveError` and
//! `VerifySchedError` compose `QuotientError`/`PcsVerifyError` via `#[from]`).

#![forbid(unsafe_code)]

use thiserror::Error;

/// Invalid configuration: conflicting fields, unknown tags, shape mismatches.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("factory {key}: both penalty and df were set; exactly one is allowed")]
    PenaltyAndDfBothSet { key: String },
    #[error("factory {key}: neither penalty nor df was set; exactly one is required")]
    PenaltyAndDfBothMissing { key: String },
    #[error("factory {key}: unknown cache tag {tag:?}")]
    UnknownCacheTag { key: String, tag: String },
    #[error("factory {key}: centering requires matching binning between child factories")]
    MismatchedBinning { key: String },
    #[error("factory {key}: degree must be >= 1 (got {degree})")]
    InvalidDegree { key: String, degree: i64 },
    #[error("factory {key}: source has {got} column(s), expected {expected}")]
    WrongColumnCount { key: String, got: usize, expected: usize },
    #[error("factory {key}: difference order must be smaller than the parameter dimension (differences={differences}, p={p})")]
    InvalidDifferenceOrder { key: String, differences: usize, p: usize },
    #[error("factory {key}: centering can only propagate a cache tag of cholesky or inverse, got {tag:?}")]
    UnsupportedCenteringCacheTag { key: String, tag: String },
    #[error("duplicate factory key {key}")]
    DuplicateFactoryKey { key: String },
    #[error("factory {key}: n_knots must be >= 1 (got {n_knots})")]
    InvalidKnotCount { key: String, n_knots: i64 },
    #[error("factory {key}: tensor factories require both children to be unbinned")]
    TensorRequiresUnbinnedChildren { key: String },
    #[error("factory {key}: source column {data_id:?} not found in held-out source map")]
    MissingChildSource { key: String, data_id: String },
}

/// A factory key or `data_id` was missing from the registry or the held-out
/// source map.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("factory key {key:?} not found in factory registry")]
    FactoryNotFound { key: String },
    #[error("data_id {data_id:?} not found in held-out source map")]
    DataIdNotFound { data_id: String },
    #[error("logger id {id:?} not found in logger list")]
    LoggerNotFound { id: String },
}

/// A numerical solver failed: Demmler–Reinsch bracketing, Cholesky of a
/// non-positive-definite matrix, or a singular linear solve.
#[derive(Debug, Error)]
pub enum NumericError {
    #[error("factory {key}: Demmler-Reinsch target df {df} exceeds rank {rank} of XtX")]
    DfExceedsRank { key: String, df: f64, rank: usize },
    #[error("factory {key}: Demmler-Reinsch objective does not change sign on the bracket")]
    NoSignChange { key: String },
    #[error("component {component}: Cholesky factorization failed (matrix not positive definite)")]
    NotPositiveDefinite { component: String },
    #[error("component {component}: linear solve is singular")]
    SingularSolve { component: String },
    #[error("component {component}: Brent root finder exceeded {max_iter} iterations")]
    RootFinderDidNotConverge { component: String, max_iter: usize },
}

/// A replay/prefix index fell outside the trained history.
#[derive(Debug, Error)]
pub enum RangeError {
    #[error("iteration {k} is beyond trained history of length {len}")]
    IterationOutOfRange { k: usize, len: usize },
}

/// A response label violated the loss's domain.
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("binomial loss requires labels in {{-1, +1}}, found {value} at index {index}")]
    NotBinaryLabel { value: f64, index: usize },
    #[error("binomial offset magnitude must be <= 1, got {offset}")]
    OffsetOutOfBounds { offset: f64 },
    #[error("multiclass label {value} is not supported in the binary classification slot")]
    MulticlassInBinarySlot { value: f64 },
}

/// Unified error type returned by `Coordinator` and the other top-level APIs.
#[derive(Debug, Error)]
pub enum BoostError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Numeric(#[from] NumericError),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    Label(#[from] LabelError),
}
