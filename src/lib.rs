//! Crate root: public surface and module map
//!
//! This module is the single canonical entry-point for downstream users of
//! the library. It declares the submodules that implement the boosting
//! engine and re-exports the types most callers need: [`Coordinator`] and its
//! [`CoordinatorConfig`], the [`FeatureSource`] registry type, [`BoostError`],
//! and the JSON (de)serialization functions for a trained model.
//!
//! ## Data flow
//!
//! A [`CoordinatorConfig`] plus a `HashMap<String, FeatureSource>` training
//! registry builds a [`Coordinator`] via [`Coordinator::from_config`]. Calling
//! [`Coordinator::train`] runs the stagewise fit loop: at each iteration the
//! [`optimizer::Optimizer`] asks every [`factory::Factory`] for a freshly
//! trained [`learner::BaseLearner`] against the current pseudo-residuals,
//! keeps the lowest-SSE winner, shrinks its prediction by the learning rate
//! (and, for [`optimizer::Optimizer::GreedyLineSearch`], a Brent-minimized
//! step size), and folds the result into the [`tracker::ParameterTracker`]
//! and every registered [`logger::Logger`].

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

/// Numeric kernels: B-splines, difference penalties, Kronecker products,
/// Cholesky/inverse solves, Demmler-Reinsch calibration, Brent's method.
pub mod kernels;
/// Data objects: feature sources, design matrices, factorization caches.
pub mod data;
/// Crate-wide error taxonomy.
pub mod error;
/// Base-learner factories (polynomial, P-spline, categorical, tensor, centered).
pub mod factory;
/// Base-learners: short-lived fits borrowed from a factory's design data.
pub mod learner;
/// Loss functions and their gradients, constant initializers, response links.
pub mod loss;
/// The fit target: labels, running prediction, pseudo-residuals.
pub mod response;
/// Candidate selection and step-size strategy.
pub mod optimizer;
/// Append-only coefficient log with prefix replay and rewind.
pub mod tracker;
/// Stopping criteria and their combination across a registry of loggers.
pub mod logger;
/// `serde`-deserializable configuration for every component above.
pub mod config;
/// Hand-written JSON (de)serialization for matrix-bearing components.
pub mod json;
/// The fit loop: wires every component above into `train`/`predict`.
pub mod coordinator;

pub use config::{CoordinatorConfig, FactoryConfig, LoggerConfig, LossConfig, OptimizerConfig};
pub use coordinator::Coordinator;
pub use data::FeatureSource;
pub use error::BoostError;
pub use json::{coordinator_from_json, coordinator_to_json};
pub use loss::Loss;
pub use optimizer::Optimizer;
pub use response::Task;
