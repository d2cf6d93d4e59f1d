//! Configuration
//!
//! Plain, `serde`-deserializable structs for every external configuration
//! surface: one [`FactoryConfig`] variant per base-learner kind,
//! [`LossConfig`], [`LoggerConfig`], and the top-level [`CoordinatorConfig`].
//! Building a [`crate::coordinator::Coordinator`] from a `CoordinatorConfig`
//! plus a training [`FeatureSource`] registry threads the factory registry
//! through [`build_factories`] as an explicit value, never a process-wide
//! singleton.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::data::{CacheTag, FeatureSource};
use crate::error::{BoostError, ConfigError};
use crate::factory::{CategoricalBinaryFactory, CategoricalRidgeFactory, CenteredFactory, Factory, PSplineFactory, PolynomialFactory, TensorFactory};
use crate::logger::{Logger, LoggerList, TimeUnit};
use crate::loss::Loss;

/// One candidate base-learner factory's configuration. `Tensor`/`Centered`
/// reference earlier factories in the same list by their registry key
/// (`data_id + "_" + learner_type`, see [`Factory::key`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FactoryConfig {
    Polynomial { data_id: String, degree: usize, intercept: bool, bin_root: usize },
    PSpline {
        data_id: String,
        degree: usize,
        n_knots: usize,
        penalty: Option<f64>,
        df: Option<f64>,
        differences: usize,
        bin_root: usize,
        cache_tag: CacheTagConfig,
    },
    CategoricalRidge { data_id: String, df: Option<f64> },
    CategoricalBinary { data_id: String, class_label: String },
    Tensor { child1_key: String, child2_key: String },
    Centered { child1_key: String, child2_key: String },
}

/// Restricted to the two tags a config may request directly; `identity` is
/// never user-selectable (it only ever arises from closed-form factories).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum CacheTagConfig {
    Cholesky,
    Inverse,
}

impl From<CacheTagConfig> for CacheTag {
    fn from(c: CacheTagConfig) -> Self {
        match c {
            CacheTagConfig::Cholesky => CacheTag::Cholesky,
            CacheTagConfig::Inverse => CacheTag::Inverse,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LossKind {
    Quadratic,
    Absolute,
    Binomial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossConfig {
    pub kind: LossKind,
    pub optional_offset: Option<f64>,
}

impl LossConfig {
    pub fn build(&self) -> Loss {
        match self.kind {
            LossKind::Quadratic => Loss::Quadratic { custom_offset: self.optional_offset },
            LossKind::Absolute => Loss::Absolute { custom_offset: self.optional_offset },
            LossKind::Binomial => Loss::Binomial { custom_offset: self.optional_offset },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum LoggerConfigKind {
    Iteration { max_iter: usize },
    Time { unit: TimeUnit, max_time: f64 },
    InbagRisk { loss: LossConfig, eps: f64, patience: usize },
    OobRisk {
        loss: LossConfig,
        eps: f64,
        patience: usize,
        oob_sources: Vec<FeatureSource>,
        oob_y: Vec<f64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub id: String,
    pub is_stopper: bool,
    pub kind: LoggerConfigKind,
}

impl LoggerConfig {
    pub fn build(&self) -> Logger {
        match &self.kind {
            LoggerConfigKind::Iteration { max_iter } => Logger::iteration(&self.id, self.is_stopper, *max_iter),
            LoggerConfigKind::Time { unit, max_time } => Logger::time(&self.id, self.is_stopper, *unit, *max_time),
            LoggerConfigKind::InbagRisk { loss, eps, patience } => {
                Logger::inbag_risk(&self.id, self.is_stopper, loss.build(), *eps, *patience)
            }
            LoggerConfigKind::OobRisk { loss, eps, patience, oob_sources, oob_y } => {
                let sources = oob_sources.iter().map(|s| (s.data_id().to_string(), s.clone())).collect();
                Logger::oob_risk(&self.id, self.is_stopper, loss.build(), *eps, *patience, sources, oob_y.clone())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OptimizerConfig {
    Greedy,
    GreedyLineSearch,
}

impl From<OptimizerConfig> for crate::optimizer::Optimizer {
    fn from(c: OptimizerConfig) -> Self {
        match c {
            OptimizerConfig::Greedy => crate::optimizer::Optimizer::Greedy,
            OptimizerConfig::GreedyLineSearch => crate::optimizer::Optimizer::GreedyLineSearch,
        }
    }
}

/// Top-level configuration the coordinator accepts: `learning_rate in (0,1]`,
/// `stop_if_all`, the training horizon `m`, the ordered factory registry, the
/// loss, the optimizer strategy, and the logger list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub learning_rate: f64,
    pub stop_if_all: bool,
    pub m: usize,
    pub factories: Vec<FactoryConfig>,
    pub loss: LossConfig,
    pub optimizer: OptimizerConfig,
    pub loggers: Vec<LoggerConfig>,
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ConfigError::InvalidDegree { key: "learning_rate".to_string(), degree: 0 });
        }
        Ok(())
    }
}

/// Build the ordered factory registry from `configs`, resolving `Tensor`
/// and `Centered` child references against factories already constructed
/// earlier in the list (config order is construction order, so children
/// must precede their composites).
pub fn build_factories(
    configs: &[FactoryConfig],
    sources: &HashMap<String, FeatureSource>,
) -> Result<Vec<Factory>, BoostError> {
    let mut registry: Vec<Factory> = Vec::with_capacity(configs.len());
    let mut by_key: HashMap<String, Factory> = HashMap::new();

    for cfg in configs {
        let factory = match cfg {
            FactoryConfig::Polynomial { data_id, degree, intercept, bin_root } => {
                let src = lookup(sources, data_id)?;
                Factory::Polynomial(PolynomialFactory::new(data_id, src, *degree, *intercept, *bin_root)?)
            }
            FactoryConfig::PSpline { data_id, degree, n_knots, penalty, df, differences, bin_root, cache_tag } => {
                if penalty.is_some() && df.is_some() {
                    return Err(ConfigError::PenaltyAndDfBothSet { key: format!("{data_id}_pspline") }.into());
                }
                if penalty.is_none() && df.is_none() {
                    return Err(ConfigError::PenaltyAndDfBothMissing { key: format!("{data_id}_pspline") }.into());
                }
                let src = lookup(sources, data_id)?;
                Factory::PSpline(PSplineFactory::new(
                    data_id,
                    src,
                    *degree,
                    *n_knots,
                    *differences,
                    *bin_root,
                    *penalty,
                    *df,
                    (*cache_tag).into(),
                )?)
            }
            FactoryConfig::CategoricalRidge { data_id, df } => {
                let src = lookup(sources, data_id)?;
                Factory::CategoricalRidge(CategoricalRidgeFactory::new(data_id, src, *df)?)
            }
            FactoryConfig::CategoricalBinary { data_id, class_label } => {
                let src = lookup(sources, data_id)?;
                Factory::CategoricalBinary(CategoricalBinaryFactory::new(data_id, src, class_label)?)
            }
            FactoryConfig::Tensor { child1_key, child2_key } => {
                let c1 = lookup_factory(&by_key, child1_key)?;
                let c2 = lookup_factory(&by_key, child2_key)?;
                Factory::Tensor(TensorFactory::new(c1, c2)?)
            }
            FactoryConfig::Centered { child1_key, child2_key } => {
                let c1 = lookup_factory(&by_key, child1_key)?;
                let c2 = lookup_factory(&by_key, child2_key)?;
                Factory::Centered(CenteredFactory::new(c1, c2)?)
            }
        };
        let key = factory.key();
        if by_key.contains_key(&key) {
            return Err(ConfigError::DuplicateFactoryKey { key }.into());
        }
        by_key.insert(key, factory.clone());
        registry.push(factory);
    }
    Ok(registry)
}

fn lookup<'a>(sources: &'a HashMap<String, FeatureSource>, data_id: &str) -> Result<&'a FeatureSource, BoostError> {
    sources
        .get(data_id)
        .ok_or_else(|| crate::error::LookupError::DataIdNotFound { data_id: data_id.to_string() }.into())
}

fn lookup_factory(by_key: &HashMap<String, Factory>, key: &str) -> Result<Factory, BoostError> {
    by_key
        .get(key)
        .cloned()
        .ok_or_else(|| crate::error::LookupError::FactoryNotFound { key: key.to_string() }.into())
}

pub fn build_logger_list(configs: &[LoggerConfig]) -> Result<LoggerList, BoostError> {
    let mut list = LoggerList::new();
    for cfg in configs {
        list.push(cfg.build())?;
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_factories_resolves_tensor_children_in_order() {
        let mut sources = HashMap::new();
        sources.insert(
            "x1".to_string(),
            FeatureSource::Numeric { data_id: "x1".to_string(), values: vec![1.0, 2.0, 3.0, 4.0] },
        );
        sources.insert(
            "x2".to_string(),
            FeatureSource::Numeric { data_id: "x2".to_string(), values: vec![4.0, 3.0, 2.0, 1.0] },
        );
        let configs = vec![
            FactoryConfig::Polynomial { data_id: "x1".to_string(), degree: 1, intercept: true, bin_root: 0 },
            FactoryConfig::Polynomial { data_id: "x2".to_string(), degree: 1, intercept: true, bin_root: 0 },
            FactoryConfig::Tensor { child1_key: "x1_polynomial".to_string(), child2_key: "x2_polynomial".to_string() },
        ];
        let registry = build_factories(&configs, &sources).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(matches!(registry[2], Factory::Tensor(_)));
    }

    #[test]
    fn build_factories_rejects_unknown_data_id() {
        let sources = HashMap::new();
        let configs = vec![FactoryConfig::Polynomial { data_id: "missing".to_string(), degree: 1, intercept: true, bin_root: 0 }];
        assert!(build_factories(&configs, &sources).is_err());
    }
}
