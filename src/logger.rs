//! Loggers & logger list
//!
//! Every [`Logger`] appends one numeric observation per completed iteration
//! and may independently request that training stop. [`LoggerList`] holds an
//! ordered registry of them and combines their stop votes according to the
//! `stop_if_all` strategy: all stoppers must fire under "all", any one
//! stopper firing is enough under "any".

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::Instant;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::data::{DesignData, FeatureSource};
use crate::error::BoostError;
use crate::factory::Factory;
use crate::loss::Loss;
use crate::optimizer::Optimizer;
use crate::response::{Response, Task};

/// Unit a [`Logger::Time`] measures wall-clock elapsed time in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Minutes,
    Seconds,
    Microseconds,
}

impl TimeUnit {
    fn scale(self) -> f64 {
        match self {
            TimeUnit::Minutes => 1.0 / 60.0,
            TimeUnit::Seconds => 1.0,
            TimeUnit::Microseconds => 1_000_000.0,
        }
    }
}

/// Patience-counter bookkeeping shared by the inbag and OOB risk loggers:
/// relative improvement below `eps` increments the counter, any bigger
/// improvement resets it, and the logger stops once the counter reaches
/// `patience`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PatienceState {
    eps: f64,
    patience: usize,
    counter: usize,
}

impl PatienceState {
    fn new(eps: f64, patience: usize) -> Self {
        PatienceState { eps, patience, counter: 0 }
    }

    fn observe(&mut self, log: &[f64]) {
        if log.len() < 2 {
            return;
        }
        let prev = log[log.len() - 2];
        let cur = log[log.len() - 1];
        let rel_improvement = if prev.abs() > 0.0 { (prev - cur) / prev } else { 0.0 };
        if rel_improvement < self.eps {
            self.counter += 1;
        } else {
            self.counter = 0;
        }
    }

    fn fired(&self) -> bool {
        self.counter >= self.patience
    }

    fn clear(&mut self) {
        self.counter = 0;
    }
}

/// Held-out state lazily built by [`Logger::OobRisk`] the first time each
/// factory key is observed, then reused for every later iteration; no
/// eviction, per the single-threaded cooperative scheduling model.
#[derive(Debug, Clone, Default)]
struct OobCache {
    response: Option<Response>,
    designs: HashMap<String, DesignData>,
}

/// One logger, tagged by kind. `is_stopper` marks whether it participates in
/// [`LoggerList::should_stop`]'s vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub id: String,
    pub is_stopper: bool,
    pub kind: LoggerKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LoggerKind {
    Iteration {
        max_iter: usize,
        log: Vec<f64>,
    },
    Time {
        unit: TimeUnit,
        max_time: f64,
        #[serde(skip)]
        init_time: Option<Instant>,
        retrain_drift: f64,
        log: Vec<f64>,
    },
    InbagRisk {
        loss: Loss,
        patience: PatienceState,
        log: Vec<f64>,
    },
    OobRisk {
        loss: Loss,
        patience: PatienceState,
        oob_sources: HashMap<String, FeatureSource>,
        oob_y: Vec<f64>,
        #[serde(skip)]
        cache: OobCache,
        log: Vec<f64>,
    },
}

impl Logger {
    pub fn iteration(id: &str, is_stopper: bool, max_iter: usize) -> Self {
        Logger { id: id.to_string(), is_stopper, kind: LoggerKind::Iteration { max_iter, log: Vec::new() } }
    }

    pub fn time(id: &str, is_stopper: bool, unit: TimeUnit, max_time: f64) -> Self {
        Logger {
            id: id.to_string(),
            is_stopper,
            kind: LoggerKind::Time { unit, max_time, init_time: None, retrain_drift: 0.0, log: Vec::new() },
        }
    }

    pub fn inbag_risk(id: &str, is_stopper: bool, loss: Loss, eps: f64, patience: usize) -> Self {
        Logger {
            id: id.to_string(),
            is_stopper,
            kind: LoggerKind::InbagRisk { loss, patience: PatienceState::new(eps, patience), log: Vec::new() },
        }
    }

    pub fn oob_risk(
        id: &str,
        is_stopper: bool,
        loss: Loss,
        eps: f64,
        patience: usize,
        oob_sources: HashMap<String, FeatureSource>,
        oob_y: Vec<f64>,
    ) -> Self {
        Logger {
            id: id.to_string(),
            is_stopper,
            kind: LoggerKind::OobRisk {
                loss,
                patience: PatienceState::new(eps, patience),
                oob_sources,
                oob_y,
                cache: OobCache::default(),
                log: Vec::new(),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_step(
        &mut self,
        iter: usize,
        response: &Response,
        selected_key: &str,
        selected_theta: &DVector<f64>,
        nu: f64,
        s: f64,
        optimizer: &Optimizer,
        factories: &[Factory],
    ) -> Result<(), BoostError> {
        match &mut self.kind {
            LoggerKind::Iteration { log, .. } => {
                log.push(iter as f64);
            }
            LoggerKind::Time { unit, init_time, retrain_drift, log, .. } => {
                let t0 = *init_time.get_or_insert_with(Instant::now);
                let elapsed = t0.elapsed().as_secs_f64() * unit.scale();
                log.push(elapsed + *retrain_drift);
            }
            LoggerKind::InbagRisk { loss, patience, log } => {
                log.push(response.empirical_risk(loss));
                patience.observe(log);
            }
            LoggerKind::OobRisk { loss, patience, oob_sources, oob_y, cache, log } => {
                if cache.response.is_none() {
                    let task = if matches!(loss, Loss::Binomial { .. }) {
                        Task::BinaryClassification
                    } else {
                        Task::Regression
                    };
                    let mut held_out = Response::new(oob_y.clone(), task);
                    held_out.constant_initialization(loss);
                    cache.response = Some(held_out);
                }
                let factory = factories
                    .iter()
                    .find(|f| f.key() == selected_key)
                    .ok_or_else(|| crate::error::LookupError::FactoryNotFound { key: selected_key.to_string() })?;
                if !cache.designs.contains_key(selected_key) {
                    let design = factory.instantiate(oob_sources)?;
                    cache.designs.insert(selected_key.to_string(), design);
                }
                let design = &cache.designs[selected_key];
                let candidate_pred = design.design.predict(selected_theta);
                let delta = optimizer.apply_update(nu, s, &candidate_pred);

                let held_out = cache.response.as_mut().expect("initialized above");
                held_out.update_prediction(&delta);
                log.push(held_out.empirical_risk(loss));
                patience.observe(log);
            }
        }
        Ok(())
    }

    pub fn reached_stop_criteria(&self) -> bool {
        match &self.kind {
            LoggerKind::Iteration { max_iter, log } => log.last().copied().unwrap_or(0.0) as usize >= *max_iter,
            LoggerKind::Time { max_time, log, .. } => log.last().copied().unwrap_or(0.0) >= *max_time,
            LoggerKind::InbagRisk { patience, .. } => patience.fired(),
            LoggerKind::OobRisk { patience, .. } => patience.fired(),
        }
    }

    pub fn logged_data(&self) -> &[f64] {
        match &self.kind {
            LoggerKind::Iteration { log, .. } => log,
            LoggerKind::Time { log, .. } => log,
            LoggerKind::InbagRisk { log, .. } => log,
            LoggerKind::OobRisk { log, .. } => log,
        }
    }

    pub fn clear(&mut self) {
        match &mut self.kind {
            LoggerKind::Iteration { log, .. } => log.clear(),
            LoggerKind::Time { log, init_time, retrain_drift, .. } => {
                log.clear();
                *init_time = None;
                *retrain_drift = 0.0;
            }
            LoggerKind::InbagRisk { log, patience, .. } => {
                log.clear();
                patience.clear();
            }
            LoggerKind::OobRisk { log, patience, .. } => {
                log.clear();
                patience.clear();
            }
        }
    }

    /// Rewind to the state after `k` completed iterations: truncates `log` to
    /// `k` entries and, for the risk loggers, clears the patience counter
    /// rather than replaying `observe` over the remaining history.
    pub fn truncate_to(&mut self, k: usize) {
        match &mut self.kind {
            LoggerKind::Iteration { log, .. } => log.truncate(k),
            LoggerKind::Time { log, .. } => log.truncate(k),
            LoggerKind::InbagRisk { log, patience, .. } => {
                log.truncate(k);
                patience.clear();
            }
            LoggerKind::OobRisk { log, patience, cache, .. } => {
                log.truncate(k);
                patience.clear();
                *cache = OobCache::default();
            }
        }
    }

    /// Re-base on `continue_training`: the iteration logger's ceiling rises,
    /// and the time logger folds its last reading into `retrain_drift` and
    /// restarts its clock so elapsed time keeps accumulating across the call.
    pub fn rebase_for_continue(&mut self, additional_max: Option<usize>) {
        match &mut self.kind {
            LoggerKind::Iteration { max_iter, .. } => {
                if let Some(add) = additional_max {
                    *max_iter += add;
                }
            }
            LoggerKind::Time { init_time, retrain_drift, log, .. } => {
                *retrain_drift += log.last().copied().unwrap_or(0.0);
                *init_time = None;
            }
            _ => {}
        }
    }
}

/// Ordered registry of [`Logger`]s plus a running count of stoppers.
/// Serializes as a plain list; `index`/`n_stoppers` are rebuilt on load by
/// replaying [`LoggerList::push`] for each entry.
#[derive(Debug, Clone, Default)]
pub struct LoggerList {
    loggers: Vec<Logger>,
    index: HashMap<String, usize>,
    n_stoppers: usize,
}

impl Serialize for LoggerList {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.loggers.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LoggerList {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let loggers = Vec::<Logger>::deserialize(deserializer)?;
        let mut list = LoggerList::new();
        for logger in loggers {
            list.push(logger).map_err(serde::de::Error::custom)?;
        }
        Ok(list)
    }
}

impl LoggerList {
    pub fn new() -> Self {
        LoggerList { loggers: Vec::new(), index: HashMap::new(), n_stoppers: 0 }
    }

    pub fn push(&mut self, logger: Logger) -> Result<(), crate::error::ConfigError> {
        if self.index.contains_key(&logger.id) {
            return Err(crate::error::ConfigError::DuplicateFactoryKey { key: logger.id.clone() });
        }
        if logger.is_stopper {
            self.n_stoppers += 1;
        }
        self.index.insert(logger.id.clone(), self.loggers.len());
        self.loggers.push(logger);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Logger> {
        self.index.get(id).map(|&i| &self.loggers[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Logger> {
        self.loggers.iter()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_step(
        &mut self,
        iter: usize,
        response: &Response,
        selected_key: &str,
        selected_theta: &DVector<f64>,
        nu: f64,
        s: f64,
        optimizer: &Optimizer,
        factories: &[Factory],
    ) -> Result<(), BoostError> {
        for logger in &mut self.loggers {
            logger.log_step(iter, response, selected_key, selected_theta, nu, s, optimizer, factories)?;
        }
        Ok(())
    }

    /// `(global && all stoppers fired) || (!global && any stopper fired)`.
    pub fn should_stop(&self, global: bool) -> bool {
        if self.n_stoppers == 0 {
            return false;
        }
        let stoppers = self.loggers.iter().filter(|l| l.is_stopper);
        if global {
            stoppers.map(|l| l.reached_stop_criteria()).all(|fired| fired)
        } else {
            stoppers.map(|l| l.reached_stop_criteria()).any(|fired| fired)
        }
    }

    pub fn rebase_for_continue(&mut self, iteration_ceiling_increment: Option<usize>) {
        for logger in &mut self.loggers {
            logger.rebase_for_continue(iteration_ceiling_increment);
        }
    }

    /// Rewind every logger to the state after `k` completed iterations.
    pub fn truncate_to(&mut self, k: usize) {
        for logger in &mut self.loggers {
            logger.truncate_to(k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_logger_stops_exactly_at_max() {
        let mut logger = Logger::iteration("iters", true, 3);
        let response = Response::new(vec![1.0], Task::Regression);
        let optimizer = Optimizer::Greedy;
        let theta = DVector::from_vec(vec![0.0]);
        for i in 1..=3 {
            logger.log_step(i, &response, "k", &theta, 1.0, 1.0, &optimizer, &[]).unwrap();
        }
        assert!(logger.reached_stop_criteria());
        assert_eq!(logger.logged_data(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn logger_list_all_vs_any_stop_semantics() {
        let mut list = LoggerList::new();
        list.push(Logger::iteration("a", true, 2)).unwrap();
        list.push(Logger::iteration("b", true, 4)).unwrap();
        let response = Response::new(vec![1.0], Task::Regression);
        let optimizer = Optimizer::Greedy;
        let theta = DVector::from_vec(vec![0.0]);

        for i in 1..=2 {
            list.log_step(i, &response, "k", &theta, 1.0, 1.0, &optimizer, &[]).unwrap();
        }
        assert!(!list.should_stop(true));
        assert!(list.should_stop(false));

        for i in 3..=4 {
            list.log_step(i, &response, "k", &theta, 1.0, 1.0, &optimizer, &[]).unwrap();
        }
        assert!(list.should_stop(true));
    }

    #[test]
    fn inbag_risk_logger_patience_counter_fires() {
        let loss = Loss::quadratic();
        let mut logger = Logger::inbag_risk("risk", true, loss, 0.5, 2);
        let mut response = Response::new(vec![1.0, 2.0], Task::Regression);
        response.prediction = DVector::from_vec(vec![1.0, 2.0]);
        let optimizer = Optimizer::Greedy;
        let theta = DVector::from_vec(vec![0.0]);
        for i in 1..=3 {
            logger.log_step(i, &response, "k", &theta, 1.0, 1.0, &optimizer, &[]).unwrap();
        }
        assert!(logger.reached_stop_criteria());
    }
}
