//! Coordinator
//!
//! Wires numeric kernels, data objects, factories, the optimizer, the
//! parameter tracker, and the logger list into the stagewise fit loop, and
//! exposes the model's public surface: `train`, `continue_training`,
//! `predict`, `predict_at_iteration`, `set_to_iteration`. Every fallible step
//! returns [`BoostError`] and leaves the coordinator in its last-good state
//! rather than panicking mid-iteration.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use nalgebra::DVector;
use tracing::{info, instrument, warn};

use crate::config::{build_factories, build_logger_list, CoordinatorConfig};
use crate::data::FeatureSource;
use crate::error::{BoostError, RangeError};
use crate::factory::Factory;
use crate::logger::LoggerList;
use crate::loss::Loss;
use crate::optimizer::Optimizer;
use crate::response::{Response, Task};
use crate::tracker::ParameterTracker;

pub struct Coordinator {
    pub(crate) response: Response,
    pub(crate) optimizer: Optimizer,
    pub(crate) loss: Loss,
    pub(crate) factories: Vec<Factory>,
    pub(crate) tracker: ParameterTracker,
    pub(crate) loggers: LoggerList,
    pub(crate) nu: f64,
    pub(crate) current_iter: usize,
    pub(crate) risk_history: Vec<f64>,
    pub(crate) stop_if_all: bool,
    trained: bool,
}

impl Coordinator {
    /// Build a coordinator from a [`CoordinatorConfig`] and a training
    /// [`FeatureSource`] registry keyed by `data_id`. Validates the config,
    /// the factory registry, and the response's labels against the loss
    /// before returning.
    #[instrument(skip(config, sources, y), fields(n_factories = config.factories.len()))]
    pub fn from_config(config: &CoordinatorConfig, sources: &HashMap<String, FeatureSource>, y: Vec<f64>) -> Result<Self, BoostError> {
        config.validate()?;
        let loss = config.loss.build();
        loss.validate_labels(&y)?;
        if let Some(offset) = config.loss.optional_offset {
            loss.validate_offset(offset)?;
        }
        let task = if matches!(loss, Loss::Binomial { .. }) { Task::BinaryClassification } else { Task::Regression };

        let factories = build_factories(&config.factories, sources)?;
        let loggers = build_logger_list(&config.loggers)?;
        let optimizer: Optimizer = config.optimizer.into();

        info!(n_factories = factories.len(), learning_rate = config.learning_rate, "coordinator initialized");

        Ok(Coordinator {
            response: Response::new(y, task),
            optimizer,
            loss,
            factories,
            tracker: ParameterTracker::new(),
            loggers,
            nu: config.learning_rate,
            current_iter: 0,
            risk_history: Vec::new(),
            stop_if_all: config.stop_if_all,
            trained: false,
        })
    }

    pub fn current_iteration(&self) -> usize {
        self.current_iter
    }

    pub fn risk_history(&self) -> &[f64] {
        &self.risk_history
    }

    pub fn parameter_matrix(&self) -> (Vec<String>, Vec<Vec<f64>>) {
        self.tracker.parameter_matrix()
    }

    /// Run the fit loop until `current_iter == m` or the logger list votes to
    /// stop. One step: update pseudo-residuals, let the optimizer pick and
    /// train the best factory, shrink by `nu * s_m`, accumulate into the
    /// tracker, log, repeat.
    #[instrument(skip(self), fields(m))]
    pub fn train(&mut self, m: usize) -> Result<(), BoostError> {
        if !self.trained {
            self.response.constant_initialization(&self.loss);
            self.response.initialize_prediction();
            self.risk_history = vec![self.response.empirical_risk(&self.loss)];
            self.trained = true;
        }

        while self.current_iter < m && !self.loggers.should_stop(self.stop_if_all) {
            self.response.update_pseudo_residuals(&self.loss);
            let selection = self.optimizer.find_best(&self.response.pseudo_residuals, &self.factories)?;
            let key = selection.key;
            let pred = selection.learner.predict();
            let theta = selection.learner.theta().clone();
            drop(selection.learner);

            let s = self.optimizer.step_size(&self.loss, &self.response, &pred);
            let delta = self.optimizer.apply_update(self.nu, s, &pred);
            self.response.update_prediction(&delta);

            let theta_delta = &theta * (self.nu * s);
            self.tracker.insert(key.clone(), theta_delta);

            self.current_iter += 1;
            self.risk_history.push(self.response.empirical_risk(&self.loss));
            self.loggers.log_step(self.current_iter, &self.response, &key, &theta, self.nu, s, &self.optimizer, &self.factories)?;
        }
        info!(current_iter = self.current_iter, target = m, "train loop finished");
        Ok(())
    }

    /// Resume training for `m_additional` more iterations, re-basing any
    /// logger state that depends on wall-clock or iteration ceiling (time
    /// logger drift, iteration logger's max) so it accumulates across calls.
    pub fn continue_training(&mut self, m_additional: usize) -> Result<(), BoostError> {
        self.loggers.rebase_for_continue(Some(m_additional));
        let target = self.current_iter + m_additional;
        self.train(target)
    }

    /// `f0 + sum_key factories[key].linear_predictor_new(theta_key, new_sources)`.
    pub fn predict(&self, new_sources: &HashMap<String, FeatureSource>, as_response: bool) -> Result<DVector<f64>, BoostError> {
        self.predict_from_map(self.tracker.accumulated(), new_sources, as_response)
    }

    /// Replay the first `k` tracker entries and predict from that prefix.
    pub fn predict_at_iteration(
        &self,
        new_sources: &HashMap<String, FeatureSource>,
        k: usize,
        as_response: bool,
    ) -> Result<DVector<f64>, BoostError> {
        let map = self.tracker.parameters_at_iteration(k)?;
        self.predict_from_map(&map, new_sources, as_response)
    }

    fn predict_from_map(
        &self,
        map: &HashMap<String, DVector<f64>>,
        new_sources: &HashMap<String, FeatureSource>,
        as_response: bool,
    ) -> Result<DVector<f64>, BoostError> {
        let n = new_sources.values().next().map(|s| s.len()).unwrap_or(0);
        let mut out = DVector::from_element(n, self.response.f0);
        for (key, theta) in map {
            let factory = self
                .factories
                .iter()
                .find(|f| &f.key() == key)
                .ok_or_else(|| crate::error::LookupError::FactoryNotFound { key: key.clone() })?;
            let contribution = factory.linear_predictor_new(theta, new_sources)?;
            out += &contribution;
        }
        if as_response {
            out = DVector::from_iterator(out.len(), out.iter().map(|&f| self.loss.response_transform(f)));
        }
        Ok(out)
    }

    /// Rewind the accumulated coefficient map and in-sample prediction/risk
    /// history to iteration `k`. `k` may be any value in `0..=current_iter`.
    pub fn set_to_iteration(&mut self, k: usize) -> Result<(), BoostError> {
        if k > self.current_iter {
            return Err(RangeError::IterationOutOfRange { k, len: self.current_iter }.into());
        }
        self.tracker.set_to_iteration(k)?;
        self.response.initialize_prediction();
        for (key, theta) in self.tracker.accumulated().clone() {
            let factory = self
                .factories
                .iter()
                .find(|f| f.key() == key)
                .ok_or_else(|| crate::error::LookupError::FactoryNotFound { key: key.clone() })?;
            let contribution = factory.linear_predictor_train(&theta);
            self.response.update_prediction(&contribution);
        }
        self.current_iter = k;
        self.risk_history.truncate(k + 1);
        if self.risk_history.len() <= k {
            self.risk_history.push(self.response.empirical_risk(&self.loss));
        }
        self.loggers.truncate_to(k);
        warn!(k, "coordinator rewound to earlier iteration; subsequent train() calls resume from here");
        Ok(())
    }

    /// Flatten the tracker's append-only log for JSON export.
    pub fn tracker_entries_for_json(&self) -> Vec<(String, Vec<f64>)> {
        self.tracker
            .entries_slice()
            .iter()
            .map(|e| (e.key.clone(), e.delta.iter().copied().collect()))
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        nu: f64,
        stop_if_all: bool,
        current_iter: usize,
        f0: f64,
        task: Task,
        loss: Loss,
        optimizer: Optimizer,
        loggers: LoggerList,
        risk_history: Vec<f64>,
        factories: Vec<Factory>,
        tracker_entries: Vec<(String, DVector<f64>)>,
    ) -> Self {
        let mut tracker = ParameterTracker::new();
        for (key, delta) in tracker_entries {
            tracker.insert(key, delta);
        }
        let mut response = Response::new(vec![], task);
        response.f0 = f0;
        Coordinator {
            response,
            optimizer,
            loss,
            factories,
            tracker,
            loggers,
            nu,
            current_iter,
            risk_history,
            stop_if_all,
            trained: current_iter > 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheTagConfig, FactoryConfig, LoggerConfig, LoggerConfigKind, LossConfig, LossKind, OptimizerConfig};

    fn xy_line() -> (HashMap<String, FeatureSource>, Vec<f64>) {
        let x: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 2.0 + 3.0 * xi).collect();
        let mut sources = HashMap::new();
        sources.insert("x".to_string(), FeatureSource::Numeric { data_id: "x".to_string(), values: x });
        (sources, y)
    }

    fn base_config(m: usize, learning_rate: f64) -> CoordinatorConfig {
        CoordinatorConfig {
            learning_rate,
            stop_if_all: true,
            m,
            factories: vec![FactoryConfig::Polynomial { data_id: "x".to_string(), degree: 1, intercept: true, bin_root: 0 }],
            loss: LossConfig { kind: LossKind::Quadratic, optional_offset: None },
            optimizer: OptimizerConfig::Greedy,
            loggers: vec![LoggerConfig { id: "iters".to_string(), is_stopper: true, kind: LoggerConfigKind::Iteration { max_iter: m } }],
        }
    }

    #[test]
    fn scenario_1_quadratic_slope_only_recovers_ols() {
        let (sources, y) = xy_line();
        let config = base_config(1, 1.0);
        let mut coord = Coordinator::from_config(&config, &sources, y).unwrap();
        coord.train(1).unwrap();

        let theta = &coord.tracker.accumulated()["x_polynomial"];
        assert!((theta[0] - 2.0).abs() < 1e-8);
        assert!((theta[1] - 3.0).abs() < 1e-8);
        assert!(coord.risk_history()[1] < 1e-6);
    }

    #[test]
    fn scenario_2_shrinkage_scales_theta_by_nu() {
        let (sources, y) = xy_line();
        let config = base_config(1, 0.1);
        let mut coord = Coordinator::from_config(&config, &sources, y).unwrap();
        coord.train(1).unwrap();

        let theta = &coord.tracker.accumulated()["x_polynomial"];
        assert!((theta[0] - 0.2).abs() < 1e-8);
        assert!((theta[1] - 0.3).abs() < 1e-8);
    }

    #[test]
    fn set_to_iteration_matches_end_of_train_prediction() {
        let (sources, y) = xy_line();
        let config = base_config(5, 1.0);
        let mut coord = Coordinator::from_config(&config, &sources, y).unwrap();
        coord.train(5).unwrap();
        let pred_end = coord.response.prediction.clone();

        coord.set_to_iteration(5).unwrap();
        let pred_rewound = coord.predict(&sources, false).unwrap();

        for (a, b) in pred_end.iter().zip(pred_rewound.iter()) {
            assert!((a - b).abs() < 1e-8, "a={a} b={b}");
        }
    }

    #[test]
    fn tracker_replay_equals_fresh_train_to_same_iteration() {
        let (sources, y) = xy_line();
        let config = base_config(6, 0.5);
        let mut coord_a = Coordinator::from_config(&config, &sources, y.clone()).unwrap();
        coord_a.train(3).unwrap();
        let replayed = coord_a.tracker.parameters_at_iteration(3).unwrap();

        let config_fresh = base_config(3, 0.5);
        let mut coord_b = Coordinator::from_config(&config_fresh, &sources, y).unwrap();
        coord_b.train(3).unwrap();

        for (key, theta) in &replayed {
            let theta_b = &coord_b.tracker.accumulated()[key];
            assert!((theta - theta_b).norm() < 1e-8);
        }
    }

    #[test]
    fn pspline_df_calibration_fits_nonlinear_signal() {
        let x: Vec<f64> = (0..60).map(|i| i as f64 / 6.0).collect();
        let y: Vec<f64> = x.iter().map(|&xi| xi.sin()).collect();
        let mut sources = HashMap::new();
        sources.insert("x".to_string(), FeatureSource::Numeric { data_id: "x".to_string(), values: x });

        let config = CoordinatorConfig {
            learning_rate: 0.3,
            stop_if_all: true,
            m: 100,
            factories: vec![FactoryConfig::PSpline {
                data_id: "x".to_string(),
                degree: 3,
                n_knots: 12,
                penalty: None,
                df: Some(5.0),
                differences: 2,
                bin_root: 0,
                cache_tag: CacheTagConfig::Cholesky,
            }],
            loss: LossConfig { kind: LossKind::Quadratic, optional_offset: None },
            optimizer: OptimizerConfig::Greedy,
            loggers: vec![LoggerConfig { id: "iters".to_string(), is_stopper: true, kind: LoggerConfigKind::Iteration { max_iter: 100 } }],
        };
        let mut coord = Coordinator::from_config(&config, &sources, y).unwrap();
        let risk_before = coord.risk_history.first().copied();
        coord.train(100).unwrap();
        let risk_after = *coord.risk_history().last().unwrap();
        assert!(risk_after < risk_before.unwrap() * 0.1);
    }

    #[test]
    fn json_round_trip_preserves_predictions() {
        let (sources, y) = xy_line();
        let config = base_config(4, 0.5);
        let mut coord = Coordinator::from_config(&config, &sources, y).unwrap();
        coord.train(4).unwrap();
        let before = coord.predict(&sources, false).unwrap();

        let value = crate::json::coordinator_to_json(&coord);
        let restored = crate::json::coordinator_from_json(&value).unwrap();
        let after = restored.predict(&sources, false).unwrap();

        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-8, "a={a} b={b}");
        }
        assert_eq!(restored.current_iteration(), coord.current_iteration());
    }

    #[test]
    fn binomial_classification_predicts_in_unit_interval() {
        let x: Vec<f64> = (0..20).map(|i| i as f64 - 10.0).collect();
        let y: Vec<f64> = x.iter().map(|&xi| if xi > 0.0 { 1.0 } else { -1.0 }).collect();
        let mut sources = HashMap::new();
        sources.insert("x".to_string(), FeatureSource::Numeric { data_id: "x".to_string(), values: x });

        let config = CoordinatorConfig {
            learning_rate: 0.1,
            stop_if_all: true,
            m: 50,
            factories: vec![
                FactoryConfig::Polynomial { data_id: "x".to_string(), degree: 1, intercept: true, bin_root: 0 },
                FactoryConfig::PSpline {
                    data_id: "x".to_string(),
                    degree: 3,
                    n_knots: 5,
                    penalty: Some(1.0),
                    df: None,
                    differences: 2,
                    bin_root: 0,
                    cache_tag: CacheTagConfig::Cholesky,
                },
            ],
            loss: LossConfig { kind: LossKind::Binomial, optional_offset: None },
            optimizer: OptimizerConfig::Greedy,
            loggers: vec![LoggerConfig { id: "iters".to_string(), is_stopper: true, kind: LoggerConfigKind::Iteration { max_iter: 50 } }],
        };
        let mut coord = Coordinator::from_config(&config, &sources, y).unwrap();
        coord.train(50).unwrap();
        let pred = coord.predict(&sources, true).unwrap();
        assert!(pred.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }
}
