//! Optimizer
//!
//! At each iteration, `find_best` asks every factory in the registry for a
//! fresh [`BaseLearner`] trained on the current pseudo-residuals and keeps the
//! one with the smallest sum of squared residuals, breaking ties by the
//! factory's position in the registry (insertion order) so the sequential and
//! parallel paths agree exactly. `step_size` then decides how far to move
//! along the winner's prediction: a constant `1.0` for [`Optimizer::Greedy`],
//! or a Brent-minimized line search for [`Optimizer::GreedyLineSearch`].

#![forbid(unsafe_code)]

use nalgebra::DVector;
use rayon::prelude::*;

use crate::error::BoostError;
use crate::factory::Factory;
use crate::kernels;
use crate::learner::BaseLearner;
use crate::loss::Loss;
use crate::response::Response;

/// The winning factory's key, its fitted learner, and the SSE it achieved
/// against the residuals it was asked to fit.
pub struct Selection<'a> {
    pub key: String,
    pub learner: BaseLearner<'a>,
    pub sse: f64,
}

/// Coordinate-descent selection strategy, with an optional per-step line
/// search for the shrinkage factor `s_m`.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub enum Optimizer {
    /// Step size is always `1.0`.
    Greedy,
    /// Step size minimizes `phi(s) = mean_i L(y_i, f_i + s b_i)` via Brent's
    /// method on `[0, 100]`.
    GreedyLineSearch,
}

fn sse(residuals: &DVector<f64>, pred: &DVector<f64>) -> f64 {
    residuals.iter().zip(pred.iter()).map(|(&r, &p)| (r - p) * (r - p)).sum()
}

impl Optimizer {
    /// Train every factory's fresh learner against `residuals` and keep the
    /// smallest-SSE winner, breaking ties by registry (insertion) order.
    pub fn find_best<'a>(
        &self,
        residuals: &DVector<f64>,
        factories: &'a [Factory],
    ) -> Result<Selection<'a>, BoostError> {
        let mut best: Option<Selection<'a>> = None;
        for factory in factories {
            let mut learner = factory.new_learner();
            let key = factory.key();
            learner.train(residuals, &key)?;
            let pred = learner.predict();
            let candidate_sse = sse(residuals, &pred);
            let replace = match &best {
                None => true,
                Some(current) => candidate_sse < current.sse,
            };
            if replace {
                best = Some(Selection { key, learner, sse: candidate_sse });
            }
        }
        best.ok_or_else(|| {
            crate::error::LookupError::FactoryNotFound { key: "<empty registry>".to_string() }.into()
        })
    }

    /// Parallel variant of [`find_best`](Self::find_best): every factory's
    /// candidate learner is trained on a separate thread (rayon `par_iter`
    /// over read-shared `factories`/`residuals`, each writing only into its
    /// own private learner), then reduced by smallest SSE with a stable
    /// tie-break on index so the result is identical to the sequential path.
    pub fn find_best_parallel<'a>(
        &self,
        residuals: &DVector<f64>,
        factories: &'a [Factory],
    ) -> Result<Selection<'a>, BoostError> {
        let candidates: Result<Vec<Selection<'a>>, BoostError> = factories
            .par_iter()
            .map(|factory| {
                let mut learner = factory.new_learner();
                let key = factory.key();
                learner.train(residuals, &key)?;
                let pred = learner.predict();
                let candidate_sse = sse(residuals, &pred);
                Ok(Selection { key, learner, sse: candidate_sse })
            })
            .collect();
        let candidates = candidates?;
        candidates
            .into_iter()
            .enumerate()
            .fold(None, |best: Option<(usize, Selection<'a>)>, (idx, cand)| match best {
                None => Some((idx, cand)),
                Some((bi, b)) => {
                    if cand.sse < b.sse {
                        Some((idx, cand))
                    } else {
                        Some((bi, b))
                    }
                }
            })
            .map(|(_, s)| s)
            .ok_or_else(|| {
                crate::error::LookupError::FactoryNotFound { key: "<empty registry>".to_string() }.into()
            })
    }

    /// `s_m`: `1.0` for [`Optimizer::Greedy`], a Brent-minimized line search
    /// for [`Optimizer::GreedyLineSearch`].
    pub fn step_size(&self, loss: &Loss, response: &Response, candidate_pred: &DVector<f64>) -> f64 {
        match self {
            Optimizer::Greedy => 1.0,
            Optimizer::GreedyLineSearch => {
                let y = &response.y;
                let f = &response.prediction;
                let n = y.len() as f64;
                let phi = |s: f64| -> f64 {
                    y.iter()
                        .zip(f.iter())
                        .zip(candidate_pred.iter())
                        .map(|((&yi, &fi), &bi)| loss.pointwise(yi, fi + s * bi))
                        .sum::<f64>()
                        / n
                };
                kernels::brent_minimize(phi, 0.0, 100.0, 500)
            }
        }
    }

    /// `nu * s * candidate_pred`, the delta applied to the running prediction.
    pub fn apply_update(&self, nu: f64, s: f64, candidate_pred: &DVector<f64>) -> DVector<f64> {
        candidate_pred * (nu * s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureSource;
    use crate::factory::PolynomialFactory;
    use crate::response::Task;

    fn poly_factory(data_id: &str, x: Vec<f64>) -> Factory {
        let src = FeatureSource::Numeric { data_id: data_id.to_string(), values: x };
        Factory::Polynomial(PolynomialFactory::new(data_id, &src, 1, true, 0).unwrap())
    }

    #[test]
    fn find_best_picks_lower_sse_factory() {
        let x_good = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let residuals = DVector::from_vec(vec![2.0, 4.0, 6.0, 8.0, 10.0]);
        let noisy = vec![5.0, 1.0, 4.0, 2.0, 3.0];

        let good = poly_factory("x_good", x_good);
        let bad = poly_factory("x_bad", noisy);
        let factories = vec![bad, good];

        let opt = Optimizer::Greedy;
        let best = opt.find_best(&residuals, &factories).unwrap();
        assert_eq!(best.key, "x_good_polynomial");
    }

    #[test]
    fn greedy_step_size_is_always_one() {
        let opt = Optimizer::Greedy;
        let loss = Loss::quadratic();
        let response = Response::new(vec![1.0, 2.0, 3.0], Task::Regression);
        let pred = DVector::from_vec(vec![0.1, 0.1, 0.1]);
        assert_eq!(opt.step_size(&loss, &response, &pred), 1.0);
    }

    #[test]
    fn line_search_improves_on_unit_step_for_overshooting_candidate() {
        let opt = Optimizer::GreedyLineSearch;
        let loss = Loss::quadratic();
        let mut response = Response::new(vec![1.0, 1.0, 1.0], Task::Regression);
        response.prediction = DVector::from_vec(vec![0.0, 0.0, 0.0]);
        let overshoot = DVector::from_vec(vec![2.0, 2.0, 2.0]);
        let s = opt.step_size(&loss, &response, &overshoot);
        assert!((s - 0.5).abs() < 1e-3);
    }
}
