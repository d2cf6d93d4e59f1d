//! Response
//!
//! Holds `y`, the current prediction, and the current pseudo-residuals.
//! `prediction.len() == y.len()` always; `pseudo_residuals` is the negative
//! gradient evaluated at the most recent `prediction`.

#![forbid(unsafe_code)]

use nalgebra::DVector;

use crate::loss::Loss;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Task {
    Regression,
    BinaryClassification,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub y: DVector<f64>,
    pub prediction: DVector<f64>,
    pub pseudo_residuals: DVector<f64>,
    pub task: Task,
    pub f0: f64,
}

impl Response {
    pub fn new(y: Vec<f64>, task: Task) -> Self {
        let n = y.len();
        Response {
            y: DVector::from_vec(y),
            prediction: DVector::zeros(n),
            pseudo_residuals: DVector::zeros(n),
            task,
            f0: 0.0,
        }
    }

    /// Set `f0` from the loss's constant initializer and broadcast it into
    /// `prediction`.
    pub fn constant_initialization(&mut self, loss: &Loss) {
        self.f0 = loss.constant_initializer(self.y.as_slice());
        self.initialize_prediction();
    }

    pub fn initialize_prediction(&mut self) {
        self.prediction = DVector::from_element(self.y.len(), self.f0);
    }

    pub fn update_prediction(&mut self, delta: &DVector<f64>) {
        self.prediction += delta;
    }

    pub fn update_pseudo_residuals(&mut self, loss: &Loss) {
        self.pseudo_residuals = DVector::from_iterator(
            self.y.len(),
            self.y
                .iter()
                .zip(self.prediction.iter())
                .map(|(&y, &f)| -loss.gradient(y, f)),
        );
    }

    pub fn empirical_risk(&self, loss: &Loss) -> f64 {
        let n = self.y.len() as f64;
        self.y
            .iter()
            .zip(self.prediction.iter())
            .map(|(&y, &f)| loss.pointwise(y, f))
            .sum::<f64>()
            / n
    }

    /// Current prediction, optionally passed through the loss's response
    /// transform (sigmoid for binomial, identity otherwise).
    pub fn get_prediction(&self, loss: &Loss, as_response: bool) -> DVector<f64> {
        if as_response {
            DVector::from_iterator(
                self.prediction.len(),
                self.prediction.iter().map(|&f| loss.response_transform(f)),
            )
        } else {
            self.prediction.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_initialization_sets_mean_for_quadratic() {
        let mut r = Response::new(vec![1.0, 2.0, 3.0], Task::Regression);
        let loss = Loss::quadratic();
        r.constant_initialization(&loss);
        assert!((r.f0 - 2.0).abs() < 1e-12);
        assert!(r.prediction.iter().all(|&v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn update_pseudo_residuals_is_negative_gradient() {
        let mut r = Response::new(vec![2.0, 4.0], Task::Regression);
        r.prediction = DVector::from_vec(vec![1.0, 1.0]);
        let loss = Loss::quadratic();
        r.update_pseudo_residuals(&loss);
        assert_eq!(r.pseudo_residuals, DVector::from_vec(vec![1.0, 3.0]));
    }
}
