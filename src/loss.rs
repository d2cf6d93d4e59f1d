//! Loss functions
//!
//! Three built-ins: quadratic, absolute, and binomial. Each exposes a
//! pointwise loss, its gradient, a constant-risk minimizer used to seed
//! `f0`, and the response-link transform applied when predictions are
//! requested "as response" rather than as the raw additive score.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::error::LabelError;

/// A loss function, with an optional fixed offset overriding the data-driven
/// constant initializer (mirrors every `Loss` subclass in the original
/// implementation carrying a `CustomOffset` flag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Loss {
    /// `L(y, f) = 1/2 (y - f)^2`.
    Quadratic { custom_offset: Option<f64> },
    /// `L(y, f) = |y - f|`.
    Absolute { custom_offset: Option<f64> },
    /// `L(y, f) = log(1 + exp(-2 y f))`, `y in {-1, +1}`.
    Binomial { custom_offset: Option<f64> },
}

impl Loss {
    pub fn quadratic() -> Self {
        Loss::Quadratic { custom_offset: None }
    }

    pub fn absolute() -> Self {
        Loss::Absolute { custom_offset: None }
    }

    pub fn binomial() -> Self {
        Loss::Binomial { custom_offset: None }
    }

    /// Validate `y` against this loss's label domain. Only binomial
    /// constrains labels, to `{-1, +1}`.
    pub fn validate_labels(&self, y: &[f64]) -> Result<(), LabelError> {
        if let Loss::Binomial { .. } = self {
            for (i, &yi) in y.iter().enumerate() {
                if (yi - 1.0).abs() > 1e-9 && (yi + 1.0).abs() > 1e-9 {
                    return Err(LabelError::NotBinaryLabel { value: yi, index: i });
                }
            }
        }
        Ok(())
    }

    /// Reject an offset whose magnitude is too large. Reproduces the
    /// original's `|offset| > 1` bound verbatim (flagged in the design notes
    /// as likely wrong for a log-odds quantity, which is unbounded) — the
    /// behavior is preserved on purpose, not fixed.
    pub fn validate_offset(&self, offset: f64) -> Result<(), LabelError> {
        if let Loss::Binomial { .. } = self {
            if offset.abs() > 1.0 {
                return Err(LabelError::OffsetOutOfBounds { offset });
            }
        }
        Ok(())
    }

    pub fn pointwise(&self, y: f64, f: f64) -> f64 {
        match self {
            Loss::Quadratic { .. } => 0.5 * (y - f) * (y - f),
            Loss::Absolute { .. } => (y - f).abs(),
            Loss::Binomial { .. } => (1.0 + (-2.0 * y * f).exp()).ln(),
        }
    }

    pub fn gradient(&self, y: f64, f: f64) -> f64 {
        match self {
            Loss::Quadratic { .. } => f - y,
            Loss::Absolute { .. } => -(y - f).signum(),
            Loss::Binomial { .. } => {
                let e = (-2.0 * y * f).exp();
                -2.0 * y * e / (1.0 + e)
            }
        }
    }

    /// Mean / median / half-logit constant that minimizes the empirical risk
    /// at iteration zero, unless a `custom_offset` overrides it.
    pub fn constant_initializer(&self, y: &[f64]) -> f64 {
        match self {
            Loss::Quadratic { custom_offset: Some(c) }
            | Loss::Absolute { custom_offset: Some(c) }
            | Loss::Binomial { custom_offset: Some(c) } => *c,
            Loss::Quadratic { .. } => mean(y),
            Loss::Absolute { .. } => median(y),
            Loss::Binomial { .. } => {
                let p = y.iter().filter(|&&v| v > 0.0).count() as f64 / y.len() as f64;
                let p = p.clamp(1e-9, 1.0 - 1e-9);
                0.5 * (p / (1.0 - p)).ln()
            }
        }
    }

    /// The response-link transform: identity for quadratic/absolute, sigmoid
    /// for binomial.
    pub fn response_transform(&self, f: f64) -> f64 {
        match self {
            Loss::Quadratic { .. } | Loss::Absolute { .. } => f,
            Loss::Binomial { .. } => 1.0 / (1.0 + (-2.0 * f).exp()),
        }
    }
}

fn mean(y: &[f64]) -> f64 {
    y.iter().sum::<f64>() / y.len() as f64
}

fn median(y: &[f64]) -> f64 {
    let mut sorted = y.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadratic_gradient_matches_residual() {
        let loss = Loss::quadratic();
        assert_eq!(loss.gradient(3.0, 1.0), -2.0);
    }

    #[test]
    fn binomial_rejects_non_binary_labels() {
        let loss = Loss::binomial();
        assert!(loss.validate_labels(&[-1.0, 1.0, 0.5]).is_err());
        assert!(loss.validate_labels(&[-1.0, 1.0, 1.0]).is_ok());
    }

    #[test]
    fn binomial_response_transform_is_sigmoid_like() {
        let loss = Loss::binomial();
        let v = loss.response_transform(0.0);
        assert!((v - 0.5).abs() < 1e-12);
    }
}
