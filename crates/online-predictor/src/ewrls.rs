use std::collections::VecDeque;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::warn;
use trading_core::TradingError;

/// Forgetting factors outside this range destabilize the recursion.
pub const LAMBDA_MIN: f64 = 0.98;
pub const LAMBDA_MAX: f64 = 1.0;

/// EWRLS predictor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EwrlsConfig {
    /// Exponential forgetting factor, clamped to [0.98, 1.0].
    pub lambda: f64,
    /// Ridge regularization; also sets the covariance reset scale 1/ridge.
    pub ridge: f64,
    /// Updates required before `predict` succeeds.
    pub min_updates: usize,
    /// Trailing innovation window used for the confidence estimate.
    pub innovation_window: usize,
    /// EWMA decay for the squared-innovation volatility estimate.
    pub volatility_decay: f64,
    /// Residual-variance scale mapping innovations to [0,1] confidence.
    pub confidence_scale: f64,
    /// Covariance trace beyond which the recursion is declared degenerate.
    pub max_trace: f64,
}

impl Default for EwrlsConfig {
    fn default() -> Self {
        Self {
            lambda: 0.995,
            ridge: 0.016,
            min_updates: 50,
            innovation_window: 100,
            volatility_decay: 0.94,
            confidence_scale: 1e4,
            max_trace: 1e8,
        }
    }
}

/// One prediction from an EWRLS predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_return: f64,
    pub confidence: f64,
    pub volatility: f64,
}

/// Exponentially-weighted recursive least squares with ridge regularization.
///
/// Maintains a weight vector `w` and inverse covariance `P`. Each realized
/// label tightens the fit; older samples decay by `lambda` per step.
/// Numerical degeneracy (non-SPD `P`, runaway trace, non-finite entries) is
/// recovered locally by resetting `P := (1/ridge)·I` while keeping `w`.
#[derive(Debug, Clone)]
pub struct EwrlsPredictor {
    dim: usize,
    lambda: f64,
    ridge: f64,
    config: EwrlsConfig,
    weights: DVector<f64>,
    p: DMatrix<f64>,
    samples: usize,
    innovations: VecDeque<f64>,
    vol_ewma: f64,
    covariance_resets: u64,
}

impl EwrlsPredictor {
    pub fn new(dim: usize, config: EwrlsConfig) -> Result<Self, TradingError> {
        if dim == 0 {
            return Err(TradingError::InvalidConfig(
                "predictor dimension must be positive".to_string(),
            ));
        }
        if config.ridge <= 0.0 {
            return Err(TradingError::InvalidConfig(format!(
                "ridge must be positive, got {}",
                config.ridge
            )));
        }
        let lambda = config.lambda.clamp(LAMBDA_MIN, LAMBDA_MAX);
        let ridge = config.ridge;
        Ok(Self {
            dim,
            lambda,
            ridge,
            weights: DVector::zeros(dim),
            p: DMatrix::identity(dim, dim) / ridge,
            samples: 0,
            innovations: VecDeque::with_capacity(config.innovation_window),
            vol_ewma: 0.0,
            covariance_resets: 0,
            config,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn is_ready(&self) -> bool {
        self.samples >= self.config.min_updates
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Re-clamp and apply a new forgetting factor (regime adaptation).
    pub fn set_lambda(&mut self, lambda: f64) {
        self.lambda = lambda.clamp(LAMBDA_MIN, LAMBDA_MAX);
    }

    pub fn covariance_resets(&self) -> u64 {
        self.covariance_resets
    }

    /// Read-only view of the current weights; used by state persistence.
    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    /// ŷ = wᵀx with a bounded confidence derived from recent innovations.
    pub fn predict(&self, features: &[f64]) -> Result<Prediction, TradingError> {
        if !self.is_ready() {
            return Err(TradingError::NotReady(format!(
                "predictor has {} of {} required updates",
                self.samples, self.config.min_updates
            )));
        }
        if features.len() != self.dim {
            return Err(TradingError::InvalidConfig(format!(
                "feature dimension {} does not match predictor dimension {}",
                features.len(),
                self.dim
            )));
        }
        let x = DVector::from_column_slice(features);
        let predicted = self.weights.dot(&x);
        Ok(Prediction {
            predicted_return: if predicted.is_finite() { predicted } else { 0.0 },
            confidence: self.confidence(),
            volatility: self.vol_ewma.max(0.0).sqrt(),
        })
    }

    /// Standard EWRLS update with a realized label.
    pub fn update(&mut self, features: &[f64], label: f64) {
        self.update_weighted(features, label, 1.0);
    }

    /// Observation-weighted update. For weight ω the gain denominator is
    /// λ/ω + xᵀPx, so ω = 1 reduces to the standard recursion and larger ω
    /// makes the sample count for more.
    pub fn update_weighted(&mut self, features: &[f64], label: f64, weight: f64) {
        if features.len() != self.dim || !label.is_finite() || weight <= 0.0 {
            return;
        }
        let x = DVector::from_column_slice(features);

        let g = &self.p * &x;
        let denom = self.lambda / weight + x.dot(&g);
        if denom.abs() < 1e-12 || !denom.is_finite() {
            self.reset_covariance("gain denominator degenerate");
            return;
        }
        let k = &g / denom;
        let innovation = label - self.weights.dot(&x);
        self.weights += &k * innovation;
        self.p = (&self.p - &k * g.transpose()) / self.lambda;

        // Symmetrize to counter floating-point drift.
        let pt = self.p.transpose();
        self.p = (&self.p + pt) * 0.5;

        if !self.covariance_healthy() {
            self.reset_covariance("covariance lost positive definiteness");
        }
        if self.weights.iter().any(|w| !w.is_finite()) {
            self.weights = DVector::zeros(self.dim);
            self.reset_covariance("weights became non-finite");
        }

        self.innovations.push_back(innovation);
        while self.innovations.len() > self.config.innovation_window {
            self.innovations.pop_front();
        }
        let d = self.config.volatility_decay;
        self.vol_ewma = d * self.vol_ewma + (1.0 - d) * innovation * innovation;

        self.samples += 1;
    }

    /// Reset `P := (1/ridge)·I`, keeping the weights. Predictions with
    /// identical inputs are unchanged by the reset.
    pub fn reset_covariance(&mut self, reason: &str) {
        warn!(
            resets = self.covariance_resets + 1,
            reason, "EWRLS covariance reset"
        );
        self.p = DMatrix::identity(self.dim, self.dim) / self.ridge;
        self.covariance_resets += 1;
    }

    fn covariance_healthy(&self) -> bool {
        let mut trace = 0.0;
        for i in 0..self.dim {
            let d = self.p[(i, i)];
            if !d.is_finite() || d <= 0.0 {
                return false;
            }
            trace += d;
        }
        trace <= self.config.max_trace
    }

    /// Lower recent residual variance → higher confidence, clipped to [0,1].
    fn confidence(&self) -> f64 {
        if self.innovations.len() < 10 {
            return 0.5;
        }
        let n = self.innovations.len() as f64;
        let var = self.innovations.iter().map(|e| e * e).sum::<f64>() / n;
        (1.0 / (1.0 + self.config.confidence_scale * var)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn predictor(dim: usize) -> EwrlsPredictor {
        EwrlsPredictor::new(dim, EwrlsConfig::default()).unwrap()
    }

    #[test]
    fn test_not_ready_before_min_updates() {
        let p = predictor(3);
        assert!(matches!(
            p.predict(&[1.0, 0.0, 0.0]),
            Err(TradingError::NotReady(_))
        ));
    }

    #[test]
    fn test_lambda_clamped() {
        let mut config = EwrlsConfig::default();
        config.lambda = 0.5;
        let p = EwrlsPredictor::new(2, config).unwrap();
        assert_relative_eq!(p.lambda(), LAMBDA_MIN);

        let mut config = EwrlsConfig::default();
        config.lambda = 1.5;
        let p = EwrlsPredictor::new(2, config).unwrap();
        assert_relative_eq!(p.lambda(), LAMBDA_MAX);
    }

    #[test]
    fn test_zero_ridge_rejected() {
        let mut config = EwrlsConfig::default();
        config.ridge = 0.0;
        assert!(EwrlsPredictor::new(2, config).is_err());
    }

    #[test]
    fn test_contraction_toward_label() {
        // With small ridge, one update moves the prediction strictly toward
        // the label; a larger ridge moves less but in the same direction.
        let x = [1.0, 0.5];
        let y = 0.02;

        let mut small = EwrlsConfig::default();
        small.ridge = 1e-6;
        let mut p_small = EwrlsPredictor::new(2, small).unwrap();
        p_small.update(&x, y);
        let moved_small = p_small.weights().dot(&nalgebra::DVector::from_column_slice(&x));

        let mut large = EwrlsConfig::default();
        large.ridge = 1.0;
        let mut p_large = EwrlsPredictor::new(2, large).unwrap();
        p_large.update(&x, y);
        let moved_large = p_large.weights().dot(&nalgebra::DVector::from_column_slice(&x));

        assert!(moved_small > 0.0 && moved_small <= y + 1e-9);
        assert!(moved_large > 0.0 && moved_large < moved_small);
        assert_relative_eq!(moved_small, y, epsilon = 1e-6);
    }

    #[test]
    fn test_learns_linear_relationship() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut p = predictor(3);
        let true_w = [0.01, -0.02, 0.005];
        for _ in 0..500 {
            let x: Vec<f64> = (0..3).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let y: f64 = x.iter().zip(true_w).map(|(xi, wi)| xi * wi).sum();
            p.update(&x, y);
        }
        let pred = p.predict(&[1.0, 1.0, 1.0]).unwrap();
        let expected: f64 = true_w.iter().sum();
        assert_relative_eq!(pred.predicted_return, expected, epsilon = 1e-3);
        assert!(pred.confidence > 0.9);
    }

    #[test]
    fn test_covariance_stays_spd() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut p = predictor(4);
        for _ in 0..300 {
            let x: Vec<f64> = (0..4).map(|_| rng.gen_range(-2.0..2.0)).collect();
            p.update(&x, rng.gen_range(-0.01..0.01));
        }
        assert_eq!(p.covariance_resets(), 0);
        for i in 0..4 {
            assert!(p.p[(i, i)] > 0.0);
            for j in 0..4 {
                assert_relative_eq!(p.p[(i, j)], p.p[(j, i)], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_reset_keeps_weights() {
        let mut p = predictor(2);
        for i in 0..60 {
            p.update(&[1.0, i as f64 / 60.0], 0.01);
        }
        let before = p.predict(&[1.0, 0.5]).unwrap().predicted_return;
        p.reset_covariance("test");
        let after = p.predict(&[1.0, 0.5]).unwrap().predicted_return;
        assert_relative_eq!(before, after);
        assert_eq!(p.covariance_resets(), 1);
    }

    #[test]
    fn test_weighted_update_moves_more() {
        let x = [1.0, -0.3];
        let y = 0.05;
        let mut a = predictor(2);
        let mut b = predictor(2);
        a.update_weighted(&x, y, 1.0);
        b.update_weighted(&x, y, 10.0);
        let xv = nalgebra::DVector::from_column_slice(&x);
        assert!(b.weights().dot(&xv) > a.weights().dot(&xv));
    }

    #[test]
    fn test_non_finite_label_ignored() {
        let mut p = predictor(2);
        p.update(&[1.0, 1.0], f64::NAN);
        assert_eq!(p.samples(), 0);
    }
}
