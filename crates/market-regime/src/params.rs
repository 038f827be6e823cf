use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::detector::MarketRegime;

/// Parameter bundle applied downstream when a regime is active.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeParams {
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub ewrls_lambda: f64,
    /// α in the ensemble's p = 0.5 + 0.5·tanh(α·ŷ) mapping.
    pub probability_scaling: f64,
    pub h1_weight: f64,
    pub h5_weight: f64,
    pub h10_weight: f64,
    pub bb_period: u32,
    pub bb_std_dev: f64,
    pub bb_proximity: f64,
    pub regularization: f64,
}

impl RegimeParams {
    pub fn horizon_weights(&self) -> [f64; 3] {
        [self.h1_weight, self.h5_weight, self.h10_weight]
    }

    /// Bundle sanity: thresholds ordered and bounded, weights summing to 1,
    /// forgetting factor and ridge in their stable ranges.
    pub fn is_valid(&self) -> bool {
        let thresholds_ok = self.buy_threshold > self.sell_threshold
            && (0.3..=0.7).contains(&self.buy_threshold)
            && (0.3..=0.7).contains(&self.sell_threshold);
        let weight_sum = self.h1_weight + self.h5_weight + self.h10_weight;
        let weights_ok = (weight_sum - 1.0).abs() < 1e-6
            && self.h1_weight >= 0.0
            && self.h5_weight >= 0.0
            && self.h10_weight >= 0.0;
        let lambda_ok = (0.98..=1.0).contains(&self.ewrls_lambda);
        let misc_ok = self.regularization > 0.0
            && self.probability_scaling > 0.0
            && self.bb_period >= 2
            && self.bb_std_dev > 0.0
            && self.bb_proximity > 0.0;
        thresholds_ok && weights_ok && lambda_ok && misc_ok
    }
}

impl Default for RegimeParams {
    fn default() -> Self {
        choppy_params()
    }
}

// Wide gap to capture upward momentum; longer horizons carry the trend.
fn trending_up_params() -> RegimeParams {
    RegimeParams {
        buy_threshold: 0.55,
        sell_threshold: 0.43,
        ewrls_lambda: 0.992,
        probability_scaling: 50.0,
        h1_weight: 0.15,
        h5_weight: 0.60,
        h10_weight: 0.25,
        bb_period: 20,
        bb_std_dev: 2.25,
        bb_proximity: 0.30,
        regularization: 0.016,
    }
}

// Slightly higher buy bar to avoid catching falling knives.
fn trending_down_params() -> RegimeParams {
    RegimeParams {
        buy_threshold: 0.56,
        sell_threshold: 0.42,
        ewrls_lambda: 0.992,
        probability_scaling: 50.0,
        h1_weight: 0.15,
        h5_weight: 0.60,
        h10_weight: 0.25,
        bb_period: 20,
        bb_std_dev: 2.25,
        bb_proximity: 0.30,
        regularization: 0.016,
    }
}

// Narrow thresholds and slow adaptation to ride out whipsaws.
fn choppy_params() -> RegimeParams {
    RegimeParams {
        buy_threshold: 0.57,
        sell_threshold: 0.45,
        ewrls_lambda: 0.995,
        probability_scaling: 45.0,
        h1_weight: 0.20,
        h5_weight: 0.50,
        h10_weight: 0.30,
        bb_period: 25,
        bb_std_dev: 2.5,
        bb_proximity: 0.35,
        regularization: 0.025,
    }
}

// Fast adaptation, wide thresholds, gentler tanh so large moves stay
// inside the probability range.
fn high_volatility_params() -> RegimeParams {
    RegimeParams {
        buy_threshold: 0.58,
        sell_threshold: 0.40,
        ewrls_lambda: 0.990,
        probability_scaling: 35.0,
        h1_weight: 0.25,
        h5_weight: 0.45,
        h10_weight: 0.30,
        bb_period: 15,
        bb_std_dev: 2.0,
        bb_proximity: 0.25,
        regularization: 0.010,
    }
}

// Tight thresholds, very slow adaptation, steeper tanh to resolve small
// moves.
fn low_volatility_params() -> RegimeParams {
    RegimeParams {
        buy_threshold: 0.54,
        sell_threshold: 0.46,
        ewrls_lambda: 0.996,
        probability_scaling: 60.0,
        h1_weight: 0.20,
        h5_weight: 0.50,
        h10_weight: 0.30,
        bb_period: 30,
        bb_std_dev: 2.5,
        bb_proximity: 0.40,
        regularization: 0.030,
    }
}

/// Maps each regime to its parameter bundle.
#[derive(Debug, Clone)]
pub struct RegimeParameterManager {
    params: HashMap<MarketRegime, RegimeParams>,
}

impl RegimeParameterManager {
    pub fn new() -> Self {
        let mut params = HashMap::new();
        params.insert(MarketRegime::TrendingUp, trending_up_params());
        params.insert(MarketRegime::TrendingDown, trending_down_params());
        params.insert(MarketRegime::Choppy, choppy_params());
        params.insert(MarketRegime::HighVolatility, high_volatility_params());
        params.insert(MarketRegime::LowVolatility, low_volatility_params());
        Self { params }
    }

    /// Bundle for a regime, falling back to CHOPPY when unmapped.
    pub fn params_for(&self, regime: MarketRegime) -> RegimeParams {
        self.params
            .get(&regime)
            .or_else(|| self.params.get(&MarketRegime::Choppy))
            .copied()
            .unwrap_or_default()
    }

    /// Replace a regime's bundle; invalid bundles are rejected.
    pub fn set_params(&mut self, regime: MarketRegime, params: RegimeParams) -> bool {
        if params.is_valid() {
            self.params.insert(regime, params);
            true
        } else {
            warn!("rejecting invalid parameter bundle for {}", regime.name());
            false
        }
    }
}

impl Default for RegimeParameterManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_default_bundles_valid() {
        let manager = RegimeParameterManager::new();
        for regime in MarketRegime::all() {
            let params = manager.params_for(regime);
            assert!(params.is_valid(), "{} bundle invalid", regime.name());
        }
    }

    #[test]
    fn test_trending_up_defaults() {
        let params = RegimeParameterManager::new().params_for(MarketRegime::TrendingUp);
        assert_eq!(params.buy_threshold, 0.55);
        assert_eq!(params.sell_threshold, 0.43);
        assert_eq!(params.ewrls_lambda, 0.992);
        assert_eq!(params.horizon_weights(), [0.15, 0.60, 0.25]);
    }

    #[test]
    fn test_invalid_bundle_rejected() {
        let mut manager = RegimeParameterManager::new();
        let mut bad = manager.params_for(MarketRegime::Choppy);
        bad.buy_threshold = 0.40; // below sell threshold
        assert!(!manager.set_params(MarketRegime::Choppy, bad));
        // The previous bundle survives.
        assert_eq!(
            manager.params_for(MarketRegime::Choppy).buy_threshold,
            0.57
        );
    }

    #[test]
    fn test_weight_sum_enforced() {
        let mut bad = RegimeParams::default();
        bad.h1_weight = 0.5;
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_lambda_range_enforced() {
        let mut bad = RegimeParams::default();
        bad.ewrls_lambda = 0.9;
        assert!(!bad.is_valid());
    }
}
