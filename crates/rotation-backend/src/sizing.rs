use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Adaptive sizing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizerConfig {
    /// Fraction of equity deployable across all slots.
    pub base_fraction: f64,
    /// Bounds on the adaptive outcome factor.
    pub min_factor: f64,
    pub max_factor: f64,
    /// Factor nudges after a winning / losing round trip.
    pub win_step: f64,
    pub loss_step: f64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            base_fraction: 0.95,
            min_factor: 0.5,
            max_factor: 1.5,
            win_step: 0.05,
            loss_step: 0.075,
        }
    }
}

/// Per-slot allocation with a bounded outcome-adaptive factor: sizing drifts
/// up after wins and down (faster) after losses.
#[derive(Debug)]
pub struct AdaptivePositionSizer {
    config: SizerConfig,
    factor: f64,
}

impl AdaptivePositionSizer {
    pub fn new(config: SizerConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.base_fraction) {
            bail!("base_fraction must be between 0 and 1");
        }
        if config.min_factor <= 0.0 || config.min_factor > config.max_factor {
            bail!("factor bounds must satisfy 0 < min <= max");
        }
        if config.win_step < 0.0 || config.loss_step < 0.0 {
            bail!("factor steps must be non-negative");
        }
        Ok(Self {
            config,
            factor: 1.0,
        })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Dollar allocation for one new position.
    pub fn allocation(&self, equity: f64, max_positions: usize) -> f64 {
        if equity <= 0.0 || max_positions == 0 {
            return 0.0;
        }
        self.config.base_fraction * equity / max_positions as f64 * self.factor
    }

    /// Whole-share count for an allocation, clamped to available cash.
    pub fn shares_for(&self, allocation: f64, price: f64, cash: f64) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        (allocation.min(cash) / price).floor().max(0.0)
    }

    pub fn record_outcome(&mut self, realized_pnl: f64) {
        if realized_pnl > 0.0 {
            self.factor = (self.factor + self.config.win_step).min(self.config.max_factor);
        } else if realized_pnl < 0.0 {
            self.factor = (self.factor - self.config.loss_step).max(self.config.min_factor);
        }
    }
}

impl Default for AdaptivePositionSizer {
    fn default() -> Self {
        Self::new(SizerConfig::default()).expect("default sizer config is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_base_allocation() {
        let sizer = AdaptivePositionSizer::default();
        // 0.95 × 100k / 4 slots.
        assert_relative_eq!(sizer.allocation(100_000.0, 4), 23_750.0);
    }

    #[test]
    fn test_shares_floor_and_cash_clamp() {
        let sizer = AdaptivePositionSizer::default();
        assert_eq!(sizer.shares_for(23_750.0, 401.0, 100_000.0), 59.0);
        // Cash below the allocation wins.
        assert_eq!(sizer.shares_for(23_750.0, 401.0, 1_000.0), 2.0);
        assert_eq!(sizer.shares_for(23_750.0, 0.0, 1_000.0), 0.0);
    }

    #[test]
    fn test_factor_adapts_and_stays_bounded() {
        let mut sizer = AdaptivePositionSizer::default();
        for _ in 0..50 {
            sizer.record_outcome(100.0);
        }
        assert_relative_eq!(sizer.factor(), 1.5);
        for _ in 0..50 {
            sizer.record_outcome(-100.0);
        }
        assert_relative_eq!(sizer.factor(), 0.5);
        // Flat outcomes leave the factor alone.
        let before = sizer.factor();
        sizer.record_outcome(0.0);
        assert_relative_eq!(sizer.factor(), before);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = SizerConfig::default();
        config.base_fraction = 1.5;
        assert!(AdaptivePositionSizer::new(config).is_err());

        let mut config = SizerConfig::default();
        config.min_factor = 2.0;
        assert!(AdaptivePositionSizer::new(config).is_err());
    }
}
