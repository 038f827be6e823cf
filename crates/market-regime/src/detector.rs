use std::collections::VecDeque;

use log::debug;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};
use trading_core::Bar;

/// Market regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Choppy,
    HighVolatility,
    LowVolatility,
}

impl MarketRegime {
    pub fn name(&self) -> &'static str {
        match self {
            MarketRegime::TrendingUp => "TRENDING_UP",
            MarketRegime::TrendingDown => "TRENDING_DOWN",
            MarketRegime::Choppy => "CHOPPY",
            MarketRegime::HighVolatility => "HIGH_VOLATILITY",
            MarketRegime::LowVolatility => "LOW_VOLATILITY",
        }
    }

    pub fn all() -> [MarketRegime; 5] {
        [
            MarketRegime::TrendingUp,
            MarketRegime::TrendingDown,
            MarketRegime::Choppy,
            MarketRegime::HighVolatility,
            MarketRegime::LowVolatility,
        ]
    }
}

/// Feature tuple behind the last classification, exposed for telemetry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeFeatures {
    /// Standard deviation of log-returns.
    pub vol: f64,
    /// Slope of the log-price regression (per bar).
    pub slope: f64,
    /// R² of that regression.
    pub r2: f64,
    /// CHOP index, typically 0..100.
    pub chop: f64,
}

impl Default for RegimeFeatures {
    fn default() -> Self {
        Self {
            vol: 0.0,
            slope: 0.0,
            r2: 0.0,
            chop: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Window for std(log-returns).
    pub vol_window: usize,
    /// Window for slope and R².
    pub slope_window: usize,
    /// Window for the CHOP index.
    pub chop_window: usize,
    /// Rolling volatility calibration depth (~8 trading days of 1-min bars).
    pub calibration_window: usize,
    /// Samples required before the adaptive thresholds are trusted.
    pub min_calibration_samples: usize,
    /// Slope threshold (log-price per bar) for a trend candidate.
    pub trend_slope_min: f64,
    /// Minimum R² for a trend candidate.
    pub trend_r2_min: f64,
    /// Score margin a new regime must clear before a switch.
    pub hysteresis_margin: f64,
    /// Bars between allowed regime switches.
    pub cooldown_bars: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            vol_window: 96,
            slope_window: 120,
            chop_window: 48,
            calibration_window: 8 * 390,
            min_calibration_samples: 500,
            trend_slope_min: 1.2e-4,
            trend_r2_min: 0.60,
            hysteresis_margin: 0.15,
            cooldown_bars: 60,
        }
    }
}

/// Classifies the recent tape into one of five regimes.
///
/// Volatility thresholds adapt as the 30th/70th percentiles of a rolling
/// calibration buffer. Regime switches are damped by a score margin and a
/// cooldown; until the buffer is primed the detector reports CHOPPY.
#[derive(Debug)]
pub struct MarketRegimeDetector {
    params: DetectorParams,
    vol_calibration: VecDeque<f64>,
    vol_lo: f64,
    vol_hi: f64,
    last_regime: Option<MarketRegime>,
    cooldown: u32,
    last_features: RegimeFeatures,
    transitions: u64,
}

fn safe_log(x: f64) -> f64 {
    x.max(1e-12).ln()
}

impl MarketRegimeDetector {
    pub fn new(params: DetectorParams) -> Self {
        Self {
            params,
            vol_calibration: VecDeque::new(),
            vol_lo: 0.0,
            vol_hi: 0.0,
            last_regime: None,
            cooldown: 0,
            last_features: RegimeFeatures::default(),
            transitions: 0,
        }
    }

    pub fn last_features(&self) -> RegimeFeatures {
        self.last_features
    }

    /// Adaptive (low, high) volatility thresholds; zeros until calibrated.
    pub fn vol_thresholds(&self) -> (f64, f64) {
        (self.vol_lo, self.vol_hi)
    }

    pub fn last_regime(&self) -> MarketRegime {
        self.last_regime.unwrap_or(MarketRegime::Choppy)
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    fn calibrated(&self) -> bool {
        self.vol_calibration.len()
            >= self
                .params
                .min_calibration_samples
                .min(self.params.calibration_window / 2)
    }

    /// Classify the current window. Call once per bar.
    pub fn detect(&mut self, bars: &[Bar]) -> MarketRegime {
        self.last_features.vol = Self::std_log_returns(bars, self.params.vol_window);
        let (slope, r2) = Self::slope_r2_log_price(bars, self.params.slope_window);
        self.last_features.slope = slope;
        self.last_features.r2 = r2;
        self.last_features.chop = Self::chop_index(bars, self.params.chop_window);

        self.update_vol_thresholds(self.last_features.vol);

        if self.cooldown > 0 {
            self.cooldown -= 1;
        }

        if !self.calibrated() {
            // Hold a neutral stance until the thresholds mean something.
            return *self.last_regime.get_or_insert(MarketRegime::Choppy);
        }

        let (proposed, score) = self.score_candidates();

        if let Some(last) = self.last_regime {
            if proposed != last && (score < self.params.hysteresis_margin || self.cooldown > 0) {
                return last;
            }
        }

        if self.last_regime != Some(proposed) {
            debug!(
                "regime switch {} -> {} (score {:.3})",
                self.last_regime.map(|r| r.name()).unwrap_or("NONE"),
                proposed.name(),
                score
            );
            self.last_regime = Some(proposed);
            self.cooldown = self.params.cooldown_bars;
            self.transitions += 1;
        }
        proposed
    }

    fn score_candidates(&self) -> (MarketRegime, f64) {
        let feat = &self.last_features;

        let mut candidates: Vec<(MarketRegime, f64)> = Vec::with_capacity(3);
        if self.vol_hi > 0.0 {
            candidates.push((
                MarketRegime::HighVolatility,
                (feat.vol - self.vol_hi) / self.vol_hi.max(1e-12),
            ));
        }
        if self.vol_lo > 0.0 {
            candidates.push((
                MarketRegime::LowVolatility,
                (self.vol_lo - feat.vol) / self.vol_lo.max(1e-12),
            ));
        }

        let trending =
            feat.slope.abs() >= self.params.trend_slope_min && feat.r2 >= self.params.trend_r2_min;
        if trending {
            let magnitude = (feat.slope.abs() / self.params.trend_slope_min.max(1e-12)) * feat.r2;
            let direction = if feat.slope > 0.0 {
                MarketRegime::TrendingUp
            } else {
                MarketRegime::TrendingDown
            };
            candidates.push((direction, magnitude));
        } else {
            let chop_score = ((feat.chop - 50.0) / 50.0).max(0.0);
            candidates.push((MarketRegime::Choppy, chop_score));
        }

        candidates
            .into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or((MarketRegime::Choppy, 0.0))
    }

    fn update_vol_thresholds(&mut self, vol_sample: f64) {
        self.vol_calibration.push_back(vol_sample);
        while self.vol_calibration.len() > self.params.calibration_window {
            self.vol_calibration.pop_front();
        }
        if !self.calibrated() {
            return;
        }

        let mut data = Data::new(self.vol_calibration.iter().copied().collect::<Vec<_>>());
        self.vol_lo = data.percentile(30);
        self.vol_hi = data.percentile(70);

        // Keep the bands separated when the tape is unnaturally flat.
        if self.vol_hi - self.vol_lo < 5e-5 {
            self.vol_lo = (self.vol_lo - 1e-4).max(0.0);
            self.vol_hi += 1e-4;
        }
    }

    fn std_log_returns(bars: &[Bar], window: usize) -> f64 {
        if bars.len() < window + 1 {
            return 0.0;
        }
        let start = bars.len() - window;
        let returns: Vec<f64> = (start..bars.len())
            .map(|i| safe_log(bars[i].close / bars[i - 1].close))
            .collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let acc: f64 = returns.iter().map(|r| (r - mean) * (r - mean)).sum();
        (acc / (returns.len().saturating_sub(1).max(1)) as f64).sqrt()
    }

    fn slope_r2_log_price(bars: &[Bar], window: usize) -> (f64, f64) {
        if bars.len() < window {
            return (0.0, 0.0);
        }
        let start = bars.len() - window;
        let y: Vec<f64> = bars[start..].iter().map(|b| safe_log(b.close)).collect();

        let n = window as f64;
        let sx = (n - 1.0) * n / 2.0;
        let sxx = (n - 1.0) * n * (2.0 * n - 1.0) / 6.0;
        let sy: f64 = y.iter().sum();
        let sxy: f64 = y.iter().enumerate().map(|(i, v)| i as f64 * v).sum();

        let denom = n * sxx - sx * sx;
        if denom.abs() < 1e-12 {
            return (0.0, 0.0);
        }
        let slope = (n * sxy - sx * sy) / denom;
        let intercept = (sy - slope * sx) / n;

        let y_bar = sy / n;
        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        for (i, v) in y.iter().enumerate() {
            let y_hat = intercept + slope * i as f64;
            ss_res += (v - y_hat) * (v - y_hat);
            ss_tot += (v - y_bar) * (v - y_bar);
        }
        let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
        (slope, r2)
    }

    /// CHOP = 100·log10(ΣTR / (max_high − min_low)) / log10(window).
    fn chop_index(bars: &[Bar], window: usize) -> f64 {
        if bars.len() < window + 1 {
            return 50.0;
        }
        let start = bars.len() - window;
        let mut tr_sum = 0.0;
        for i in start..bars.len() {
            let current = &bars[i];
            let prev = &bars[i - 1];
            let tr = (current.high - current.low)
                .max((current.high - prev.close).abs())
                .max((current.low - prev.close).abs());
            tr_sum += tr;
        }
        let hi = bars[start..].iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lo = bars[start..].iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let range = (hi - lo).max(1e-12);
        let x = (tr_sum / range).max(1e-12).log10();
        100.0 * x / (window as f64).log10().max(1e-12)
    }
}

impl Default for MarketRegimeDetector {
    fn default() -> Self {
        Self::new(DetectorParams::default())
    }
}
