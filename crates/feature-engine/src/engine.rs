use std::collections::VecDeque;
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::debug;
use trading_core::{Bar, TradingError};

use crate::order::FEATURE_COUNT;

/// Feature engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEngineConfig {
    /// Bars required before `extract` produces real values.
    pub min_warmup_bars: usize,
    /// Bounded 1-minute history depth.
    pub max_history: usize,
    /// Trading session length in minutes (RTH = 390).
    pub session_length_minutes: i64,
    /// Opening-range window in minutes.
    pub opening_range_minutes: i64,
}

impl Default for FeatureEngineConfig {
    fn default() -> Self {
        Self {
            min_warmup_bars: 60,
            max_history: 240,
            session_length_minutes: 390,
            opening_range_minutes: 30,
        }
    }
}

/// Per-session running statistics, reset on day rollover.
#[derive(Debug, Clone, Default)]
struct SessionState {
    day: i64,
    open_minute: i64,
    high: f64,
    low: f64,
    cum_volume: f64,
    cum_pv: f64,
    cum_p2v: f64,
    cum_delta: f64,
    or_high: f64,
    or_low: f64,
    or_complete: bool,
}

impl SessionState {
    fn start(bar: &Bar) -> Self {
        Self {
            day: bar.timestamp_ms / 86_400_000,
            open_minute: bar.minutes_of_day(),
            high: bar.high,
            low: bar.low,
            cum_volume: 0.0,
            cum_pv: 0.0,
            cum_p2v: 0.0,
            cum_delta: 0.0,
            or_high: bar.high,
            or_low: bar.low,
            or_complete: false,
        }
    }

    fn vwap(&self) -> f64 {
        if self.cum_volume > 0.0 {
            self.cum_pv / self.cum_volume
        } else {
            0.0
        }
    }

    fn vwap_std_dev(&self) -> f64 {
        if self.cum_volume <= 0.0 {
            return 0.0;
        }
        let mean = self.vwap();
        let var = self.cum_p2v / self.cum_volume - mean * mean;
        var.max(0.0).sqrt()
    }
}

/// Stateful per-symbol feature engine.
///
/// `update` appends one bar to bounded history; `extract` emits the 25
/// features of [`crate::order::FEATURE_ORDER`] in that exact order. Before
/// warmup the output is all zeros (neutral). Non-finite values never leave
/// this type: they are scrubbed to 0.0 at the boundary.
#[derive(Debug)]
pub struct FeatureEngine {
    config: FeatureEngineConfig,
    bars_1m: VecDeque<Bar>,
    bars_5m: VecDeque<Bar>,
    pending_5m: Vec<Bar>,
    session: Option<SessionState>,
    last_timestamp_ms: Option<i64>,
}

impl FeatureEngine {
    pub fn new(config: FeatureEngineConfig) -> Self {
        Self {
            config,
            bars_1m: VecDeque::new(),
            bars_5m: VecDeque::new(),
            pending_5m: Vec::with_capacity(5),
            session: None,
            last_timestamp_ms: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.bars_1m.len() >= self.config.min_warmup_bars
    }

    pub fn bar_count(&self) -> usize {
        self.bars_1m.len()
    }

    /// Append one bar. Out-of-order timestamps are a fatal data error.
    pub fn update(&mut self, bar: &Bar) -> Result<(), TradingError> {
        bar.validate()?;

        if let Some(last) = self.last_timestamp_ms {
            if bar.timestamp_ms <= last {
                return Err(TradingError::InvalidBar(format!(
                    "{} timestamp regression: {} after {}",
                    bar.symbol, bar.timestamp_ms, last
                )));
            }
        }
        self.last_timestamp_ms = Some(bar.timestamp_ms);

        let day = bar.timestamp_ms / 86_400_000;
        if self.session.as_ref().map(|s| s.day) != Some(day) {
            debug!(symbol = %bar.symbol, day, "feature engine session reset");
            self.session = Some(SessionState::start(bar));
        }
        self.update_session(bar);

        self.bars_1m.push_back(bar.clone());
        while self.bars_1m.len() > self.config.max_history {
            self.bars_1m.pop_front();
        }

        self.pending_5m.push(bar.clone());
        if self.pending_5m.len() == 5 {
            let agg = Self::aggregate(&self.pending_5m);
            self.bars_5m.push_back(agg);
            while self.bars_5m.len() > self.config.max_history / 5 {
                self.bars_5m.pop_front();
            }
            self.pending_5m.clear();
        }

        Ok(())
    }

    /// Emit the feature vector for the latest bar. Deterministic for a given
    /// history; zeros before warmup.
    pub fn extract(&self) -> Vec<f64> {
        if !self.is_ready() {
            return vec![0.0; FEATURE_COUNT];
        }
        let bar = self
            .bars_1m
            .back()
            .expect("warmup implies non-empty history");
        let session = self
            .session
            .as_ref()
            .expect("warmup implies an open session");

        let mut features = Vec::with_capacity(FEATURE_COUNT);

        // Microstructure
        features.push(self.tick_direction());
        features.push((bar.high - bar.low) / bar.close);
        features.push(Self::wicks_ratio(bar));
        features.push(self.volume_imbalance());
        features.push(bar.volume / (bar.high - bar.low + 1e-10));
        features.push(self.price_acceleration());

        // Short-term momentum
        features.push(self.return_n(1));
        features.push(self.return_n(3));
        features.push(self.rsi(3));
        features.push(self.ema_cross(2, 5));
        features.push(self.velocity());

        // Multi-timeframe confluence
        features.push(self.sma_trend(5));
        features.push(self.sma_trend(15));
        features.push(self.volume_trend_5m());
        features.push(self.volatility_ratio());
        features.push(Self::range_position(bar.close, session.high, session.low));

        // Session patterns
        features.push(self.vwap_distance(bar, session));
        features.push(Self::opening_range_breakout(bar, session));
        let (tod_sin, tod_cos) = self.time_of_day(bar, session);
        features.push(tod_sin);
        features.push(tod_cos);

        // Volume profile
        features.push(self.volume_percentile(bar.volume));
        features.push(session.cum_delta);
        features.push((bar.close - session.vwap()) / (session.vwap_std_dev() + 1e-10));
        features.push(self.relative_volume(bar.volume));
        features.push(self.volume_price_trend());

        debug_assert_eq!(features.len(), FEATURE_COUNT);

        // Nothing downstream may ever see a non-finite feature.
        for f in features.iter_mut() {
            if !f.is_finite() {
                *f = 0.0;
            }
        }
        features
    }

    pub fn reset(&mut self) {
        self.bars_1m.clear();
        self.bars_5m.clear();
        self.pending_5m.clear();
        self.session = None;
        self.last_timestamp_ms = None;
    }

    // --- session bookkeeping ---

    fn update_session(&mut self, bar: &Bar) {
        let config = &self.config;
        let session = self.session.as_mut().expect("session initialized");
        session.high = session.high.max(bar.high);
        session.low = session.low.min(bar.low);

        let typical = (bar.high + bar.low + bar.close) / 3.0;
        session.cum_volume += bar.volume;
        session.cum_pv += typical * bar.volume;
        session.cum_p2v += typical * typical * bar.volume;
        session.cum_delta += if bar.close >= bar.open {
            bar.volume
        } else {
            -bar.volume
        };

        let minutes_in = bar.minutes_of_day() - session.open_minute;
        if minutes_in < config.opening_range_minutes {
            session.or_high = session.or_high.max(bar.high);
            session.or_low = session.or_low.min(bar.low);
        } else {
            session.or_complete = true;
        }
    }

    fn aggregate(bars: &[Bar]) -> Bar {
        let first = &bars[0];
        let last = &bars[bars.len() - 1];
        Bar {
            timestamp_ms: last.timestamp_ms,
            bar_id: last.bar_id,
            symbol: first.symbol.clone(),
            open: first.open,
            high: bars.iter().map(|b| b.high).fold(f64::MIN, f64::max),
            low: bars.iter().map(|b| b.low).fold(f64::MAX, f64::min),
            close: last.close,
            volume: bars.iter().map(|b| b.volume).sum(),
        }
    }

    // --- feature helpers ---

    fn close_at(&self, back: usize) -> f64 {
        self.bars_1m[self.bars_1m.len() - 1 - back].close
    }

    fn return_n(&self, n: usize) -> f64 {
        if self.bars_1m.len() <= n {
            return 0.0;
        }
        let prev = self.close_at(n);
        (self.close_at(0) - prev) / prev
    }

    fn tick_direction(&self) -> f64 {
        if self.bars_1m.len() < 10 {
            return 0.5;
        }
        let mut upticks = 0u32;
        let mut downticks = 0u32;
        let n = self.bars_1m.len();
        for i in n - 10..n - 1 {
            let diff = self.bars_1m[i + 1].close - self.bars_1m[i].close;
            if diff > 0.0 {
                upticks += 1;
            } else if diff < 0.0 {
                downticks += 1;
            }
        }
        upticks as f64 / (upticks + downticks + 1) as f64
    }

    fn wicks_ratio(bar: &Bar) -> f64 {
        let body = (bar.close - bar.open).abs();
        let upper = bar.high - bar.open.max(bar.close);
        let lower = bar.open.min(bar.close) - bar.low;
        (upper + lower) / (body + 1e-10)
    }

    fn volume_imbalance(&self) -> f64 {
        if self.bars_1m.len() < 10 {
            return 0.0;
        }
        let n = self.bars_1m.len();
        let mut buy = 0.0;
        let mut sell = 0.0;
        for bar in self.bars_1m.iter().skip(n - 10) {
            if bar.close > bar.open {
                buy += bar.volume;
            } else {
                sell += bar.volume;
            }
        }
        (buy - sell) / (buy + sell + 1.0)
    }

    fn price_acceleration(&self) -> f64 {
        if self.bars_1m.len() < 3 {
            return 0.0;
        }
        let r1 = (self.close_at(0) - self.close_at(1)) / self.close_at(1);
        let r2 = (self.close_at(1) - self.close_at(2)) / self.close_at(2);
        r1 - r2
    }

    // Rate of change of 1-bar returns. Same second difference as
    // price_acceleration over a shifted window.
    fn velocity(&self) -> f64 {
        self.price_acceleration()
    }

    fn rsi(&self, period: usize) -> f64 {
        if self.bars_1m.len() < period + 1 {
            return 50.0;
        }
        let n = self.bars_1m.len();
        let mut gains = 0.0;
        let mut losses = 0.0;
        for i in n - period - 1..n - 1 {
            let change = self.bars_1m[i + 1].close - self.bars_1m[i].close;
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }
        let avg_gain = gains / period as f64;
        let avg_loss = losses / period as f64;
        if avg_loss == 0.0 {
            return 100.0;
        }
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }

    fn ema_cross(&self, fast: usize, slow: usize) -> f64 {
        if self.bars_1m.len() < slow {
            return 0.0;
        }
        let n = self.bars_1m.len();
        let alpha_fast = 2.0 / (fast as f64 + 1.0);
        let alpha_slow = 2.0 / (slow as f64 + 1.0);
        let mut ema_fast = self.bars_1m[n - slow].close;
        let mut ema_slow = ema_fast;
        for bar in self.bars_1m.iter().skip(n - slow) {
            ema_fast = alpha_fast * bar.close + (1.0 - alpha_fast) * ema_fast;
            ema_slow = alpha_slow * bar.close + (1.0 - alpha_slow) * ema_slow;
        }
        (ema_fast - ema_slow) / ema_slow
    }

    fn sma_trend(&self, period: usize) -> f64 {
        if self.bars_1m.len() < period {
            return 0.5;
        }
        let n = self.bars_1m.len();
        let sma: f64 =
            self.bars_1m.iter().skip(n - period).map(|b| b.close).sum::<f64>() / period as f64;
        if self.close_at(0) > sma {
            1.0
        } else {
            0.0
        }
    }

    fn volume_trend_5m(&self) -> f64 {
        if self.bars_5m.len() < 4 {
            return 0.5;
        }
        let n = self.bars_5m.len();
        let avg: f64 = self.bars_5m.iter().skip(n - 4).take(3).map(|b| b.volume).sum::<f64>() / 3.0;
        if self.bars_5m[n - 1].volume > avg {
            1.0
        } else {
            0.0
        }
    }

    fn volatility_ratio(&self) -> f64 {
        if self.bars_1m.len() < 5 || self.bars_5m.len() < 2 {
            return 1.0;
        }
        let n = self.bars_1m.len();
        let mut acc = 0.0;
        for i in n - 5..n - 1 {
            let r = (self.bars_1m[i + 1].close - self.bars_1m[i].close) / self.bars_1m[i].close;
            acc += r * r;
        }
        let vol_1m = (acc / 4.0).sqrt();
        let m = self.bars_5m.len();
        let r5 = (self.bars_5m[m - 1].close - self.bars_5m[m - 2].close) / self.bars_5m[m - 2].close;
        vol_1m / (r5.abs() + 1e-10)
    }

    fn range_position(close: f64, high: f64, low: f64) -> f64 {
        if high > low {
            (close - low) / (high - low)
        } else {
            0.5
        }
    }

    fn vwap_distance(&self, bar: &Bar, session: &SessionState) -> f64 {
        let vwap = session.vwap();
        if vwap > 0.0 {
            (bar.close - vwap) / vwap
        } else {
            0.0
        }
    }

    /// Signed distance of the close from the opening-range midpoint,
    /// relative to that midpoint. Zero until the range is established.
    fn opening_range_breakout(bar: &Bar, session: &SessionState) -> f64 {
        if !session.or_complete {
            return 0.0;
        }
        let or_mid = (session.or_high + session.or_low) / 2.0;
        (bar.close - or_mid) / (or_mid + 1e-10)
    }

    fn time_of_day(&self, bar: &Bar, session: &SessionState) -> (f64, f64) {
        let minutes_in = (bar.minutes_of_day() - session.open_minute).max(0) as f64;
        let phase = 2.0 * PI * minutes_in / self.config.session_length_minutes as f64;
        (phase.sin(), phase.cos())
    }

    fn volume_percentile(&self, volume: f64) -> f64 {
        let n = self.bars_1m.len().min(100);
        if n == 0 {
            return 0.5;
        }
        let start = self.bars_1m.len() - n;
        let below = self
            .bars_1m
            .iter()
            .skip(start)
            .filter(|b| b.volume <= volume)
            .count();
        below as f64 / n as f64
    }

    fn relative_volume(&self, volume: f64) -> f64 {
        if self.bars_1m.len() < 20 {
            return 1.0;
        }
        let n = self.bars_1m.len();
        let avg: f64 = self.bars_1m.iter().skip(n - 20).map(|b| b.volume).sum::<f64>() / 20.0;
        volume / (avg + 1.0)
    }

    fn volume_price_trend(&self) -> f64 {
        let n = self.bars_1m.len().min(100);
        if n < 2 {
            return 0.0;
        }
        let start = self.bars_1m.len() - n;
        let mut vpt = 0.0;
        for i in start + 1..self.bars_1m.len() {
            let prev = self.bars_1m[i - 1].close;
            let change = (self.bars_1m[i].close - prev) / prev;
            vpt += change * self.bars_1m[i].volume;
        }
        vpt / 1e6
    }
}

impl Default for FeatureEngine {
    fn default() -> Self {
        Self::new(FeatureEngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::FEATURE_ORDER;

    fn make_bar(i: u64, close: f64, volume: f64) -> Bar {
        Bar {
            timestamp_ms: 1_700_000_000_000 + i as i64 * 60_000,
            bar_id: i,
            symbol: "QQQ".to_string(),
            open: close - 0.1,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume,
        }
    }

    fn warmed_engine(bars: usize) -> FeatureEngine {
        let mut engine = FeatureEngine::default();
        for i in 0..bars {
            let close = 100.0 + (i as f64 * 0.3).sin();
            engine.update(&make_bar(i as u64, close, 1000.0 + i as f64)).unwrap();
        }
        engine
    }

    #[test]
    fn test_not_ready_returns_zeros() {
        let engine = warmed_engine(10);
        assert!(!engine.is_ready());
        let features = engine.extract();
        assert_eq!(features.len(), FEATURE_ORDER.len());
        assert!(features.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_ready_after_warmup() {
        let engine = warmed_engine(60);
        assert!(engine.is_ready());
        let features = engine.extract();
        assert_eq!(features.len(), FEATURE_ORDER.len());
        assert!(features.iter().all(|f| f.is_finite()));
        // At least momentum and time-of-day features should be non-zero.
        assert!(features.iter().any(|&f| f != 0.0));
    }

    #[test]
    fn test_extract_is_deterministic() {
        let a = warmed_engine(80).extract();
        let b = warmed_engine(80).extract();
        assert_eq!(a, b);
    }

    #[test]
    fn test_timestamp_regression_is_fatal() {
        let mut engine = warmed_engine(5);
        let mut stale = make_bar(2, 100.0, 1000.0);
        stale.timestamp_ms = 1_700_000_000_000; // already seen
        let err = engine.update(&stale).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_rsi_bounds() {
        let mut engine = FeatureEngine::default();
        // Strictly rising closes: RSI must saturate at 100.
        for i in 0..70u64 {
            engine.update(&make_bar(i, 100.0 + i as f64, 1000.0)).unwrap();
        }
        let rsi_idx = FEATURE_ORDER.iter().position(|&n| n == "rsi_3").unwrap();
        let features = engine.extract();
        assert_eq!(features[rsi_idx], 100.0);
    }

    #[test]
    fn test_opening_range_breakout_ratio() {
        let mut engine = FeatureEngine::default();
        // Opening range spans the first 30 minutes: highs 100.5, lows 99.5,
        // so the range midpoint is 100.0.
        for i in 0..30u64 {
            engine.update(&make_bar(i, 100.0, 1000.0)).unwrap();
        }
        // Break out above the range and complete warmup.
        for i in 30..60u64 {
            engine.update(&make_bar(i, 104.0, 1000.0)).unwrap();
        }
        assert!(engine.is_ready());
        let orb_idx = FEATURE_ORDER
            .iter()
            .position(|&n| n == "opening_range_breakout")
            .unwrap();
        let features = engine.extract();
        // (104 − 100) / 100, signed distance from the range midpoint.
        assert!((features[orb_idx] - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_session_reset_on_day_rollover() {
        let mut engine = FeatureEngine::default();
        for i in 0..60u64 {
            engine.update(&make_bar(i, 100.0, 1000.0)).unwrap();
        }
        // Jump a day ahead; cumulative delta restarts from the new session.
        let mut next_day = make_bar(1500, 100.0, 500.0);
        next_day.timestamp_ms += 86_400_000;
        engine.update(&next_day).unwrap();
        let delta_idx = FEATURE_ORDER
            .iter()
            .position(|&n| n == "delta_cumulative")
            .unwrap();
        let features = engine.extract();
        assert!(features[delta_idx].abs() <= 500.0);
    }
}
