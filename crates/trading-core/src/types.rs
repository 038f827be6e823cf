use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TradingError;

/// OHLCV bar data
///
/// `bar_id` is monotonic per symbol and aligned across symbols by minute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp_ms: i64,
    pub bar_id: u64,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Check the bar for finite, positively-priced OHLCV.
    pub fn validate(&self) -> Result<(), TradingError> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(TradingError::InvalidBar(format!(
                    "{} has non-finite {} ({})",
                    self.symbol, name, value
                )));
            }
        }
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(TradingError::InvalidBar(format!(
                "{} has non-positive price at bar {}",
                self.symbol, self.bar_id
            )));
        }
        if self.volume < 0.0 {
            return Err(TradingError::InvalidBar(format!(
                "{} has negative volume at bar {}",
                self.symbol, self.bar_id
            )));
        }
        Ok(())
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Minutes since the bar's UTC midnight. The backend rebases this to
    /// minutes since market open.
    pub fn minutes_of_day(&self) -> i64 {
        (self.timestamp_ms / 60_000) % (24 * 60)
    }
}

/// Trade direction of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    Long,
    Short,
    Neutral,
}

impl SignalType {
    pub fn name(&self) -> &'static str {
        match self {
            SignalType::Long => "LONG",
            SignalType::Short => "SHORT",
            SignalType::Neutral => "NEUTRAL",
        }
    }
}

/// Order side presented to the broker seam
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// A single prediction emitted by an ensemble for one symbol.
///
/// Probability 0.5 is neutral; above is bullish, below bearish. `signal_type`
/// is derived from the probability crossing the configured buy/sell
/// thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub timestamp_ms: i64,
    pub bar_id: u64,
    pub probability: f64,
    pub signal_type: SignalType,
    pub confidence: f64,
    pub prediction_horizon: u32,
    pub target_bar_id: u64,
}

impl Signal {
    /// Neutral placeholder for a symbol that has nothing actionable to say.
    pub fn neutral(symbol: &str, timestamp_ms: i64, bar_id: u64, horizon: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp_ms,
            bar_id,
            probability: 0.5,
            signal_type: SignalType::Neutral,
            confidence: 0.0,
            prediction_horizon: horizon,
            target_bar_id: bar_id + horizon as u64,
        }
    }
}

/// A signal with its cross-universe rank attached (1 = strongest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSignal {
    pub signal: Signal,
    pub rank: usize,
    pub strength: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64) -> Bar {
        Bar {
            timestamp_ms: 1_700_000_000_000,
            bar_id: 1,
            symbol: "QQQ".to_string(),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_valid_bar() {
        assert!(bar(100.0).validate().is_ok());
    }

    #[test]
    fn test_non_finite_bar_rejected() {
        let mut b = bar(100.0);
        b.close = f64::NAN;
        let err = b.validate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let mut b = bar(100.0);
        b.low = 0.0;
        assert!(b.validate().is_err());
    }

    #[test]
    fn test_negative_volume_rejected() {
        let mut b = bar(100.0);
        b.volume = -1.0;
        assert!(b.validate().is_err());
    }

    #[test]
    fn test_neutral_signal_targets_horizon() {
        let s = Signal::neutral("SPY", 0, 42, 5);
        assert_eq!(s.target_bar_id, 47);
        assert_eq!(s.signal_type, SignalType::Neutral);
        assert_eq!(s.probability, 0.5);
    }
}
