use serde::{Deserialize, Serialize};
use trading_core::{SignalType, TradingError};

/// One JSON line per emitted signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub bar_id: u64,
    pub timestamp_ms: i64,
    pub symbol: String,
    pub probability: f64,
    pub signal_type: SignalType,
    pub confidence: f64,
    pub horizon: u32,
    pub rank: Option<usize>,
    pub strength: Option<f64>,
}

/// One JSON line per manager decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub bar_id: u64,
    pub symbol: String,
    pub decision: String,
    pub reason: String,
    pub executed: bool,
}

/// One JSON line per completed round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub direction: SignalType,
    pub entry_bar_id: u64,
    pub exit_bar_id: u64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub shares: f64,
    pub realized_pnl: f64,
    pub pnl_pct: f64,
    pub bars_held: u32,
    pub exit_reason: String,
}

/// Periodic open-position snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub bar_id: u64,
    pub symbol: String,
    pub direction: SignalType,
    pub shares: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub bars_held: u32,
}

/// Counts of every non-fatal error kind seen during the session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ErrorCounters {
    pub not_ready: u64,
    pub numerical_degeneracy: u64,
    pub insufficient_funds: u64,
    pub invalid_bar: u64,
    pub accounting_drift: u64,
    pub capacity_exceeded: u64,
}

impl ErrorCounters {
    pub fn count(&mut self, error: &TradingError) {
        match error {
            TradingError::NotReady(_) => self.not_ready += 1,
            TradingError::NumericalDegeneracy(_) => self.numerical_degeneracy += 1,
            TradingError::InsufficientFunds { .. } => self.insufficient_funds += 1,
            TradingError::InvalidBar(_) => self.invalid_bar += 1,
            TradingError::AccountingDrift(_) => self.accounting_drift += 1,
            TradingError::CapacityExceeded(_) => self.capacity_exceeded += 1,
            TradingError::SchemaMismatch { .. } | TradingError::InvalidConfig(_) => {}
        }
    }
}

/// Per-horizon learning telemetry for the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonReport {
    pub horizon: u32,
    pub settled_labels: u64,
    pub directional_accuracy: f64,
    /// Accuracy over the horizon's earliest scored labels, frozen once the
    /// warmup window fills; None until anything settled.
    pub warmup_accuracy: Option<f64>,
}

/// Per-symbol P&L breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub trades: u32,
    pub wins: u32,
    pub realized_pnl: f64,
}

/// End-of-session rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub bars_processed: u64,
    pub starting_capital: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub realized_pnl: f64,
    pub max_drawdown_pct: f64,
    /// Annualized mean/σ of per-bar equity returns.
    pub sharpe_proxy: Option<f64>,
    /// Total return divided by trading days seen.
    pub mean_return_per_day_pct: f64,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub win_rate_pct: f64,
    pub profit_factor: Option<f64>,
    pub signals_emitted: u64,
    /// Mean warmup accuracy across horizons cleared 0.51: the predictors
    /// converged during their earliest labels.
    pub converged: bool,
    pub circuit_breaker_tripped: bool,
    pub per_symbol: Vec<SymbolReport>,
    pub horizons: Vec<HorizonReport>,
    pub errors: ErrorCounters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_counting() {
        let mut counters = ErrorCounters::default();
        counters.count(&TradingError::NotReady("x".into()));
        counters.count(&TradingError::InsufficientFunds {
            required: 10.0,
            available: 5.0,
        });
        counters.count(&TradingError::AccountingDrift(2.0));
        assert_eq!(counters.not_ready, 1);
        assert_eq!(counters.insufficient_funds, 1);
        assert_eq!(counters.accounting_drift, 1);
        assert_eq!(counters.invalid_bar, 0);
    }

    #[test]
    fn test_trade_record_serializes() {
        let record = TradeRecord {
            symbol: "QQQ".into(),
            direction: SignalType::Long,
            entry_bar_id: 10,
            exit_bar_id: 45,
            entry_price: 100.0,
            exit_price: 101.0,
            shares: 50.0,
            realized_pnl: 50.0,
            pnl_pct: 0.01,
            bars_held: 35,
            exit_reason: "PROFIT_TARGET".into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"symbol\":\"QQQ\""));
        let back: TradeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bars_held, 35);
    }
}
