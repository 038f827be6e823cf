use serde::{Deserialize, Serialize};
use tracing::error;
use trading_core::TradingError;

/// Capital state owned by the backend.
///
/// Invariant, checked every bar: cash + allocated + unrealized equals
/// starting capital + cumulative realized P&L to within a small epsilon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    starting_capital: f64,
    cash: f64,
    allocated: f64,
    realized_pnl: f64,
    peak_equity: f64,
    trough_equity: f64,
    max_drawdown_pct: f64,
}

impl Portfolio {
    pub fn new(starting_capital: f64) -> Self {
        Self {
            starting_capital,
            cash: starting_capital,
            allocated: 0.0,
            realized_pnl: 0.0,
            peak_equity: starting_capital,
            trough_equity: starting_capital,
            max_drawdown_pct: 0.0,
        }
    }

    pub fn starting_capital(&self) -> f64 {
        self.starting_capital
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn allocated(&self) -> f64 {
        self.allocated
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn equity(&self, unrealized: f64) -> f64 {
        self.cash + self.allocated + unrealized
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    pub fn max_drawdown_pct(&self) -> f64 {
        self.max_drawdown_pct
    }

    /// Pre-deduct an entry's cost so later decisions in the same bar cannot
    /// over-allocate the same cash.
    pub fn apply_entry(&mut self, cost: f64) -> Result<(), TradingError> {
        if cost > self.cash {
            return Err(TradingError::InsufficientFunds {
                required: cost,
                available: self.cash,
            });
        }
        self.cash -= cost;
        self.allocated += cost;
        Ok(())
    }

    /// Undo a pre-deduction when execution fails after the fact.
    pub fn roll_back_entry(&mut self, cost: f64) {
        self.cash += cost;
        self.allocated -= cost;
    }

    /// Release an exited position: margin comes back plus signed P&L.
    pub fn apply_exit(&mut self, entry_cost: f64, realized_pnl: f64) {
        self.cash += entry_cost + realized_pnl;
        self.allocated -= entry_cost;
        self.realized_pnl += realized_pnl;
    }

    pub fn update_drawdown(&mut self, equity: f64) {
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if equity < self.trough_equity {
            self.trough_equity = equity;
        }
        if self.peak_equity > 0.0 {
            let dd = (self.peak_equity - equity) / self.peak_equity * 100.0;
            if dd > self.max_drawdown_pct {
                self.max_drawdown_pct = dd;
            }
        }
    }

    /// The capital conservation check: cash + allocated must equal starting
    /// capital + cumulative realized P&L, which makes equity identically
    /// starting + realized + unrealized. A violation is a critical warning,
    /// not fatal: the bar continues and the drift lands in the summary.
    pub fn check_invariant(&self, epsilon: f64) -> Result<(), TradingError> {
        let drift = self.cash + self.allocated - self.starting_capital - self.realized_pnl;
        if drift.abs() > epsilon {
            error!(
                drift,
                cash = self.cash,
                allocated = self.allocated,
                realized = self.realized_pnl,
                "capital accounting invariant violated"
            );
            return Err(TradingError::AccountingDrift(drift));
        }
        Ok(())
    }
}
