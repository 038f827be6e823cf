use serde::{Deserialize, Serialize};
use trading_core::{RankedSignal, SignalType};

/// Rank assigned to a position whose signal has decayed away entirely.
pub const ABSENT_RANK: usize = 9999;

/// What the manager wants done with one symbol this bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Hold,
    EnterLong,
    EnterShort,
    Exit,
    RotateOut,
    ProfitTarget,
    StopLoss,
    EodExit,
}

impl Decision {
    pub fn name(&self) -> &'static str {
        match self {
            Decision::Hold => "HOLD",
            Decision::EnterLong => "ENTER_LONG",
            Decision::EnterShort => "ENTER_SHORT",
            Decision::Exit => "EXIT",
            Decision::RotateOut => "ROTATE_OUT",
            Decision::ProfitTarget => "PROFIT_TARGET",
            Decision::StopLoss => "STOP_LOSS",
            Decision::EodExit => "EOD_EXIT",
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, Decision::EnterLong | Decision::EnterShort)
    }

    pub fn is_exit(&self) -> bool {
        matches!(
            self,
            Decision::Exit
                | Decision::RotateOut
                | Decision::ProfitTarget
                | Decision::StopLoss
                | Decision::EodExit
        )
    }
}

/// One open position tracked by the rotation manager.
///
/// Invariants: `shares > 0`, `entry_cost > 0`, at most one open position per
/// symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub direction: SignalType,
    pub entry_price: f64,
    pub entry_bar_id: u64,
    pub entry_rank: usize,
    pub entry_strength: f64,
    pub current_price: f64,
    pub current_rank: usize,
    pub current_strength: f64,
    pub bars_held: u32,
    pub shares: f64,
    pub entry_cost: f64,
    pub min_hold_bars: u32,
    pub pnl: f64,
    pub pnl_pct: f64,
}

impl Position {
    /// Recompute P&L from a fresh price, signed by direction.
    pub fn mark(&mut self, price: f64) {
        self.current_price = price;
        let per_share = match self.direction {
            SignalType::Short => self.entry_price - price,
            _ => price - self.entry_price,
        };
        self.pnl = per_share * self.shares;
        self.pnl_pct = per_share / self.entry_price;
    }
}

/// A decision paired with the context needed to execute it.
#[derive(Debug, Clone)]
pub struct PositionDecision {
    pub symbol: String,
    pub decision: Decision,
    /// Present for entries: the ranked signal that triggered them.
    pub signal: Option<RankedSignal>,
    /// Present for exits and holds: a snapshot of the position.
    pub position: Option<Position>,
    pub reason: String,
}

/// Result of applying a fill to the manager's state.
#[derive(Debug, Clone)]
pub enum Execution {
    /// A new position was opened.
    Entered,
    /// A position was closed; the snapshot carries final P&L and shares.
    Exited(Position),
    /// Nothing changed (HOLD, duplicate entry, unknown symbol).
    Skipped,
}

/// Decision counters kept for the session summary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RotationStats {
    pub total_decisions: u64,
    pub holds: u64,
    pub entries: u64,
    pub exits: u64,
    pub rotations: u64,
    pub profit_targets: u64,
    pub stop_losses: u64,
    pub eod_exits: u64,
    pub executed_exits: u64,
    pub avg_bars_held: f64,
    pub avg_pnl_pct: f64,
}

impl RotationStats {
    /// Running averages over all executed exits.
    pub fn record_exit(&mut self, bars_held: u32, pnl_pct: f64) {
        let n = self.executed_exits as f64;
        self.avg_bars_held = (self.avg_bars_held * n + bars_held as f64) / (n + 1.0);
        self.avg_pnl_pct = (self.avg_pnl_pct * n + pnl_pct) / (n + 1.0);
        self.executed_exits += 1;
    }
}
