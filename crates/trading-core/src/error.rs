use thiserror::Error;

/// Error kinds shared across the trading engine.
///
/// `InvalidBar` and `SchemaMismatch` are fatal: the current bar cycle is
/// aborted and the error surfaces to the host. Every other kind is recovered
/// where it occurs and only counted in session statistics.
#[derive(Error, Debug)]
pub enum TradingError {
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    #[error("Insufficient funds: need {required:.2}, have {available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Invalid bar: {0}")]
    InvalidBar(String),

    #[error("Feature schema mismatch: expected checksum {expected:#018x}, got {actual:#018x}")]
    SchemaMismatch { expected: u64, actual: u64 },

    #[error("Accounting drift: {0:.4} exceeds tolerance")]
    AccountingDrift(f64),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TradingError {
    /// Fatal errors abort the bar cycle; everything else is recovered locally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TradingError::InvalidBar(_) | TradingError::SchemaMismatch { .. }
        )
    }
}
