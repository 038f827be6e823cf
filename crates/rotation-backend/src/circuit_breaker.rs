use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Trip when equity falls below this fraction of starting capital.
    pub equity_fraction: f64,
    /// Trip when equity falls below this absolute floor.
    pub minimum_capital: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            equity_fraction: 0.60,
            minimum_capital: 10_000.0,
        }
    }
}

/// Latched drawdown halt: once tripped, entries stay blocked for the rest of
/// the session while exits continue to run.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    latched: bool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            latched: false,
        }
    }

    /// Evaluate current equity; returns whether the breaker is latched.
    pub fn check(&mut self, equity: f64, starting_capital: f64) -> bool {
        if self.latched {
            return true;
        }
        let fraction = if starting_capital > 0.0 {
            equity / starting_capital
        } else {
            0.0
        };
        if fraction < self.config.equity_fraction || equity < self.config.minimum_capital {
            error!(
                equity,
                fraction,
                floor = self.config.minimum_capital,
                "circuit breaker latched; blocking all new entries"
            );
            self.latched = true;
        }
        self.latched
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }
}
