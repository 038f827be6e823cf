use std::collections::HashMap;

use trading_core::{OrderSide, TradingError};

/// Synchronous order seam.
///
/// The core treats the broker as an oracle that returns a fill price
/// immediately; a live adapter owns any asynchrony behind this trait.
pub trait Broker {
    fn submit_order(
        &mut self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<f64, TradingError>;

    /// Latest marks per symbol, pushed once per bar. Backtest brokers fill
    /// from these; live adapters can ignore them.
    fn mark_prices(&mut self, _prices: &HashMap<String, f64>) {}
}

/// Backtest broker: fills every order at the bar's close.
#[derive(Debug, Default)]
pub struct BacktestBroker {
    prices: HashMap<String, f64>,
    orders_filled: u64,
}

impl BacktestBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh marks from the latest bar snapshot.
    pub fn set_price(&mut self, symbol: &str, price: f64) {
        self.prices.insert(symbol.to_string(), price);
    }

    pub fn orders_filled(&self) -> u64 {
        self.orders_filled
    }
}

impl Broker for BacktestBroker {
    fn mark_prices(&mut self, prices: &HashMap<String, f64>) {
        for (symbol, &price) in prices {
            self.prices.insert(symbol.clone(), price);
        }
    }

    fn submit_order(
        &mut self,
        symbol: &str,
        _side: OrderSide,
        quantity: f64,
    ) -> Result<f64, TradingError> {
        if quantity <= 0.0 || !quantity.is_finite() {
            return Err(TradingError::InvalidConfig(format!(
                "order quantity {quantity} for {symbol}"
            )));
        }
        let price = self
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| TradingError::NotReady(format!("no mark for {symbol}")))?;
        self.orders_filled += 1;
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_at_close() {
        let mut broker = BacktestBroker::new();
        broker.set_price("QQQ", 401.25);
        let fill = broker.submit_order("QQQ", OrderSide::Buy, 10.0).unwrap();
        assert_eq!(fill, 401.25);
        assert_eq!(broker.orders_filled(), 1);
    }

    #[test]
    fn test_unknown_symbol_rejected() {
        let mut broker = BacktestBroker::new();
        assert!(broker.submit_order("SPY", OrderSide::Sell, 1.0).is_err());
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut broker = BacktestBroker::new();
        broker.set_price("QQQ", 400.0);
        assert!(broker.submit_order("QQQ", OrderSide::Buy, 0.0).is_err());
    }
}
