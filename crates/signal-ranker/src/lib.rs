use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use trading_core::{RankedSignal, Signal};

/// Aggregator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Signals weaker than this are dropped from the ranking outright.
    pub min_strength: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { min_strength: 0.0 }
    }
}

/// Ranks the universe's latest signals by strength.
///
/// Strength = |probability − 0.5| × 2 × confidence × staleness_weight, so a
/// maximally-confident, fully-fresh signal at probability 1.0 scores 1.0.
/// Ties break by symbol in lexicographic order; ranks are assigned 1..N in
/// descending strength.
#[derive(Debug, Default)]
pub struct SignalAggregator {
    config: AggregatorConfig,
}

impl SignalAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn rank(
        &self,
        signals: &HashMap<String, Signal>,
        staleness_weights: &HashMap<String, f64>,
    ) -> Vec<RankedSignal> {
        let mut ranked: Vec<RankedSignal> = signals
            .iter()
            .map(|(symbol, signal)| {
                let staleness = staleness_weights
                    .get(symbol)
                    .copied()
                    .unwrap_or(1.0)
                    .clamp(0.0, 1.0);
                let strength =
                    (signal.probability - 0.5).abs() * 2.0 * signal.confidence * staleness;
                RankedSignal {
                    signal: signal.clone(),
                    rank: 0,
                    strength: if strength.is_finite() { strength } else { 0.0 },
                }
            })
            .filter(|r| r.strength >= self.config.min_strength)
            .collect();

        ranked.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.signal.symbol.cmp(&b.signal.symbol))
        });
        for (idx, r) in ranked.iter_mut().enumerate() {
            r.rank = idx + 1;
        }

        debug!(count = ranked.len(), "ranked universe signals");
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trading_core::SignalType;

    fn make_signal(symbol: &str, probability: f64, confidence: f64) -> Signal {
        Signal {
            symbol: symbol.to_string(),
            timestamp_ms: 0,
            bar_id: 100,
            probability,
            signal_type: if probability > 0.5 {
                SignalType::Long
            } else if probability < 0.5 {
                SignalType::Short
            } else {
                SignalType::Neutral
            },
            confidence,
            prediction_horizon: 5,
            target_bar_id: 105,
        }
    }

    fn universe(entries: &[(&str, f64, f64)]) -> HashMap<String, Signal> {
        entries
            .iter()
            .map(|&(s, p, c)| (s.to_string(), make_signal(s, p, c)))
            .collect()
    }

    #[test]
    fn test_ranks_are_a_permutation_and_strengths_monotone() {
        let signals = universe(&[
            ("AAPL", 0.70, 0.8),
            ("MSFT", 0.55, 0.9),
            ("NVDA", 0.20, 0.6),
            ("TSLA", 0.50, 1.0),
        ]);
        let ranked = SignalAggregator::default().rank(&signals, &HashMap::new());

        let mut ranks: Vec<usize> = ranked.iter().map(|r| r.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2, 3, 4]);

        for pair in ranked.windows(2) {
            assert!(pair[0].strength >= pair[1].strength);
        }
        assert_eq!(ranked[0].signal.symbol, "NVDA"); // |0.2-0.5|*2*0.6 = 0.36
    }

    #[test]
    fn test_staleness_penalizes_strength() {
        let signals = universe(&[("AAPL", 0.70, 1.0), ("MSFT", 0.70, 1.0)]);
        let staleness: HashMap<String, f64> = [("MSFT".to_string(), 0.5)].into_iter().collect();

        let ranked = SignalAggregator::default().rank(&signals, &staleness);
        assert_eq!(ranked[0].signal.symbol, "AAPL");
        assert!((ranked[0].strength - 0.4).abs() < 1e-12);
        assert!((ranked[1].strength - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_ties_break_lexicographically() {
        let signals = universe(&[("ZM", 0.60, 0.5), ("AA", 0.60, 0.5), ("MM", 0.60, 0.5)]);
        let ranked = SignalAggregator::default().rank(&signals, &HashMap::new());
        let symbols: Vec<&str> = ranked.iter().map(|r| r.signal.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AA", "MM", "ZM"]);
    }

    #[test]
    fn test_min_strength_filter() {
        let aggregator = SignalAggregator::new(AggregatorConfig { min_strength: 0.3 });
        let signals = universe(&[("AAPL", 0.70, 1.0), ("MSFT", 0.55, 1.0)]);
        let ranked = aggregator.rank(&signals, &HashMap::new());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].signal.symbol, "AAPL");
    }
}
