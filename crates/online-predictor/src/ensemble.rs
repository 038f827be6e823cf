use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;
use trading_core::{Bar, Signal, SignalType, TradingError};

use crate::ewrls::{EwrlsConfig, EwrlsPredictor};

/// Multi-horizon ensemble configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Prediction horizons in bars.
    pub horizons: Vec<u32>,
    /// Base weight per horizon; must sum to ~1.
    pub base_weights: Vec<f64>,
    /// Emit a signal every `signal_interval` bars.
    pub signal_interval: u64,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    /// Below this pairwise agreement the ensemble emits NEUTRAL outright.
    pub min_agreement: f64,
    /// α in p = 0.5 + 0.5·tanh(α·ŷ).
    pub probability_scaling: f64,
    /// Predictions below this confidence are forced NEUTRAL.
    pub confidence_threshold: f64,
    /// Bounded ring of pending labels per symbol.
    pub max_pending: usize,
    /// Rolling window for per-horizon directional accuracy.
    pub accuracy_window: usize,
    /// Earliest scored labels treated as the warmup sample for the
    /// convergence report.
    pub warmup_accuracy_window: usize,
    pub ewrls: EwrlsConfig,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            horizons: vec![1, 5, 10],
            base_weights: vec![0.2, 0.5, 0.3],
            signal_interval: 1,
            buy_threshold: 0.55,
            sell_threshold: 0.45,
            min_agreement: 0.6,
            probability_scaling: 50.0,
            confidence_threshold: 0.05,
            max_pending: 1000,
            accuracy_window: 100,
            warmup_accuracy_window: 200,
            ewrls: EwrlsConfig::default(),
        }
    }
}

impl EnsembleConfig {
    pub fn validate(&self) -> Result<(), TradingError> {
        if self.horizons.is_empty() || self.horizons.iter().any(|&h| h == 0) {
            return Err(TradingError::InvalidConfig(
                "horizons must be non-empty and positive".to_string(),
            ));
        }
        if self.base_weights.len() != self.horizons.len() {
            return Err(TradingError::InvalidConfig(format!(
                "{} base weights for {} horizons",
                self.base_weights.len(),
                self.horizons.len()
            )));
        }
        let sum: f64 = self.base_weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(TradingError::InvalidConfig(format!(
                "base weights sum to {sum}, expected 1.0"
            )));
        }
        if !(self.buy_threshold > 0.5 && self.sell_threshold < 0.5) {
            return Err(TradingError::InvalidConfig(
                "buy threshold must exceed 0.5 and sell threshold must be below it".to_string(),
            ));
        }
        if self.signal_interval == 0 {
            return Err(TradingError::InvalidConfig(
                "signal interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A prediction waiting for its realized label at bar t + h.
#[derive(Debug, Clone)]
struct PendingLabel {
    bar_id: u64,
    features: Vec<f64>,
    close: f64,
    horizon: u32,
    predicted_return: Option<f64>,
}

/// Rolling directional hit/miss record for one horizon, plus a frozen
/// tally over the earliest scored labels for the warmup convergence report.
#[derive(Debug, Clone, Default)]
struct AccuracyTracker {
    outcomes: VecDeque<bool>,
    settled: u64,
    warmup_hits: u64,
    warmup_total: u64,
}

impl AccuracyTracker {
    fn record(&mut self, hit: bool, window: usize, warmup_window: usize) {
        self.outcomes.push_back(hit);
        while self.outcomes.len() > window {
            self.outcomes.pop_front();
        }
        if self.warmup_total < warmup_window as u64 {
            self.warmup_total += 1;
            if hit {
                self.warmup_hits += 1;
            }
        }
        self.settled += 1;
    }

    /// 0.5 until enough settled labels exist to mean anything.
    fn accuracy(&self) -> f64 {
        if self.outcomes.len() < 10 {
            return 0.5;
        }
        let hits = self.outcomes.iter().filter(|&&h| h).count();
        hits as f64 / self.outcomes.len() as f64
    }

    /// Accuracy over the earliest scored labels only; None before any have
    /// settled.
    fn warmup_accuracy(&self) -> Option<f64> {
        if self.warmup_total == 0 {
            return None;
        }
        Some(self.warmup_hits as f64 / self.warmup_total as f64)
    }
}

/// Per-symbol multi-horizon ensemble over independent EWRLS predictors.
///
/// On every bar the ensemble first settles matured pending labels (feeding
/// realized returns back into the owning predictors), then — at the
/// configured cadence — fuses the horizon predictions into one signal.
#[derive(Debug)]
pub struct MultiHorizonEnsemble {
    symbol: String,
    config: EnsembleConfig,
    predictors: Vec<EwrlsPredictor>,
    pending: VecDeque<PendingLabel>,
    accuracy: Vec<AccuracyTracker>,
    last_features: Option<Vec<f64>>,
    signals_emitted: u64,
}

impl MultiHorizonEnsemble {
    pub fn new(symbol: &str, dim: usize, config: EnsembleConfig) -> Result<Self, TradingError> {
        config.validate()?;
        let predictors = config
            .horizons
            .iter()
            .map(|_| EwrlsPredictor::new(dim, config.ewrls.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let accuracy = vec![AccuracyTracker::default(); config.horizons.len()];
        Ok(Self {
            symbol: symbol.to_string(),
            config,
            predictors,
            pending: VecDeque::new(),
            accuracy,
            last_features: None,
            signals_emitted: 0,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn signals_emitted(&self) -> u64 {
        self.signals_emitted
    }

    pub fn horizons(&self) -> &[u32] {
        &self.config.horizons
    }

    /// Settled-label count per horizon, for the session summary.
    pub fn settled_labels(&self) -> Vec<(u32, u64)> {
        self.config
            .horizons
            .iter()
            .zip(&self.accuracy)
            .map(|(&h, a)| (h, a.settled))
            .collect()
    }

    pub fn directional_accuracy(&self, horizon: u32) -> Option<f64> {
        let idx = self.config.horizons.iter().position(|&h| h == horizon)?;
        Some(self.accuracy[idx].accuracy())
    }

    /// Directional accuracy over the horizon's earliest scored labels only.
    /// Frozen once the warmup window fills, so it reads as a convergence
    /// indicator rather than tracking current performance.
    pub fn warmup_accuracy(&self, horizon: u32) -> Option<f64> {
        let idx = self.config.horizons.iter().position(|&h| h == horizon)?;
        self.accuracy[idx].warmup_accuracy()
    }

    /// Total covariance resets across all horizon predictors.
    pub fn covariance_resets(&self) -> u64 {
        self.predictors.iter().map(|p| p.covariance_resets()).sum()
    }

    /// Regime adaptation: apply a new forgetting factor to every predictor.
    pub fn set_lambda(&mut self, lambda: f64) {
        for p in &mut self.predictors {
            p.set_lambda(lambda);
        }
    }

    pub fn set_thresholds(&mut self, buy: f64, sell: f64) {
        if buy > 0.5 && sell < 0.5 {
            self.config.buy_threshold = buy;
            self.config.sell_threshold = sell;
        }
    }

    pub fn set_probability_scaling(&mut self, alpha: f64) {
        if alpha.is_finite() && alpha > 0.0 {
            self.config.probability_scaling = alpha;
        }
    }

    pub fn set_base_weights(&mut self, weights: &[f64]) -> Result<(), TradingError> {
        if weights.len() != self.config.horizons.len() {
            return Err(TradingError::InvalidConfig(format!(
                "{} weights for {} horizons",
                weights.len(),
                self.config.horizons.len()
            )));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(TradingError::InvalidConfig(format!(
                "horizon weights sum to {sum}, expected 1.0"
            )));
        }
        self.config.base_weights = weights.to_vec();
        Ok(())
    }

    /// Process one bar: settle matured labels, then emit a signal when the
    /// cadence lands on this bar. `features_ready` gates emission, not
    /// learning.
    pub fn on_bar(&mut self, bar: &Bar, features: &[f64], features_ready: bool) -> Option<Signal> {
        self.settle_pending(bar);

        if !features_ready {
            return None;
        }

        let cadence_aligned = bar.bar_id % self.config.signal_interval == 0;
        if !cadence_aligned {
            return None;
        }

        // Query each horizon before recording new pending labels so the
        // snapshot carries the prediction made from it.
        let predictions: Vec<Option<f64>> = self
            .predictors
            .iter()
            .map(|p| p.predict(features).ok().map(|pr| pr.predicted_return))
            .collect();

        for (idx, &horizon) in self.config.horizons.iter().enumerate() {
            self.pending.push_back(PendingLabel {
                bar_id: bar.bar_id,
                features: features.to_vec(),
                close: bar.close,
                horizon,
                predicted_return: predictions[idx],
            });
        }
        while self.pending.len() > self.config.max_pending {
            self.pending.pop_front();
        }
        self.last_features = Some(features.to_vec());

        let signal = self.fuse(bar, features);
        self.signals_emitted += 1;
        Some(signal)
    }

    /// External learning entry used by the backend: apply a label to every
    /// horizon predictor from the most recent emission snapshot. Realized
    /// exits arrive with weight 10, bar-to-bar returns with weight 1.
    pub fn learn(&mut self, label: f64, weight: f64) {
        let Some(features) = self.last_features.clone() else {
            return;
        };
        for predictor in &mut self.predictors {
            predictor.update_weighted(&features, label, weight);
        }
    }

    fn settle_pending(&mut self, bar: &Bar) {
        let current = bar.bar_id;
        let mut settled = 0usize;
        // Pending labels are appended in bar order, but horizons mature at
        // different times, so scan rather than pop from the front.
        let mut idx = 0;
        while idx < self.pending.len() {
            let due = self.pending[idx].bar_id + self.pending[idx].horizon as u64 <= current;
            if !due {
                idx += 1;
                continue;
            }
            let label = self.pending.remove(idx).expect("index in bounds");
            let realized = (bar.close - label.close) / label.close;
            if let Some(pos) = self
                .config
                .horizons
                .iter()
                .position(|&h| h == label.horizon)
            {
                self.predictors[pos].update(&label.features, realized);
                if let Some(predicted) = label.predicted_return {
                    if predicted != 0.0 && realized != 0.0 {
                        let hit = predicted.signum() == realized.signum();
                        self.accuracy[pos].record(
                            hit,
                            self.config.accuracy_window,
                            self.config.warmup_accuracy_window,
                        );
                    }
                }
            }
            settled += 1;
        }
        if settled > 0 {
            debug!(
                symbol = %self.symbol,
                bar = current,
                settled,
                "settled pending labels"
            );
        }
    }

    fn fuse(&self, bar: &Bar, features: &[f64]) -> Signal {
        struct HorizonVote {
            horizon: u32,
            predicted: f64,
            weight: f64,
        }

        let mut votes = Vec::with_capacity(self.predictors.len());
        for (idx, predictor) in self.predictors.iter().enumerate() {
            let Ok(prediction) = predictor.predict(features) else {
                continue;
            };
            let accuracy = self.accuracy[idx].accuracy();
            let weight =
                self.config.base_weights[idx] * (0.5 + accuracy) * prediction.confidence.max(1e-6);
            votes.push(HorizonVote {
                horizon: self.config.horizons[idx],
                predicted: prediction.predicted_return,
                weight,
            });
        }

        // Not all horizons warmed up yet: stay neutral rather than trade on
        // a partial ensemble.
        if votes.len() < self.predictors.len() {
            return Signal::neutral(
                &self.symbol,
                bar.timestamp_ms,
                bar.bar_id,
                self.config.horizons[0],
            );
        }

        let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
        let weighted_return: f64 = votes
            .iter()
            .map(|v| v.predicted * v.weight / total_weight)
            .sum();

        let probability = 0.5 + 0.5 * (self.config.probability_scaling * weighted_return).tanh();
        let agreement = Self::agreement(&votes.iter().map(|v| v.predicted).collect::<Vec<_>>());
        let confidence = ((probability - 0.5).abs() * 2.0 * agreement).clamp(0.0, 1.0);

        let dominant = votes
            .iter()
            .max_by(|a, b| {
                (a.weight * a.predicted.abs())
                    .partial_cmp(&(b.weight * b.predicted.abs()))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|v| v.horizon)
            .unwrap_or(self.config.horizons[0]);

        let signal_type = if agreement < self.config.min_agreement {
            SignalType::Neutral
        } else if confidence < self.config.confidence_threshold {
            SignalType::Neutral
        } else if probability > self.config.buy_threshold {
            SignalType::Long
        } else if probability < self.config.sell_threshold {
            SignalType::Short
        } else {
            SignalType::Neutral
        };

        Signal {
            symbol: self.symbol.clone(),
            timestamp_ms: bar.timestamp_ms,
            bar_id: bar.bar_id,
            probability,
            signal_type,
            confidence,
            prediction_horizon: dominant,
            target_bar_id: bar.bar_id + dominant as u64,
        }
    }

    /// Fraction of ordered horizon pairs whose predicted signs agree.
    fn agreement(predictions: &[f64]) -> f64 {
        if predictions.len() <= 1 {
            return 1.0;
        }
        let mut agreements = 0usize;
        let mut comparisons = 0usize;
        for i in 0..predictions.len() {
            for j in i + 1..predictions.len() {
                comparisons += 1;
                if predictions[i].signum() == predictions[j].signum() {
                    agreements += 1;
                }
            }
        }
        agreements as f64 / comparisons as f64
    }
}
