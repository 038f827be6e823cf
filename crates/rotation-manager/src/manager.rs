use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use trading_core::{RankedSignal, SignalType};

use crate::position::{
    Decision, Execution, Position, PositionDecision, RotationStats, ABSENT_RANK,
};

/// Rotation manager tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    pub max_positions: usize,
    /// Bars a position must be held before non-emergency exits.
    pub min_hold_bars: u32,
    pub profit_target_pct: f64,
    pub stop_loss_pct: f64,
    pub min_strength_to_enter: f64,
    /// Exit hysteresis: must be strictly below `min_strength_to_enter`.
    pub min_strength_to_exit: f64,
    pub min_rank_to_hold: usize,
    pub rotation_strength_delta: f64,
    pub rotation_cooldown_bars: u32,
    pub exit_cooldown_bars: u32,
    pub eod_exit_time_minutes: i64,
    /// Bars before signal-absence decay kicks in (predictor cold start).
    pub warmup_bars: u64,
    /// Per-bar strength decay for positions missing from the ranking.
    pub absent_strength_decay: f64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_positions: 4,
            min_hold_bars: 30,
            profit_target_pct: 0.02,
            stop_loss_pct: 0.01,
            min_strength_to_enter: 0.10,
            min_strength_to_exit: 0.05,
            min_rank_to_hold: 10,
            rotation_strength_delta: 0.15,
            rotation_cooldown_bars: 20,
            exit_cooldown_bars: 10,
            eod_exit_time_minutes: 389,
            warmup_bars: 200,
            absent_strength_decay: 0.95,
        }
    }
}

impl RotationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_positions == 0 {
            bail!("max_positions must be at least 1");
        }
        if self.min_hold_bars == 0 {
            bail!("min_hold_bars must be at least 1");
        }
        if self.profit_target_pct < 0.0 || self.stop_loss_pct < 0.0 {
            bail!("profit target and stop loss must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.min_strength_to_enter)
            || !(0.0..=1.0).contains(&self.min_strength_to_exit)
        {
            bail!("strength thresholds must be in (0, 1]");
        }
        if self.min_strength_to_exit >= self.min_strength_to_enter {
            bail!("min_strength_to_exit must be below min_strength_to_enter");
        }
        if self.min_rank_to_hold == 0 {
            bail!("min_rank_to_hold must be at least 1");
        }
        if self.rotation_strength_delta <= 0.0 {
            bail!("rotation_strength_delta must be positive");
        }
        if !(0.0..1.0).contains(&self.absent_strength_decay) {
            bail!("absent_strength_decay must be in [0, 1)");
        }
        Ok(())
    }
}

/// Selects, holds, and swaps concurrent positions by ranked signal strength.
///
/// `make_decisions` only proposes; nothing changes hands until the backend
/// reports the fill through `execute_decision`. The split keeps the manager's
/// position map consistent with what was actually executed.
#[derive(Debug)]
pub struct RotationPositionManager {
    config: RotationConfig,
    positions: HashMap<String, Position>,
    rotation_cooldown: HashMap<String, u32>,
    exit_cooldown: HashMap<String, u32>,
    current_bar: u64,
    stats: RotationStats,
}

impl RotationPositionManager {
    pub fn new(config: RotationConfig) -> Result<Self> {
        config.validate()?;
        info!(
            max_positions = config.max_positions,
            min_strength_to_enter = config.min_strength_to_enter,
            rotation_delta = config.rotation_strength_delta,
            "rotation position manager initialized"
        );
        Ok(Self {
            config,
            positions: HashMap::new(),
            rotation_cooldown: HashMap::new(),
            exit_cooldown: HashMap::new(),
            current_bar: 0,
            stats: RotationStats::default(),
        })
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn stats(&self) -> &RotationStats {
        &self.stats
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.pnl).sum()
    }

    /// Per-bar decision pass over (ranked signals, prices, session clock).
    /// `entries_blocked` is the backend's circuit-breaker gate: exits still
    /// run, entries and rotations do not.
    pub fn make_decisions(
        &mut self,
        ranked_signals: &[RankedSignal],
        current_prices: &HashMap<String, f64>,
        current_time_minutes: i64,
        entries_blocked: bool,
    ) -> Vec<PositionDecision> {
        self.current_bar += 1;
        self.stats.total_decisions += 1;
        let mut decisions = Vec::new();

        for cooldown in self.exit_cooldown.values_mut() {
            *cooldown = cooldown.saturating_sub(1);
        }
        for cooldown in self.rotation_cooldown.values_mut() {
            *cooldown = cooldown.saturating_sub(1);
        }

        // Step 1 + 2: mark-to-market, then evaluate exits.
        let mut symbols_to_exit: HashSet<String> = HashSet::new();
        let mut symbols: Vec<String> = self.positions.keys().cloned().collect();
        symbols.sort();

        for symbol in &symbols {
            let config = self.config.clone();
            let current_bar = self.current_bar;
            let position = self.positions.get_mut(symbol).expect("key from map");
            position.bars_held += 1;

            if let Some(&price) = current_prices.get(symbol) {
                position.mark(price);
            }

            match ranked_signals.iter().find(|r| &r.signal.symbol == symbol) {
                Some(ranked) => {
                    position.current_rank = ranked.rank;
                    position.current_strength = ranked.strength;
                }
                None if current_bar > config.warmup_bars => {
                    // Decay rather than exit outright: give the signal a few
                    // bars to come back before the strength floor triggers.
                    position.current_strength *= config.absent_strength_decay;
                    if position.current_strength < config.min_strength_to_exit {
                        position.current_rank = ABSENT_RANK;
                    }
                }
                None => {}
            }

            let decision = Self::check_exit_conditions(&config, position, current_time_minutes);
            let reason = match decision {
                Decision::Exit => format!(
                    "rank {} or strength {:.3} below hold floor",
                    position.current_rank, position.current_strength
                ),
                Decision::ProfitTarget => {
                    format!("profit target hit ({:.2}%)", position.pnl_pct * 100.0)
                }
                Decision::StopLoss => {
                    format!("stop loss hit ({:.2}%)", position.pnl_pct * 100.0)
                }
                Decision::EodExit => "end of day liquidation".to_string(),
                _ => format!(
                    "holding (rank={}, strength={:.3})",
                    position.current_rank, position.current_strength
                ),
            };

            match decision {
                Decision::Hold => self.stats.holds += 1,
                Decision::Exit => self.stats.exits += 1,
                Decision::ProfitTarget => self.stats.profit_targets += 1,
                Decision::StopLoss => self.stats.stop_losses += 1,
                Decision::EodExit => self.stats.eod_exits += 1,
                _ => {}
            }
            if decision.is_exit() {
                symbols_to_exit.insert(symbol.clone());
            }
            decisions.push(PositionDecision {
                symbol: symbol.clone(),
                decision,
                signal: None,
                position: Some(position.clone()),
                reason,
            });
        }

        // Step 3: anti-churn cooldown on everything that is leaving.
        for symbol in &symbols_to_exit {
            self.exit_cooldown
                .insert(symbol.clone(), self.config.exit_cooldown_bars);
        }

        // Step 4: entries. Positions marked for exit still occupy their slot
        // until the backend executes, so count the full map.
        let mut available_slots = self
            .config
            .max_positions
            .saturating_sub(self.positions.len());

        let bars_until_eod = self.config.eod_exit_time_minutes - current_time_minutes;
        if bars_until_eod < self.config.min_hold_bars as i64 {
            debug!(bars_until_eod, "blocking entries near end of day");
            available_slots = 0;
        }
        if entries_blocked {
            debug!("entries blocked by circuit breaker");
            available_slots = 0;
        }

        if available_slots > 0 {
            for ranked in ranked_signals {
                if available_slots == 0 {
                    break;
                }
                let symbol = &ranked.signal.symbol;
                if self.has_position(symbol) {
                    continue;
                }
                if self.rotation_cooldown.get(symbol).copied().unwrap_or(0) > 0 {
                    continue;
                }
                if self.exit_cooldown.get(symbol).copied().unwrap_or(0) > 0 {
                    continue;
                }
                // Sorted by strength, so the first miss ends the walk.
                if ranked.strength < self.config.min_strength_to_enter {
                    break;
                }
                if ranked.rank > self.config.min_rank_to_hold {
                    break;
                }
                let decision = match ranked.signal.signal_type {
                    SignalType::Long => Decision::EnterLong,
                    SignalType::Short => Decision::EnterShort,
                    SignalType::Neutral => continue,
                };
                let Some(&price) = current_prices.get(symbol) else {
                    warn!(symbol = %symbol, "no price for entry candidate");
                    continue;
                };
                if price <= 0.0 || !price.is_finite() {
                    warn!(symbol = %symbol, price, "invalid price for entry candidate");
                    continue;
                }

                info!(
                    symbol = %symbol,
                    price,
                    rank = ranked.rank,
                    strength = ranked.strength,
                    "entry decision"
                );
                decisions.push(PositionDecision {
                    symbol: symbol.clone(),
                    decision,
                    signal: Some(ranked.clone()),
                    position: None,
                    reason: format!(
                        "entering (rank={}, strength={:.3})",
                        ranked.rank, ranked.strength
                    ),
                });
                self.stats.entries += 1;
                available_slots -= 1;
            }
        }

        // Step 5: rotation, only when at capacity with entries allowed.
        if available_slots == 0
            && !entries_blocked
            && bars_until_eod >= self.config.min_hold_bars as i64
            && self.positions.len() >= self.config.max_positions
        {
            self.consider_rotation(ranked_signals, &symbols_to_exit, &mut decisions);
        }

        decisions
    }

    fn consider_rotation(
        &mut self,
        ranked_signals: &[RankedSignal],
        symbols_to_exit: &HashSet<String>,
        decisions: &mut Vec<PositionDecision>,
    ) {
        let weakest = self
            .positions
            .values()
            .filter(|p| !symbols_to_exit.contains(&p.symbol))
            .min_by(|a, b| {
                a.current_strength
                    .partial_cmp(&b.current_strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned();
        let Some(weakest) = weakest else {
            return;
        };

        for ranked in ranked_signals {
            let symbol = &ranked.signal.symbol;
            if self.has_position(symbol) {
                continue;
            }
            if ranked.signal.signal_type == SignalType::Neutral {
                continue;
            }
            if self.rotation_cooldown.get(symbol).copied().unwrap_or(0) > 0
                || self.exit_cooldown.get(symbol).copied().unwrap_or(0) > 0
            {
                continue;
            }

            let delta = ranked.strength - weakest.current_strength;
            if delta < self.config.rotation_strength_delta {
                // Strongest candidate first; weaker ones cannot clear it.
                break;
            }

            info!(
                out = %weakest.symbol,
                incoming = %symbol,
                delta,
                "rotation decision"
            );
            self.stats.rotations += 1;
            self.stats.entries += 1;
            self.rotation_cooldown
                .insert(weakest.symbol.clone(), self.config.rotation_cooldown_bars);
            self.exit_cooldown
                .insert(weakest.symbol.clone(), self.config.exit_cooldown_bars);

            decisions.push(PositionDecision {
                symbol: weakest.symbol.clone(),
                decision: Decision::RotateOut,
                signal: None,
                position: Some(weakest.clone()),
                reason: format!("rotating out for {symbol} (delta={delta:.3})"),
            });
            decisions.push(PositionDecision {
                symbol: symbol.clone(),
                decision: match ranked.signal.signal_type {
                    SignalType::Short => Decision::EnterShort,
                    _ => Decision::EnterLong,
                },
                signal: Some(ranked.clone()),
                position: None,
                reason: format!(
                    "entering via rotation (rank={}, strength={:.3})",
                    ranked.rank, ranked.strength
                ),
            });
            break; // one rotation per bar
        }
    }

    /// Exit precedence: EOD and stop-loss ignore minimum hold; profit
    /// target, rank, and strength exits respect it.
    fn check_exit_conditions(
        config: &RotationConfig,
        position: &Position,
        current_time_minutes: i64,
    ) -> Decision {
        if current_time_minutes >= config.eod_exit_time_minutes {
            return Decision::EodExit;
        }
        if config.stop_loss_pct > 0.0 && position.pnl_pct <= -config.stop_loss_pct {
            return Decision::StopLoss;
        }
        if position.bars_held < position.min_hold_bars {
            return Decision::Hold;
        }
        if config.profit_target_pct > 0.0 && position.pnl_pct >= config.profit_target_pct {
            return Decision::ProfitTarget;
        }
        if position.current_rank > config.min_rank_to_hold {
            return Decision::Exit;
        }
        if position.current_strength < config.min_strength_to_exit {
            return Decision::Exit;
        }
        Decision::Hold
    }

    /// Apply a fill reported by the backend. Entries need `shares`; exits
    /// return the closed position for the backend's capital accounting.
    pub fn execute_decision(
        &mut self,
        decision: &PositionDecision,
        fill_price: f64,
        shares: f64,
    ) -> Execution {
        match decision.decision {
            Decision::EnterLong | Decision::EnterShort => {
                let Some(ranked) = decision.signal.as_ref() else {
                    warn!(symbol = %decision.symbol, "entry decision without a signal");
                    return Execution::Skipped;
                };
                if shares <= 0.0 || fill_price <= 0.0 {
                    warn!(symbol = %decision.symbol, shares, fill_price, "rejecting degenerate fill");
                    return Execution::Skipped;
                }
                if self.positions.contains_key(&decision.symbol) {
                    warn!(symbol = %decision.symbol, "duplicate entry execution ignored");
                    return Execution::Skipped;
                }
                let direction = if decision.decision == Decision::EnterLong {
                    SignalType::Long
                } else {
                    SignalType::Short
                };
                let position = Position {
                    symbol: decision.symbol.clone(),
                    direction,
                    entry_price: fill_price,
                    entry_bar_id: ranked.signal.bar_id,
                    entry_rank: ranked.rank,
                    entry_strength: ranked.strength,
                    current_price: fill_price,
                    current_rank: ranked.rank,
                    current_strength: ranked.strength,
                    bars_held: 0,
                    shares,
                    entry_cost: shares * fill_price,
                    min_hold_bars: self.config.min_hold_bars,
                    pnl: 0.0,
                    pnl_pct: 0.0,
                };
                info!(
                    symbol = %position.symbol,
                    direction = position.direction.name(),
                    fill_price,
                    shares,
                    "entered position"
                );
                self.positions.insert(decision.symbol.clone(), position);
                Execution::Entered
            }
            d if d.is_exit() => {
                let Some(mut position) = self.positions.remove(&decision.symbol) else {
                    warn!(symbol = %decision.symbol, "exit for unknown position ignored");
                    return Execution::Skipped;
                };
                position.mark(fill_price);
                info!(
                    symbol = %position.symbol,
                    direction = position.direction.name(),
                    fill_price,
                    pnl_pct = position.pnl_pct * 100.0,
                    bars_held = position.bars_held,
                    "exited position"
                );
                self.stats.record_exit(position.bars_held, position.pnl_pct);
                Execution::Exited(position)
            }
            _ => Execution::Skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trading_core::Signal;

    fn ranked(symbol: &str, rank: usize, strength: f64, signal_type: SignalType) -> RankedSignal {
        RankedSignal {
            signal: Signal {
                symbol: symbol.to_string(),
                timestamp_ms: 0,
                bar_id: 10,
                probability: match signal_type {
                    SignalType::Long => 0.7,
                    SignalType::Short => 0.3,
                    SignalType::Neutral => 0.5,
                },
                signal_type,
                confidence: 0.8,
                prediction_horizon: 5,
                target_bar_id: 15,
            },
            rank,
            strength,
        }
    }

    fn prices(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|&(s, p)| (s.to_string(), p)).collect()
    }

    fn manager(config: RotationConfig) -> RotationPositionManager {
        RotationPositionManager::new(config).unwrap()
    }

    fn enter(
        m: &mut RotationPositionManager,
        symbol: &str,
        strength: f64,
        price: f64,
        shares: f64,
    ) {
        let decision = PositionDecision {
            symbol: symbol.to_string(),
            decision: Decision::EnterLong,
            signal: Some(ranked(symbol, 1, strength, SignalType::Long)),
            position: None,
            reason: String::new(),
        };
        m.execute_decision(&decision, price, shares);
    }

    #[test]
    fn test_config_hysteresis_enforced() {
        let mut config = RotationConfig::default();
        config.min_strength_to_exit = config.min_strength_to_enter;
        assert!(config.validate().is_err());
        assert!(RotationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_entry_up_to_capacity() {
        let mut config = RotationConfig::default();
        config.max_positions = 2;
        let mut m = manager(config);

        let signals = vec![
            ranked("AAA", 1, 0.5, SignalType::Long),
            ranked("BBB", 2, 0.4, SignalType::Long),
            ranked("CCC", 3, 0.3, SignalType::Long),
        ];
        let px = prices(&[("AAA", 100.0), ("BBB", 50.0), ("CCC", 25.0)]);
        let decisions = m.make_decisions(&signals, &px, 60, false);

        let entries: Vec<_> = decisions.iter().filter(|d| d.decision.is_entry()).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].symbol, "AAA");
        assert_eq!(entries[1].symbol, "BBB");
    }

    #[test]
    fn test_neutral_signals_never_entered() {
        let mut m = manager(RotationConfig::default());
        let signals = vec![ranked("AAA", 1, 0.9, SignalType::Neutral)];
        let px = prices(&[("AAA", 100.0)]);
        let decisions = m.make_decisions(&signals, &px, 60, false);
        assert!(decisions.iter().all(|d| !d.decision.is_entry()));
    }

    #[test]
    fn test_entries_blocked_by_breaker() {
        let mut m = manager(RotationConfig::default());
        let signals = vec![ranked("AAA", 1, 0.9, SignalType::Long)];
        let px = prices(&[("AAA", 100.0)]);
        let decisions = m.make_decisions(&signals, &px, 60, true);
        assert!(decisions.iter().all(|d| !d.decision.is_entry()));
    }

    #[test]
    fn test_entries_blocked_near_eod() {
        let mut config = RotationConfig::default();
        config.eod_exit_time_minutes = 389;
        config.min_hold_bars = 30;
        let mut m = manager(config);
        let signals = vec![ranked("AAA", 1, 0.9, SignalType::Long)];
        let px = prices(&[("AAA", 100.0)]);
        // 20 minutes to EOD < 30-bar minimum hold.
        let decisions = m.make_decisions(&signals, &px, 369, false);
        assert!(decisions.iter().all(|d| !d.decision.is_entry()));
    }

    #[test]
    fn test_min_hold_boundary() {
        let mut config = RotationConfig::default();
        config.min_hold_bars = 3;
        config.min_rank_to_hold = 2;
        let mut m = manager(config);
        enter(&mut m, "AAA", 0.5, 100.0, 10.0);

        // Rank 5 > min_rank_to_hold would normally exit, but min-hold
        // suppresses it for the first two evaluations.
        let weak = vec![ranked("AAA", 5, 0.4, SignalType::Long)];
        let px = prices(&[("AAA", 100.0)]);
        for _ in 0..2 {
            let decisions = m.make_decisions(&weak, &px, 60, false);
            assert_eq!(decisions[0].decision, Decision::Hold);
        }
        // bars_held now reaches min_hold: the same condition fires.
        let decisions = m.make_decisions(&weak, &px, 60, false);
        assert_eq!(decisions[0].decision, Decision::Exit);
    }

    #[test]
    fn test_stop_loss_overrides_min_hold() {
        let mut config = RotationConfig::default();
        config.min_hold_bars = 30;
        config.stop_loss_pct = 0.01;
        let mut m = manager(config);
        enter(&mut m, "AAA", 0.5, 100.0, 10.0);

        let signals = vec![ranked("AAA", 1, 0.5, SignalType::Long)];
        let px = prices(&[("AAA", 98.0)]); // -2%
        let decisions = m.make_decisions(&signals, &px, 60, false);
        assert_eq!(decisions[0].decision, Decision::StopLoss);
    }

    #[test]
    fn test_profit_target_respects_min_hold() {
        let mut config = RotationConfig::default();
        config.min_hold_bars = 30;
        config.profit_target_pct = 0.01;
        let mut m = manager(config);
        enter(&mut m, "AAA", 0.5, 100.0, 10.0);

        let signals = vec![ranked("AAA", 1, 0.5, SignalType::Long)];
        let px = prices(&[("AAA", 103.0)]); // +3%, inside min-hold window
        let decisions = m.make_decisions(&signals, &px, 60, false);
        assert_eq!(decisions[0].decision, Decision::Hold);
    }

    #[test]
    fn test_eod_liquidates_everything() {
        let mut config = RotationConfig::default();
        config.eod_exit_time_minutes = 389;
        let mut m = manager(config);
        for (symbol, price) in [("AAA", 100.0), ("BBB", 50.0), ("CCC", 25.0)] {
            enter(&mut m, symbol, 0.5, price, 10.0);
        }

        let px = prices(&[("AAA", 100.0), ("BBB", 50.0), ("CCC", 25.0)]);
        let decisions = m.make_decisions(&[], &px, 389, false);
        let eod: Vec<_> = decisions
            .iter()
            .filter(|d| d.decision == Decision::EodExit)
            .collect();
        assert_eq!(eod.len(), 3);
    }

    #[test]
    fn test_exit_cooldown_blocks_reentry() {
        let mut config = RotationConfig::default();
        config.min_hold_bars = 1;
        config.min_rank_to_hold = 2;
        config.exit_cooldown_bars = 5;
        let mut m = manager(config);
        enter(&mut m, "AAA", 0.5, 100.0, 10.0);

        let weak = vec![ranked("AAA", 5, 0.4, SignalType::Long)];
        let px = prices(&[("AAA", 100.0)]);
        let decisions = m.make_decisions(&weak, &px, 60, false);
        assert_eq!(decisions[0].decision, Decision::Exit);
        assert!(matches!(
            m.execute_decision(&decisions[0], 100.0, 0.0),
            Execution::Exited(_)
        ));

        // Strong again next bar, but the cooldown holds the door shut.
        let strong = vec![ranked("AAA", 1, 0.9, SignalType::Long)];
        let decisions = m.make_decisions(&strong, &px, 61, false);
        assert!(decisions.iter().all(|d| !d.decision.is_entry()));
    }

    #[test]
    fn test_rotation_swaps_weakest_for_stronger() {
        let mut config = RotationConfig::default();
        config.max_positions = 3;
        config.min_hold_bars = 1;
        config.rotation_strength_delta = 0.20;
        config.min_strength_to_exit = 0.05;
        config.min_strength_to_enter = 0.10;
        let mut m = manager(config);
        enter(&mut m, "AAA", 0.30, 100.0, 10.0);
        enter(&mut m, "BBB", 0.25, 100.0, 10.0);
        enter(&mut m, "CCC", 0.20, 100.0, 10.0);

        let signals = vec![
            ranked("DDD", 1, 0.45, SignalType::Long),
            ranked("AAA", 2, 0.28, SignalType::Long),
            ranked("BBB", 3, 0.24, SignalType::Long),
            ranked("CCC", 4, 0.19, SignalType::Long),
        ];
        let px = prices(&[("AAA", 100.0), ("BBB", 100.0), ("CCC", 100.0), ("DDD", 100.0)]);
        let decisions = m.make_decisions(&signals, &px, 60, false);

        let rotate_out: Vec<_> = decisions
            .iter()
            .filter(|d| d.decision == Decision::RotateOut)
            .collect();
        assert_eq!(rotate_out.len(), 1);
        assert_eq!(rotate_out[0].symbol, "CCC");

        let entries: Vec<_> = decisions.iter().filter(|d| d.decision.is_entry()).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].symbol, "DDD");

        // A and B hold: 0.45 − 0.28 = 0.17 < 0.20.
        for symbol in ["AAA", "BBB"] {
            let d = decisions.iter().find(|d| d.symbol == symbol).unwrap();
            assert_eq!(d.decision, Decision::Hold);
        }

        // CCC is now in rotation cooldown and cannot re-enter next bar.
        assert!(matches!(
            m.execute_decision(rotate_out[0], 100.0, 0.0),
            Execution::Exited(_)
        ));
        let comeback = vec![ranked("CCC", 1, 0.9, SignalType::Long)];
        let decisions = m.make_decisions(&comeback, &px, 61, false);
        assert!(decisions.iter().all(|d| !d.decision.is_entry()));
    }

    #[test]
    fn test_rotation_ignores_min_hold_on_weakest() {
        // Rotation picks the weakest position by strength even when every
        // open position is younger than the minimum hold.
        let mut config = RotationConfig::default();
        config.max_positions = 2;
        config.min_hold_bars = 30;
        config.rotation_strength_delta = 0.20;
        let mut m = manager(config);
        enter(&mut m, "AAA", 0.30, 100.0, 10.0);
        enter(&mut m, "BBB", 0.20, 100.0, 10.0);

        let signals = vec![
            ranked("CCC", 1, 0.55, SignalType::Long),
            ranked("AAA", 2, 0.30, SignalType::Long),
            ranked("BBB", 3, 0.20, SignalType::Long),
        ];
        let px = prices(&[("AAA", 100.0), ("BBB", 100.0), ("CCC", 100.0)]);
        // bars_held becomes 1, far below min_hold_bars = 30.
        let decisions = m.make_decisions(&signals, &px, 60, false);

        let rotate_out: Vec<_> = decisions
            .iter()
            .filter(|d| d.decision == Decision::RotateOut)
            .collect();
        assert_eq!(rotate_out.len(), 1);
        assert_eq!(rotate_out[0].symbol, "BBB");
        assert!(decisions
            .iter()
            .any(|d| d.decision.is_entry() && d.symbol == "CCC"));
    }

    #[test]
    fn test_rotation_boundary_delta() {
        let mut config = RotationConfig::default();
        config.max_positions = 1;
        config.min_hold_bars = 1;
        config.rotation_strength_delta = 0.20;
        let mut m = manager(config.clone());
        enter(&mut m, "AAA", 0.30, 100.0, 10.0);

        let px = prices(&[("AAA", 100.0), ("BBB", 100.0)]);

        // Delta exactly equal to the threshold triggers rotation.
        let signals = vec![
            ranked("BBB", 1, 0.50, SignalType::Long),
            ranked("AAA", 2, 0.30, SignalType::Long),
        ];
        let decisions = m.make_decisions(&signals, &px, 60, false);
        assert!(decisions.iter().any(|d| d.decision == Decision::RotateOut));

        // Strictly below the threshold does not.
        let mut m = manager(config);
        enter(&mut m, "AAA", 0.30, 100.0, 10.0);
        let signals = vec![
            ranked("BBB", 1, 0.499, SignalType::Long),
            ranked("AAA", 2, 0.30, SignalType::Long),
        ];
        let decisions = m.make_decisions(&signals, &px, 60, false);
        assert!(decisions.iter().all(|d| d.decision != Decision::RotateOut));
    }

    #[test]
    fn test_absent_signal_decay_post_warmup() {
        let mut config = RotationConfig::default();
        config.warmup_bars = 0;
        config.min_hold_bars = 1;
        config.min_strength_to_exit = 0.05;
        let mut m = manager(config);
        enter(&mut m, "AAA", 0.06, 100.0, 10.0);

        let px = prices(&[("AAA", 100.0)]);
        // Strength decays 5% per absent bar: 0.06 → below 0.05 in a few bars.
        let mut exited = false;
        for _ in 0..10 {
            let decisions = m.make_decisions(&[], &px, 60, false);
            if decisions[0].decision == Decision::Exit {
                exited = true;
                break;
            }
        }
        assert!(exited);
    }

    #[test]
    fn test_execute_exit_returns_position() {
        let mut config = RotationConfig::default();
        config.min_hold_bars = 1;
        let mut m = manager(config);
        enter(&mut m, "AAA", 0.5, 100.0, 10.0);

        let decision = PositionDecision {
            symbol: "AAA".to_string(),
            decision: Decision::Exit,
            signal: None,
            position: None,
            reason: String::new(),
        };
        let Execution::Exited(closed) = m.execute_decision(&decision, 105.0, 0.0) else {
            panic!("expected an executed exit");
        };
        assert_eq!(closed.shares, 10.0);
        assert!((closed.pnl - 50.0).abs() < 1e-9);
        assert!((closed.pnl_pct - 0.05).abs() < 1e-12);
        assert_eq!(m.position_count(), 0);
        assert_eq!(m.stats().executed_exits, 1);
    }
}
