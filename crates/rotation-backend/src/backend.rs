use std::collections::{HashMap, VecDeque};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use feature_engine::{
    validate_feature_order, verify_model_checksum, FeatureEngine, FeatureEngineConfig,
};
use market_regime::{
    DetectorParams, MarketRegime, MarketRegimeDetector, RegimeParameterManager,
};
use online_predictor::{EnsembleConfig, MultiHorizonEnsemble};
use rotation_manager::{
    Decision, Execution, PositionDecision, RotationConfig, RotationPositionManager,
};
use signal_ranker::{AggregatorConfig, SignalAggregator};
use trading_core::{Bar, OrderSide, RankedSignal, Signal, SignalType, TradingError};

use crate::broker::Broker;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::portfolio::Portfolio;
use crate::records::{
    DecisionRecord, ErrorCounters, HorizonReport, PositionSnapshot, SessionSummary, SignalRecord,
    SymbolReport, TradeRecord,
};
use crate::sizing::{AdaptivePositionSizer, SizerConfig};

/// Whole-bar snapshot delivered by the feed adapter at each logical tick:
/// the latest bar per symbol plus a staleness weight in (0, 1].
#[derive(Debug, Clone)]
pub struct BarSnapshot {
    pub bar_id: u64,
    /// Minutes since market open.
    pub time_minutes: i64,
    pub bars: HashMap<String, Bar>,
    pub staleness: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub symbols: Vec<String>,
    pub starting_capital: f64,
    /// Tolerance for the per-bar capital conservation check.
    pub accounting_epsilon: f64,
    /// Learning weight applied to realized-exit labels (bar returns get 1).
    pub exit_label_weight: f64,
    /// Session length in bars, for day-based reporting.
    pub bars_per_day: u64,
    /// Position snapshot cadence in bars.
    pub snapshot_every_bars: u64,
    /// Feature-order checksum carried by a persisted model artifact; a
    /// mismatch against the live schema is fatal at initialization.
    pub model_checksum: Option<u64>,
    pub feature: FeatureEngineConfig,
    pub ensemble: EnsembleConfig,
    pub detector: DetectorParams,
    pub aggregator: AggregatorConfig,
    pub rotation: RotationConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub sizer: SizerConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            starting_capital: 100_000.0,
            accounting_epsilon: 0.01,
            exit_label_weight: 10.0,
            bars_per_day: 390,
            snapshot_every_bars: 30,
            model_checksum: None,
            feature: FeatureEngineConfig::default(),
            ensemble: EnsembleConfig::default(),
            detector: DetectorParams::default(),
            aggregator: AggregatorConfig::default(),
            rotation: RotationConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            sizer: SizerConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("at least one symbol is required");
        }
        if self.starting_capital <= 0.0 {
            bail!("starting capital must be positive");
        }
        if self.accounting_epsilon <= 0.0 {
            bail!("accounting epsilon must be positive");
        }
        if self.bars_per_day == 0 || self.snapshot_every_bars == 0 {
            bail!("bar cadences must be positive");
        }
        self.ensemble
            .validate()
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        self.rotation.validate()?;
        Ok(())
    }
}

/// Per-symbol pipeline state owned by the backend.
struct SymbolState {
    engine: FeatureEngine,
    ensemble: MultiHorizonEnsemble,
    last_bar_id: Option<u64>,
    last_timestamp_ms: Option<i64>,
    prev_close: Option<f64>,
    last_close: Option<f64>,
}

/// Outcome of one bar cycle, for the host's progress reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarReport {
    pub bar_id: u64,
    pub time_minutes: i64,
    pub regime: MarketRegime,
    pub equity: f64,
    pub cash: f64,
    pub open_positions: usize,
    pub signals_emitted: usize,
    pub entries_executed: usize,
    pub exits_executed: usize,
    pub circuit_breaker: bool,
}

/// Orchestrates the per-bar trading cycle and owns all capital state.
///
/// Arena ownership: the backend exclusively owns per-symbol feature engines
/// and ensembles; each ensemble owns its predictors; positions live inside
/// the rotation manager. Learning feedback flows back down by return values
/// at the end of each bar.
pub struct RotationTradingBackend<B: Broker> {
    config: BackendConfig,
    states: HashMap<String, SymbolState>,
    latest_signals: HashMap<String, Signal>,
    aggregator: SignalAggregator,
    detector: MarketRegimeDetector,
    param_manager: RegimeParameterManager,
    manager: RotationPositionManager,
    breaker: CircuitBreaker,
    sizer: AdaptivePositionSizer,
    portfolio: Portfolio,
    broker: B,
    regime_history: VecDeque<Bar>,
    current_regime: MarketRegime,
    last_bar_id: Option<u64>,
    bars_processed: u64,
    realized_queue: HashMap<String, f64>,
    last_equity: f64,
    bar_returns: Vec<f64>,
    signal_records: Vec<SignalRecord>,
    decision_records: Vec<DecisionRecord>,
    trade_records: Vec<TradeRecord>,
    position_snapshots: Vec<PositionSnapshot>,
    symbol_pnl: HashMap<String, (f64, u32, u32)>,
    errors: ErrorCounters,
}

impl<B: Broker> RotationTradingBackend<B> {
    pub fn new(config: BackendConfig, broker: B) -> Result<Self> {
        config.validate()?;
        validate_feature_order().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        if let Some(expected) = config.model_checksum {
            verify_model_checksum(expected).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }

        let dim = feature_engine::FEATURE_COUNT;
        let mut states = HashMap::new();
        for symbol in &config.symbols {
            states.insert(
                symbol.clone(),
                SymbolState {
                    engine: FeatureEngine::new(config.feature.clone()),
                    ensemble: MultiHorizonEnsemble::new(symbol, dim, config.ensemble.clone())
                        .map_err(|e| anyhow::anyhow!(e.to_string()))?,
                    last_bar_id: None,
                    last_timestamp_ms: None,
                    prev_close: None,
                    last_close: None,
                },
            );
        }

        let manager = RotationPositionManager::new(config.rotation.clone())?;
        info!(
            symbols = config.symbols.len(),
            starting_capital = config.starting_capital,
            max_positions = config.rotation.max_positions,
            "rotation trading backend initialized"
        );

        Ok(Self {
            portfolio: Portfolio::new(config.starting_capital),
            last_equity: config.starting_capital,
            aggregator: SignalAggregator::new(config.aggregator.clone()),
            detector: MarketRegimeDetector::new(config.detector.clone()),
            param_manager: RegimeParameterManager::new(),
            manager,
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            sizer: AdaptivePositionSizer::new(config.sizer.clone())?,
            broker,
            states,
            latest_signals: HashMap::new(),
            regime_history: VecDeque::new(),
            current_regime: MarketRegime::Choppy,
            last_bar_id: None,
            bars_processed: 0,
            realized_queue: HashMap::new(),
            bar_returns: Vec::new(),
            signal_records: Vec::new(),
            decision_records: Vec::new(),
            trade_records: Vec::new(),
            position_snapshots: Vec::new(),
            symbol_pnl: HashMap::new(),
            errors: ErrorCounters::default(),
            config,
        })
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn open_positions(&self) -> usize {
        self.manager.position_count()
    }

    pub fn circuit_breaker_latched(&self) -> bool {
        self.breaker.is_latched()
    }

    pub fn current_regime(&self) -> MarketRegime {
        self.current_regime
    }

    pub fn signal_records(&self) -> &[SignalRecord] {
        &self.signal_records
    }

    pub fn decision_records(&self) -> &[DecisionRecord] {
        &self.decision_records
    }

    pub fn trade_records(&self) -> &[TradeRecord] {
        &self.trade_records
    }

    pub fn position_snapshots(&self) -> &[PositionSnapshot] {
        &self.position_snapshots
    }

    /// All emitted artifacts as JSON lines, in emission order per stream:
    /// signals, then decisions, then trades, then position snapshots.
    pub fn artifacts_jsonl(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for record in &self.signal_records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        for record in &self.decision_records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        for record in &self.trade_records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        for record in &self.position_snapshots {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Run one complete bar cycle. Fatal data errors abort before any state
    /// is mutated; everything else is recovered locally and counted.
    pub fn on_bar(&mut self, snapshot: &BarSnapshot) -> Result<BarReport, TradingError> {
        // Validate the whole snapshot up front so a fatal error leaves no
        // partial updates behind.
        self.validate_snapshot(snapshot)?;

        // Feed feature engines and collect fresh signals.
        let signals_this_bar = self.ingest_bars(snapshot)?;

        // Rank the universe.
        let ranked = self
            .aggregator
            .rank(&self.latest_signals, &snapshot.staleness);
        self.record_signals(&signals_this_bar, &ranked);

        // Regime classification drives downstream parameters.
        self.update_regime();

        // Circuit breaker on current equity.
        let unrealized = self.manager.total_unrealized_pnl();
        let equity = self.portfolio.equity(unrealized);
        let latched = self.breaker.check(equity, self.portfolio.starting_capital());

        // Decisions; the manager folds EOD liquidation and entry gating in.
        let prices = self.current_prices();
        self.broker.mark_prices(&prices);
        let decisions =
            self.manager
                .make_decisions(&ranked, &prices, snapshot.time_minutes, latched);

        let (entries_executed, exits_executed) =
            self.execute_decisions(snapshot, &decisions, equity, &prices);

        // Close the learning loop.
        self.learning_step();

        // Invariants, equity curve, artifacts.
        if let Err(e) = self.portfolio.check_invariant(self.config.accounting_epsilon) {
            self.errors.count(&e);
        }
        let unrealized = self.manager.total_unrealized_pnl();
        let equity = self.portfolio.equity(unrealized);
        self.portfolio.update_drawdown(equity);
        if self.last_equity > 0.0 {
            self.bar_returns.push(equity / self.last_equity - 1.0);
        }
        self.last_equity = equity;

        self.bars_processed += 1;
        self.last_bar_id = Some(snapshot.bar_id);
        if self.bars_processed % self.config.snapshot_every_bars == 0 {
            self.snapshot_positions(snapshot.bar_id);
        }

        Ok(BarReport {
            bar_id: snapshot.bar_id,
            time_minutes: snapshot.time_minutes,
            regime: self.current_regime,
            equity,
            cash: self.portfolio.cash(),
            open_positions: self.manager.position_count(),
            signals_emitted: signals_this_bar.len(),
            entries_executed,
            exits_executed,
            circuit_breaker: self.breaker.is_latched(),
        })
    }

    fn validate_snapshot(&self, snapshot: &BarSnapshot) -> Result<(), TradingError> {
        if let Some(last) = self.last_bar_id {
            if snapshot.bar_id <= last {
                return Err(TradingError::InvalidBar(format!(
                    "bar id regression: {} after {}",
                    snapshot.bar_id, last
                )));
            }
        }
        if snapshot.bars.is_empty() {
            return Err(TradingError::InvalidBar("empty bar snapshot".to_string()));
        }
        for (symbol, bar) in &snapshot.bars {
            if !self.states.contains_key(symbol) {
                return Err(TradingError::InvalidBar(format!(
                    "bar for unconfigured symbol {symbol}"
                )));
            }
            bar.validate()?;
            let state = &self.states[symbol];
            if let (Some(last_ts), Some(last_id)) = (state.last_timestamp_ms, state.last_bar_id) {
                // A stale repeat of the previous bar is fine; going backwards
                // is not.
                if bar.bar_id != last_id && bar.timestamp_ms <= last_ts {
                    return Err(TradingError::InvalidBar(format!(
                        "{symbol} timestamp regression at bar {}",
                        bar.bar_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Deliver each genuinely-new bar to its feature engine and ensemble.
    fn ingest_bars(
        &mut self,
        snapshot: &BarSnapshot,
    ) -> Result<Vec<(String, Signal)>, TradingError> {
        let mut emitted = Vec::new();
        let mut symbols: Vec<&String> = snapshot.bars.keys().collect();
        symbols.sort();

        for symbol in symbols {
            let bar = &snapshot.bars[symbol];
            let state = self.states.get_mut(symbol).expect("validated above");
            if state.last_bar_id == Some(bar.bar_id) {
                debug!(symbol = %symbol, bar = bar.bar_id, "stale bar; skipping update");
                continue;
            }

            state.engine.update(bar)?;
            state.last_bar_id = Some(bar.bar_id);
            state.last_timestamp_ms = Some(bar.timestamp_ms);
            state.prev_close = state.last_close;
            state.last_close = Some(bar.close);

            let features = state.engine.extract();
            let ready = state.engine.is_ready();
            if let Some(signal) = state.ensemble.on_bar(bar, &features, ready) {
                self.latest_signals.insert(symbol.clone(), signal.clone());
                emitted.push((symbol.clone(), signal));
            }

            if symbol == &self.config.symbols[0] {
                self.regime_history.push_back(bar.clone());
                while self.regime_history.len() > 512 {
                    self.regime_history.pop_front();
                }
            }
        }
        Ok(emitted)
    }

    fn record_signals(&mut self, emitted: &[(String, Signal)], ranked: &[RankedSignal]) {
        for (symbol, signal) in emitted {
            let ranked_entry = ranked.iter().find(|r| &r.signal.symbol == symbol);
            self.signal_records.push(SignalRecord {
                bar_id: signal.bar_id,
                timestamp_ms: signal.timestamp_ms,
                symbol: symbol.clone(),
                probability: signal.probability,
                signal_type: signal.signal_type,
                confidence: signal.confidence,
                horizon: signal.prediction_horizon,
                rank: ranked_entry.map(|r| r.rank),
                strength: ranked_entry.map(|r| r.strength),
            });
        }
    }

    fn update_regime(&mut self) {
        let bars = self.regime_history.make_contiguous();
        self.current_regime = self.detector.detect(bars);
        let params = self.param_manager.params_for(self.current_regime);
        for state in self.states.values_mut() {
            state.ensemble.set_lambda(params.ewrls_lambda);
            state
                .ensemble
                .set_thresholds(params.buy_threshold, params.sell_threshold);
            state
                .ensemble
                .set_probability_scaling(params.probability_scaling);
            // Horizon weights only map onto the canonical {1, 5, 10} set.
            let _ = state.ensemble.set_base_weights(&params.horizon_weights());
        }
    }

    fn current_prices(&self) -> HashMap<String, f64> {
        self.states
            .iter()
            .filter_map(|(symbol, state)| state.last_close.map(|c| (symbol.clone(), c)))
            .collect()
    }

    fn execute_decisions(
        &mut self,
        snapshot: &BarSnapshot,
        decisions: &[PositionDecision],
        equity: f64,
        prices: &HashMap<String, f64>,
    ) -> (usize, usize) {
        let mut entries = 0usize;
        let mut exits = 0usize;

        for decision in decisions {
            let executed = match decision.decision {
                Decision::Hold => true,
                Decision::EnterLong | Decision::EnterShort => {
                    let ok = self.execute_entry(decision, equity, prices);
                    if ok {
                        entries += 1;
                    }
                    ok
                }
                _ => {
                    let ok = self.execute_exit(snapshot, decision);
                    if ok {
                        exits += 1;
                    }
                    ok
                }
            };
            self.decision_records.push(DecisionRecord {
                bar_id: snapshot.bar_id,
                symbol: decision.symbol.clone(),
                decision: decision.decision.name().to_string(),
                reason: decision.reason.clone(),
                executed,
            });
        }
        (entries, exits)
    }

    fn execute_entry(
        &mut self,
        decision: &PositionDecision,
        equity: f64,
        prices: &HashMap<String, f64>,
    ) -> bool {
        if self.manager.position_count() >= self.config.rotation.max_positions {
            let err = TradingError::CapacityExceeded(decision.symbol.clone());
            warn!(symbol = %decision.symbol, "entry with no free slot dropped");
            self.errors.count(&err);
            return false;
        }

        let Some(&price) = prices.get(&decision.symbol) else {
            return false;
        };
        let allocation = self
            .sizer
            .allocation(equity, self.config.rotation.max_positions);
        let shares = self.sizer.shares_for(allocation, price, self.portfolio.cash());
        if shares < 1.0 {
            let err = TradingError::InsufficientFunds {
                required: price,
                available: self.portfolio.cash(),
            };
            warn!(symbol = %decision.symbol, price, "cannot afford a single share");
            self.errors.count(&err);
            return false;
        }

        let side = if decision.decision == Decision::EnterLong {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        let fill = match self.broker.submit_order(&decision.symbol, side, shares) {
            Ok(fill) => fill,
            Err(e) => {
                warn!(symbol = %decision.symbol, error = %e, "entry order failed");
                self.errors.count(&e);
                return false;
            }
        };

        let cost = shares * fill;
        // Pre-deduct so a later decision in this same bar cannot spend the
        // same cash.
        if let Err(e) = self.portfolio.apply_entry(cost) {
            self.errors.count(&e);
            return false;
        }
        match self.manager.execute_decision(decision, fill, shares) {
            Execution::Entered => true,
            _ => {
                self.portfolio.roll_back_entry(cost);
                false
            }
        }
    }

    fn execute_exit(&mut self, snapshot: &BarSnapshot, decision: &PositionDecision) -> bool {
        let Some(position) = decision.position.as_ref() else {
            return false;
        };
        let side = match position.direction {
            SignalType::Short => OrderSide::Buy,
            _ => OrderSide::Sell,
        };
        let fill = match self
            .broker
            .submit_order(&decision.symbol, side, position.shares)
        {
            Ok(fill) => fill,
            Err(e) => {
                warn!(symbol = %decision.symbol, error = %e, "exit order failed");
                self.errors.count(&e);
                return false;
            }
        };

        match self.manager.execute_decision(decision, fill, 0.0) {
            Execution::Exited(closed) => {
                self.portfolio.apply_exit(closed.entry_cost, closed.pnl);
                self.realized_queue
                    .insert(closed.symbol.clone(), closed.pnl_pct);
                self.sizer.record_outcome(closed.pnl);

                let entry = self
                    .symbol_pnl
                    .entry(closed.symbol.clone())
                    .or_insert((0.0, 0, 0));
                entry.0 += closed.pnl;
                if closed.pnl > 0.0 {
                    entry.1 += 1;
                }
                entry.2 += 1;

                self.trade_records.push(TradeRecord {
                    symbol: closed.symbol.clone(),
                    direction: closed.direction,
                    entry_bar_id: closed.entry_bar_id,
                    exit_bar_id: snapshot.bar_id,
                    entry_price: closed.entry_price,
                    exit_price: fill,
                    shares: closed.shares,
                    realized_pnl: closed.pnl,
                    pnl_pct: closed.pnl_pct,
                    bars_held: closed.bars_held,
                    exit_reason: decision.decision.name().to_string(),
                });
                true
            }
            _ => false,
        }
    }

    /// Feed realized returns back to the predictors: every symbol's
    /// bar-to-bar return at weight 1, and this bar's realized exits at the
    /// configured exit weight (round trips carry more information than
    /// single-bar noise).
    fn learning_step(&mut self) {
        for state in self.states.values_mut() {
            if let (Some(prev), Some(last)) = (state.prev_close, state.last_close) {
                if prev > 0.0 {
                    state.ensemble.learn((last - prev) / prev, 1.0);
                }
            }
        }
        for (symbol, pnl_pct) in self.realized_queue.drain() {
            if let Some(state) = self.states.get_mut(&symbol) {
                state.ensemble.learn(pnl_pct, self.config.exit_label_weight);
            }
        }
    }

    fn snapshot_positions(&mut self, bar_id: u64) {
        for position in self.manager.positions().values() {
            self.position_snapshots.push(PositionSnapshot {
                bar_id,
                symbol: position.symbol.clone(),
                direction: position.direction,
                shares: position.shares,
                entry_price: position.entry_price,
                current_price: position.current_price,
                unrealized_pnl: position.pnl,
                bars_held: position.bars_held,
            });
        }
    }

    /// End-of-session rollup across capital, trades, learning, and errors.
    pub fn session_summary(&self) -> SessionSummary {
        let unrealized = self.manager.total_unrealized_pnl();
        let equity = self.portfolio.equity(unrealized);
        let starting = self.portfolio.starting_capital();
        let total_return_pct = (equity / starting - 1.0) * 100.0;

        let total_trades = self.trade_records.len() as u32;
        let winning_trades = self
            .trade_records
            .iter()
            .filter(|t| t.realized_pnl > 0.0)
            .count() as u32;
        let win_rate_pct = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let gross_profit: f64 = self
            .trade_records
            .iter()
            .filter(|t| t.realized_pnl > 0.0)
            .map(|t| t.realized_pnl)
            .sum();
        let gross_loss: f64 = self
            .trade_records
            .iter()
            .filter(|t| t.realized_pnl < 0.0)
            .map(|t| t.realized_pnl.abs())
            .sum();
        let profit_factor = if gross_loss > 0.0 {
            Some(gross_profit / gross_loss)
        } else if gross_profit > 0.0 {
            Some(f64::INFINITY)
        } else {
            None
        };

        let sharpe_proxy = Self::sharpe_proxy(&self.bar_returns, self.config.bars_per_day);

        let days = (self.bars_processed as f64 / self.config.bars_per_day as f64).max(1.0);
        let mean_return_per_day_pct = total_return_pct / days;

        let per_symbol = self
            .config
            .symbols
            .iter()
            .map(|symbol| {
                let (pnl, wins, trades) =
                    self.symbol_pnl.get(symbol).copied().unwrap_or((0.0, 0, 0));
                SymbolReport {
                    symbol: symbol.clone(),
                    trades,
                    wins,
                    realized_pnl: pnl,
                }
            })
            .collect();

        let mut horizons: Vec<HorizonReport> = Vec::new();
        let mut warmup_sum = 0.0;
        let mut warmup_count = 0usize;
        for horizon in self.config.ensemble.horizons.iter().copied() {
            let mut settled = 0u64;
            let mut accuracy_sum = 0.0;
            let mut count = 0usize;
            let mut horizon_warmup_sum = 0.0;
            let mut horizon_warmup_count = 0usize;
            for state in self.states.values() {
                for (h, s) in state.ensemble.settled_labels() {
                    if h == horizon {
                        settled += s;
                    }
                }
                if let Some(acc) = state.ensemble.directional_accuracy(horizon) {
                    accuracy_sum += acc;
                    count += 1;
                }
                if let Some(acc) = state.ensemble.warmup_accuracy(horizon) {
                    horizon_warmup_sum += acc;
                    horizon_warmup_count += 1;
                }
            }
            let warmup_accuracy = if horizon_warmup_count > 0 {
                let acc = horizon_warmup_sum / horizon_warmup_count as f64;
                warmup_sum += acc;
                warmup_count += 1;
                Some(acc)
            } else {
                None
            };
            horizons.push(HorizonReport {
                horizon,
                settled_labels: settled,
                directional_accuracy: if count > 0 {
                    accuracy_sum / count as f64
                } else {
                    0.5
                },
                warmup_accuracy,
            });
        }
        // The original convergence bar: better than a coin flip over the
        // earliest labels.
        let converged = warmup_count > 0 && warmup_sum / warmup_count as f64 > 0.51;

        let mut errors = self.errors;
        errors.numerical_degeneracy = self
            .states
            .values()
            .map(|s| s.ensemble.covariance_resets())
            .sum();

        SessionSummary {
            bars_processed: self.bars_processed,
            starting_capital: starting,
            final_equity: equity,
            total_return_pct,
            realized_pnl: self.portfolio.realized_pnl(),
            max_drawdown_pct: self.portfolio.max_drawdown_pct(),
            sharpe_proxy,
            mean_return_per_day_pct,
            total_trades,
            winning_trades,
            win_rate_pct,
            profit_factor,
            signals_emitted: self.signal_records.len() as u64,
            converged,
            circuit_breaker_tripped: self.breaker.is_latched(),
            per_symbol,
            horizons,
            errors,
        }
    }

    fn sharpe_proxy(bar_returns: &[f64], bars_per_day: u64) -> Option<f64> {
        if bar_returns.len() < 2 {
            return None;
        }
        let n = bar_returns.len() as f64;
        let mean = bar_returns.iter().sum::<f64>() / n;
        let var = bar_returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
        let std = var.sqrt();
        if std == 0.0 {
            return None;
        }
        Some(mean / std * ((bars_per_day as f64) * 252.0).sqrt())
    }
}
