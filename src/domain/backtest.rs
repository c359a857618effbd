//! Period-by-period backtest over a point-in-time universe.
//!
//! A run walks a rebalancing schedule. At each period it slices the dataset
//! to what was knowable on that date, scores the active symbols, picks
//! candidates, allocates weights, and books the return earned by the
//! previous period's holdings net of universe turnover cost.
//!
//! `BacktestRun` is a small state machine:
//! `Initialized → PerPeriod(i) → Completed | Failed`.

use crate::domain::allocation::{AllocationMethod, FallbackReason, ReturnsHistory, allocate};
use crate::domain::attribution::PeriodAttribution;
use crate::domain::dataset::{BuildOptions, CancelFlag, CompleteDataset, DatasetCache};
use crate::domain::error::PitraderError;
use crate::domain::metrics::BacktestSummary;
use crate::domain::ohlcv::Symbol;
use crate::domain::signal;
use crate::domain::strategy::{RebalanceFrequency, StrategyConfig};
use crate::domain::temporal_filter;
use crate::ports::data_port::DataPort;
use crate::ports::universe_port::UniverseTimelinePort;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// 10 bps of portfolio value per unit of universe turnover.
pub const DEFAULT_TURNOVER_COST: f64 = 0.001;
pub const DEFAULT_MAX_STALENESS_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub turnover_cost_per_unit: f64,
    pub risk_free_rate: f64,
    pub max_price_staleness_days: i64,
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), PitraderError> {
        if self.start_date >= self.end_date {
            return Err(PitraderError::config_invalid(
                "backtest",
                "start_date",
                format!("start_date {} must be before end_date {}", self.start_date, self.end_date),
            ));
        }
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(PitraderError::config_invalid(
                "backtest",
                "initial_capital",
                "initial_capital must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.turnover_cost_per_unit) {
            return Err(PitraderError::config_invalid(
                "backtest",
                "turnover_cost_bps",
                "turnover cost must be between 0 and 10000 bps",
            ));
        }
        if !(0.0..1.0).contains(&self.risk_free_rate) {
            return Err(PitraderError::config_invalid(
                "backtest",
                "risk_free_rate",
                "risk_free_rate must be between 0 and 1",
            ));
        }
        if self.max_price_staleness_days < 0 {
            return Err(PitraderError::config_invalid(
                "backtest",
                "max_price_staleness_days",
                "max_price_staleness_days must be non-negative",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodPerformanceResult {
    pub period_date: NaiveDate,
    pub gross_strategy_return: f64,
    pub universe_turnover_cost: f64,
    pub turnover_rate: f64,
    pub net_return: f64,
    pub portfolio_value: f64,
    pub active_symbols: BTreeSet<Symbol>,
    /// Weights chosen at this period, held until the next one.
    pub weights: BTreeMap<Symbol, f64>,
    pub allocation_method: AllocationMethod,
    pub allocation_fallback: Option<FallbackReason>,
    pub attribution: PeriodAttribution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed { date: NaiveDate, reason: String },
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub universe_id: String,
    pub strategy_name: String,
    pub status: RunStatus,
    pub periods: Vec<PeriodPerformanceResult>,
    pub summary: BacktestSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initialized,
    /// Index of the last period booked.
    PerPeriod(usize),
    Completed,
    Failed,
}

/// Rebalancing dates: the start date, the first trading date of each new
/// frequency period, every snapshot date inside the window, and the end date.
pub fn rebalance_schedule(
    dataset: &CompleteDataset,
    start_date: NaiveDate,
    end_date: NaiveDate,
    frequency: RebalanceFrequency,
) -> Vec<NaiveDate> {
    let mut dates = BTreeSet::from([start_date, end_date]);
    dates.extend(dataset.universe.snapshot_dates_between(start_date, end_date));

    if frequency != RebalanceFrequency::OnUniverseChange {
        let mut prev = start_date;
        for &date in dataset.trading_dates_between(start_date, end_date) {
            if frequency.starts_period(prev, date) {
                dates.insert(date);
            }
            prev = date;
        }
    }

    dates.into_iter().collect()
}

/// Symbols whose signal clears `threshold`, strongest first, ties broken by
/// symbol, truncated to `max_positions`.
pub fn select_candidates(
    signals: &BTreeMap<Symbol, f64>,
    threshold: f64,
    max_positions: Option<usize>,
) -> Vec<Symbol> {
    let mut ranked: Vec<(&Symbol, f64)> = signals
        .iter()
        .filter(|(_, s)| **s > threshold)
        .map(|(sym, s)| (sym, *s))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    if let Some(max) = max_positions {
        ranked.truncate(max);
    }
    ranked.into_iter().map(|(sym, _)| sym.clone()).collect()
}

/// `|prev Δ curr| / |prev ∪ curr|`.
pub fn turnover_rate(prev: &BTreeSet<Symbol>, curr: &BTreeSet<Symbol>) -> f64 {
    let union = prev.union(curr).count();
    if union == 0 {
        return 0.0;
    }
    prev.symmetric_difference(curr).count() as f64 / union as f64
}

/// Return of `weights` held from `from` to `to`, each holding priced from the
/// complete dataset at its last bar on or before each date.
pub fn holding_return(
    dataset: &CompleteDataset,
    weights: &BTreeMap<Symbol, f64>,
    from: NaiveDate,
    to: NaiveDate,
) -> f64 {
    weights
        .iter()
        .map(|(symbol, weight)| {
            let Some(data) = dataset.symbol_data(symbol) else {
                return 0.0;
            };
            match (data.point_at_or_before(from), data.point_at_or_before(to)) {
                (Some(start), Some(end)) => weight * end.return_since(start).unwrap_or(0.0),
                _ => 0.0,
            }
        })
        .sum()
}

pub struct BacktestRun<'a> {
    dataset: &'a CompleteDataset,
    strategy: &'a StrategyConfig,
    config: &'a BacktestConfig,
    schedule: Vec<NaiveDate>,
    phase: RunPhase,
    periods: Vec<PeriodPerformanceResult>,
    weights: BTreeMap<Symbol, f64>,
    active: BTreeSet<Symbol>,
    value: f64,
    failure: Option<(NaiveDate, String)>,
}

impl<'a> BacktestRun<'a> {
    pub fn new(
        dataset: &'a CompleteDataset,
        strategy: &'a StrategyConfig,
        config: &'a BacktestConfig,
    ) -> Self {
        let schedule = rebalance_schedule(
            dataset,
            config.start_date,
            config.end_date,
            strategy.rebalancing_frequency,
        );
        Self {
            dataset,
            strategy,
            config,
            schedule,
            phase: RunPhase::Initialized,
            periods: Vec::new(),
            weights: BTreeMap::new(),
            active: BTreeSet::new(),
            value: config.initial_capital,
            failure: None,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn schedule(&self) -> &[NaiveDate] {
        &self.schedule
    }

    pub fn periods(&self) -> &[PeriodPerformanceResult] {
        &self.periods
    }

    /// Books the next period and returns the new phase. Terminal phases are
    /// sticky.
    pub fn step(&mut self) -> RunPhase {
        let next = match self.phase {
            RunPhase::Initialized => 0,
            RunPhase::PerPeriod(i) => i + 1,
            RunPhase::Completed | RunPhase::Failed => return self.phase,
        };

        let Some(&date) = self.schedule.get(next) else {
            info!(periods = self.periods.len(), "backtest completed");
            self.phase = RunPhase::Completed;
            return self.phase;
        };

        match self.book_period(next, date) {
            Ok(result) => {
                self.periods.push(result);
                self.phase = RunPhase::PerPeriod(next);
            }
            Err(e) => {
                warn!(%date, error = %e, "backtest failed");
                self.failure = Some((date, e.to_string()));
                self.phase = RunPhase::Failed;
            }
        }
        self.phase
    }

    pub fn run(mut self) -> BacktestResult {
        while !matches!(self.step(), RunPhase::Completed | RunPhase::Failed) {}
        self.into_result()
    }

    pub fn into_result(self) -> BacktestResult {
        let status = match self.failure {
            Some((date, reason)) => RunStatus::Failed { date, reason },
            None => RunStatus::Completed,
        };
        let summary = BacktestSummary::compute(
            &self.periods,
            self.config,
            self.strategy.rebalancing_frequency.periods_per_year(),
        );
        BacktestResult {
            universe_id: self.dataset.universe_id.clone(),
            strategy_name: self.strategy.name.clone(),
            status,
            periods: self.periods,
            summary,
        }
    }

    fn book_period(
        &mut self,
        index: usize,
        date: NaiveDate,
    ) -> Result<PeriodPerformanceResult, PitraderError> {
        let slice = temporal_filter::slice(self.dataset, date, self.config.max_price_staleness_days);
        if slice.active_symbols.is_empty() {
            return Err(PitraderError::NoActiveSymbols { date });
        }
        if slice.prices.is_empty() {
            return Err(PitraderError::NoPriceData { date });
        }

        let signals = signal::generate(&slice, &self.strategy.indicator_weights);
        let candidates = select_candidates(
            &signals,
            self.strategy.entry_threshold,
            self.strategy.max_positions,
        );
        let history = ReturnsHistory::from_dataset(
            self.dataset,
            &candidates,
            date,
            self.strategy.constraints.covariance_window,
        );
        let allocation = allocate(
            &candidates,
            &history,
            self.strategy.allocation_method,
            &self.strategy.constraints,
        );

        let (gross, rate) = match index.checked_sub(1).map(|i| self.schedule[i]) {
            Some(prev_date) => (
                holding_return(self.dataset, &self.weights, prev_date, date),
                turnover_rate(&self.active, &slice.active_symbols),
            ),
            None => (0.0, 0.0),
        };
        let cost = rate * self.config.turnover_cost_per_unit;
        let net = gross - cost;
        self.value *= 1.0 + net;

        debug!(
            %date,
            active = slice.active_symbols.len(),
            priced = slice.prices.len(),
            signals = signals.len(),
            held = allocation.weights.len(),
            gross,
            cost,
            "period booked"
        );
        if rate > 0.0 {
            info!(%date, turnover = rate, cost, "universe changed");
        }

        self.weights = allocation.weights.clone();
        self.active = slice.active_symbols.clone();

        Ok(PeriodPerformanceResult {
            period_date: date,
            gross_strategy_return: gross,
            universe_turnover_cost: cost,
            turnover_rate: rate,
            net_return: net,
            portfolio_value: self.value,
            active_symbols: slice.active_symbols,
            weights: allocation.weights,
            allocation_method: allocation.method_used,
            allocation_fallback: allocation.fallback,
            attribution: PeriodAttribution::new(gross, cost),
        })
    }
}

/// Runs `strategy` over an already built dataset.
pub fn run_backtest_on_dataset(
    dataset: &CompleteDataset,
    strategy: &StrategyConfig,
    config: &BacktestConfig,
) -> BacktestResult {
    info!(
        universe_id = %dataset.universe_id,
        strategy = %strategy.name,
        start = %config.start_date,
        end = %config.end_date,
        "running backtest"
    );
    BacktestRun::new(dataset, strategy, config).run()
}

/// Build options covering everything `strategy` needs from the dataset.
pub fn build_options_for(strategy: &StrategyConfig, base: &BuildOptions) -> BuildOptions {
    BuildOptions {
        warmup_bars: base
            .warmup_bars
            .max(strategy.constraints.covariance_window + 1),
        workers: base.workers,
        indicators: strategy.indicators(),
    }
}

/// Builds (or reuses from `cache`) the dataset and runs the backtest.
#[allow(clippy::too_many_arguments)]
pub fn run_backtest(
    universe_port: &dyn UniverseTimelinePort,
    data_port: &dyn DataPort,
    universe_id: &str,
    strategy: &StrategyConfig,
    config: &BacktestConfig,
    options: &BuildOptions,
    cache: &DatasetCache,
    cancel: &CancelFlag,
) -> Result<BacktestResult, PitraderError> {
    strategy.validate()?;
    config.validate()?;
    let dataset = cache.get_or_build(
        universe_port,
        data_port,
        universe_id,
        config.start_date,
        config.end_date,
        &build_options_for(strategy, options),
        cancel,
    )?;
    Ok(run_backtest_on_dataset(&dataset, strategy, config))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn config() -> BacktestConfig {
        BacktestConfig {
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2020, 12, 31).unwrap(),
            initial_capital: 100_000.0,
            turnover_cost_per_unit: DEFAULT_TURNOVER_COST,
            risk_free_rate: 0.0,
            max_price_staleness_days: DEFAULT_MAX_STALENESS_DAYS,
        }
    }

    /// Period with two active symbols and no holdings.
    pub fn period(date: &str, gross: f64, cost: f64, rate: f64) -> PeriodPerformanceResult {
        PeriodPerformanceResult {
            period_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            gross_strategy_return: gross,
            universe_turnover_cost: cost,
            turnover_rate: rate,
            net_return: gross - cost,
            portfolio_value: 0.0,
            active_symbols: ["AAA", "BBB"].iter().map(|s| s.to_string()).collect(),
            weights: BTreeMap::new(),
            allocation_method: AllocationMethod::EqualWeight,
            allocation_fallback: None,
            attribution: PeriodAttribution::new(gross, cost),
        }
    }
}
