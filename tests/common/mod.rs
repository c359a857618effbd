#![allow(dead_code)]

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use pitrader::domain::allocation::{AllocationConstraints, AllocationMethod};
use pitrader::domain::backtest::{BacktestConfig, DEFAULT_MAX_STALENESS_DAYS, DEFAULT_TURNOVER_COST};
use pitrader::domain::error::PitraderError;
pub use pitrader::domain::ohlcv::PricePoint;
use pitrader::domain::indicator::IndicatorType;
use pitrader::domain::strategy::{RebalanceFrequency, StrategyConfig};
use pitrader::domain::universe::{UniverseSnapshot, UniverseTimeline};
use pitrader::ports::data_port::DataPort;
use pitrader::ports::universe_port::UniverseTimelinePort;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct MockDataPort {
    pub data: HashMap<String, Vec<PricePoint>>,
    pub errors: HashMap<String, String>,
    calls: AtomicUsize,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_points(mut self, symbol: &str, points: Vec<PricePoint>) -> Self {
        self.data.insert(symbol.to_string(), points);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    /// Number of `fetch_prices` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataPort for MockDataPort {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PricePoint>, PitraderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.errors.get(symbol) {
            return Err(PitraderError::ProviderFailure {
                provider: "mock".to_string(),
                reason: reason.clone(),
            });
        }
        match self.data.get(symbol) {
            Some(points) => Ok(points
                .iter()
                .filter(|p| p.date >= start_date && p.date <= end_date)
                .cloned()
                .collect()),
            None => Err(PitraderError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "not in mock".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub struct MockUniversePort {
    pub timelines: HashMap<String, UniverseTimeline>,
}

impl MockUniversePort {
    pub fn new() -> Self {
        Self {
            timelines: HashMap::new(),
        }
    }

    pub fn with_snapshots(mut self, universe_id: &str, snapshots: &[(NaiveDate, Vec<&str>)]) -> Self {
        let snapshots = snapshots
            .iter()
            .map(|(date, members)| UniverseSnapshot::new(*date, members.iter().copied()))
            .collect();
        let timeline = UniverseTimeline::new(universe_id, snapshots).unwrap();
        self.timelines.insert(universe_id.to_string(), timeline);
        self
    }
}

impl UniverseTimelinePort for MockUniversePort {
    fn get_timeline(&self, universe_id: &str) -> Result<UniverseTimeline, PitraderError> {
        self.timelines
            .get(universe_id)
            .cloned()
            .ok_or_else(|| PitraderError::UnknownUniverse {
                universe_id: universe_id.to_string(),
            })
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn make_point(symbol: &str, date: NaiveDate, close: f64) -> PricePoint {
    PricePoint {
        symbol: symbol.to_string(),
        date,
        open: close,
        high: close * 1.01,
        low: close * 0.99,
        close,
        volume: 1_000,
    }
}

pub fn weekdays(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut d = from;
    while d <= to {
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(d);
        }
        d += Duration::days(1);
    }
    dates
}

/// Weekday closes with a steady `drift` per bar and a small deterministic
/// wiggle so returns have non-zero variance.
pub fn trending_series(
    symbol: &str,
    from: NaiveDate,
    to: NaiveDate,
    start: f64,
    drift: f64,
) -> Vec<PricePoint> {
    weekdays(from, to)
        .into_iter()
        .enumerate()
        .map(|(i, d)| {
            let wiggle = (i as f64 * 0.7).sin() * 0.5;
            make_point(symbol, d, start + drift * i as f64 + wiggle)
        })
        .collect()
}

/// A year of 2020 plus a year of warm-up history.
pub fn full_history(symbol: &str, start: f64, drift: f64) -> Vec<PricePoint> {
    trending_series(symbol, date(2019, 1, 1), date(2020, 12, 31), start, drift)
}

pub fn sample_config() -> BacktestConfig {
    BacktestConfig {
        start_date: date(2020, 1, 1),
        end_date: date(2020, 12, 31),
        initial_capital: 100_000.0,
        turnover_cost_per_unit: DEFAULT_TURNOVER_COST,
        risk_free_rate: 0.0,
        max_price_staleness_days: DEFAULT_MAX_STALENESS_DAYS,
    }
}

pub fn sample_strategy(
    indicators: &[(IndicatorType, f64)],
    method: AllocationMethod,
    frequency: RebalanceFrequency,
) -> StrategyConfig {
    StrategyConfig {
        name: "test".to_string(),
        indicator_weights: indicators.iter().copied().collect::<BTreeMap<_, _>>(),
        allocation_method: method,
        rebalancing_frequency: frequency,
        entry_threshold: -1.0,
        max_positions: None,
        constraints: AllocationConstraints {
            max_single_allocation: 1.0,
            covariance_window: 60,
            min_history: 20,
            ..AllocationConstraints::default()
        },
    }
}

pub fn momentum_strategy(frequency: RebalanceFrequency) -> StrategyConfig {
    sample_strategy(
        &[(IndicatorType::Momentum(20), 1.0)],
        AllocationMethod::EqualWeight,
        frequency,
    )
}
