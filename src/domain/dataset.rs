//! Complete dataset construction.
//!
//! A `CompleteDataset` holds the price history and indicator series of every
//! symbol that is ever a member of a universe between its first snapshot and
//! the end of the backtest window. It is built once, never mutated, and shared
//! behind an `Arc` between runs.

use crate::domain::error::PitraderError;
use crate::domain::indicator::{IndicatorSeries, IndicatorType};
use crate::domain::indicator_engine::{IndicatorMap, compute_all, with_indicators};
use crate::domain::ohlcv::Symbol;
use crate::domain::symbol_data::{SymbolData, build_unified_timeline};
use crate::domain::universe::UniverseTimeline;
use crate::ports::data_port::DataPort;
use crate::ports::universe_port::UniverseTimelinePort;
use chrono::{Duration, NaiveDate};
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub const DEFAULT_WARMUP_BARS: usize = 252;
pub const DEFAULT_WORKERS: usize = 4;

/// Calendar days needed to cover `bars` trading days, with a week of slack
/// for holidays.
pub fn warmup_calendar_days(bars: usize) -> i64 {
    ((bars * 365).div_ceil(252) + 7) as i64
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    pub warmup_bars: usize,
    pub workers: usize,
    pub indicators: Vec<IndicatorType>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            warmup_bars: DEFAULT_WARMUP_BARS,
            workers: DEFAULT_WORKERS,
            indicators: Vec::new(),
        }
    }
}

impl BuildOptions {
    /// Warm-up bars actually fetched: the configured value or the longest
    /// indicator lookback, whichever is larger.
    pub fn effective_warmup_bars(&self) -> usize {
        self.indicators
            .iter()
            .map(|i| i.lookback())
            .fold(self.warmup_bars, usize::max)
    }

    pub fn fetch_start(&self, start_date: NaiveDate) -> NaiveDate {
        start_date - Duration::days(warmup_calendar_days(self.effective_warmup_bars()))
    }
}

/// Cooperative cancellation shared between the caller and fetch workers.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompleteDataset {
    pub universe_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// First date requested from the provider, warm-up included.
    pub fetch_start: NaiveDate,
    pub all_time_symbols: BTreeSet<Symbol>,
    pub price_series: BTreeMap<Symbol, SymbolData>,
    pub indicator_series: IndicatorMap,
    /// Every date on which at least one symbol traded, warm-up included.
    pub timeline: Vec<NaiveDate>,
    /// Symbols with no usable history and the reason why.
    pub unavailable: BTreeMap<Symbol, String>,
    pub provider_version: String,
    pub universe: UniverseTimeline,
}

impl CompleteDataset {
    pub fn symbol_data(&self, symbol: &str) -> Option<&SymbolData> {
        self.price_series.get(symbol)
    }

    pub fn indicator(&self, symbol: &str, indicator: IndicatorType) -> Option<&IndicatorSeries> {
        self.indicator_series.get(symbol)?.get(&indicator)
    }

    /// True when every symbol carries a series for `indicator`.
    pub fn has_indicator(&self, indicator: IndicatorType) -> bool {
        self.price_series.keys().all(|symbol| {
            self.indicator_series
                .get(symbol)
                .is_some_and(|m| m.contains_key(&indicator))
        })
    }

    pub fn indicator_types(&self) -> BTreeSet<IndicatorType> {
        self.indicator_series
            .values()
            .flat_map(|m| m.keys().copied())
            .collect()
    }

    pub fn symbols_with_data(&self) -> usize {
        self.price_series.values().filter(|s| !s.is_empty()).count()
    }

    /// Trading dates in `(after, until]`.
    pub fn trading_dates_between(&self, after: NaiveDate, until: NaiveDate) -> &[NaiveDate] {
        let lo = self.timeline.partition_point(|d| *d <= after);
        let hi = self.timeline.partition_point(|d| *d <= until);
        &self.timeline[lo..hi.max(lo)]
    }

    pub fn key(&self) -> DatasetKey {
        DatasetKey {
            universe_id: self.universe_id.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
            provider_version: self.provider_version.clone(),
        }
    }
}

#[derive(Debug, Clone)]
enum FetchRecord {
    Loaded(SymbolData),
    Unavailable(String),
}

type FetchKey = (Symbol, NaiveDate, NaiveDate);

/// Builds datasets and remembers what it has fetched, so a build that was
/// cancelled part way resumes with only the remaining symbols.
pub struct DatasetBuilder<'a> {
    universe_port: &'a dyn UniverseTimelinePort,
    data_port: &'a dyn DataPort,
    options: BuildOptions,
    fetched: DashMap<FetchKey, FetchRecord>,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(
        universe_port: &'a dyn UniverseTimelinePort,
        data_port: &'a dyn DataPort,
        options: BuildOptions,
    ) -> Self {
        Self {
            universe_port,
            data_port,
            options,
            fetched: DashMap::new(),
        }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Number of symbol histories retained from previous attempts.
    pub fn fetched_count(&self) -> usize {
        self.fetched.len()
    }

    pub fn build(
        &self,
        universe_id: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        cancel: &CancelFlag,
    ) -> Result<CompleteDataset, PitraderError> {
        if start_date >= end_date {
            return Err(PitraderError::config_invalid(
                "backtest",
                "start_date",
                format!("start_date {} must be before end_date {}", start_date, end_date),
            ));
        }

        let timeline = self.universe_port.get_timeline(universe_id)?;
        let first = timeline
            .first_date()
            .ok_or_else(|| PitraderError::EmptyTimeline {
                universe_id: universe_id.to_string(),
            })?;
        if first > start_date {
            return Err(PitraderError::InvalidTimeline {
                universe_id: universe_id.to_string(),
                reason: format!(
                    "first snapshot {} is after start_date {}",
                    first, start_date
                ),
            });
        }

        let all_time_symbols = timeline.all_time_symbols();
        let fetch_start = self.options.fetch_start(start_date);
        info!(
            universe_id,
            symbols = all_time_symbols.len(),
            %fetch_start,
            %end_date,
            provider = self.data_port.name(),
            "building dataset"
        );

        let transient = self.fetch_missing(&all_time_symbols, fetch_start, end_date, cancel)?;

        let mut price_series = BTreeMap::new();
        let mut unavailable = BTreeMap::new();
        for symbol in &all_time_symbols {
            let key = (symbol.clone(), fetch_start, end_date);
            let record = match self.fetched.get(&key) {
                Some(r) => r.value().clone(),
                None => FetchRecord::Unavailable(
                    transient
                        .get(symbol)
                        .cloned()
                        .unwrap_or_else(|| "not fetched".to_string()),
                ),
            };
            match record {
                FetchRecord::Loaded(data) => {
                    price_series.insert(symbol.clone(), data);
                }
                FetchRecord::Unavailable(reason) => {
                    warn!(symbol = %symbol, %reason, "symbol has no usable price history");
                    price_series.insert(symbol.clone(), SymbolData::empty(symbol.clone()));
                    unavailable.insert(symbol.clone(), reason);
                }
            }
        }

        if unavailable.len() == all_time_symbols.len() {
            warn!(universe_id, "no symbol in the universe has price data");
        }

        let indicator_series = compute_all(&price_series, &self.options.indicators);
        let unified = build_unified_timeline(price_series.values());

        info!(
            universe_id,
            with_data = all_time_symbols.len() - unavailable.len(),
            unavailable = unavailable.len(),
            trading_days = unified.len(),
            "dataset built"
        );

        Ok(CompleteDataset {
            universe_id: universe_id.to_string(),
            start_date,
            end_date,
            fetch_start,
            all_time_symbols,
            price_series,
            indicator_series,
            timeline: unified,
            unavailable,
            provider_version: self.data_port.provider_version(),
            universe: timeline,
        })
    }

    /// Fetches every symbol not already in the store. Returns the reasons of
    /// transient provider failures, which are not stored and get retried on
    /// the next build.
    fn fetch_missing(
        &self,
        symbols: &BTreeSet<Symbol>,
        fetch_start: NaiveDate,
        end_date: NaiveDate,
        cancel: &CancelFlag,
    ) -> Result<BTreeMap<Symbol, String>, PitraderError> {
        let pending: Vec<&Symbol> = symbols
            .iter()
            .filter(|s| {
                !self
                    .fetched
                    .contains_key(&((*s).clone(), fetch_start, end_date))
            })
            .collect();

        if pending.len() < symbols.len() {
            info!(
                reused = symbols.len() - pending.len(),
                pending = pending.len(),
                "resuming dataset fetch"
            );
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .build()
            .map_err(|e| PitraderError::Io(std::io::Error::other(e.to_string())))?;

        let transient: BTreeMap<Symbol, String> = pool.install(|| {
            pending
                .par_iter()
                .filter_map(|symbol| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    self.fetch_one(symbol, fetch_start, end_date)
                        .map(|reason| ((*symbol).clone(), reason))
                })
                .collect()
        });

        if cancel.is_cancelled() {
            let done = symbols
                .iter()
                .filter(|s| {
                    self.fetched
                        .contains_key(&((*s).clone(), fetch_start, end_date))
                })
                .count();
            warn!(fetched = done, remaining = symbols.len() - done, "dataset build cancelled");
            return Err(PitraderError::Cancelled {
                fetched: done,
                remaining: symbols.len() - done,
            });
        }

        Ok(transient)
    }

    fn fetch_one(&self, symbol: &str, fetch_start: NaiveDate, end_date: NaiveDate) -> Option<String> {
        let key = (symbol.to_string(), fetch_start, end_date);
        let fetched = self
            .data_port
            .get_historical_prices(std::slice::from_ref(&key.0), fetch_start, end_date)
            .remove(symbol)
            .unwrap_or_else(|| {
                Err(PitraderError::DataUnavailable {
                    symbol: symbol.to_string(),
                    reason: "provider returned no entry".to_string(),
                })
            });
        match fetched {
            Ok(points) if points.is_empty() => {
                self.fetched.insert(
                    key,
                    FetchRecord::Unavailable("no price history in window".to_string()),
                );
                None
            }
            Ok(points) => {
                debug!(symbol, bars = points.len(), "fetched price history");
                self.fetched
                    .insert(key, FetchRecord::Loaded(SymbolData::new(symbol.to_string(), points)));
                None
            }
            Err(PitraderError::DataUnavailable { reason, .. }) => {
                self.fetched.insert(key, FetchRecord::Unavailable(reason));
                None
            }
            Err(e) => {
                warn!(symbol, error = %e, "price fetch failed");
                Some(e.to_string())
            }
        }
    }
}

/// Builds a dataset with a throwaway builder.
pub fn build_complete_dataset(
    universe_port: &dyn UniverseTimelinePort,
    data_port: &dyn DataPort,
    universe_id: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    options: &BuildOptions,
    cancel: &CancelFlag,
) -> Result<CompleteDataset, PitraderError> {
    DatasetBuilder::new(universe_port, data_port, options.clone()).build(
        universe_id,
        start_date,
        end_date,
        cancel,
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetKey {
    pub universe_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub provider_version: String,
}

/// Caller-owned cache of built datasets.
#[derive(Debug, Default)]
pub struct DatasetCache {
    entries: DashMap<DatasetKey, Arc<CompleteDataset>>,
}

impl DatasetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &DatasetKey) -> Option<Arc<CompleteDataset>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn insert(&self, dataset: CompleteDataset) -> Arc<CompleteDataset> {
        let dataset = Arc::new(dataset);
        self.entries.insert(dataset.key(), Arc::clone(&dataset));
        dataset
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Cached dataset for the request, extended with any missing indicators,
    /// or a freshly built one. A cached dataset whose history starts later
    /// than the requested warm-up needs is rebuilt and replaced.
    pub fn get_or_build(
        &self,
        universe_port: &dyn UniverseTimelinePort,
        data_port: &dyn DataPort,
        universe_id: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        options: &BuildOptions,
        cancel: &CancelFlag,
    ) -> Result<Arc<CompleteDataset>, PitraderError> {
        let key = DatasetKey {
            universe_id: universe_id.to_string(),
            start_date,
            end_date,
            provider_version: data_port.provider_version(),
        };

        if let Some(cached) = self.get(&key) {
            let fetch_start = options.fetch_start(start_date);
            if cached.fetch_start <= fetch_start {
                if options.indicators.iter().all(|i| cached.has_indicator(*i)) {
                    debug!(universe_id, "dataset cache hit");
                    return Ok(cached);
                }
                debug!(universe_id, "dataset cache hit, adding indicators");
                return Ok(self.insert(with_indicators(&cached, &options.indicators)));
            }
            info!(
                universe_id,
                cached_from = %cached.fetch_start,
                needed_from = %fetch_start,
                "cached dataset lacks warm-up history, rebuilding"
            );
        }

        let dataset = build_complete_dataset(
            universe_port,
            data_port,
            universe_id,
            start_date,
            end_date,
            options,
            cancel,
        )?;
        Ok(self.insert(dataset))
    }
}
