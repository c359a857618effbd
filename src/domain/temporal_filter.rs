//! Point-in-time view of a complete dataset.
//!
//! A slice exposes only what was knowable on its as-of date: the membership of
//! the latest snapshot at or before that date, and for each member the last
//! bar and indicator values dated at or before it.

use crate::domain::dataset::CompleteDataset;
use crate::domain::indicator::IndicatorType;
use crate::domain::ohlcv::{PricePoint, Symbol};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct TemporalDataSlice {
    pub as_of_date: NaiveDate,
    pub active_symbols: BTreeSet<Symbol>,
    pub prices: BTreeMap<Symbol, PricePoint>,
    pub indicators: BTreeMap<Symbol, BTreeMap<IndicatorType, f64>>,
}

impl TemporalDataSlice {
    pub fn empty(as_of_date: NaiveDate) -> Self {
        Self {
            as_of_date,
            active_symbols: BTreeSet::new(),
            prices: BTreeMap::new(),
            indicators: BTreeMap::new(),
        }
    }

    /// Active symbols that have a usable price on the as-of date.
    pub fn tradable_symbols(&self) -> BTreeSet<Symbol> {
        self.active_symbols
            .iter()
            .filter(|s| self.prices.contains_key(*s))
            .cloned()
            .collect()
    }

    pub fn close(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).map(|p| p.close)
    }

    pub fn indicator(&self, symbol: &str, indicator: IndicatorType) -> Option<f64> {
        self.indicators.get(symbol)?.get(&indicator).copied()
    }
}

pub fn slice(
    dataset: &CompleteDataset,
    as_of: NaiveDate,
    max_staleness_days: i64,
) -> TemporalDataSlice {
    let Some(snapshot) = dataset.universe.snapshot_as_of(as_of) else {
        debug!(%as_of, "no snapshot on or before date");
        return TemporalDataSlice::empty(as_of);
    };

    let mut result = TemporalDataSlice {
        active_symbols: snapshot.member_symbols.clone(),
        ..TemporalDataSlice::empty(as_of)
    };

    for symbol in &snapshot.member_symbols {
        let Some(data) = dataset.symbol_data(symbol) else {
            continue;
        };
        let Some(idx) = data.index_at_or_before(as_of) else {
            continue;
        };
        let point = &data.points()[idx];
        if (as_of - point.date).num_days() > max_staleness_days {
            debug!(symbol = %symbol, last_bar = %point.date, %as_of, "price too stale");
            continue;
        }

        let values: BTreeMap<IndicatorType, f64> = dataset
            .indicator_series
            .get(symbol)
            .map(|by_type| {
                by_type
                    .iter()
                    .filter_map(|(ty, series)| {
                        let value = series.values.get(idx)?;
                        if value.date != point.date {
                            return None;
                        }
                        Some((*ty, value.value?.scalar()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if !values.is_empty() {
            result.indicators.insert(symbol.clone(), values);
        }
        result.prices.insert(symbol.clone(), point.clone());
    }

    result
}
