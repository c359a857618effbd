//! Batch indicator computation over a complete dataset.
//!
//! Every requested indicator is computed once per symbol over the symbol's
//! full price history. Membership is never consulted here, so a value on a
//! given date is the same whether or not the symbol was in the universe then.

use crate::domain::dataset::CompleteDataset;
use crate::domain::indicator::{IndicatorSeries, IndicatorType};
use crate::domain::ohlcv::Symbol;
use crate::domain::symbol_data::SymbolData;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub type IndicatorMap = BTreeMap<Symbol, BTreeMap<IndicatorType, IndicatorSeries>>;

/// Computes `specs` for every symbol in parallel. Duplicate specs are
/// computed once; symbols without history get empty series.
pub fn compute_all(
    price_series: &BTreeMap<Symbol, SymbolData>,
    specs: &[IndicatorType],
) -> IndicatorMap {
    let unique: BTreeSet<IndicatorType> = specs.iter().copied().collect();
    if unique.is_empty() {
        return BTreeMap::new();
    }

    let map: IndicatorMap = price_series
        .par_iter()
        .map(|(symbol, data)| (symbol.clone(), compute_symbol(data, &unique)))
        .collect();

    info!(
        symbols = map.len(),
        indicators = unique.len(),
        "computed indicator series"
    );
    map
}

fn compute_symbol(
    data: &SymbolData,
    specs: &BTreeSet<IndicatorType>,
) -> BTreeMap<IndicatorType, IndicatorSeries> {
    specs
        .iter()
        .map(|spec| {
            let series = if data.is_empty() {
                IndicatorSeries::empty(*spec)
            } else {
                spec.calculate(data.points())
            };
            (*spec, series)
        })
        .collect()
}

/// New dataset version carrying `specs` in addition to what `dataset`
/// already holds. Only the missing series are computed.
pub fn with_indicators(dataset: &CompleteDataset, specs: &[IndicatorType]) -> CompleteDataset {
    let missing: Vec<IndicatorType> = specs
        .iter()
        .copied()
        .filter(|spec| !dataset.has_indicator(*spec))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut next = dataset.clone();
    if missing.is_empty() {
        return next;
    }

    debug!(missing = ?missing, "extending dataset with indicators");
    for (symbol, series) in compute_all(&dataset.price_series, &missing) {
        next.indicator_series.entry(symbol).or_default().extend(series);
    }
    next
}
