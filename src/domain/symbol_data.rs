//! Per-symbol price history and the unified trading-date timeline.

use crate::domain::ohlcv::{PricePoint, Symbol, normalize_series};
use chrono::NaiveDate;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolData {
    pub symbol: Symbol,
    points: Vec<PricePoint>,
}

impl SymbolData {
    /// Sorts and deduplicates `points` by date.
    pub fn new(symbol: Symbol, points: Vec<PricePoint>) -> Self {
        Self {
            symbol,
            points: normalize_series(points),
        }
    }

    pub fn empty(symbol: Symbol) -> Self {
        Self {
            symbol,
            points: Vec::new(),
        }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn bar_count(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get_point(&self, date: NaiveDate) -> Option<&PricePoint> {
        self.get_index(date).map(|i| &self.points[i])
    }

    pub fn get_index(&self, date: NaiveDate) -> Option<usize> {
        self.points.binary_search_by_key(&date, |p| p.date).ok()
    }

    /// Index of the latest point dated on or before `date`.
    pub fn index_at_or_before(&self, date: NaiveDate) -> Option<usize> {
        let idx = self.points.partition_point(|p| p.date <= date);
        idx.checked_sub(1)
    }

    pub fn point_at_or_before(&self, date: NaiveDate) -> Option<&PricePoint> {
        self.index_at_or_before(date).map(|i| &self.points[i])
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }
}

/// Sorted set of every date on which at least one symbol has a bar.
pub fn build_unified_timeline<'a, I>(series: I) -> Vec<NaiveDate>
where
    I: IntoIterator<Item = &'a SymbolData>,
{
    let unique_dates: BTreeSet<NaiveDate> = series
        .into_iter()
        .flat_map(|sd| sd.points.iter().map(|p| p.date))
        .collect();
    unique_dates.into_iter().collect()
}
