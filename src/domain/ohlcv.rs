//! OHLCV price points.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type Symbol = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: Symbol,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl PricePoint {
    /// Close-to-close simple return from `prev` to `self`.
    pub fn return_since(&self, prev: &PricePoint) -> Option<f64> {
        if prev.close > 0.0 && self.close.is_finite() {
            Some(self.close / prev.close - 1.0)
        } else {
            None
        }
    }
}

/// Sort by date and drop duplicate dates. The last point seen for a date wins,
/// so a later provider correction replaces the earlier row.
pub fn normalize_series(mut points: Vec<PricePoint>) -> Vec<PricePoint> {
    points.sort_by_key(|p| p.date);
    let mut out: Vec<PricePoint> = Vec::with_capacity(points.len());
    for point in points {
        match out.last_mut() {
            Some(last) if last.date == point.date => *last = point,
            _ => out.push(point),
        }
    }
    out
}
