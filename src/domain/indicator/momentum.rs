//! Momentum (rate of change) indicator.
//!
//! MOMENTUM(n)[i] = ((C[i] - C[i-n]) / C[i-n]) * 100
//! If C[i-n] == 0 the value is undefined rather than zero.
//! Warmup: first n bars undefined.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType};
use crate::domain::ohlcv::PricePoint;

pub fn calculate_momentum(points: &[PricePoint], period: usize) -> IndicatorSeries {
    let mut values = Vec::with_capacity(points.len());

    for (i, point) in points.iter().enumerate() {
        let prev_close = if period > 0 && i >= period {
            Some(points[i - period].close)
        } else {
            None
        };

        values.push(match prev_close {
            Some(prev) if prev != 0.0 => {
                IndicatorPoint::simple(point.date, ((point.close - prev) / prev) * 100.0)
            }
            _ => IndicatorPoint::undefined(point.date),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Momentum(period),
        values,
    }
}
