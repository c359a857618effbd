//! Bollinger Bands indicator.
//!
//! Bollinger Bands consist of:
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//! - %B: (close - lower) / (upper - lower), 0.5 when the bands collapse
//!
//! Where StdDev is population standard deviation (divides by N, not N-1).
//!
//! Default parameters: period=20, multiplier=2.0
//! Warmup: first (period-1) bars are undefined.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::PricePoint;

pub fn calculate_bollinger(
    points: &[PricePoint],
    period: usize,
    stddev_mult_x100: u32,
) -> IndicatorSeries {
    let mut values = Vec::with_capacity(points.len());
    let mult = stddev_mult_x100 as f64 / 100.0;

    for (i, point) in points.iter().enumerate() {
        if period == 0 || i + 1 < period {
            values.push(IndicatorPoint::undefined(point.date));
            continue;
        }

        let window = &points[i + 1 - period..=i];
        let middle: f64 = window.iter().map(|p| p.close).sum::<f64>() / period as f64;
        let variance: f64 = window
            .iter()
            .map(|p| {
                let diff = p.close - middle;
                diff * diff
            })
            .sum::<f64>()
            / period as f64;

        let stddev = variance.sqrt();
        let upper = middle + mult * stddev;
        let lower = middle - mult * stddev;
        let width = upper - lower;
        let percent_b = if width > 0.0 {
            (point.close - lower) / width
        } else {
            0.5
        };

        values.push(IndicatorPoint {
            date: point.date,
            value: Some(IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
                percent_b,
            }),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Bollinger {
            period,
            stddev_mult_x100,
        },
        values,
    }
}
