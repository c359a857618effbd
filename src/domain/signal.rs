//! Composite trading signals.
//!
//! Each indicator value is first mapped to a directional score in [-1, 1]
//! (positive = bullish). A symbol's signal is the weighted mean of the scores
//! it has defined, with weights renormalized over that subset.

use crate::domain::indicator::IndicatorType;
use crate::domain::ohlcv::Symbol;
use crate::domain::temporal_filter::TemporalDataSlice;
use std::collections::BTreeMap;

/// Directional score for one indicator reading. `None` when the reading
/// cannot be interpreted (e.g. a non-positive moving average).
pub fn normalize(indicator: IndicatorType, value: f64, close: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let score = match indicator {
        IndicatorType::Rsi(_) => (50.0 - value) / 50.0,
        IndicatorType::Momentum(_) => (value / 10.0).tanh(),
        IndicatorType::Macd { .. } => {
            if close <= 0.0 {
                return None;
            }
            (100.0 * value / close).tanh()
        }
        IndicatorType::Sma(_) | IndicatorType::Ema(_) => {
            if value <= 0.0 {
                return None;
            }
            (10.0 * (close - value) / value).tanh()
        }
        IndicatorType::Bollinger { .. } => 1.0 - 2.0 * value,
    };
    Some(score.clamp(-1.0, 1.0))
}

/// Signals for every active symbol with at least one weighted indicator
/// defined. Symbols with none defined are left out rather than scored zero.
pub fn generate(
    slice: &TemporalDataSlice,
    weights: &BTreeMap<IndicatorType, f64>,
) -> BTreeMap<Symbol, f64> {
    let mut signals = BTreeMap::new();

    for (symbol, values) in &slice.indicators {
        let Some(close) = slice.close(symbol) else {
            continue;
        };

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for (indicator, weight) in weights {
            if *weight == 0.0 {
                continue;
            }
            let Some(score) = values
                .get(indicator)
                .and_then(|v| normalize(*indicator, *v, close))
            else {
                continue;
            };
            weighted += weight * score;
            total_weight += weight.abs();
        }

        if total_weight > 0.0 {
            signals.insert(symbol.clone(), (weighted / total_weight).clamp(-1.0, 1.0));
        }
    }

    signals
}
