//! Splits performance into what the strategy earned and what universe
//! turnover cost.

use crate::domain::backtest::PeriodPerformanceResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PeriodAttribution {
    pub strategy_contribution: f64,
    pub universe_contribution: f64,
}

impl PeriodAttribution {
    pub fn new(gross_return: f64, turnover_cost: f64) -> Self {
        Self {
            strategy_contribution: gross_return,
            universe_contribution: -turnover_cost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    /// Compounded gross return of the held portfolios.
    pub strategy_attribution: f64,
    /// Compounded drag from universe turnover costs (≤ 0).
    pub universe_attribution: f64,
    /// 1 minus the mean turnover rate; 1.0 for a universe that never changed.
    pub stability_score: f64,
}

pub fn attribute(periods: &[PeriodPerformanceResult]) -> Attribution {
    let strategy = periods
        .iter()
        .fold(1.0, |acc, p| acc * (1.0 + p.gross_strategy_return))
        - 1.0;
    let universe = periods
        .iter()
        .fold(1.0, |acc, p| acc * (1.0 - p.universe_turnover_cost))
        - 1.0;

    let stability = if periods.len() < 2 {
        1.0
    } else {
        let rates = &periods[1..];
        1.0 - rates.iter().map(|p| p.turnover_rate).sum::<f64>() / rates.len() as f64
    };

    Attribution {
        strategy_attribution: strategy,
        universe_attribution: universe,
        stability_score: stability,
    }
}
