//! Summary statistics over a backtest's period timeline.

use crate::domain::attribution::attribute;
use crate::domain::backtest::{BacktestConfig, PeriodPerformanceResult};
use serde::{Deserialize, Serialize};

const DAYS_PER_YEAR: f64 = 365.25;
/// Dispersion below this is treated as none (float noise on flat returns).
const MIN_STDDEV: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    /// Longest run of periods spent below a prior peak.
    pub max_drawdown_duration: usize,
    pub average_universe_size: f64,
    pub universe_stability_score: f64,
    pub total_turnover_cost: f64,
    pub strategy_attribution: f64,
    pub universe_attribution: f64,
    pub final_value: f64,
    pub period_count: usize,
}

impl BacktestSummary {
    /// Volatility and Sharpe are annualized by the observed spacing of the
    /// periods; `periods_per_year` is used only when the timeline is too
    /// short to measure it.
    pub fn compute(
        periods: &[PeriodPerformanceResult],
        config: &BacktestConfig,
        periods_per_year: f64,
    ) -> Self {
        let initial_capital = config.initial_capital;
        let final_value = periods
            .last()
            .map(|p| p.portfolio_value)
            .unwrap_or(initial_capital);

        let total_return = if initial_capital > 0.0 {
            final_value / initial_capital - 1.0
        } else {
            0.0
        };

        let days = match (periods.first(), periods.last()) {
            (Some(first), Some(last)) => (last.period_date - first.period_date).num_days(),
            _ => 0,
        };
        let years = days as f64 / DAYS_PER_YEAR;
        let annualized_return = if years > 0.0 && total_return > -1.0 && total_return.is_finite() {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        // the first period only establishes holdings, it realizes no return
        let returns: Vec<f64> = periods.iter().skip(1).map(|p| p.net_return).collect();
        let periods_per_year = observed_periods_per_year(returns.len(), days).unwrap_or(periods_per_year);
        let (volatility, sharpe_ratio) =
            compute_risk_adjusted(&returns, config.risk_free_rate, periods_per_year);

        let mut curve = Vec::with_capacity(periods.len() + 1);
        curve.push(initial_capital);
        curve.extend(periods.iter().map(|p| p.portfolio_value));
        let (max_drawdown, max_drawdown_duration) = compute_drawdown(&curve);

        let average_universe_size = if periods.is_empty() {
            0.0
        } else {
            periods.iter().map(|p| p.active_symbols.len()).sum::<usize>() as f64
                / periods.len() as f64
        };

        let attribution = attribute(periods);

        BacktestSummary {
            total_return,
            annualized_return,
            volatility,
            sharpe_ratio,
            max_drawdown,
            max_drawdown_duration,
            average_universe_size,
            universe_stability_score: attribution.stability_score,
            total_turnover_cost: periods.iter().map(|p| p.universe_turnover_cost).sum(),
            strategy_attribution: attribution.strategy_attribution,
            universe_attribution: attribution.universe_attribution,
            final_value,
            period_count: periods.len(),
        }
    }
}

/// Realized periods per year given `count` returns spread over `days`.
fn observed_periods_per_year(count: usize, days: i64) -> Option<f64> {
    if count < 2 || days <= 0 {
        return None;
    }
    Some(count as f64 * DAYS_PER_YEAR / days as f64)
}

fn compute_drawdown(values: &[f64]) -> (f64, usize) {
    let Some(&first) = values.first() else {
        return (0.0, 0);
    };

    let mut peak = first;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0usize;
    let mut current_dd_duration = 0usize;

    for &value in values {
        if value >= peak {
            peak = value;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            let dd = (peak - value) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
            current_dd_duration += 1;
            if current_dd_duration > max_dd_duration {
                max_dd_duration = current_dd_duration;
            }
        }
    }

    (max_dd, max_dd_duration)
}

/// Annualized volatility and Sharpe ratio of per-period returns.
fn compute_risk_adjusted(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> (f64, f64) {
    if returns.len() < 2 || periods_per_year <= 0.0 {
        return (0.0, 0.0);
    }

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;
    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let volatility = stddev * periods_per_year.sqrt();
    let excess_return = mean - risk_free_rate / periods_per_year;
    let sharpe = if stddev > MIN_STDDEV {
        (excess_return / stddev) * periods_per_year.sqrt()
    } else {
        0.0
    };

    (volatility, sharpe)
}
