//! CSV report adapter: one row per rebalancing period.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::PitraderError;
use crate::ports::report_port::ReportPort;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Serialize)]
struct PeriodRow<'a> {
    period_date: NaiveDate,
    active_symbols: usize,
    holdings: String,
    allocation_method: String,
    allocation_fallback: &'a str,
    gross_return: f64,
    turnover_rate: f64,
    turnover_cost: f64,
    net_return: f64,
    portfolio_value: f64,
}

#[derive(Debug, Default)]
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &BacktestResult, output_path: &Path) -> Result<(), PitraderError> {
        let csv_err = |e: csv::Error| PitraderError::Io(std::io::Error::other(e.to_string()));
        let mut writer = csv::Writer::from_path(output_path).map_err(csv_err)?;

        for p in &result.periods {
            let holdings = p
                .weights
                .iter()
                .map(|(symbol, w)| format!("{}:{:.6}", symbol, w))
                .collect::<Vec<_>>()
                .join(";");
            writer
                .serialize(PeriodRow {
                    period_date: p.period_date,
                    active_symbols: p.active_symbols.len(),
                    holdings,
                    allocation_method: p.allocation_method.to_string(),
                    allocation_fallback: p.allocation_fallback.as_ref().map_or("", |f| f.kind()),
                    gross_return: p.gross_strategy_return,
                    turnover_rate: p.turnover_rate,
                    turnover_cost: p.universe_turnover_cost,
                    net_return: p.net_return,
                    portfolio_value: p.portfolio_value,
                })
                .map_err(csv_err)?;
        }

        writer.flush()?;
        info!(path = %output_path.display(), rows = result.periods.len(), "wrote CSV period report");
        Ok(())
    }
}
