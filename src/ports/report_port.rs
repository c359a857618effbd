//! Report generation port.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::PitraderError;
use std::path::Path;

/// Port for writing backtest reports.
pub trait ReportPort {
    fn write(&self, result: &BacktestResult, output_path: &Path) -> Result<(), PitraderError>;
}
