//! JSON report adapter: the full `BacktestResult`, pretty printed.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::PitraderError;
use crate::ports::report_port::ReportPort;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

#[derive(Debug, Default)]
pub struct JsonReportAdapter;

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(result: &BacktestResult) -> Result<String, PitraderError> {
        Ok(serde_json::to_string_pretty(result)?)
    }
}

impl ReportPort for JsonReportAdapter {
    fn write(&self, result: &BacktestResult, output_path: &Path) -> Result<(), PitraderError> {
        let mut writer = BufWriter::new(File::create(output_path)?);
        serde_json::to_writer_pretty(&mut writer, result)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        info!(path = %output_path.display(), periods = result.periods.len(), "wrote JSON report");
        Ok(())
    }
}
