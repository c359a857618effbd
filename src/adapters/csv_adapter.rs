//! CSV directory price adapter.
//!
//! One file per symbol, `<dir>/<SYMBOL>.csv`, with a
//! `date,open,high,low,close,volume` header.

use crate::domain::error::PitraderError;
use crate::domain::ohlcv::{PricePoint, normalize_series};
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
}

pub struct CsvAdapter {
    base_path: PathBuf,
    name: String,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        let name = format!("csv:{}", base_path.display());
        Self { base_path, name }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }

    /// Symbols with a price file in the directory, sorted.
    pub fn list_symbols(&self) -> Result<Vec<String>, PitraderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| PitraderError::ProviderFailure {
            provider: self.name.clone(),
            reason: format!("failed to read directory {}: {}", self.base_path.display(), e),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PitraderError::ProviderFailure {
                provider: self.name.clone(),
                reason: format!("directory entry error: {}", e),
            })?;
            let name = entry.file_name();
            if let Some(symbol) = name.to_string_lossy().strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}

impl DataPort for CsvAdapter {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PricePoint>, PitraderError> {
        let path = self.csv_path(symbol);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PitraderError::DataUnavailable {
                    symbol: symbol.to_string(),
                    reason: format!("no price file {}", path.display()),
                });
            }
            Err(e) => {
                return Err(PitraderError::ProviderFailure {
                    provider: self.name.clone(),
                    reason: format!("failed to read {}: {}", path.display(), e),
                });
            }
        };

        let malformed = |line: usize, reason: String| PitraderError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: format!("{} line {}: {}", path.display(), line, reason),
        };

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut points = Vec::new();

        for (i, result) in rdr.deserialize::<CsvRow>().enumerate() {
            // header is line 1
            let line = i + 2;
            let row = result.map_err(|e| malformed(line, e.to_string()))?;
            let date = NaiveDate::parse_from_str(row.date.trim(), "%Y-%m-%d")
                .map_err(|e| malformed(line, format!("invalid date '{}': {}", row.date, e)))?;

            if date < start_date || date > end_date {
                continue;
            }
            if !(row.close.is_finite() && row.close > 0.0) {
                return Err(malformed(line, format!("close must be positive, got {}", row.close)));
            }

            points.push(PricePoint {
                symbol: symbol.to_string(),
                date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        debug!(symbol, rows = points.len(), path = %path.display(), "read price file");
        Ok(normalize_series(points))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn provider_version(&self) -> String {
        self.name.clone()
    }
}
