//! CSV universe timeline adapter.
//!
//! One file per universe, `<dir>/<universe_id>.csv`, with a `date,symbol`
//! header and one membership per row. Rows sharing a date form a snapshot.

use crate::domain::error::PitraderError;
use crate::domain::ohlcv::Symbol;
use crate::domain::universe::UniverseTimeline;
use crate::ports::universe_port::UniverseTimelinePort;
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct MembershipRow {
    date: String,
    symbol: String,
}

pub struct CsvUniverseAdapter {
    base_path: PathBuf,
}

impl CsvUniverseAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, universe_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", universe_id))
    }
}

impl UniverseTimelinePort for CsvUniverseAdapter {
    fn get_timeline(&self, universe_id: &str) -> Result<UniverseTimeline, PitraderError> {
        let path = self.csv_path(universe_id);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PitraderError::UnknownUniverse {
                universe_id: universe_id.to_string(),
            },
            _ => PitraderError::Io(e),
        })?;

        let invalid = |line: usize, reason: String| PitraderError::InvalidTimeline {
            universe_id: universe_id.to_string(),
            reason: format!("{} line {}: {}", path.display(), line, reason),
        };

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut rows: Vec<(NaiveDate, Symbol)> = Vec::new();
        for (i, result) in rdr.deserialize::<MembershipRow>().enumerate() {
            let line = i + 2;
            let row = result.map_err(|e| invalid(line, e.to_string()))?;
            let date = NaiveDate::parse_from_str(row.date.trim(), "%Y-%m-%d")
                .map_err(|e| invalid(line, format!("invalid date '{}': {}", row.date, e)))?;
            let symbol = row.symbol.trim().to_uppercase();
            if symbol.is_empty() {
                return Err(invalid(line, "empty symbol".to_string()));
            }
            rows.push((date, symbol));
        }

        let timeline = UniverseTimeline::from_memberships(universe_id, rows);
        debug!(universe_id, snapshots = timeline.len(), "read universe timeline");
        Ok(timeline)
    }
}
